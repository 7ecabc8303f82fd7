//! kstress command line
//!
//! Runs the named stressors in parallel and prints the bogo-ops summary,
//! the perf report (with `--perf`) and the YAML block (with `--yaml`).
//!
//! # Environment Variables
//!
//! - `KSTRESS_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `KSTRESS_FLUSH_EPRINT=1` - Flush every log line immediately
//! - `KSTRESS_INSTANCES`, `KSTRESS_TIMEOUT`, ... - Run defaults, overridden by options

use std::process::ExitCode;
use kstress::{init_logging, kerror, RunConfig, StressRun, StressorKind};
use kstress_core::env::{parse_duration, parse_seed};

struct Cli {
    config: RunConfig,
    kinds: Vec<StressorKind>,
    yaml: bool,
}

fn usage_error(msg: &str) -> ! {
    eprintln!("kstress: {}", msg);
    eprint_usage();
    std::process::exit(2);
}

fn value<'a>(args: &'a [String], i: usize, opt: &str) -> &'a str {
    match args.get(i) {
        Some(v) => v,
        None => usage_error(&format!("{} needs a value", opt)),
    }
}

fn parsed<T: std::str::FromStr>(args: &[String], i: usize, opt: &str) -> T {
    let v = value(args, i, opt);
    v.parse().unwrap_or_else(|_| usage_error(&format!("bad value for {}: {}", opt, v)))
}

// KSTRESS_LOG_LEVEL=info cargo run -p kstress-cli -- rand udp -n 4 -t 5s
fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    let mut c = Cli { config: RunConfig::from_env(), kinds: Vec::new(), yaml: false };

    let mut i = 1;
    while i < args.len() {
        let opt = args[i].as_str();
        match opt {
            "-n" | "--instances" => { i += 1; c.config.instances = parsed(&args, i, opt); }
            "-t" | "--timeout" => {
                i += 1;
                let v = value(&args, i, opt);
                c.config.timeout = parse_duration(v)
                    .unwrap_or_else(|| usage_error(&format!("bad duration: {}", v)));
            }
            "--max-ops" => { i += 1; c.config.max_ops = parsed(&args, i, opt); }
            "--max-instances" => { i += 1; c.config.max_instances = parsed(&args, i, opt); }
            "--seed" => {
                i += 1;
                let v = value(&args, i, opt);
                c.config.seed = Some(parse_seed(v).unwrap_or_else(|| usage_error(&format!("bad seed: {}", v))));
            }
            "--random-seed" => c.config.random_seed = true,
            "--sync-start" => c.config.sync_start = true,
            "--oomable" => c.config.oomable = true,
            "--perf" => c.config.perf = true,
            "--verify" => c.config.verify = true,
            "--yaml" => c.yaml = true,
            "--list" => {
                for kind in StressorKind::ALL {
                    println!("{}", kind);
                }
                std::process::exit(0);
            }
            "-h" | "--help" => { eprint_usage(); std::process::exit(0); }
            "all" => c.kinds.extend(StressorKind::ALL),
            s if !s.starts_with('-') => match StressorKind::from_name(s) {
                Some(kind) => c.kinds.push(kind),
                None => usage_error(&format!("unknown stressor: {}", s)),
            },
            other => usage_error(&format!("unknown option: {}", other)),
        }
        i += 1;
    }

    if c.kinds.is_empty() {
        usage_error("no stressor given");
    }
    c
}

fn eprint_usage() {
    eprintln!(
"Usage: kstress [OPTIONS] <STRESSOR>... | all

Options:
  -n  --instances <N>       Instances per stressor, 0 = one per CPU (default: 1)
  -t  --timeout <T>         Run time, s/m/h/d suffixes allowed (default: 10s)
      --max-ops <N>         Stop each instance after N bogo-ops
      --max-instances <N>   Slot capacity per stressor (default: 64)
      --seed <W,Z>          Explicit PRNG seed
      --random-seed         Seed from system entropy
      --sync-start          Release all instances together
      --oomable             Do not restart OOM-killed workers
      --perf                Collect perf_event counters
      --verify              Check results inside the stressors
      --yaml                Print the YAML block
      --list                List stressors");
}

fn main() -> ExitCode {
    init_logging();
    let cli = parse_args();
    if let Err(e) = cli.config.validate() {
        usage_error(&e.to_string());
    }
    cli.config.print();

    let summary = match StressRun::new(cli.config).stressors(cli.kinds).run() {
        Ok(s) => s,
        Err(e) => {
            kerror!("run failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for (kind, reason) in &summary.skipped {
        println!("{}: skipped, {}", kind, reason);
    }
    let report = summary.report();
    print!("{}", report.console);
    if let Some(perf) = &summary.perf {
        print!("{}", perf.console);
    }
    println!("run completed in {:.2}s", summary.duration);

    if cli.yaml {
        print!("---\n{}", report.yaml);
        if let Some(perf) = &summary.perf {
            print!("{}", perf.yaml);
        }
    }

    ExitCode::from(summary.exit_outcome().code() as u8)
}
