//! Run driver
//!
//! `StressRun` maps the shared region for the selected stressors, forks
//! their instances through the orchestrator and turns the region back
//! into a `RunSummary` once every worker has been reaped.

use kstress_core::{kdebug, kinfo, kwarn, token, ExitOutcome, StressResult};
use kstress_runtime::{
    dump_report, perf_init, set_oom_adjustment, signal, summary_report, wall_clock, EntryFn, Job,
    JobResult, Orchestrator, Report, RunConfig, SharedRegion, StressorSummary, WorkerContext,
};
use crate::stressors::StressorKind;

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub results: Vec<JobResult>,
    pub stressors: Vec<StressorSummary>,
    /// Stressors not run, with the reason
    pub skipped: Vec<(StressorKind, &'static str)>,
    /// Present when perf was on and at least one counter opened
    pub perf: Option<Report>,
    /// Set when workers found perf_event_open unusable
    pub perf_unavailable: bool,
    /// Wall-clock seconds for the whole run
    pub duration: f64,
}

impl RunSummary {
    /// Every started stressor passed
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed())
    }

    /// Bogo-ops table and YAML metrics
    pub fn report(&self) -> Report {
        summary_report(&self.stressors)
    }

    /// Outcome for the process exit code
    pub fn exit_outcome(&self) -> ExitOutcome {
        let outcomes = || self.results.iter().flat_map(|r| r.workers.iter().map(|w| w.outcome));
        if self.results.iter().any(|r| r.spawn_error.is_some()) {
            return ExitOutcome::Failure;
        }
        if outcomes().any(|o| !o.is_benign() && o != ExitOutcome::MetricsUntrustworthy) {
            ExitOutcome::Failure
        } else if outcomes().any(|o| o == ExitOutcome::MetricsUntrustworthy) {
            ExitOutcome::MetricsUntrustworthy
        } else {
            ExitOutcome::Success
        }
    }
}

/// A set of stressors run in parallel under one configuration
pub struct StressRun {
    config: RunConfig,
    kinds: Vec<StressorKind>,
}

impl StressRun {
    pub fn new(config: RunConfig) -> Self {
        Self { config, kinds: Vec::new() }
    }

    /// Add a stressor; duplicates are ignored
    pub fn stressor(mut self, kind: StressorKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    pub fn stressors(self, kinds: impl IntoIterator<Item = StressorKind>) -> Self {
        kinds.into_iter().fold(self, |run, k| run.stressor(k))
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn kinds(&self) -> &[StressorKind] {
        &self.kinds
    }

    /// Run every supported stressor to completion
    ///
    /// Fails only when the shared region cannot be mapped; per-stressor
    /// problems end up in the summary.
    pub fn run(&self) -> StressResult<RunSummary> {
        let mut skipped = Vec::new();
        let mut selected = Vec::new();
        for &kind in &self.kinds {
            match kind.stressor().supported() {
                Ok(()) => selected.push(kind),
                Err(reason) => {
                    kinfo!("{}: skipped, {}", kind, reason);
                    skipped.push((kind, reason));
                }
            }
        }

        let instances = self.config.effective_instances().min(self.config.max_instances);
        let region = SharedRegion::map(selected.len().max(1), self.config.max_instances)?;
        let perf_table = self.config.perf.then(perf_init);

        set_oom_adjustment(false);
        // A SIGINT from an earlier run must not stop this one
        token::reset_stop();
        if let Err(e) = signal::install_stop_handlers() {
            kwarn!("cannot install stop handlers: {}", e);
        }

        let entries: Vec<Box<EntryFn<'static>>> = selected
            .iter()
            .map(|&kind| {
                let s = kind.stressor();
                Box::new(move |ctx: &mut WorkerContext<'_>| s.run(ctx)) as Box<EntryFn<'static>>
            })
            .collect();
        let jobs: Vec<Job<'_>> = selected
            .iter()
            .zip(&entries)
            .enumerate()
            .map(|(index, (kind, entry))| Job {
                index,
                name: kind.name(),
                instances,
                entry: &**entry,
            })
            .collect();

        kinfo!(
            "dispatching {} stressor(s), {} instance(s) each, timeout {:?}",
            jobs.len(),
            instances,
            self.config.timeout
        );
        let start = wall_clock();
        let mut orchestrator = Orchestrator::new(self.config.clone(), &region);
        if let Some(table) = perf_table {
            orchestrator = orchestrator.with_perf(table);
        }
        let results = orchestrator.run(&jobs);
        let duration = wall_clock() - start;

        if let Err(e) = signal::restore_default_handlers() {
            kdebug!("cannot restore signal handlers: {}", e);
        }

        let stressors: Vec<StressorSummary> =
            results.iter().map(|r| StressorSummary::collect(&region, r)).collect();
        let perf = if self.config.perf {
            let names: Vec<(usize, &str)> = results.iter().map(|r| (r.index, r.name.as_str())).collect();
            dump_report(&region, &names, instances, duration)
        } else {
            None
        };
        let perf_unavailable = region.perf_unavailable();
        if self.config.perf && perf_unavailable {
            kwarn!("perf events unavailable, no counters collected");
        }

        Ok(RunSummary {
            results,
            stressors,
            skipped,
            perf,
            perf_unavailable,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;
    use kstress_core::kprint::{self, LogLevel};
    use kstress_runtime::{ExitClass, WorkerReport};

    static FORK_LOCK: Mutex<()> = Mutex::new(());

    fn fork_guard() -> MutexGuard<'static, ()> {
        kprint::set_log_level(LogLevel::Off);
        FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn quick(instances: usize) -> RunConfig {
        RunConfig::new()
            .instances(instances)
            .max_ops(50)
            .timeout(Duration::from_secs(5))
            .verify(true)
    }

    #[test]
    fn test_run_rand_and_getpid() {
        let _g = fork_guard();
        let summary = StressRun::new(quick(2))
            .stressors([StressorKind::Rand, StressorKind::Getpid, StressorKind::Rand])
            .run()
            .unwrap();
        assert_eq!(summary.results.len(), 2);
        assert!(summary.passed());
        assert_eq!(summary.exit_outcome(), ExitOutcome::Success);
        for s in &summary.stressors {
            assert_eq!(s.bogo_ops, 100);
            assert_eq!(s.instances, 2);
        }
        assert_eq!(summary.stressors[0].metrics, vec![("mwc32 draws per bogo-op".to_string(), 59.0)]);
        assert!(summary.perf.is_none());
        assert!(summary.report().yaml.contains("  - stressor: getpid\n"));
    }

    #[test]
    fn test_run_udp() {
        let _g = fork_guard();
        let summary = StressRun::new(quick(2)).stressor(StressorKind::Udp).run().unwrap();
        if summary.skipped.is_empty() {
            assert!(summary.passed());
            let s = &summary.stressors[0];
            assert_eq!(s.bogo_ops, 100);
            let (desc, per_op) = &s.metrics[0];
            assert_eq!(desc, "bytes per bogo-op");
            assert!(*per_op >= 16.0 && *per_op <= 1024.0);
        }
    }

    #[test]
    fn test_run_vm() {
        let _g = fork_guard();
        std::env::set_var("KSTRESS_VM_BYTES", "1048576");
        let summary = StressRun::new(quick(1)).stressor(StressorKind::Vm).run().unwrap();
        assert!(summary.passed());
        assert_eq!(summary.stressors[0].bogo_ops, 50);
        assert_eq!(summary.stressors[0].oom_restarts, 0);
    }

    #[test]
    fn test_run_after_interrupted_run() {
        let _g = fork_guard();
        token::request_stop();
        let summary = StressRun::new(quick(1)).stressor(StressorKind::Getpid).run().unwrap();
        assert!(token::keep_running_flag());
        assert!(summary.passed());
        assert_eq!(summary.stressors[0].bogo_ops, 50);
    }

    #[test]
    fn test_exit_outcome() {
        let worker = |outcome| WorkerReport {
            instance: 0,
            pid: 1,
            class: ExitClass::Success,
            outcome,
            force_killed: false,
            restarts: 0,
        };
        let job = |outcome| JobResult {
            index: 0,
            name: "unit".to_string(),
            started: 1,
            spawn_error: None,
            workers: vec![worker(outcome)],
        };
        let summary = |outcomes: &[ExitOutcome]| RunSummary {
            results: outcomes.iter().map(|&o| job(o)).collect(),
            stressors: Vec::new(),
            skipped: Vec::new(),
            perf: None,
            perf_unavailable: false,
            duration: 0.0,
        };
        assert_eq!(summary(&[ExitOutcome::Success, ExitOutcome::NoResource]).exit_outcome(), ExitOutcome::Success);
        assert_eq!(
            summary(&[ExitOutcome::Success, ExitOutcome::MetricsUntrustworthy]).exit_outcome(),
            ExitOutcome::MetricsUntrustworthy
        );
        assert_eq!(
            summary(&[ExitOutcome::Failure, ExitOutcome::MetricsUntrustworthy]).exit_outcome(),
            ExitOutcome::Failure
        );
    }
}
