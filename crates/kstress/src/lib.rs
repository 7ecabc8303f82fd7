//! # kstress - Kernel stress harness
//!
//! Runs stressors as forked worker processes that hammer one kernel
//! subsystem each, counting "bogo-ops" into a shared statistics region the
//! parent reads back once every worker is reaped.
//!
//! ## Features
//!
//! - **Fork orchestration**: N instances per stressor, all stressors in parallel
//! - **Deadlines**: per-worker SIGALRM timer, SIGKILL for stragglers
//! - **Sync start**: futex barrier so every instance begins together
//! - **OOM handling**: workers are preferred OOM targets and get restarted
//! - **Perf counters**: hardware, software, cache and tracepoint events per worker
//! - **Reproducible PRNG**: multiply-with-carry with fixed default seeds
//!
//! ## Quick Start
//!
//! ```ignore
//! use kstress::{RunConfig, StressRun, StressorKind};
//! use std::time::Duration;
//!
//! fn main() {
//!     let config = RunConfig::new()
//!         .instances(4)
//!         .timeout(Duration::from_secs(5));
//!
//!     let summary = StressRun::new(config)
//!         .stressor(StressorKind::Rand)
//!         .stressor(StressorKind::Getpid)
//!         .run()
//!         .unwrap();
//!
//!     print!("{}", summary.report().console);
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Parent (StressRun)                       │
//! │        map region, fork, poll, classify, report             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ fork
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │      │  Worker   │      │  Worker   │
//!    │ rand #0   │      │ rand #1   │      │ udp #0    │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                 Shared Statistics Region                │
//!    │   header │ stressor blocks │ slots[stressor][instance]  │
//!    └─────────────────────────────────────────────────────────┘
//! ```

pub mod stressors;
mod run;

// Re-export core types
pub use kstress_core::{
    Mwc,
    WorkerState,
    ExitOutcome,
    StatSlot,
    StopToken,
    StressError,
    StressResult,
    PerfCounterId,
    reserve_ports,
    release_ports,
};

// Re-export kprint macros for debug logging
pub use kstress_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use kstress_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use kstress_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use kstress_runtime::{
    RunConfig,
    ConfigError,
    SharedRegion,
    WorkerContext,
    Orchestrator,
    Job,
    JobResult,
    WorkerReport,
    ExitClass,
    Report,
    StressorSummary,
    oomable_child,
    kill_and_wait,
};

pub use run::{RunSummary, StressRun};
pub use stressors::{Stressor, StressorKind};
