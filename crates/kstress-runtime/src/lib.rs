//! # kstress-runtime
//!
//! Linux runtime for the kstress harness.
//!
//! This crate provides:
//! - Run configuration (environment + builder)
//! - The process-shared statistics region (anonymous MAP_SHARED mapping)
//! - Per-stressor start barriers (futex on Linux)
//! - Signal handling and the per-worker deadline timer
//! - perf_event_open counters per worker
//! - Fork orchestration, exit classification and OOM restarts
//! - Run summaries and perf reports

#![allow(dead_code)]

pub mod config;
pub mod memory;
pub mod barrier;
pub mod signal;
pub mod perf;
pub mod entropy;
pub mod context;
pub mod worker;
pub mod oom;
pub mod report;

// Re-exports
pub use config::{ConfigError, RunConfig};
pub use memory::{SharedRegion, StressorBlock};
pub use barrier::SyncBarrier;
pub use context::{wall_clock, WorkerContext};
pub use worker::{
    fork_with_retry, kill_and_wait, redo_fork_on_error, EntryFn, ExitClass, Job, JobResult,
    Orchestrator, RestartDecision, RestartPolicy, WorkerHandle, WorkerReport,
};
pub use oom::{oomable_child, set_oom_adjustment, RestartCounts};
pub use perf::{perf_init, PerfTable};
pub use report::{dump_report, summary_report, OutcomeCounts, Report, StressorSummary};

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "linux"))] {
        compile_error!("kstress-runtime supports Linux only");
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::{Mutex, MutexGuard};
    use kstress_core::kprint::{self, LogLevel};

    static FORK_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that fork; workers log nothing
    pub(crate) fn fork_guard() -> MutexGuard<'static, ()> {
        kprint::set_log_level(LogLevel::Off);
        FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
