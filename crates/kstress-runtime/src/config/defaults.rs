//! Library defaults for `RunConfig`

use kstress_core::constants::DEFAULT_MAX_INSTANCES;

/// Worker instances per stressor (0 = one per online CPU)
pub const INSTANCES: usize = 1;

/// Slot capacity per stressor in the shared region
pub const MAX_INSTANCES: usize = DEFAULT_MAX_INSTANCES;

/// Run time per stressor
pub const TIMEOUT_SECS: u64 = 10;

/// Bogo-ops limit per instance (0 = unlimited)
pub const MAX_OPS: u64 = 0;

/// Seed from environmental entropy instead of fixed constants
pub const RANDOM_SEED: bool = false;

/// Hold every instance at a barrier until all have started
pub const SYNC_START: bool = false;

/// Let the OOM killer stop a stressor for good instead of restarting it
pub const OOMABLE: bool = false;

/// Restarts after OOM kills before the worker result is accepted
pub const MAX_OOM_RESTARTS: u32 = 64;

/// fork() retries on transient errors
pub const FORK_RETRIES: u32 = 8;

/// First backoff between fork retries (doubled per attempt)
pub const FORK_BACKOFF_MS: u64 = 10;

/// Cap on the fork retry backoff
pub const FORK_BACKOFF_MAX_MS: u64 = 1000;

/// Open perf counters per worker
pub const PERF: bool = false;

/// Time between SIGALRM and SIGKILL for workers that overrun
pub const KILL_GRACE_MS: u64 = 2000;

/// Log ignorable kernel errors and run stressor self-checks
pub const VERIFY: bool = false;

/// Longest the parent holds the sync-start barrier closed
pub const SYNC_START_TIMEOUT_MS: u64 = 5000;

/// Parent waitpid polling interval
pub const POLL_INTERVAL_MS: u64 = 10;
