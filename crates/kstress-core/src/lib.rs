//! # kstress-core
//!
//! Core types for the kstress harness.
//!
//! This crate contains no fork/mmap/perf syscalls. Everything that touches
//! the kernel lives in `kstress-runtime`; what is here is the data layout
//! and the pure math both the parent and the workers agree on.
//!
//! ## Modules
//!
//! - `prng` - Multiply-with-carry generator with bit caches and bounded draws
//! - `state` - Worker state machine and stressor exit outcomes
//! - `stats` - Shared statistics slot layout (repr(C), zero-fill valid)
//! - `perf` - Perf counter descriptors, read scaling, rate formatting, totals
//! - `ports` - Network port range reservation table
//! - `token` - Stop token polled by stressor hot loops
//! - `error` - Error types and errno classification
//! - `spinlock` - Spinlock usable inside a process-shared mapping
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

#![allow(dead_code)]

pub mod prng;
pub mod state;
pub mod stats;
pub mod perf;
pub mod ports;
pub mod token;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use prng::{is_degenerate_seed, Mwc};
pub use state::{ExitOutcome, WorkerState};
pub use stats::{CounterReading, NamedMetric, PerfBlock, StatSlot};
pub use perf::{CounterDescriptor, PerfCounterId, PerfType, scale_rate};
pub use ports::{PortReservation, PortTable, reserve_ports, release_ports};
pub use token::StopToken;
pub use error::{classify_errno, ErrnoClass, StressError, StressResult};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_duration, env_get_opt, env_get_str, env_is_set};

/// Constants for shared memory layout
pub mod constants {
    /// Maximum perf counters tracked per worker slot
    pub const MAX_PERF_COUNTERS: usize = 64;

    /// Named metrics per worker slot
    pub const MAX_METRICS: usize = 40;

    /// Bytes reserved for a metric description (NUL padded)
    pub const METRIC_DESC_LEN: usize = 32;

    /// Cache line size for alignment
    pub const CACHE_LINE_SIZE: usize = 64;

    /// Default worker slots per stressor
    pub const DEFAULT_MAX_INSTANCES: usize = 64;

    /// Hard cap on worker slots per stressor
    pub const MAX_INSTANCES: usize = 4096;

    /// Lowest port a network stressor may reserve
    pub const MIN_PORT: u16 = 1024;

    /// Highest port a network stressor may reserve
    pub const MAX_PORT: u16 = 65535;

    /// Magic stamped into the shared region header ("KSTR")
    pub const REGION_MAGIC: u32 = 0x4B53_5452;
}
