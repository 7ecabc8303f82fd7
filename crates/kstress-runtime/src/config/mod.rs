//! Run configuration
//!
//! Provides compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use kstress_runtime::config::RunConfig;
//!
//! // Defaults with env overrides
//! let config = RunConfig::from_env();
//!
//! // Or customize programmatically
//! let config = RunConfig::new()
//!     .instances(4)
//!     .timeout(Duration::from_secs(30))
//!     .perf(true);
//! ```

pub mod defaults;

use std::time::Duration;
use kstress_core::constants::MAX_INSTANCES;
use kstress_core::env::{env_get, env_get_bool, env_get_duration, env_get_opt, parse_seed};
use kstress_core::kinfo;
use kstress_core::prng::is_degenerate_seed;

/// Configuration for one harness invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Worker instances per stressor (0 = one per online CPU)
    pub instances: usize,
    /// Slot capacity per stressor
    pub max_instances: usize,
    /// Run time per stressor
    pub timeout: Duration,
    /// Bogo-ops limit per instance (0 = unlimited)
    pub max_ops: u64,
    /// Reseed from environmental entropy
    pub random_seed: bool,
    /// Explicit `(w, z)` seed, overrides `random_seed`
    pub seed: Option<(u32, u32)>,
    /// Release all instances of a stressor together
    pub sync_start: bool,
    /// Accept OOM kills instead of restarting
    pub oomable: bool,
    /// Restart budget per instance after OOM kills
    pub max_oom_restarts: u32,
    /// fork() retries on transient errors
    pub fork_retries: u32,
    /// First fork retry backoff
    pub fork_backoff: Duration,
    /// Open perf counters per worker
    pub perf: bool,
    /// SIGALRM to SIGKILL grace for overrunning workers
    pub kill_grace: Duration,
    /// Verify mode: log ignorable errors, run self-checks
    pub verify: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RunConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `KSTRESS_INSTANCES` - Instances per stressor (0 = per CPU)
    /// - `KSTRESS_MAX_INSTANCES` - Slot capacity per stressor
    /// - `KSTRESS_TIMEOUT` - Run time, e.g. `60`, `90s`, `5m`, `1h`
    /// - `KSTRESS_MAX_OPS` - Bogo-ops limit per instance
    /// - `KSTRESS_RANDOM_SEED` - Seed from entropy (0/1)
    /// - `KSTRESS_SEED` - Explicit `w,z` seed pair
    /// - `KSTRESS_SYNC_START` - Barrier before the timed loop (0/1)
    /// - `KSTRESS_OOMABLE` - Do not restart OOM-killed workers (0/1)
    /// - `KSTRESS_MAX_OOM_RESTARTS` - OOM restart budget
    /// - `KSTRESS_FORK_RETRIES` - fork() retries
    /// - `KSTRESS_FORK_BACKOFF` - First retry backoff, e.g. `10ms`
    /// - `KSTRESS_PERF` - Open perf counters (0/1)
    /// - `KSTRESS_KILL_GRACE` - SIGALRM to SIGKILL grace, e.g. `2s`
    /// - `KSTRESS_VERIFY` - Verify mode (0/1)
    pub fn from_env() -> Self {
        let d = Self::new();
        Self {
            instances: env_get("KSTRESS_INSTANCES", d.instances),
            max_instances: env_get("KSTRESS_MAX_INSTANCES", d.max_instances),
            timeout: env_get_duration("KSTRESS_TIMEOUT", d.timeout),
            max_ops: env_get("KSTRESS_MAX_OPS", d.max_ops),
            random_seed: env_get_bool("KSTRESS_RANDOM_SEED", d.random_seed),
            seed: env_get_opt::<String>("KSTRESS_SEED")
                .and_then(|s| parse_seed(&s))
                .or(d.seed),
            sync_start: env_get_bool("KSTRESS_SYNC_START", d.sync_start),
            oomable: env_get_bool("KSTRESS_OOMABLE", d.oomable),
            max_oom_restarts: env_get("KSTRESS_MAX_OOM_RESTARTS", d.max_oom_restarts),
            fork_retries: env_get("KSTRESS_FORK_RETRIES", d.fork_retries),
            fork_backoff: env_get_duration("KSTRESS_FORK_BACKOFF", d.fork_backoff),
            perf: env_get_bool("KSTRESS_PERF", d.perf),
            kill_grace: env_get_duration("KSTRESS_KILL_GRACE", d.kill_grace),
            verify: env_get_bool("KSTRESS_VERIFY", d.verify),
        }
    }

    /// Create config with library defaults (no env override).
    pub fn new() -> Self {
        Self {
            instances: defaults::INSTANCES,
            max_instances: defaults::MAX_INSTANCES,
            timeout: Duration::from_secs(defaults::TIMEOUT_SECS),
            max_ops: defaults::MAX_OPS,
            random_seed: defaults::RANDOM_SEED,
            seed: None,
            sync_start: defaults::SYNC_START,
            oomable: defaults::OOMABLE,
            max_oom_restarts: defaults::MAX_OOM_RESTARTS,
            fork_retries: defaults::FORK_RETRIES,
            fork_backoff: Duration::from_millis(defaults::FORK_BACKOFF_MS),
            perf: defaults::PERF,
            kill_grace: Duration::from_millis(defaults::KILL_GRACE_MS),
            verify: defaults::VERIFY,
        }
    }

    // Builder methods

    pub fn instances(mut self, n: usize) -> Self {
        self.instances = n;
        self
    }

    pub fn max_instances(mut self, n: usize) -> Self {
        self.max_instances = n;
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    pub fn max_ops(mut self, n: u64) -> Self {
        self.max_ops = n;
        self
    }

    pub fn random_seed(mut self, enable: bool) -> Self {
        self.random_seed = enable;
        self
    }

    pub fn seed(mut self, w: u32, z: u32) -> Self {
        self.seed = Some((w, z));
        self
    }

    pub fn sync_start(mut self, enable: bool) -> Self {
        self.sync_start = enable;
        self
    }

    pub fn oomable(mut self, enable: bool) -> Self {
        self.oomable = enable;
        self
    }

    pub fn max_oom_restarts(mut self, n: u32) -> Self {
        self.max_oom_restarts = n;
        self
    }

    pub fn fork_retries(mut self, n: u32) -> Self {
        self.fork_retries = n;
        self
    }

    pub fn fork_backoff(mut self, d: Duration) -> Self {
        self.fork_backoff = d;
        self
    }

    pub fn perf(mut self, enable: bool) -> Self {
        self.perf = enable;
        self
    }

    pub fn kill_grace(mut self, d: Duration) -> Self {
        self.kill_grace = d;
        self
    }

    pub fn verify(mut self, enable: bool) -> Self {
        self.verify = enable;
        self
    }

    /// Instances to actually start, resolving 0 to the online CPU count
    pub fn effective_instances(&self) -> usize {
        if self.instances > 0 {
            return self.instances;
        }
        // Safety: sysconf has no memory side effects
        let cpus = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if cpus > 0 {
            (cpus as usize).min(self.max_instances)
        } else {
            1
        }
    }

    /// Backoff before fork retry `attempt` (0-based), doubling up to the cap
    pub fn fork_backoff_for(&self, attempt: u32) -> Duration {
        let cap = Duration::from_millis(defaults::FORK_BACKOFF_MAX_MS);
        self.fork_backoff
            .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .map_or(cap, |d| d.min(cap))
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_instances == 0 {
            return Err(ConfigError::InvalidValue("max_instances must be > 0"));
        }
        if self.max_instances > MAX_INSTANCES {
            return Err(ConfigError::InvalidValue("max_instances must be <= 4096"));
        }
        if self.effective_instances() > self.max_instances {
            return Err(ConfigError::InvalidValue("instances must be <= max_instances"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue("timeout must be > 0"));
        }
        if let Some((w, z)) = self.seed {
            if is_degenerate_seed(w, z) {
                return Err(ConfigError::InvalidValue("seed halves must be non-zero and not a fixed point"));
            }
        }
        Ok(())
    }

    /// Log the configuration at info level
    pub fn print(&self) {
        kinfo!("kstress configuration:");
        kinfo!("  instances:         {}", self.effective_instances());
        kinfo!("  max_instances:     {}", self.max_instances);
        kinfo!("  timeout:           {:?}", self.timeout);
        kinfo!("  max_ops:           {}", self.max_ops);
        match self.seed {
            Some((w, z)) => kinfo!("  seed:              {},{}", w, z),
            None => kinfo!("  random_seed:       {}", self.random_seed),
        }
        kinfo!("  sync_start:        {}", self.sync_start);
        kinfo!("  oomable:           {}", self.oomable);
        kinfo!("  max_oom_restarts:  {}", self.max_oom_restarts);
        kinfo!("  fork_retries:      {}", self.fork_retries);
        kinfo!("  fork_backoff:      {:?}", self.fork_backoff);
        kinfo!("  perf:              {}", self.perf);
        kinfo!("  kill_grace:        {:?}", self.kill_grace);
        kinfo!("  verify:            {}", self.verify);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RunConfig::new();
        assert_eq!(config.instances, 1);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RunConfig::new()
            .instances(8)
            .max_ops(100)
            .seed(1, 2)
            .sync_start(true);

        assert_eq!(config.instances, 8);
        assert_eq!(config.max_ops, 100);
        assert_eq!(config.seed, Some((1, 2)));
        assert!(config.sync_start);
    }

    #[test]
    fn test_validation() {
        assert!(RunConfig::new().max_instances(0).validate().is_err());
        assert!(RunConfig::new().max_instances(5000).validate().is_err());
        assert!(RunConfig::new().instances(10).max_instances(4).validate().is_err());
        assert!(RunConfig::new().timeout(Duration::ZERO).validate().is_err());
        assert!(RunConfig::new().seed(0, 5).validate().is_err());
        assert!(RunConfig::new().seed(1_179_648_511, 2_422_800_383).validate().is_err());
        assert!(RunConfig::new().seed(0x464f_ffff, 5).validate().is_err());
        assert!(RunConfig::new().seed(5, 0x9068_ffff).validate().is_err());
        assert!(RunConfig::new().seed(5, 7).validate().is_ok());
    }

    #[test]
    fn test_per_cpu_instances() {
        let config = RunConfig::new().instances(0).max_instances(2);
        let n = config.effective_instances();
        assert!((1..=2).contains(&n));
    }

    #[test]
    fn test_fork_backoff_doubles_and_caps() {
        let config = RunConfig::new();
        assert_eq!(config.fork_backoff_for(0), Duration::from_millis(10));
        assert_eq!(config.fork_backoff_for(1), Duration::from_millis(20));
        assert_eq!(config.fork_backoff_for(3), Duration::from_millis(80));
        assert_eq!(config.fork_backoff_for(10), Duration::from_secs(1));
        assert_eq!(config.fork_backoff_for(40), Duration::from_secs(1));
    }
}
