//! What a stressor sees from inside its worker process
//!
//! `WorkerContext` owns the worker's PRNG and stop token and borrows its
//! slot in the shared region. The first `keep_running()` (or an explicit
//! `sync_start_wait()`) starts the timed part of the run: barrier, deadline
//! timer, start timestamp, `Running` state.

use core::cell::Cell;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use nix::errno::Errno;
use kstress_core::error::{classify_errno, ErrnoClass, StressResult};
use kstress_core::prng::Mwc;
use kstress_core::stats::StatSlot;
use kstress_core::{kdebug, kwarn, ExitOutcome, StopToken, WorkerState};
use crate::config::{defaults, RunConfig};
use crate::memory::{SharedRegion, StressorBlock};
use crate::signal;

/// Wall-clock seconds since the epoch
pub fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

/// Per-worker view of the run
pub struct WorkerContext<'a> {
    name: &'a str,
    stressor: usize,
    instance: usize,
    config: &'a RunConfig,
    region: &'a SharedRegion,
    slot: &'a StatSlot,
    block: &'a StressorBlock,
    token: StopToken,
    rng: Mwc,
    started: Cell<bool>,
}

impl<'a> WorkerContext<'a> {
    pub fn new(
        name: &'a str,
        stressor: usize,
        instance: usize,
        config: &'a RunConfig,
        region: &'a SharedRegion,
    ) -> StressResult<Self> {
        Ok(Self {
            name,
            stressor,
            instance,
            config,
            region,
            slot: region.slot(stressor, instance)?,
            block: region.stressor_block(stressor)?,
            token: StopToken::process(),
            rng: Mwc::new(),
            started: Cell::new(false),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.name
    }

    #[inline]
    pub fn instance(&self) -> usize {
        self.instance
    }

    #[inline]
    pub fn stressor_index(&self) -> usize {
        self.stressor
    }

    #[inline]
    pub fn config(&self) -> &RunConfig {
        self.config
    }

    #[inline]
    pub fn verify(&self) -> bool {
        self.config.verify
    }

    #[inline]
    pub fn slot(&self) -> &StatSlot {
        self.slot
    }

    #[inline]
    pub fn region(&self) -> &SharedRegion {
        self.region
    }

    #[inline]
    pub fn block(&self) -> &StressorBlock {
        self.block
    }

    #[inline]
    pub fn token(&self) -> &StopToken {
        &self.token
    }

    /// This worker's generator
    #[inline]
    pub fn rng(&mut self) -> &mut Mwc {
        &mut self.rng
    }

    /// Hot-loop predicate
    ///
    /// False once the deadline fired, a stop was requested, or this
    /// instance reached `max_ops`.
    #[inline]
    pub fn keep_running(&self) -> bool {
        if !self.started.get() {
            self.sync_start_wait();
        }
        if self.token.is_stopped() || self.region.stop_requested() {
            return false;
        }
        self.config.max_ops == 0 || self.slot.bogo_get() < self.config.max_ops
    }

    // Bogo-ops on this worker's own slot

    #[inline]
    pub fn bogo_inc(&self) {
        self.slot.bogo_inc();
    }

    #[inline]
    pub fn bogo_add(&self, n: u64) {
        self.slot.bogo_add(n);
    }

    #[inline]
    pub fn bogo_get(&self) -> u64 {
        self.slot.bogo_get()
    }

    #[inline]
    pub fn bogo_set(&self, n: u64) {
        self.slot.bogo_set(n);
    }

    /// Record a lifecycle transition in the slot
    pub fn announce_state(&self, state: WorkerState) {
        let cur = self.slot.state();
        if cur != state && !cur.can_transition_to(state) {
            kdebug!("{}: instance {} state {} -> {}", self.name, self.instance, cur, state);
        }
        self.slot.set_state(state);
    }

    /// Start the timed part of the run; no-op after the first call
    ///
    /// With sync start on, blocks at the stressor's barrier until the parent
    /// releases every instance. Returns false if the barrier gave up
    /// (timeout or stop) rather than opening.
    pub fn sync_start_wait(&self) -> bool {
        if self.started.replace(true) {
            return true;
        }
        let mut released = true;
        if self.config.sync_start {
            self.announce_state(WorkerState::SyncWait);
            let timeout = Duration::from_millis(defaults::SYNC_START_TIMEOUT_MS);
            released = self.block.barrier.wait(&self.token, timeout);
            if !released {
                kdebug!("{}: instance {} left the start barrier unreleased", self.name, self.instance);
            }
        }
        if let Err(e) = signal::arm_deadline(self.config.timeout) {
            kwarn!("{}: cannot arm deadline: {}", self.name, e);
        }
        self.slot.mark_started(wall_clock());
        self.announce_state(WorkerState::Running);
        released
    }

    /// Publish named metric `idx`
    pub fn metric_set(&self, idx: usize, desc: &str, value: f64) -> bool {
        let ok = self.slot.set_metric(idx, desc, value);
        if !ok {
            kdebug!("{}: metric index {} out of range", self.name, idx);
        }
        ok
    }

    /// Run `f` until it stops failing with EINTR
    ///
    /// Returns `None` if the worker was told to stop while retrying.
    pub fn retry_on_eintr<T>(&self, mut f: impl FnMut() -> nix::Result<T>) -> Option<nix::Result<T>> {
        loop {
            match f() {
                Err(Errno::EINTR) => {
                    if !self.keep_running() {
                        return None;
                    }
                }
                r => return Some(r),
            }
        }
    }

    /// Run `f`, retrying transient resource errors with doubling backoff
    ///
    /// EINTR retries at once. `EAGAIN`, `ENOMEM` and `ENOBUFS` get at most
    /// `fork_retries` retries, sleeping `fork_backoff_for(n)` before each.
    /// Returns `None` if the worker was told to stop while retrying.
    pub fn retry_transient<T>(&self, mut f: impl FnMut() -> nix::Result<T>) -> Option<nix::Result<T>> {
        let mut attempt = 0;
        loop {
            match f() {
                Err(Errno::EINTR) => {}
                Err(e) if attempt < self.config.fork_retries
                    && classify_errno(e as i32) == ErrnoClass::Transient =>
                {
                    let wait = self.config.fork_backoff_for(attempt);
                    kdebug!("{}: {}, retry {} in {:?}", self.name, e.desc(), attempt + 1, wait);
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                r => return Some(r),
            }
            if !self.keep_running() {
                return None;
            }
        }
    }

    /// Outcome for a stressor giving up on `errno`
    ///
    /// Missing kernel features are only logged in verify mode. Environment
    /// and exhausted resource errors skip the instance; anything else fails.
    pub fn errno_outcome(&self, what: &str, errno: Errno) -> ExitOutcome {
        match classify_errno(errno as i32) {
            ErrnoClass::Ignorable => {
                if self.verify() {
                    kdebug!("{}: {}: {}", self.name, what, errno.desc());
                }
                ExitOutcome::NotImplemented
            }
            ErrnoClass::Transient | ErrnoClass::Environment => {
                kdebug!("{}: {}: {}", self.name, what, errno.desc());
                ExitOutcome::NoResource
            }
            ErrnoClass::Other => {
                kdebug!("{}: {}: {}", self.name, what, errno.desc());
                ExitOutcome::Failure
            }
        }
    }

    /// Close out the run after the stressor returned
    pub(crate) fn finish(&self, outcome: ExitOutcome) {
        if !self.started.get() {
            // Never reached the loop; do not hold the barrier up
            self.started.set(true);
            if self.config.sync_start {
                self.block.barrier.arrive();
            }
            self.slot.mark_started(wall_clock());
        }
        let _ = signal::disarm_deadline();
        self.slot.mark_finished(wall_clock());
        self.announce_state(WorkerState::Deinit);
        self.slot.set_exit_code(outcome.code());
        self.slot.set_counter_ready(outcome != ExitOutcome::MetricsUntrustworthy);
        self.announce_state(WorkerState::Terminated);
    }
}
