//! Sync-start barrier
//!
//! Lives in the shared region, one per stressor. Workers arrive and block
//! until the parent opens the barrier, so every instance enters its timed
//! loop at the same moment.
//!
//! Two words, both valid when zero:
//! - `arrived`: instances that reached the barrier (or gave up before it)
//! - `released`: futex word, 0 = closed, 1 = open
//!
//! A barrier opens exactly once per run. Instances respawned after an OOM
//! kill find it open and pass straight through.

use core::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use kstress_core::StopToken;

mod futex_linux;
use futex_linux::{wait_while_closed, wake_all};

/// Longest single sleep before re-checking the stop token
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Process-shared start barrier
#[repr(C)]
pub struct SyncBarrier {
    arrived: AtomicU32,
    released: AtomicU32,
}

impl SyncBarrier {
    pub const fn new() -> Self {
        Self {
            arrived: AtomicU32::new(0),
            released: AtomicU32::new(0),
        }
    }

    /// Close the barrier for a new run (parent, before forking)
    pub fn reset(&self) {
        self.arrived.store(0, Ordering::Relaxed);
        self.released.store(0, Ordering::Release);
    }

    #[inline]
    pub fn arrived(&self) -> u32 {
        self.arrived.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire) != 0
    }

    /// Count this instance without waiting
    ///
    /// For workers that bail out before reaching their loop, so the parent
    /// does not sit out the whole timeout on them.
    pub fn arrive(&self) {
        self.arrived.fetch_add(1, Ordering::AcqRel);
    }

    /// Arrive and block until released, stopped, or `timeout` passes
    ///
    /// Returns true if the barrier was opened.
    pub fn wait(&self, token: &StopToken, timeout: Duration) -> bool {
        self.arrive();
        let deadline = Instant::now() + timeout;
        while !self.is_released() {
            if token.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            wait_while_closed(&self.released, (deadline - now).min(WAIT_SLICE));
        }
        true
    }

    /// Open the barrier and wake every waiter
    pub fn release(&self) {
        self.released.store(1, Ordering::Release);
        wake_all(&self.released);
    }

    /// Wait until `expected` instances arrived (or `timeout`), then release
    ///
    /// Returns the number that had arrived.
    pub fn release_when_arrived(&self, expected: u32, timeout: Duration) -> u32 {
        let deadline = Instant::now() + timeout;
        let mut arrived = self.arrived();
        while arrived < expected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
            arrived = self.arrived();
        }
        self.release();
        arrived
    }
}

impl Default for SyncBarrier {
    fn default() -> Self {
        Self::new()
    }
}
