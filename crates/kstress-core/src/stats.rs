//! Shared statistics slot layout
//!
//! One `StatSlot` per (stressor, instance) pair lives in the process-shared
//! region mapped before any fork. These structures have fixed `repr(C)`
//! layouts made only of atomics and padding, so:
//!
//! - the all-zero bit pattern (fresh anonymous mapping) is a valid slot
//! - a reference stays meaningful in every process that inherited the map
//!
//! Single writer per slot: only the owning worker writes its counters,
//! metrics and perf block; the parent only reads (and touches the slot
//! itself solely while the worker is dead, between reap and respawn).
//! Counter updates are therefore load + store, never read-modify-write.
//!
//! ```text
//! StatSlot (aligned to 64)
//! 0x000: bogo_ops       (u64)
//! 0x008: pid            (i32)
//! 0x00C: state          (u8)   WorkerState
//! 0x00D: counter_ready  (u8)
//! 0x00E: force_killed   (u8)
//! 0x00F: _pad
//! 0x010: exit_code      (i32)
//! 0x014: oom_restarts   (u32)
//! 0x018: start          (f64 bits)
//! 0x020: finish         (f64 bits)
//! 0x028: perf           PerfBlock
//! ....:  metrics        [NamedMetric; MAX_METRICS]
//! ```

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use crate::constants::{MAX_METRICS, MAX_PERF_COUNTERS, METRIC_DESC_LEN};
use crate::perf::PERF_INVALID;
use crate::state::WorkerState;

/// One perf counter of one worker
#[repr(C)]
pub struct CounterReading {
    /// perf fd while open, -1 when failed or closed
    fd: AtomicI32,
    _pad: u32,
    /// Scaled counter after close, `PERF_INVALID` when unusable
    raw_value: AtomicU64,
}

impl CounterReading {
    #[inline]
    pub fn fd(&self) -> i32 {
        self.fd.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_fd(&self, fd: i32) {
        self.fd.store(fd, Ordering::Relaxed);
    }

    #[inline]
    pub fn raw_value(&self) -> u64 {
        self.raw_value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_raw_value(&self, v: u64) {
        self.raw_value.store(v, Ordering::Release);
    }

    /// Value if the counter produced a usable reading
    #[inline]
    pub fn value(&self) -> Option<u64> {
        match self.raw_value() {
            PERF_INVALID => None,
            v => Some(v),
        }
    }
}

/// Per-worker perf state
#[repr(C)]
pub struct PerfBlock {
    fds_opened: AtomicU32,
    _pad: u32,
    per_counter: [CounterReading; MAX_PERF_COUNTERS],
}

impl PerfBlock {
    /// Mark every counter as not opened (fd -1, value invalid)
    pub fn reset(&self) {
        self.fds_opened.store(0, Ordering::Relaxed);
        for r in &self.per_counter {
            r.set_fd(-1);
            r.set_raw_value(PERF_INVALID);
        }
    }

    #[inline]
    pub fn fds_opened(&self) -> u32 {
        self.fds_opened.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_fds_opened(&self, n: u32) {
        self.fds_opened.store(n, Ordering::Release);
    }

    /// At least one counter was opened
    #[inline]
    pub fn succeeded(&self) -> bool {
        self.fds_opened() > 0
    }

    /// Reading at table index `idx`
    #[inline]
    pub fn reading(&self, idx: usize) -> Option<&CounterReading> {
        self.per_counter.get(idx)
    }

    #[inline]
    pub fn readings(&self) -> &[CounterReading] {
        &self.per_counter
    }

    /// Counter value at table index `idx`, `None` if invalid or out of range
    #[inline]
    pub fn counter_by_index(&self, idx: usize) -> Option<u64> {
        self.reading(idx).and_then(CounterReading::value)
    }
}

/// A named floating point metric published by a worker
#[repr(C)]
pub struct NamedMetric {
    published: AtomicBool,
    _pad: [u8; 7],
    value: AtomicU64,
    desc: [AtomicU8; METRIC_DESC_LEN],
}

impl NamedMetric {
    /// Publish `value` under `desc` (truncated to `METRIC_DESC_LEN - 1` bytes)
    pub fn set(&self, desc: &str, value: f64) {
        let bytes = desc.as_bytes();
        let n = bytes.len().min(METRIC_DESC_LEN - 1);
        for (i, slot) in self.desc.iter().enumerate() {
            let b = if i < n { bytes[i] } else { 0 };
            slot.store(b, Ordering::Relaxed);
        }
        self.value.store(value.to_bits(), Ordering::Relaxed);
        self.published.store(true, Ordering::Release);
    }

    /// Description and value, if published
    pub fn get(&self) -> Option<(String, f64)> {
        if !self.published.load(Ordering::Acquire) {
            return None;
        }
        let bytes: Vec<u8> = self
            .desc
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .take_while(|&b| b != 0)
            .collect();
        let value = f64::from_bits(self.value.load(Ordering::Relaxed));
        Some((String::from_utf8_lossy(&bytes).into_owned(), value))
    }

    pub fn clear(&self) {
        self.published.store(false, Ordering::Release);
    }
}

/// Statistics for one worker instance
#[repr(C, align(64))]
pub struct StatSlot {
    bogo_ops: AtomicU64,
    pid: AtomicI32,
    state: AtomicU8,
    counter_ready: AtomicBool,
    force_killed: AtomicBool,
    _pad: u8,
    exit_code: AtomicI32,
    oom_restarts: AtomicU32,
    start: AtomicU64,
    finish: AtomicU64,
    pub perf: PerfBlock,
    metrics: [NamedMetric; MAX_METRICS],
}

impl StatSlot {
    /// Heap-allocated zeroed slot (tests, and single-process use)
    pub fn new_boxed() -> Box<Self> {
        // Safety: every field is an atomic or padding; zero is valid
        unsafe {
            let layout = std::alloc::Layout::new::<Self>();
            let ptr = std::alloc::alloc_zeroed(layout) as *mut Self;
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(ptr)
        }
    }

    /// Prepare the slot for a fresh worker (parent side, before fork)
    pub fn prepare(&self) {
        self.bogo_ops.store(0, Ordering::Relaxed);
        self.pid.store(0, Ordering::Relaxed);
        self.state.store(WorkerState::Init as u8, Ordering::Relaxed);
        self.counter_ready.store(false, Ordering::Relaxed);
        self.force_killed.store(false, Ordering::Relaxed);
        self.exit_code.store(0, Ordering::Relaxed);
        self.oom_restarts.store(0, Ordering::Relaxed);
        self.start.store(0, Ordering::Relaxed);
        self.finish.store(0, Ordering::Relaxed);
        self.perf.reset();
        for m in &self.metrics {
            m.clear();
        }
    }

    // Bogo-ops (owner only)

    #[inline]
    pub fn bogo_inc(&self) {
        self.bogo_add(1);
    }

    #[inline]
    pub fn bogo_add(&self, n: u64) {
        let v = self.bogo_ops.load(Ordering::Relaxed);
        self.bogo_ops.store(v.saturating_add(n), Ordering::Relaxed);
    }

    #[inline]
    pub fn bogo_get(&self) -> u64 {
        self.bogo_ops.load(Ordering::Relaxed)
    }

    /// Overwrite the counter; ignored if it would move backwards
    #[inline]
    pub fn bogo_set(&self, n: u64) {
        if n >= self.bogo_get() {
            self.bogo_ops.store(n, Ordering::Relaxed);
        }
    }

    // Lifecycle

    #[inline]
    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_pid(&self, pid: i32) {
        self.pid.store(pid, Ordering::Release);
    }

    #[inline]
    pub fn counter_ready(&self) -> bool {
        self.counter_ready.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_counter_ready(&self, ready: bool) {
        self.counter_ready.store(ready, Ordering::Release);
    }

    #[inline]
    pub fn force_killed(&self) -> bool {
        self.force_killed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_force_killed(&self) {
        self.force_killed.store(true, Ordering::Release);
    }

    #[inline]
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    #[inline]
    pub fn oom_restarts(&self) -> u32 {
        self.oom_restarts.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn add_oom_restarts(&self, n: u32) {
        let v = self.oom_restarts.load(Ordering::Relaxed);
        self.oom_restarts.store(v.saturating_add(n), Ordering::Relaxed);
    }

    /// Record the wall-clock start (seconds since the epoch)
    #[inline]
    pub fn mark_started(&self, now: f64) {
        self.start.store(now.to_bits(), Ordering::Release);
    }

    /// Record the wall-clock finish (seconds since the epoch)
    #[inline]
    pub fn mark_finished(&self, now: f64) {
        self.finish.store(now.to_bits(), Ordering::Release);
    }

    /// Seconds between start and finish, 0 if either is missing
    pub fn duration(&self) -> f64 {
        let start = f64::from_bits(self.start.load(Ordering::Acquire));
        let finish = f64::from_bits(self.finish.load(Ordering::Acquire));
        if start > 0.0 && finish >= start {
            finish - start
        } else {
            0.0
        }
    }

    // Metrics

    /// Publish metric `idx`; false if `idx` is out of range
    pub fn set_metric(&self, idx: usize, desc: &str, value: f64) -> bool {
        match self.metrics.get(idx) {
            Some(m) => {
                m.set(desc, value);
                true
            }
            None => false,
        }
    }

    pub fn metric(&self, idx: usize) -> Option<(String, f64)> {
        self.metrics.get(idx).and_then(NamedMetric::get)
    }

    /// All published metrics as `(index, description, value)`
    pub fn metrics(&self) -> impl Iterator<Item = (usize, String, f64)> + '_ {
        self.metrics
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.get().map(|(d, v)| (i, d, v)))
    }
}

// Layout checks
const _: () = {
    assert!(core::mem::size_of::<CounterReading>() == 16);
    assert!(core::mem::align_of::<StatSlot>() == 64);
    assert!(core::mem::size_of::<StatSlot>() % 64 == 0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_slot_is_valid() {
        let slot = StatSlot::new_boxed();
        assert_eq!(slot.bogo_get(), 0);
        assert_eq!(slot.state(), WorkerState::Init);
        assert!(!slot.perf.succeeded());
        assert_eq!(slot.metrics().count(), 0);
        assert_eq!(slot.duration(), 0.0);
    }

    #[test]
    fn test_bogo_ops_monotonic() {
        let slot = StatSlot::new_boxed();
        slot.bogo_inc();
        slot.bogo_add(9);
        assert_eq!(slot.bogo_get(), 10);
        slot.bogo_set(5);
        assert_eq!(slot.bogo_get(), 10);
        slot.bogo_set(20);
        assert_eq!(slot.bogo_get(), 20);
        slot.bogo_add(u64::MAX);
        assert_eq!(slot.bogo_get(), u64::MAX);
    }

    #[test]
    fn test_prepare_resets_perf() {
        let slot = StatSlot::new_boxed();
        slot.prepare();
        let r = slot.perf.reading(0).unwrap();
        assert_eq!(r.fd(), -1);
        assert_eq!(r.raw_value(), PERF_INVALID);
        assert_eq!(slot.perf.counter_by_index(0), None);
        assert!(slot.perf.reading(MAX_PERF_COUNTERS).is_none());
    }

    #[test]
    fn test_metrics() {
        let slot = StatSlot::new_boxed();
        assert!(slot.set_metric(0, "ops per sec", 12.5));
        assert!(slot.set_metric(3, "a description that is far longer than thirty two bytes", 1.0));
        assert!(!slot.set_metric(MAX_METRICS, "out of range", 1.0));

        assert_eq!(slot.metric(0), Some(("ops per sec".to_string(), 12.5)));
        let (desc, _) = slot.metric(3).unwrap();
        assert_eq!(desc.len(), METRIC_DESC_LEN - 1);
        assert_eq!(slot.metrics().count(), 2);
        assert_eq!(slot.metric(1), None);
    }

    #[test]
    fn test_duration() {
        let slot = StatSlot::new_boxed();
        slot.mark_started(100.0);
        assert_eq!(slot.duration(), 0.0);
        slot.mark_finished(102.5);
        assert_eq!(slot.duration(), 2.5);
    }

    #[test]
    fn test_flags() {
        let slot = StatSlot::new_boxed();
        slot.set_state(WorkerState::Running);
        slot.set_counter_ready(true);
        slot.set_force_killed();
        slot.add_oom_restarts(2);
        slot.set_exit_code(3);
        assert_eq!(slot.state(), WorkerState::Running);
        assert!(slot.counter_ready());
        assert!(slot.force_killed());
        assert_eq!(slot.oom_restarts(), 2);
        assert_eq!(slot.exit_code(), 3);
    }
}
