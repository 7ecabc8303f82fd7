//! Perf counter descriptors and the math around them
//!
//! The counter table is static. Tracepoint entries carry the tracepoint
//! path and an `UNRESOLVED` config until the runtime looks up their ids
//! in tracefs; unresolved entries are never opened.
//!
//! Everything here is pure: reading scaling for multiplexed counters,
//! summing readings across instances, derived ratios and rate formatting.
//! The syscalls live in `kstress-runtime::perf`.

use core::fmt;
use crate::constants::MAX_PERF_COUNTERS;
use crate::stats::PerfBlock;

/// Counter value that failed to open, read, or scale
pub const PERF_INVALID: u64 = u64::MAX;

/// Config of a tracepoint whose id could not be resolved
pub const UNRESOLVED: u64 = u64::MAX;

/// Kernel `perf_type_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PerfType {
    Hardware = 0,
    Software = 1,
    Tracepoint = 2,
    HwCache = 3,
}

// Kernel hw cache config encoding: id | (op << 8) | (result << 16)
const fn hw_cache(cache: u64, op: u64, result: u64) -> u64 {
    cache | (op << 8) | (result << 16)
}
const CACHE_L1D: u64 = 0;
const CACHE_LL: u64 = 2;
const CACHE_DTLB: u64 = 3;
const CACHE_BPU: u64 = 5;
const OP_READ: u64 = 0;
const RESULT_ACCESS: u64 = 0;
const RESULT_MISS: u64 = 1;

/// Counter identity; the discriminant is the index into `COUNTERS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PerfCounterId {
    CpuCycles,
    Instructions,
    CacheReferences,
    CacheMisses,
    BranchInstructions,
    BranchMisses,
    BusCycles,
    StalledCyclesFrontend,
    StalledCyclesBackend,
    RefCpuCycles,
    L1dReadAccess,
    L1dReadMiss,
    LlReadAccess,
    LlReadMiss,
    DtlbReadMiss,
    BpuReadMiss,
    CpuClock,
    TaskClock,
    PageFaults,
    ContextSwitches,
    CpuMigrations,
    PageFaultsMinor,
    PageFaultsMajor,
    AlignmentFaults,
    EmulationFaults,
    IrqEntry,
    IrqExit,
    SoftIrqEntry,
    SoftIrqExit,
    PageFaultUser,
    PageFaultKernel,
    SchedSwitch,
    SchedMigrateTask,
    SchedWakeup,
    SchedProcessExec,
    SignalGenerate,
    SignalDeliver,
    Kmalloc,
    Kfree,
    MmPageAlloc,
    BlockRqIssue,
    WritebackDirtyPage,
    SkbConsume,
    SockSetState,
    IpiRaise,
}

impl PerfCounterId {
    /// Index into the counter table and into `PerfBlock` readings
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn descriptor(self) -> &'static CounterDescriptor {
        &COUNTERS[self.index()]
    }
}

/// One countable event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDescriptor {
    pub id: PerfCounterId,
    pub kind: PerfType,
    /// `perf_event_attr.config`; `UNRESOLVED` for unknown tracepoints
    pub config: u64,
    /// `subsystem/event` under tracefs `events/`, tracepoints only
    pub tracepoint: Option<&'static str>,
    pub label: &'static str,
}

impl CounterDescriptor {
    const fn hw(id: PerfCounterId, config: u64, label: &'static str) -> Self {
        Self { id, kind: PerfType::Hardware, config, tracepoint: None, label }
    }

    const fn cache(id: PerfCounterId, config: u64, label: &'static str) -> Self {
        Self { id, kind: PerfType::HwCache, config, tracepoint: None, label }
    }

    const fn sw(id: PerfCounterId, config: u64, label: &'static str) -> Self {
        Self { id, kind: PerfType::Software, config, tracepoint: None, label }
    }

    const fn tp(id: PerfCounterId, path: &'static str, label: &'static str) -> Self {
        Self { id, kind: PerfType::Tracepoint, config: UNRESOLVED, tracepoint: Some(path), label }
    }

    /// Whether an open should be attempted
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.config != UNRESOLVED
    }

    /// Label as a YAML key: lower case, spaces and dashes as `_`
    pub fn yaml_key(&self) -> String {
        yaml_key(self.label)
    }
}

use PerfCounterId as Id;

/// The static counter table, in `PerfCounterId` order
pub static COUNTERS: [CounterDescriptor; 45] = [
    CounterDescriptor::hw(Id::CpuCycles, 0, "CPU Cycles"),
    CounterDescriptor::hw(Id::Instructions, 1, "Instructions"),
    CounterDescriptor::hw(Id::CacheReferences, 2, "Cache References"),
    CounterDescriptor::hw(Id::CacheMisses, 3, "Cache Misses"),
    CounterDescriptor::hw(Id::BranchInstructions, 4, "Branch Instructions"),
    CounterDescriptor::hw(Id::BranchMisses, 5, "Branch Misses"),
    CounterDescriptor::hw(Id::BusCycles, 6, "Bus Cycles"),
    CounterDescriptor::hw(Id::StalledCyclesFrontend, 7, "Stalled Cycles Frontend"),
    CounterDescriptor::hw(Id::StalledCyclesBackend, 8, "Stalled Cycles Backend"),
    CounterDescriptor::hw(Id::RefCpuCycles, 9, "Total Cycles"),
    CounterDescriptor::cache(Id::L1dReadAccess, hw_cache(CACHE_L1D, OP_READ, RESULT_ACCESS), "Cache L1D Read"),
    CounterDescriptor::cache(Id::L1dReadMiss, hw_cache(CACHE_L1D, OP_READ, RESULT_MISS), "Cache L1D Read Miss"),
    CounterDescriptor::cache(Id::LlReadAccess, hw_cache(CACHE_LL, OP_READ, RESULT_ACCESS), "Cache LL Read"),
    CounterDescriptor::cache(Id::LlReadMiss, hw_cache(CACHE_LL, OP_READ, RESULT_MISS), "Cache LL Read Miss"),
    CounterDescriptor::cache(Id::DtlbReadMiss, hw_cache(CACHE_DTLB, OP_READ, RESULT_MISS), "Cache DTLB Read Miss"),
    CounterDescriptor::cache(Id::BpuReadMiss, hw_cache(CACHE_BPU, OP_READ, RESULT_MISS), "Cache BPU Read Miss"),
    CounterDescriptor::sw(Id::CpuClock, 0, "CPU Clock"),
    CounterDescriptor::sw(Id::TaskClock, 1, "Task Clock"),
    CounterDescriptor::sw(Id::PageFaults, 2, "Page Faults Total"),
    CounterDescriptor::sw(Id::ContextSwitches, 3, "Context Switches"),
    CounterDescriptor::sw(Id::CpuMigrations, 4, "CPU Migrations"),
    CounterDescriptor::sw(Id::PageFaultsMinor, 5, "Page Faults Minor"),
    CounterDescriptor::sw(Id::PageFaultsMajor, 6, "Page Faults Major"),
    CounterDescriptor::sw(Id::AlignmentFaults, 7, "Alignment Faults"),
    CounterDescriptor::sw(Id::EmulationFaults, 8, "Emulation Faults"),
    CounterDescriptor::tp(Id::IrqEntry, "irq/irq_handler_entry", "IRQ Entry"),
    CounterDescriptor::tp(Id::IrqExit, "irq/irq_handler_exit", "IRQ Exit"),
    CounterDescriptor::tp(Id::SoftIrqEntry, "irq/softirq_entry", "Soft IRQ Entry"),
    CounterDescriptor::tp(Id::SoftIrqExit, "irq/softirq_exit", "Soft IRQ Exit"),
    CounterDescriptor::tp(Id::PageFaultUser, "exceptions/page_fault_user", "Page Faults User"),
    CounterDescriptor::tp(Id::PageFaultKernel, "exceptions/page_fault_kernel", "Page Faults Kernel"),
    CounterDescriptor::tp(Id::SchedSwitch, "sched/sched_switch", "Scheduler Switch"),
    CounterDescriptor::tp(Id::SchedMigrateTask, "sched/sched_migrate_task", "Scheduler Migrate Task"),
    CounterDescriptor::tp(Id::SchedWakeup, "sched/sched_wakeup", "Scheduler Wakeup"),
    CounterDescriptor::tp(Id::SchedProcessExec, "sched/sched_process_exec", "Process Exec"),
    CounterDescriptor::tp(Id::SignalGenerate, "signal/signal_generate", "Signal Generate"),
    CounterDescriptor::tp(Id::SignalDeliver, "signal/signal_deliver", "Signal Deliver"),
    CounterDescriptor::tp(Id::Kmalloc, "kmem/kmalloc", "Kmalloc"),
    CounterDescriptor::tp(Id::Kfree, "kmem/kfree", "Kfree"),
    CounterDescriptor::tp(Id::MmPageAlloc, "kmem/mm_page_alloc", "MM Page Alloc"),
    CounterDescriptor::tp(Id::BlockRqIssue, "block/block_rq_issue", "IO Request Issue"),
    CounterDescriptor::tp(Id::WritebackDirtyPage, "writeback/writeback_dirty_page", "Writeback Dirty Page"),
    CounterDescriptor::tp(Id::SkbConsume, "skb/consume_skb", "SKB Consume"),
    CounterDescriptor::tp(Id::SockSetState, "sock/inet_sock_set_state", "Sock Set State"),
    CounterDescriptor::tp(Id::IpiRaise, "ipi/ipi_raise", "IPI Raise"),
];

const _: () = assert!(COUNTERS.len() <= MAX_PERF_COUNTERS);

/// Label as a YAML key: lower case, spaces and dashes as `_`
pub fn yaml_key(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Correct a multiplexed counter for the time it was actually counting
///
/// - never ran and never enabled: the raw counter is kept as is
/// - enabled but never ran: `PERF_INVALID`
/// - otherwise `counter * time_enabled / time_running`
pub fn scale_reading(counter: u64, time_enabled: u64, time_running: u64) -> u64 {
    if time_running == 0 {
        return if time_enabled == 0 { counter } else { PERF_INVALID };
    }
    if time_enabled == time_running {
        return counter.min(PERF_INVALID - 1);
    }
    let scaled = counter as f64 * (time_enabled as f64 / time_running as f64);
    // f64 -> u64 saturates; keep clear of the invalid sentinel
    (scaled as u64).min(PERF_INVALID - 1)
}

/// Rate thresholds: first entry whose threshold exceeds the rate wins.
/// From M/sec on a unit is kept up to 100x its divisor; rates past the
/// last threshold stay in E/sec.
const RATE_SCALES: [(f64, f64, &str); 7] = [
    (1e3, 1.0, "/sec"),
    (1e5 * 10.0, 1e3, "K/sec"),
    (1e6 * 100.0, 1e6, "M/sec"),
    (1e9 * 100.0, 1e9, "G/sec"),
    (1e12 * 100.0, 1e12, "T/sec"),
    (1e15 * 100.0, 1e15, "P/sec"),
    (1e18 * 100.0, 1e18, "E/sec"),
];

/// A per-second rate in a human-sized unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledRate {
    pub value: f64,
    pub unit: &'static str,
}

impl ScaledRate {
    /// Scale `counter / duration`; a zero duration counts as one second
    pub fn new(counter: u64, duration: f64) -> Self {
        let dur = if duration > 0.0 { duration } else { 1.0 };
        let rate = counter as f64 / dur;
        let (_, div, unit) = RATE_SCALES
            .iter()
            .copied()
            .find(|&(threshold, _, _)| rate < threshold)
            .unwrap_or(RATE_SCALES[RATE_SCALES.len() - 1]);
        Self { value: rate / div, unit }
    }
}

impl fmt::Display for ScaledRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:8.2} {}", self.value, self.unit)
    }
}

/// Format `counter / duration` as e.g. `  150.00 K/sec`
pub fn scale_rate(counter: u64, duration: f64) -> String {
    ScaledRate::new(counter, duration).to_string()
}

/// Counter totals across all instances of one stressor
#[derive(Debug, Clone, PartialEq)]
pub struct PerfTotals {
    /// Indexed like `COUNTERS`; `None` when any instance had it invalid
    totals: Vec<Option<u64>>,
    /// Instances that opened at least one counter
    pub instances: usize,
}

impl PerfTotals {
    /// Sum readings of every instance that opened any counter
    ///
    /// Returns `None` when no instance opened anything. An invalid reading
    /// in any contributing instance poisons that counter's total.
    pub fn accumulate<'a>(blocks: impl IntoIterator<Item = &'a PerfBlock>) -> Option<Self> {
        let mut totals: Vec<Option<u64>> = vec![Some(0); COUNTERS.len()];
        let mut instances = 0;
        for block in blocks {
            if !block.succeeded() {
                continue;
            }
            instances += 1;
            for (idx, total) in totals.iter_mut().enumerate() {
                *total = match (*total, block.counter_by_index(idx)) {
                    (Some(t), Some(v)) => Some(t.saturating_add(v).min(PERF_INVALID - 1)),
                    _ => None,
                };
            }
        }
        (instances > 0).then_some(Self { totals, instances })
    }

    #[inline]
    pub fn get(&self, id: PerfCounterId) -> Option<u64> {
        self.totals.get(id.index()).copied().flatten()
    }

    /// `(descriptor, total)` for every counter with a valid total
    pub fn valid(&self) -> impl Iterator<Item = (&'static CounterDescriptor, u64)> + '_ {
        COUNTERS
            .iter()
            .zip(self.totals.iter())
            .filter_map(|(d, t)| t.map(|v| (d, v)))
    }

    fn ratio(&self, num: PerfCounterId, den: PerfCounterId) -> Option<f64> {
        match (self.get(num), self.get(den)) {
            (Some(n), Some(d)) if n > 0 && d > 0 => Some(n as f64 / d as f64),
            _ => None,
        }
    }

    /// Instructions per cycle
    pub fn instructions_per_cycle(&self) -> Option<f64> {
        self.ratio(PerfCounterId::Instructions, PerfCounterId::CpuCycles)
    }

    /// Cache misses as a percentage of cache references
    pub fn cache_miss_percent(&self) -> Option<f64> {
        self.ratio(PerfCounterId::CacheMisses, PerfCounterId::CacheReferences)
            .map(|r| r * 100.0)
    }

    /// Branch misses as a percentage of branch instructions
    pub fn branch_miss_percent(&self) -> Option<f64> {
        self.ratio(PerfCounterId::BranchMisses, PerfCounterId::BranchInstructions)
            .map(|r| r * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatSlot;

    #[test]
    fn test_table_order_matches_ids() {
        for (i, d) in COUNTERS.iter().enumerate() {
            assert_eq!(d.id.index(), i, "{} out of order", d.label);
            assert_eq!(d.kind == PerfType::Tracepoint, d.tracepoint.is_some());
            assert_eq!(d.is_resolved(), d.kind != PerfType::Tracepoint);
        }
        assert_eq!(PerfCounterId::IpiRaise.descriptor().label, "IPI Raise");
    }

    #[test]
    fn test_hw_cache_encoding() {
        assert_eq!(PerfCounterId::LlReadMiss.descriptor().config, 2 | (1 << 16));
        assert_eq!(PerfCounterId::L1dReadAccess.descriptor().config, 0);
    }

    #[test]
    fn test_yaml_key() {
        assert_eq!(yaml_key("CPU Cycles"), "cpu_cycles");
        assert_eq!(yaml_key("Stalled Cycles-Frontend"), "stalled_cycles_frontend");
    }

    #[test]
    fn test_scale_reading() {
        // Never enabled, never ran: raw value kept
        assert_eq!(scale_reading(42, 0, 0), 42);
        // Enabled but never scheduled on a PMU: invalid
        assert_eq!(scale_reading(42, 100, 0), PERF_INVALID);
        // Ran half the time: doubled
        assert_eq!(scale_reading(1000, 200, 100), 2000);
        assert_eq!(scale_reading(1000, 100, 100), 1000);
        assert!(scale_reading(u64::MAX - 5, 100, 100) < PERF_INVALID);
        assert!(scale_reading(u64::MAX / 2, 1000, 1) < PERF_INVALID);
    }

    #[test]
    fn test_scale_rate_units() {
        assert_eq!(ScaledRate::new(999, 1.0).unit, "/sec");
        assert_eq!(ScaledRate::new(150_000, 1.0).unit, "K/sec");
        assert_eq!(ScaledRate::new(150_000, 1.0).value, 150.0);
        // Exactly at a threshold moves up a unit
        assert_eq!(ScaledRate::new(1000, 1.0).unit, "K/sec");
        assert_eq!(ScaledRate::new(1_000_000, 1.0).unit, "M/sec");
        assert_eq!(ScaledRate::new(u64::MAX, 1.0).unit, "E/sec");
        // Zero duration counts as one second
        assert_eq!(ScaledRate::new(500, 0.0).value, 500.0);
        assert_eq!(ScaledRate::new(2000, 2.0).unit, "/sec");
    }

    #[test]
    fn test_scale_rate_hundredfold_units() {
        assert_eq!(ScaledRate::new(99_999_999, 1.0).unit, "M/sec");
        assert_eq!(ScaledRate::new(100_000_000, 1.0).unit, "G/sec");
        let r = ScaledRate::new(500_000_000, 1.0);
        assert_eq!(r.unit, "G/sec");
        assert!((r.value - 0.5).abs() < 1e-9);
        assert_eq!(ScaledRate::new(50_000_000_000, 1.0).unit, "G/sec");
        assert_eq!(ScaledRate::new(100_000_000_000, 1.0).unit, "T/sec");
        assert_eq!(ScaledRate::new(100_000_000_000_000_000, 1.0).unit, "E/sec");
    }

    #[test]
    fn test_scale_rate_top_of_table() {
        // 9.9e19/sec still fits under the last threshold
        let r = ScaledRate::new(990_000_000_000_000_000, 0.01);
        assert_eq!(r.unit, "E/sec");
        assert!((r.value - 99.0).abs() < 1e-6);
        // 1e20/sec and beyond stay in the largest unit
        let r = ScaledRate::new(1_000_000_000_000_000_000, 0.01);
        assert_eq!(r.unit, "E/sec");
        assert!((r.value - 100.0).abs() < 1e-6);
        assert_eq!(ScaledRate::new(u64::MAX, 0.001).unit, "E/sec");
    }

    #[test]
    fn test_scale_rate_format() {
        assert_eq!(scale_rate(999, 1.0), "  999.00 /sec");
        assert_eq!(scale_rate(150_000, 1.0), "  150.00 K/sec");
    }

    fn opened_slot(values: &[(PerfCounterId, u64)]) -> Box<StatSlot> {
        let slot = StatSlot::new_boxed();
        slot.prepare();
        slot.perf.set_fds_opened(values.len() as u32);
        for &(id, v) in values {
            slot.perf.reading(id.index()).unwrap().set_raw_value(v);
        }
        slot
    }

    #[test]
    fn test_totals_skip_unopened_and_poison_invalid() {
        use PerfCounterId::*;
        let a = opened_slot(&[(CpuCycles, 100), (Instructions, 250), (CacheReferences, 10)]);
        let b = opened_slot(&[(CpuCycles, 100), (Instructions, 50)]);
        let unopened = StatSlot::new_boxed();
        unopened.prepare();

        let totals = PerfTotals::accumulate([&a.perf, &b.perf, &unopened.perf]).unwrap();
        assert_eq!(totals.instances, 2);
        assert_eq!(totals.get(CpuCycles), Some(200));
        assert_eq!(totals.get(Instructions), Some(300));
        // Present in one instance, invalid in the other
        assert_eq!(totals.get(CacheReferences), None);
        assert_eq!(totals.instructions_per_cycle(), Some(1.5));
        assert_eq!(totals.cache_miss_percent(), None);
        assert_eq!(totals.valid().count(), 2);
    }

    #[test]
    fn test_totals_none_when_nothing_opened() {
        let s = StatSlot::new_boxed();
        s.prepare();
        assert!(PerfTotals::accumulate([&s.perf]).is_none());
    }

    #[test]
    fn test_derived_percentages() {
        use PerfCounterId::*;
        let a = opened_slot(&[
            (CacheReferences, 200),
            (CacheMisses, 50),
            (BranchInstructions, 1000),
            (BranchMisses, 10),
        ]);
        let totals = PerfTotals::accumulate([&a.perf]).unwrap();
        assert_eq!(totals.cache_miss_percent(), Some(25.0));
        assert_eq!(totals.branch_miss_percent(), Some(1.0));
        assert_eq!(totals.instructions_per_cycle(), None);
    }
}
