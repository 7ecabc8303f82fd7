//! Per-worker perf_event counters
//!
//! Lifecycle inside one worker:
//!
//! ```text
//! perf_open     one fd per resolved counter, created disabled
//! perf_enable   reset + enable every open fd
//!   ... stressor loop ...
//! perf_disable  disable every open fd
//! perf_close    read, scale for multiplexing, store in the slot, close
//! ```
//!
//! Counters are per worker (`pid = 0, cpu = -1`) and inherited by any
//! process the stressor forks. If not a single counter opens, the region's
//! perf-unavailable flag is set and every later `perf_open` in the run
//! returns `PerfUnavailable` straight away.

pub mod sys;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use kstress_core::error::{StressError, StressResult};
use kstress_core::perf::{scale_reading, CounterDescriptor, PerfCounterId, PerfType, COUNTERS, PERF_INVALID};
use kstress_core::stats::StatSlot;
use kstress_core::{kdebug, kwarn};
use crate::memory::SharedRegion;
use self::sys::PerfEventAttr;

/// Where tracepoint ids are looked up, in order
pub const TRACEFS_ROOTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

/// Counter table with tracepoint ids resolved for this kernel
#[derive(Debug, Clone)]
pub struct PerfTable {
    descriptors: Vec<CounterDescriptor>,
}

impl PerfTable {
    /// Resolve tracepoints from the standard tracefs locations
    pub fn resolve() -> Self {
        let roots: Vec<PathBuf> = TRACEFS_ROOTS.iter().map(PathBuf::from).collect();
        Self::resolve_from(&roots)
    }

    /// Resolve tracepoints from `roots` (first root with the id wins)
    ///
    /// Missing or unreadable id files leave the counter `UNRESOLVED`.
    pub fn resolve_from<P: AsRef<Path>>(roots: &[P]) -> Self {
        let descriptors = COUNTERS
            .iter()
            .map(|d| {
                let mut d = d.clone();
                if let Some(tp) = d.tracepoint {
                    if let Some(id) = roots.iter().find_map(|r| read_tracepoint_id(r.as_ref(), tp)) {
                        d.config = id;
                    }
                }
                d
            })
            .collect();
        Self { descriptors }
    }

    #[inline]
    pub fn descriptors(&self) -> &[CounterDescriptor] {
        &self.descriptors
    }

    pub fn by_id(&self, id: PerfCounterId) -> &CounterDescriptor {
        &self.descriptors[id.index()]
    }

    pub fn label_by_index(&self, idx: usize) -> Option<&'static str> {
        self.descriptors.get(idx).map(|d| d.label)
    }

    /// Counters an open will be attempted for
    pub fn resolved_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.is_resolved()).count()
    }
}

fn read_tracepoint_id(root: &Path, tracepoint: &str) -> Option<u64> {
    let path = root.join("events").join(tracepoint).join("id");
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

static PERF_TABLE: OnceLock<PerfTable> = OnceLock::new();

/// Resolve the process-wide counter table once
///
/// Call in the parent before forking so workers inherit the result.
pub fn perf_init() -> &'static PerfTable {
    PERF_TABLE.get_or_init(|| {
        let table = PerfTable::resolve();
        kdebug!(
            "perf: {} of {} counters resolvable",
            table.resolved_count(),
            table.descriptors().len()
        );
        table
    })
}

/// Open one disabled counter fd per resolved descriptor into `slot`
///
/// Returns the number opened.
pub fn perf_open(table: &PerfTable, region: &SharedRegion, slot: &StatSlot) -> StressResult<u32> {
    slot.perf.reset();
    if region.perf_unavailable() {
        return Err(StressError::PerfUnavailable);
    }

    let mut opened = 0u32;
    let mut last_err = None;
    for (idx, d) in table.descriptors().iter().enumerate() {
        if !d.is_resolved() {
            continue;
        }
        let Some(reading) = slot.perf.reading(idx) else { break };
        let attr = PerfEventAttr::counter(d.kind as u32, d.config);
        match sys::perf_event_open(&attr) {
            Ok(fd) => {
                reading.set_fd(fd);
                opened += 1;
            }
            Err(e) => last_err = Some(e),
        }
    }
    slot.perf.set_fds_opened(opened);

    if opened == 0 {
        if region.mark_perf_unavailable() {
            kwarn!(
                "perf events unavailable ({}), skipping perf counters for this run",
                last_err.map_or_else(|| "no counters".to_string(), |e| e.desc().to_string())
            );
        }
        return Err(StressError::PerfUnavailable);
    }
    Ok(opened)
}

/// Apply `op` to every open fd; failing fds are closed and dropped
fn apply_ioctl(
    slot: &StatSlot,
    what: &str,
    op: impl Fn(libc::c_int) -> nix::Result<libc::c_int>,
) -> StressResult<()> {
    let mut live = 0u32;
    let mut last_err = 0;
    for r in slot.perf.readings() {
        let fd = r.fd();
        if fd < 0 {
            continue;
        }
        match op(fd) {
            Ok(_) => live += 1,
            Err(e) => {
                kdebug!("perf {} failed on fd {}: {}", what, fd, e.desc());
                sys::close(fd);
                r.set_fd(-1);
                r.set_raw_value(PERF_INVALID);
                last_err = e as i32;
            }
        }
    }
    if live == 0 && last_err != 0 {
        return Err(StressError::PerfIoctl(last_err));
    }
    Ok(())
}

/// Reset and start every open counter
pub fn perf_enable(slot: &StatSlot) -> StressResult<()> {
    apply_ioctl(slot, "enable", |fd| {
        // Safety: fd is an open perf event fd owned by this slot
        unsafe {
            sys::perf_ioc_reset(fd, sys::PERF_IOC_FLAG_GROUP)?;
            sys::perf_ioc_enable(fd, sys::PERF_IOC_FLAG_GROUP)
        }
    })
}

/// Stop every open counter
pub fn perf_disable(slot: &StatSlot) -> StressResult<()> {
    apply_ioctl(slot, "disable", |fd| {
        // Safety: as above
        unsafe { sys::perf_ioc_disable(fd, sys::PERF_IOC_FLAG_GROUP) }
    })
}

/// Read, scale and close every open counter
///
/// Afterwards every reading holds either a scaled value or `PERF_INVALID`,
/// and every fd is -1.
pub fn perf_close(slot: &StatSlot) -> StressResult<()> {
    for r in slot.perf.readings() {
        let fd = r.fd();
        if fd < 0 {
            continue;
        }
        let value = match sys::read_value(fd) {
            Ok(v) => scale_reading(v.counter, v.time_enabled, v.time_running),
            Err(e) => {
                kdebug!("perf read failed on fd {}: {}", fd, e.desc());
                PERF_INVALID
            }
        };
        r.set_raw_value(value);
        sys::close(fd);
        r.set_fd(-1);
    }
    Ok(())
}

/// Scaled value of counter `idx` after `perf_close`
#[inline]
pub fn get_counter_by_index(slot: &StatSlot, idx: usize) -> Option<u64> {
    slot.perf.counter_by_index(idx)
}

/// Scaled value of counter `id` after `perf_close`
#[inline]
pub fn get_counter_by_id(slot: &StatSlot, id: PerfCounterId) -> Option<u64> {
    slot.perf.counter_by_index(id.index())
}

/// Label of counter `idx`
#[inline]
pub fn get_label_by_index(idx: usize) -> Option<&'static str> {
    COUNTERS.get(idx).map(|d| d.label)
}

/// Kernel perf type name, for diagnostics
pub fn type_name(kind: PerfType) -> &'static str {
    match kind {
        PerfType::Hardware => "hardware",
        PerfType::Software => "software",
        PerfType::Tracepoint => "tracepoint",
        PerfType::HwCache => "hw-cache",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kstress_core::perf::UNRESOLVED;

    fn fake_tracefs(dir: &Path, tp: &str, id: &str) {
        let p = dir.join("events").join(tp);
        std::fs::create_dir_all(&p).unwrap();
        std::fs::write(p.join("id"), id).unwrap();
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kstress-perf-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_resolve_from_fake_tracefs() {
        let primary = scratch("primary");
        let fallback = scratch("fallback");
        fake_tracefs(&primary, "sched/sched_switch", "316\n");
        fake_tracefs(&fallback, "sched/sched_switch", "999\n");
        fake_tracefs(&fallback, "irq/irq_handler_entry", "42");
        fake_tracefs(&primary, "kmem/kfree", "garbage");

        let table = PerfTable::resolve_from(&[&primary, &fallback]);
        assert_eq!(table.by_id(PerfCounterId::SchedSwitch).config, 316);
        assert_eq!(table.by_id(PerfCounterId::IrqEntry).config, 42);
        assert_eq!(table.by_id(PerfCounterId::Kfree).config, UNRESOLVED);
        assert_eq!(table.by_id(PerfCounterId::SignalDeliver).config, UNRESOLVED);
        // Non-tracepoint counters are always resolvable
        assert_eq!(table.by_id(PerfCounterId::Instructions).config, 1);
        assert_eq!(table.resolved_count(), 25 + 2);

        let _ = std::fs::remove_dir_all(&primary);
        let _ = std::fs::remove_dir_all(&fallback);
    }

    #[test]
    fn test_labels() {
        let table = PerfTable::resolve_from::<&Path>(&[]);
        assert_eq!(table.label_by_index(0), Some("CPU Cycles"));
        assert_eq!(get_label_by_index(1), Some("Instructions"));
        assert_eq!(table.label_by_index(COUNTERS.len()), None);
        assert_eq!(type_name(table.by_id(PerfCounterId::TaskClock).kind), "software");
    }

    #[test]
    fn test_unavailable_flag_short_circuits_open() {
        let region = SharedRegion::map(1, 1).unwrap();
        let slot = region.slot(0, 0).unwrap();
        region.mark_perf_unavailable();
        let table = PerfTable::resolve_from::<&Path>(&[]);
        assert_eq!(perf_open(&table, &region, slot), Err(StressError::PerfUnavailable));
        assert!(!slot.perf.succeeded());
    }

    #[test]
    fn test_full_lifecycle_leaves_slot_consistent() {
        // Works whether or not this machine allows perf events
        let region = SharedRegion::map(1, 1).unwrap();
        let slot = region.slot(0, 0).unwrap();
        let table = PerfTable::resolve_from::<&Path>(&[]);
        if perf_open(&table, &region, slot).is_ok() {
            let _ = perf_enable(slot);
            let mut x = 0u64;
            for i in 0..100_000u64 {
                x = x.wrapping_add(i * i);
            }
            assert!(x > 0);
            let _ = perf_disable(slot);
            perf_close(slot).unwrap();
        } else {
            assert!(region.perf_unavailable());
        }
        for r in slot.perf.readings() {
            assert_eq!(r.fd(), -1);
        }
    }
}
