//! Network port range reservations
//!
//! Network stressors reserve a port range before binding so concurrently
//! running instances in the same process never collide. The table is
//! process-local; a forked peer inherits a copy, which is enough because
//! each instance reserves before it forks.
//!
//! Live entries never overlap. A request that overlaps is moved forward
//! past the blocking entry, wrapping to `MIN_PORT`, until a free range of
//! the same width turns up or the whole port space has been walked.

use crate::constants::{MAX_PORT, MIN_PORT};
use crate::error::{StressError, StressResult};
use crate::spinlock::SpinLock;

/// One reserved inclusive range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortReservation {
    pub start: u16,
    pub end: u16,
    pub owner_pid: u32,
}

impl PortReservation {
    #[inline]
    fn overlaps(&self, start: u32, end: u32) -> bool {
        start <= self.end as u32 && self.start as u32 <= end
    }
}

/// Table of live reservations
#[derive(Debug, Default)]
pub struct PortTable {
    entries: Vec<PortReservation>,
}

impl PortTable {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Reserve `[start, end]`, or the next free range of the same width
    ///
    /// Returns the start of the range actually reserved.
    pub fn reserve(&mut self, start: u16, end: u16) -> StressResult<u16> {
        if start < MIN_PORT || start > end {
            return Err(StressError::InvalidPortRange { start, end });
        }
        let width = (end - start) as u32;
        let (min, max) = (MIN_PORT as u32, MAX_PORT as u32);

        let mut cand = start as u32;
        let mut wrapped = false;
        // Each step jumps past one entry or wraps once
        for _ in 0..=(self.entries.len() + 1) * 2 {
            if cand + width > max {
                if wrapped {
                    break;
                }
                wrapped = true;
                cand = min;
            }
            if wrapped && cand >= start as u32 {
                break;
            }
            match self.entries.iter().find(|e| e.overlaps(cand, cand + width)) {
                None => {
                    let entry = PortReservation {
                        start: cand as u16,
                        end: (cand + width) as u16,
                        owner_pid: std::process::id(),
                    };
                    self.entries.push(entry);
                    return Ok(entry.start);
                }
                Some(blocker) => cand = blocker.end as u32 + 1,
            }
        }
        Err(StressError::PortsExhausted { start, end })
    }

    /// Drop the reservation of exactly `[start, end]` held by this process
    ///
    /// Unknown ranges and ranges owned by another pid are left alone.
    pub fn release(&mut self, start: u16, end: u16) {
        let pid = std::process::id();
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.start == start && e.end == end && e.owner_pid == pid)
        {
            self.entries.swap_remove(pos);
        }
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.entries.iter().any(|e| e.overlaps(port as u32, port as u32))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PortReservation] {
        &self.entries
    }
}

static PORTS: SpinLock<PortTable> = SpinLock::new(PortTable::new());

/// Reserve a port range in the process-wide table
pub fn reserve_ports(start: u16, end: u16) -> StressResult<u16> {
    PORTS.with(|t| t.reserve(start, end))
}

/// Release a range previously returned by `reserve_ports`
pub fn release_ports(start: u16, end: u16) {
    PORTS.with(|t| t.release(start, end));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_moves_forward() {
        let mut t = PortTable::new();
        assert_eq!(t.reserve(9000, 9000).unwrap(), 9000);
        let second = t.reserve(9000, 9000).unwrap();
        assert_ne!(second, 9000);
        assert_eq!(second, 9001);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_width_is_preserved() {
        let mut t = PortTable::new();
        assert_eq!(t.reserve(5000, 5009).unwrap(), 5000);
        assert_eq!(t.reserve(5005, 5007).unwrap(), 5010);
        let e = t.entries()[1];
        assert_eq!(e.end - e.start, 2);
    }

    #[test]
    fn test_release_then_reserve() {
        let mut t = PortTable::new();
        assert_eq!(t.reserve(9000, 9003).unwrap(), 9000);
        t.release(9000, 9003);
        assert!(t.is_empty());
        assert_eq!(t.reserve(9000, 9003).unwrap(), 9000);
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut t = PortTable::new();
        t.reserve(7000, 7000).unwrap();
        t.release(7000, 7000);
        t.release(7000, 7000);
        t.release(1234, 1240);
        assert!(t.is_empty());
    }

    #[test]
    fn test_release_other_owner_is_noop() {
        let mut t = PortTable::new();
        t.entries.push(PortReservation { start: 8000, end: 8000, owner_pid: 0 });
        t.release(8000, 8000);
        assert_eq!(t.len(), 1);
        assert!(t.is_reserved(8000));
    }

    #[test]
    fn test_invalid_range() {
        let mut t = PortTable::new();
        assert!(matches!(t.reserve(10, 20), Err(StressError::InvalidPortRange { .. })));
        assert!(matches!(t.reserve(9000, 8999), Err(StressError::InvalidPortRange { .. })));
    }

    #[test]
    fn test_wraps_to_min_port() {
        let mut t = PortTable::new();
        t.reserve(MAX_PORT - 1, MAX_PORT).unwrap();
        assert_eq!(t.reserve(MAX_PORT - 1, MAX_PORT).unwrap(), MIN_PORT);
    }

    #[test]
    fn test_exhausted() {
        let mut t = PortTable::new();
        t.reserve(MIN_PORT, MAX_PORT).unwrap();
        assert!(matches!(t.reserve(2000, 2000), Err(StressError::PortsExhausted { .. })));
        t.release(MIN_PORT, MAX_PORT);
        assert_eq!(t.reserve(2000, 2000).unwrap(), 2000);
    }

    #[test]
    fn test_global_table() {
        let a = reserve_ports(40000, 40001).unwrap();
        let b = reserve_ports(40000, 40001).unwrap();
        assert_ne!(a, b);
        release_ports(a, a + 1);
        release_ports(b, b + 1);
        assert_eq!(reserve_ports(40000, 40001).unwrap(), 40000);
        release_ports(40000, 40001);
    }
}
