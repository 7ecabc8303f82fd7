//! Shared statistics region
//!
//! One anonymous `MAP_SHARED` mapping created before any fork, so every
//! worker sees the same bytes at the same address.
//!
//! ```text
//! +-------------------+ 0
//! | RegionHeader      |  magic, dimensions, stop flag, perf lock
//! +-------------------+ blocks_off
//! | StressorBlock[S]  |  sync barrier + OOM restart total per stressor
//! +-------------------+ slots_off
//! | StatSlot[S * I]   |  index = stressor * max_instances + instance
//! +-------------------+
//! ```
//!
//! Every structure in the mapping is made of atomics and padding and is
//! valid when zero-filled, which is what a fresh anonymous mapping holds.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix::{map_shared, unmap_shared};
    }
}

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use kstress_core::constants::{CACHE_LINE_SIZE, MAX_INSTANCES, REGION_MAGIC};
use kstress_core::error::{StressError, StressResult};
use kstress_core::spinlock::SpinLock;
use kstress_core::stats::StatSlot;
use kstress_core::{kdebug, kwarn};
use crate::barrier::SyncBarrier;

/// Spins before giving up on the perf lock (its holder may be dead)
const PERF_LOCK_SPINS: u32 = 100_000;

/// Region-wide header
#[repr(C, align(64))]
pub struct RegionHeader {
    magic: AtomicU32,
    num_stressors: AtomicU32,
    max_instances: AtomicU32,
    /// Run-wide stop request (SIGINT in the parent)
    stop: AtomicBool,
    /// Set once when no perf counter at all could be opened
    perf_unavailable: SpinLock<bool>,
}

/// Per-stressor shared state
#[repr(C, align(64))]
pub struct StressorBlock {
    pub barrier: SyncBarrier,
    oom_restarts: AtomicU64,
}

impl StressorBlock {
    /// Reset for a new run (parent, before forking)
    pub fn prepare(&self) {
        self.barrier.reset();
        self.oom_restarts.store(0, Ordering::Relaxed);
    }

    /// Add restarts seen by any instance of this stressor
    #[inline]
    pub fn add_oom_restarts(&self, n: u64) {
        self.oom_restarts.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn oom_restarts(&self) -> u64 {
        self.oom_restarts.load(Ordering::Relaxed)
    }
}

#[inline]
const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Byte offsets inside the mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    blocks_off: usize,
    slots_off: usize,
    len: usize,
}

impl Layout {
    fn compute(num_stressors: usize, max_instances: usize) -> Option<Self> {
        let blocks_off = round_up(core::mem::size_of::<RegionHeader>(), CACHE_LINE_SIZE);
        let blocks_len = num_stressors.checked_mul(core::mem::size_of::<StressorBlock>())?;
        let slots_off = round_up(blocks_off.checked_add(blocks_len)?, core::mem::align_of::<StatSlot>());
        let slots_len = num_stressors
            .checked_mul(max_instances)?
            .checked_mul(core::mem::size_of::<StatSlot>())?;
        let len = round_up(slots_off.checked_add(slots_len)?, page_size());
        Some(Self { blocks_off, slots_off, len })
    }
}

fn page_size() -> usize {
    // Safety: sysconf has no memory side effects
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

/// Handle to the shared statistics region
///
/// The handle itself is plain process memory; forked workers get a copy
/// pointing at the same shared pages. Only the process that mapped the
/// region unmaps it.
pub struct SharedRegion {
    base: NonNull<u8>,
    layout: Layout,
    num_stressors: usize,
    max_instances: usize,
    owner_pid: u32,
}

// Safety: the mapping only holds atomics and a spinlock
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Map a zeroed region for `num_stressors * max_instances` slots
    ///
    /// Must be called before forking any worker that uses it.
    pub fn map(num_stressors: usize, max_instances: usize) -> StressResult<Self> {
        let bad = StressError::InvalidDimensions {
            stressors: num_stressors,
            instances: max_instances,
        };
        if num_stressors == 0 || max_instances == 0 || max_instances > MAX_INSTANCES {
            return Err(bad);
        }
        let layout = Layout::compute(num_stressors, max_instances).ok_or(bad)?;
        let base = map_shared(layout.len)?;

        let region = Self {
            base,
            layout,
            num_stressors,
            max_instances,
            owner_pid: std::process::id(),
        };
        let hdr = region.header();
        hdr.num_stressors.store(num_stressors as u32, Ordering::Relaxed);
        hdr.max_instances.store(max_instances as u32, Ordering::Relaxed);
        hdr.magic.store(REGION_MAGIC, Ordering::Release);
        kdebug!(
            "mapped shared region: {} stressors x {} instances, {} bytes",
            num_stressors,
            max_instances,
            layout.len
        );
        Ok(region)
    }

    #[inline]
    fn header(&self) -> &RegionHeader {
        // Safety: offset 0 of a live mapping at least `len` long
        unsafe { &*(self.base.as_ptr() as *const RegionHeader) }
    }

    #[inline]
    pub fn num_stressors(&self) -> usize {
        self.num_stressors
    }

    #[inline]
    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    /// Mapped size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.layout.len
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.header().magic.load(Ordering::Acquire) == REGION_MAGIC
    }

    /// Slot for `(stressor, instance)`
    pub fn slot(&self, stressor: usize, instance: usize) -> StressResult<&StatSlot> {
        if stressor >= self.num_stressors || instance >= self.max_instances {
            return Err(StressError::InvalidSlot { stressor, instance });
        }
        let idx = stressor * self.max_instances + instance;
        let off = self.layout.slots_off + idx * core::mem::size_of::<StatSlot>();
        // Safety: in bounds by construction; zero-filled StatSlot is valid
        Ok(unsafe { &*(self.base.as_ptr().add(off) as *const StatSlot) })
    }

    /// The first `n` slots of a stressor
    pub fn slots(&self, stressor: usize, n: usize) -> impl Iterator<Item = &StatSlot> + '_ {
        (0..n.min(self.max_instances)).filter_map(move |i| self.slot(stressor, i).ok())
    }

    /// Shared state of one stressor
    pub fn stressor_block(&self, stressor: usize) -> StressResult<&StressorBlock> {
        if stressor >= self.num_stressors {
            return Err(StressError::InvalidSlot { stressor, instance: 0 });
        }
        let off = self.layout.blocks_off + stressor * core::mem::size_of::<StressorBlock>();
        // Safety: in bounds by construction; zero-filled block is valid
        Ok(unsafe { &*(self.base.as_ptr().add(off) as *const StressorBlock) })
    }

    /// Whether an earlier worker found perf events unusable
    ///
    /// A lock that cannot be taken (holder killed) reads as unavailable.
    pub fn perf_unavailable(&self) -> bool {
        self.header()
            .perf_unavailable
            .try_lock_for(PERF_LOCK_SPINS)
            .map_or(true, |flag| *flag)
    }

    /// Set the perf-unavailable flag; true only for the call that set it
    pub fn mark_perf_unavailable(&self) -> bool {
        match self.header().perf_unavailable.try_lock_for(PERF_LOCK_SPINS) {
            Some(mut flag) if !*flag => {
                *flag = true;
                true
            }
            Some(_) => false,
            None => {
                kwarn!("perf lock stuck, leaving perf-unavailable flag alone");
                false
            }
        }
    }

    /// Ask every process sharing the region to stop
    pub fn request_stop(&self) {
        self.header().stop.store(true, Ordering::Release);
    }

    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.header().stop.load(Ordering::Acquire)
    }

    /// Clear the stop request before a new run
    pub fn clear_stop(&self) {
        self.header().stop.store(false, Ordering::Release);
    }

    /// Whether this process created the mapping
    #[inline]
    pub fn is_owner(&self) -> bool {
        std::process::id() == self.owner_pid
    }

    /// Unmap the region (no-op outside the creating process)
    pub fn unmap(self) {
        drop(self);
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if self.is_owner() {
            // Safety: mapped by us with this length, not used after drop
            unsafe { unmap_shared(self.base, self.layout.len) };
        }
    }
}
