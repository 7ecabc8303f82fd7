//! Unix shared mapping using mmap

use core::ptr::NonNull;
use kstress_core::error::{StressError, StressResult};

/// Map `len` zeroed bytes shared with future children
pub(super) fn map_shared(len: usize) -> StressResult<NonNull<u8>> {
    // Safety: anonymous mapping, no fd or address hint involved
    let base = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(StressError::MapFailed(nix::errno::Errno::last_raw()));
    }
    NonNull::new(base as *mut u8).ok_or(StressError::MapFailed(libc::EFAULT))
}

/// Unmap a region returned by `map_shared`
///
/// # Safety
/// `base` and `len` must come from one `map_shared` call and nothing may
/// reference the region afterwards.
pub(super) unsafe fn unmap_shared(base: NonNull<u8>, len: usize) {
    libc::munmap(base.as_ptr() as *mut libc::c_void, len);
}
