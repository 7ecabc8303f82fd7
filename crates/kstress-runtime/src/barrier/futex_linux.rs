//! Linux futex wait/wake on a process-shared word
//!
//! The barrier word lives in a `MAP_SHARED` mapping touched by several
//! processes, so FUTEX_PRIVATE_FLAG must not be used here.

use core::sync::atomic::AtomicU32;
use std::time::Duration;

/// Sleep while `word == 0`, for at most `timeout`
///
/// Returns on wake, timeout, signal, or if the word already changed; the
/// caller re-checks the word either way.
pub(super) fn wait_while_closed(word: &AtomicU32, timeout: Duration) {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    // Safety: word is a valid aligned u32 for the duration of the call
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            0u32,
            &ts as *const libc::timespec,
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}

/// Wake every process sleeping on `word`
pub(super) fn wake_all(word: &AtomicU32) {
    // Safety: as above; FUTEX_WAKE never blocks
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        );
    }
}
