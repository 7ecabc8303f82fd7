//! Spinlock that works inside a process-shared mapping
//!
//! The lock word is a plain `AtomicBool` with no pointers, so the lock
//! keeps working when the memory holding it is `MAP_SHARED` and inherited
//! across `fork()`. A zero-filled `SpinLock<T>` is unlocked, which lets the
//! shared region be created with `mmap` and used without an explicit init
//! as long as the zero bit pattern is also a valid `T`.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A simple test-and-test-and-set spinlock
///
/// Critical sections must be short and must not block: a worker holding
/// the lock can be SIGKILLed (OOM killer) and the lock is then never
/// released. Callers that can tolerate that use `try_lock_for`.
#[repr(C)]
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: SpinLock provides exclusive access to T
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create a new spinlock containing the given value
    #[inline]
    pub const fn new(value: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, spinning until it's available
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            self.relax();
        }
    }

    /// Acquire the lock, giving up after `max_spins` rounds of backoff
    ///
    /// Used on the shared region, where the holder may have been killed.
    pub fn try_lock_for(&self, max_spins: u32) -> Option<SpinLockGuard<'_, T>> {
        for _ in 0..max_spins {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            self.relax();
        }
        self.try_lock()
    }

    /// Try to acquire the lock without spinning
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Run `f` with the lock held
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// Check if the lock is currently held
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Wait (read-only) until the lock looks free, with pause hints
    #[inline]
    fn relax(&self) {
        let mut spin_count = 0u32;
        while self.locked.load(Ordering::Relaxed) {
            spin_count = spin_count.wrapping_add(1);
            for _ in 0..spin_count.min(64) {
                core::hint::spin_loop();
            }
            if spin_count > 1024 {
                std::thread::yield_now();
                return;
            }
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

/// Guard that releases the spinlock when dropped
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the lock
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the lock
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_spinlock_basic() {
        let lock = SpinLock::new(false);
        lock.with(|flag| *flag = true);
        assert!(*lock.lock());
    }

    #[test]
    fn test_spinlock_try_lock_for_gives_up() {
        let lock = SpinLock::new(0u32);
        let held = lock.lock();
        assert!(lock.try_lock_for(8).is_none());
        drop(held);
        assert!(lock.try_lock_for(8).is_some());
    }

    #[test]
    fn test_zeroed_is_unlocked() {
        // Shared region memory starts zero-filled
        let lock: SpinLock<u64> = unsafe { core::mem::zeroed() };
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 0);
    }

    #[test]
    fn test_spinlock_concurrent() {
        let lock = Arc::new(SpinLock::new(0u32));
        let mut handles = vec![];

        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    lock.with(|n| *n += 1);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*lock.lock(), 4000);
    }
}
