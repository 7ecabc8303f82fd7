//! Stop token for cooperative, signal-driven cancellation
//!
//! Stressor hot loops poll a token between iterations and around any
//! retried syscall. Nothing preempts a worker that never polls: it runs
//! until it is sent SIGKILL.
//!
//! The process-wide flag behind `StopToken::process()` is a plain static
//! atomic, so the SIGALRM handler can clear it with a single
//! async-signal-safe store.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide "keep running" flag, cleared by SIGALRM/SIGINT handlers
static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);

/// Clear the process-wide keep-running flag
///
/// Async-signal-safe: a single atomic store.
#[inline]
pub fn request_stop() {
    KEEP_RUNNING.store(false, Ordering::Release);
}

/// Re-arm the process-wide flag (fresh workers and each new run)
#[inline]
pub fn reset_stop() {
    KEEP_RUNNING.store(true, Ordering::Release);
}

/// Current state of the process-wide flag
#[inline]
pub fn keep_running_flag() -> bool {
    KEEP_RUNNING.load(Ordering::Acquire)
}

/// Token checked by hot loops
#[derive(Clone)]
pub struct StopToken {
    inner: StopInner,
}

#[derive(Clone)]
enum StopInner {
    /// Follows the process-wide flag set by signal handlers
    Process,
    /// Heap-allocated flag, optionally chained to a parent token
    Owned(Arc<OwnedStop>),
    /// Never stops
    Never,
}

struct OwnedStop {
    stopped: AtomicBool,
    parent: Option<StopToken>,
}

impl StopToken {
    /// Token backed by the process-wide flag
    pub const fn process() -> Self {
        Self { inner: StopInner::Process }
    }

    /// Independent token, not tied to any signal
    pub fn new() -> Self {
        Self {
            inner: StopInner::Owned(Arc::new(OwnedStop {
                stopped: AtomicBool::new(false),
                parent: None,
            })),
        }
    }

    /// Token that never reports a stop
    pub const fn never() -> Self {
        Self { inner: StopInner::Never }
    }

    /// Child token: stops when either it or `self` is stopped
    pub fn child(&self) -> Self {
        Self {
            inner: StopInner::Owned(Arc::new(OwnedStop {
                stopped: AtomicBool::new(false),
                parent: Some(self.clone()),
            })),
        }
    }

    /// True while the work should continue
    #[inline]
    pub fn keep_running(&self) -> bool {
        !self.is_stopped()
    }

    /// True once a stop was requested on this token or any ancestor
    #[inline]
    pub fn is_stopped(&self) -> bool {
        match &self.inner {
            StopInner::Process => !keep_running_flag(),
            StopInner::Owned(arc) => {
                if arc.stopped.load(Ordering::Acquire) {
                    return true;
                }
                match arc.parent {
                    Some(ref parent) => parent.is_stopped(),
                    None => false,
                }
            }
            StopInner::Never => false,
        }
    }

    /// Request a stop on this token
    ///
    /// For the process token this clears the process-wide flag.
    pub fn stop(&self) {
        match &self.inner {
            StopInner::Process => request_stop(),
            StopInner::Owned(arc) => arc.stopped.store(true, Ordering::Release),
            StopInner::Never => {}
        }
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::process()
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_stop() {
        let token = StopToken::new();
        assert!(token.keep_running());
        token.stop();
        assert!(token.is_stopped());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = StopToken::new();
        let child = parent.child();
        let grandchild = child.child();
        assert!(grandchild.keep_running());
        parent.stop();
        assert!(child.is_stopped());
        assert!(grandchild.is_stopped());
    }

    #[test]
    fn test_child_stop_does_not_propagate_up() {
        let parent = StopToken::new();
        let child = parent.child();
        child.stop();
        assert!(child.is_stopped());
        assert!(parent.keep_running());
    }

    #[test]
    fn test_clone_shares_state() {
        let a = StopToken::new();
        let b = a.clone();
        a.stop();
        assert!(b.is_stopped());
    }

    #[test]
    fn test_never_token() {
        let token = StopToken::never();
        token.stop();
        assert!(token.keep_running());
    }
}
