//! Worker state and stressor exit outcome types

use core::fmt;

/// Lifecycle of one worker instance
///
/// Transitions are announced by the worker itself and stored in its slot
/// so the parent can see where a stuck or killed worker was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum WorkerState {
    /// Forked, setting up (signals, timers, PRNG, perf)
    Init = 0,

    /// Blocked on the sync-start barrier
    SyncWait = 1,

    /// Inside the stressor hot loop
    Running = 2,

    /// Hot loop finished, tearing down
    Deinit = 3,

    /// Exited (set by the worker just before `_exit`, or by the parent on reap)
    Terminated = 4,
}

impl WorkerState {
    /// Check if the worker has finished its timed work
    #[inline]
    pub const fn is_done(&self) -> bool {
        matches!(self, WorkerState::Deinit | WorkerState::Terminated)
    }

    /// Check if a transition from `self` to `next` is allowed
    ///
    /// SyncWait is optional, and any state may jump to Terminated.
    pub const fn can_transition_to(&self, next: WorkerState) -> bool {
        matches!(
            (self, next),
            (WorkerState::Init, WorkerState::SyncWait)
                | (WorkerState::Init, WorkerState::Running)
                | (WorkerState::SyncWait, WorkerState::Running)
                | (WorkerState::Running, WorkerState::Deinit)
                | (_, WorkerState::Terminated)
        )
    }
}

impl From<u8> for WorkerState {
    fn from(v: u8) -> Self {
        match v {
            0 => WorkerState::Init,
            1 => WorkerState::SyncWait,
            2 => WorkerState::Running,
            3 => WorkerState::Deinit,
            _ => WorkerState::Terminated,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Init => write!(f, "init"),
            WorkerState::SyncWait => write!(f, "sync-wait"),
            WorkerState::Running => write!(f, "run"),
            WorkerState::Deinit => write!(f, "deinit"),
            WorkerState::Terminated => write!(f, "terminated"),
        }
    }
}

/// What a stressor reports back as its process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitOutcome {
    /// Ran to the deadline or op limit
    Success = 0,
    /// A check inside the stressor failed
    Failure = 1,
    /// Completed but something was not as expected
    NotSuccess = 2,
    /// Could not get a resource it needs (memory, fds, ports)
    NoResource = 3,
    /// Kernel or environment lacks the feature exercised
    NotImplemented = 4,
    /// Stopped by an unexpected signal
    Signalled = 5,
    /// Exited via a raw exit syscall
    BySysExit = 6,
    /// Counters cannot be trusted (e.g. force-killed mid-update)
    MetricsUntrustworthy = 7,
}

impl ExitOutcome {
    /// Process exit code for this outcome
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Map a process exit code back to an outcome
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitOutcome::Success),
            1 => Some(ExitOutcome::Failure),
            2 => Some(ExitOutcome::NotSuccess),
            3 => Some(ExitOutcome::NoResource),
            4 => Some(ExitOutcome::NotImplemented),
            5 => Some(ExitOutcome::Signalled),
            6 => Some(ExitOutcome::BySysExit),
            7 => Some(ExitOutcome::MetricsUntrustworthy),
            _ => None,
        }
    }

    /// Outcomes that are not counted as stressor failures
    #[inline]
    pub const fn is_benign(self) -> bool {
        matches!(self, ExitOutcome::Success | ExitOutcome::NoResource | ExitOutcome::NotImplemented)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitOutcome::Success => "success",
            ExitOutcome::Failure => "failure",
            ExitOutcome::NotSuccess => "not success",
            ExitOutcome::NoResource => "no resource",
            ExitOutcome::NotImplemented => "not implemented",
            ExitOutcome::Signalled => "signalled",
            ExitOutcome::BySysExit => "exited by sys_exit",
            ExitOutcome::MetricsUntrustworthy => "metrics untrustworthy",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert!(WorkerState::Init.can_transition_to(WorkerState::SyncWait));
        assert!(WorkerState::Init.can_transition_to(WorkerState::Running));
        assert!(WorkerState::SyncWait.can_transition_to(WorkerState::Running));
        assert!(WorkerState::Running.can_transition_to(WorkerState::Deinit));
        assert!(WorkerState::Running.can_transition_to(WorkerState::Terminated));
        assert!(!WorkerState::Running.can_transition_to(WorkerState::SyncWait));
        assert!(!WorkerState::Deinit.can_transition_to(WorkerState::Running));
    }

    #[test]
    fn test_state_roundtrip_u8() {
        for s in [WorkerState::Init, WorkerState::SyncWait, WorkerState::Running, WorkerState::Deinit] {
            assert_eq!(WorkerState::from(s as u8), s);
        }
        assert_eq!(WorkerState::from(200), WorkerState::Terminated);
        assert!(WorkerState::Deinit.is_done());
        assert!(!WorkerState::Running.is_done());
    }

    #[test]
    fn test_exit_outcome_codes() {
        assert_eq!(ExitOutcome::Success.code(), 0);
        assert_eq!(ExitOutcome::MetricsUntrustworthy.code(), 7);
        assert_eq!(ExitOutcome::from_code(3), Some(ExitOutcome::NoResource));
        assert_eq!(ExitOutcome::from_code(42), None);
        assert!(ExitOutcome::NotImplemented.is_benign());
        assert!(!ExitOutcome::Failure.is_benign());
    }
}
