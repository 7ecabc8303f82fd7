//! Error types for the kstress harness

use core::fmt;

/// Result type for harness operations
pub type StressResult<T> = Result<T, StressError>;

/// Errors that can occur while orchestrating stressors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StressError {
    /// mmap of the shared statistics region failed
    MapFailed(i32),

    /// Shared region dimensions are zero or overflow
    InvalidDimensions { stressors: usize, instances: usize },

    /// Slot index outside the mapped region
    InvalidSlot { stressor: usize, instance: usize },

    /// fork() failed after all retries
    ForkFailed(i32),

    /// waitpid() failed with something other than EINTR
    WaitFailed(i32),

    /// Signal handler or timer setup failed
    SignalSetupFailed(i32),

    /// No perf counter could be opened for this worker
    PerfUnavailable,

    /// perf_event ioctl failed on every counter
    PerfIoctl(i32),

    /// Port range is empty or outside the usable range
    InvalidPortRange { start: u16, end: u16 },

    /// No free window of the requested width exists
    PortsExhausted { start: u16, end: u16 },

    /// Platform-specific error (raw errno)
    Platform(i32),
}

impl StressError {
    /// Raw errno carried by this error, if any
    pub fn errno(&self) -> Option<i32> {
        match self {
            StressError::MapFailed(e)
            | StressError::ForkFailed(e)
            | StressError::WaitFailed(e)
            | StressError::SignalSetupFailed(e)
            | StressError::PerfIoctl(e)
            | StressError::Platform(e) => Some(*e),
            _ => None,
        }
    }

    /// Classify the carried errno, `Other` when there is none
    pub fn class(&self) -> ErrnoClass {
        self.errno().map(classify_errno).unwrap_or(ErrnoClass::Other)
    }
}

impl fmt::Display for StressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StressError::MapFailed(e) => write!(f, "shared region mmap failed: errno {}", e),
            StressError::InvalidDimensions { stressors, instances } => {
                write!(f, "invalid region dimensions: {} stressors x {} instances", stressors, instances)
            }
            StressError::InvalidSlot { stressor, instance } => {
                write!(f, "no slot for stressor {} instance {}", stressor, instance)
            }
            StressError::ForkFailed(e) => write!(f, "fork failed: errno {}", e),
            StressError::WaitFailed(e) => write!(f, "waitpid failed: errno {}", e),
            StressError::SignalSetupFailed(e) => write!(f, "signal setup failed: errno {}", e),
            StressError::PerfUnavailable => write!(f, "perf events unavailable"),
            StressError::PerfIoctl(e) => write!(f, "perf ioctl failed: errno {}", e),
            StressError::InvalidPortRange { start, end } => {
                write!(f, "invalid port range {}..={}", start, end)
            }
            StressError::PortsExhausted { start, end } => {
                write!(f, "no free port window for {}..={}", start, end)
            }
            StressError::Platform(e) => write!(f, "platform error: errno {}", e),
        }
    }
}

impl std::error::Error for StressError {}

/// How the harness treats a failing errno
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrnoClass {
    /// Kernel feature absent; logged in verify mode only
    Ignorable,
    /// Resource pressure; retry with backoff
    Transient,
    /// Missing capability or /proc, /sys entry; skip the affected unit
    Environment,
    /// Anything else; reported as a failure
    Other,
}

/// Map an errno onto the harness error taxonomy
pub fn classify_errno(errno: i32) -> ErrnoClass {
    match errno {
        libc::EINVAL | libc::ENOSYS | libc::EOPNOTSUPP | libc::ENOTTY => ErrnoClass::Ignorable,
        libc::EAGAIN | libc::ENOMEM | libc::ENOBUFS | libc::EINTR => ErrnoClass::Transient,
        libc::EPERM | libc::EACCES | libc::ENOENT | libc::ENODEV | libc::ENXIO => {
            ErrnoClass::Environment
        }
        _ => ErrnoClass::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = StressError::ForkFailed(libc::EAGAIN);
        assert_eq!(format!("{}", e), format!("fork failed: errno {}", libc::EAGAIN));

        let e = StressError::InvalidPortRange { start: 10, end: 5 };
        assert_eq!(format!("{}", e), "invalid port range 10..=5");
    }

    #[test]
    fn test_classify_errno() {
        assert_eq!(classify_errno(libc::ENOSYS), ErrnoClass::Ignorable);
        assert_eq!(classify_errno(libc::EINVAL), ErrnoClass::Ignorable);
        assert_eq!(classify_errno(libc::EAGAIN), ErrnoClass::Transient);
        assert_eq!(classify_errno(libc::ENOBUFS), ErrnoClass::Transient);
        assert_eq!(classify_errno(libc::EACCES), ErrnoClass::Environment);
        assert_eq!(classify_errno(libc::EBADF), ErrnoClass::Other);
    }

    #[test]
    fn test_error_class() {
        assert_eq!(StressError::ForkFailed(libc::ENOMEM).class(), ErrnoClass::Transient);
        assert_eq!(StressError::PerfUnavailable.class(), ErrnoClass::Other);
        assert_eq!(StressError::PerfUnavailable.errno(), None);
    }
}
