//! Signal handling for cooperative stop
//!
//! SIGALRM (deadline) and SIGINT (user abort) only clear the process-wide
//! keep-running flag; stressor loops notice on their next poll.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    }
}
