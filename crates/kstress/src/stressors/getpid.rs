//! Tight getpid(2) syscall loop
//!
//! Calls the raw syscall so no libc caching can short-circuit the kernel
//! entry.

use nix::errno::Errno;
use kstress_core::{kdebug, ExitOutcome};
use kstress_runtime::WorkerContext;
use super::Stressor;

/// Syscalls per bogo-op
const CALLS_PER_OP: usize = 16;

pub struct GetpidStressor;

fn sys_getpid() -> nix::Result<libc::c_long> {
    // Safety: getpid takes no arguments
    Errno::result(unsafe { libc::syscall(libc::SYS_getpid) })
}

impl Stressor for GetpidStressor {
    fn name(&self) -> &'static str {
        "getpid"
    }

    fn run(&self, ctx: &mut WorkerContext<'_>) -> ExitOutcome {
        let expected = std::process::id() as libc::c_long;
        let verify = ctx.verify();

        while ctx.keep_running() {
            for _ in 0..CALLS_PER_OP {
                match ctx.retry_on_eintr(sys_getpid) {
                    Some(Ok(pid)) if verify && pid != expected => {
                        kdebug!("getpid: returned {}, expected {}", pid, expected);
                        return ExitOutcome::Failure;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        kdebug!("getpid: failed: {}", e.desc());
                        return ExitOutcome::Failure;
                    }
                    None => return ExitOutcome::Success,
                }
            }
            ctx.bogo_inc();
        }
        ExitOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sys_getpid() {
        assert_eq!(sys_getpid(), Ok(std::process::id() as libc::c_long));
    }
}
