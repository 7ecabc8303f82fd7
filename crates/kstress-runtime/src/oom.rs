//! OOM killer interaction
//!
//! Workers volunteer as OOM targets (`oom_score_adj = 1000`) so the kernel
//! picks a stressor rather than the supervising parent. Memory-hungry
//! stressors run their allocation loop in a disposable child via
//! `oomable_child`, which respawns it after an OOM kill (or SIGSEGV/SIGBUS
//! from an overcommitted mapping) until the run ends.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{ForkResult, Pid};
use kstress_core::error::{StressError, StressResult};
use kstress_core::{kdebug, kinfo, ExitOutcome};
use crate::context::WorkerContext;
use crate::signal;
use crate::worker::{fork_with_retry, ExitClass, RestartDecision, RestartPolicy};

const OOM_SCORE_ADJ: &str = "/proc/self/oom_score_adj";

/// Most attractive OOM target
pub const OOM_ADJ_KILLABLE: i32 = 1000;

/// Never OOM-killed (needs CAP_SYS_RESOURCE)
pub const OOM_ADJ_UNKILLABLE: i32 = -1000;

fn write_oom_score_adj(value: i32) -> std::io::Result<()> {
    std::fs::write(OOM_SCORE_ADJ, value.to_string())
}

/// Make this process a preferred OOM target, or shield it
///
/// Shielding tries -1000 and falls back to 0 without privileges. Failures
/// are environment errors and only logged. Returns whether a value stuck.
pub fn set_oom_adjustment(killable: bool) -> bool {
    let attempts: &[i32] = if killable {
        &[OOM_ADJ_KILLABLE]
    } else {
        &[OOM_ADJ_UNKILLABLE, 0]
    };
    for &v in attempts {
        match write_oom_score_adj(v) {
            Ok(()) => return true,
            Err(e) => kdebug!("cannot set oom_score_adj to {}: {}", v, e),
        }
    }
    false
}

/// Restarts seen by one `oomable_child` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartCounts {
    pub oom: u32,
    pub segv: u32,
    pub bus: u32,
}

impl RestartCounts {
    pub fn total(&self) -> u32 {
        self.oom + self.segv + self.bus
    }
}

/// Wait for `child`, forwarding a stop of this worker to it
///
/// Once this worker is told to stop the child gets SIGALRM, then SIGKILL
/// after the grace period. Returns the status and whether we killed it.
fn wait_forwarding_stop(ctx: &WorkerContext<'_>, child: Pid) -> StressResult<(WaitStatus, bool)> {
    let poll = Duration::from_millis(10);
    let mut kill_at: Option<Instant> = None;
    let mut killed = false;
    loop {
        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Ok(WaitStatus::Stopped(..)) | Ok(WaitStatus::Continued(..)) => {}
            Ok(s) => return Ok((s, killed)),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(StressError::WaitFailed(e as i32)),
        }
        if !killed && kill_at.is_none() && !ctx.keep_running() {
            signal::send_alarm(child.as_raw())?;
            kill_at = Some(Instant::now() + ctx.config().kill_grace);
        }
        if kill_at.is_some_and(|t| Instant::now() >= t) {
            signal::send_signal(child.as_raw(), Signal::SIGKILL)?;
            killed = true;
            kill_at = None;
        }
        std::thread::sleep(poll);
    }
}

/// Run `f` in a child process, respawning it after OOM kills
///
/// SIGSEGV and SIGBUS deaths are restarted as well; all restarts share the
/// `max_oom_restarts` budget. OOM restarts are added to the worker's slot.
pub fn oomable_child<F>(ctx: &mut WorkerContext<'_>, mut f: F) -> ExitOutcome
where
    F: FnMut(&mut WorkerContext<'_>) -> ExitOutcome,
{
    let policy = RestartPolicy::from_config(ctx.config());
    let mut counts = RestartCounts::default();

    let outcome = loop {
        if !ctx.keep_running() {
            break ExitOutcome::Success;
        }
        let child = match fork_with_retry(ctx.config()) {
            Ok(ForkResult::Parent { child }) => child,
            Ok(ForkResult::Child) => {
                // Safety: prctl with integer arguments only
                unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
                set_oom_adjustment(true);
                let code = match catch_unwind(AssertUnwindSafe(|| f(ctx))) {
                    Ok(o) => o.code(),
                    Err(_) => ExitOutcome::Failure.code(),
                };
                // Safety: leave the disposable child without unwinding
                unsafe { libc::_exit(code) }
            }
            Err(e) => {
                kdebug!("{}: cannot fork oomable child: {}", ctx.name(), e);
                break ExitOutcome::NoResource;
            }
        };

        let (status, killed) = match wait_forwarding_stop(ctx, child) {
            Ok(r) => r,
            Err(e) => {
                kdebug!("{}: lost oomable child {}: {}", ctx.name(), child, e);
                break ExitOutcome::Failure;
            }
        };
        let class = match ExitClass::classify(status, !killed) {
            Some(c) => c,
            None => break ExitOutcome::Failure,
        };

        let restartable = match class {
            ExitClass::OomKilled => {
                counts.oom += 1;
                // Accepted OOM kill with restarts disabled: a clean stop
                if !policy.restart_on_oom {
                    break ExitOutcome::Success;
                }
                true
            }
            ExitClass::Signalled(sig) if sig == libc::SIGSEGV => {
                counts.segv += 1;
                true
            }
            ExitClass::Signalled(sig) if sig == libc::SIGBUS => {
                counts.bus += 1;
                true
            }
            ExitClass::Signalled(_) if killed => break ExitOutcome::Success,
            other => break other.outcome(false),
        };
        let decision = if restartable && ctx.keep_running() {
            policy.decide(&ExitClass::OomKilled, counts.total() - 1)
        } else {
            RestartDecision::Accept
        };
        if decision == RestartDecision::Accept {
            break ExitOutcome::Success;
        }
        kdebug!("{}: restarting oomable child after {:?}", ctx.name(), class);
    };

    if counts.total() > 0 {
        kinfo!(
            "{}: OOM restarts: {}, SEGV restarts: {}, BUS restarts: {}",
            ctx.name(),
            counts.oom,
            counts.segv,
            counts.bus
        );
        ctx.slot().add_oom_restarts(counts.oom);
        ctx.block().add_oom_restarts(counts.oom as u64);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SharedRegion;
    use crate::test_util::fork_guard;
    use crate::worker::{Job, Orchestrator};
    use crate::config::RunConfig;

    #[test]
    fn test_restart_counts() {
        let c = RestartCounts { oom: 2, segv: 1, bus: 0 };
        assert_eq!(c.total(), 3);
        assert_eq!(RestartCounts::default().total(), 0);
    }

    #[test]
    fn test_set_oom_adjustment_does_not_panic() {
        // Result depends on /proc and privileges; only the fallback matters
        let _ = set_oom_adjustment(false);
    }

    #[test]
    fn test_oomable_child_restarts() {
        let _g = fork_guard();
        let region = SharedRegion::map(1, 1).unwrap();
        // The disposable child dies twice before it gets through
        let entry = |ctx: &mut WorkerContext<'_>| {
            oomable_child(ctx, |ctx| {
                ctx.bogo_inc();
                if ctx.bogo_get() < 3 {
                    let _ = signal::send_signal(std::process::id() as i32, Signal::SIGKILL);
                }
                ExitOutcome::Success
            })
        };
        let jobs = [Job { index: 0, name: "vm", instances: 1, entry: &entry }];

        let results = Orchestrator::new(RunConfig::new(), &region).run(&jobs);
        let w = &results[0].workers[0];
        assert_eq!(w.outcome, ExitOutcome::Success);
        // Restarts inside the worker are not parent restarts
        assert_eq!(w.restarts, 0);
        let slot = region.slot(0, 0).unwrap();
        assert_eq!(slot.bogo_get(), 3);
        assert_eq!(slot.oom_restarts(), 2);
        assert_eq!(region.stressor_block(0).unwrap().oom_restarts(), 2);
    }

    #[test]
    fn test_oomable_child_budget() {
        let _g = fork_guard();
        let region = SharedRegion::map(1, 1).unwrap();
        let entry = |ctx: &mut WorkerContext<'_>| {
            oomable_child(ctx, |ctx| {
                ctx.bogo_inc();
                // std's stack-overflow SIGSEGV handler returns on a kill()ed
                // SIGSEGV, so the child would survive it
                // Safety: restoring the default disposition
                let _ = unsafe { nix::sys::signal::signal(Signal::SIGSEGV, nix::sys::signal::SigHandler::SigDfl) };
                let _ = signal::send_signal(std::process::id() as i32, Signal::SIGSEGV);
                ExitOutcome::Failure
            })
        };
        let jobs = [Job { index: 0, name: "vm", instances: 1, entry: &entry }];

        let config = RunConfig::new().max_oom_restarts(2);
        let results = Orchestrator::new(config, &region).run(&jobs);
        assert_eq!(results[0].workers[0].outcome, ExitOutcome::Success);
        // First run plus two restarts; SEGV restarts are not OOM restarts
        let slot = region.slot(0, 0).unwrap();
        assert_eq!(slot.bogo_get(), 3);
        assert_eq!(slot.oom_restarts(), 0);
    }
}
