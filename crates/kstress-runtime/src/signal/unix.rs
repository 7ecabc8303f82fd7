//! Unix signal handling: stop handlers, deadline timer, signal delivery

use std::time::Duration;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use kstress_core::error::{StressError, StressResult};
use kstress_core::token;

extern "C" fn on_stop_signal(_sig: libc::c_int) {
    token::request_stop();
}

fn install(sig: Signal, handler: SigHandler) -> StressResult<()> {
    // No SA_RESTART: blocking syscalls return EINTR so loops can poll
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // Safety: the handler only performs an atomic store
    unsafe { signal::sigaction(sig, &action) }
        .map(|_| ())
        .map_err(|e| StressError::SignalSetupFailed(e as i32))
}

/// Route SIGALRM and SIGINT to the keep-running flag
pub fn install_stop_handlers() -> StressResult<()> {
    install(Signal::SIGALRM, SigHandler::Handler(on_stop_signal))?;
    install(Signal::SIGINT, SigHandler::Handler(on_stop_signal))
}

/// Put SIGALRM and SIGINT back to their default actions
pub fn restore_default_handlers() -> StressResult<()> {
    install(Signal::SIGALRM, SigHandler::SigDfl)?;
    install(Signal::SIGINT, SigHandler::SigDfl)
}

fn set_real_timer(d: Duration) -> StressResult<()> {
    let value = libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    };
    let itv = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: value,
    };
    // Safety: itv is a valid itimerval, old value not requested
    let rc = unsafe { libc::setitimer(libc::ITIMER_REAL, &itv, core::ptr::null_mut()) };
    if rc != 0 {
        return Err(StressError::SignalSetupFailed(Errno::last_raw()));
    }
    Ok(())
}

/// Deliver SIGALRM to this process after `timeout`
///
/// Sub-microsecond timeouts are rounded up so the timer is never disarmed
/// by accident.
pub fn arm_deadline(timeout: Duration) -> StressResult<()> {
    set_real_timer(timeout.max(Duration::from_micros(1)))
}

/// Cancel a pending deadline
pub fn disarm_deadline() -> StressResult<()> {
    set_real_timer(Duration::ZERO)
}

/// Send `sig` to `pid`; a process that is already gone is not an error
pub fn send_signal(pid: i32, sig: Signal) -> StressResult<()> {
    match signal::kill(Pid::from_raw(pid), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(StressError::Platform(e as i32)),
    }
}

/// Ask a worker to wind down
#[inline]
pub fn send_alarm(pid: i32) -> StressResult<()> {
    send_signal(pid, Signal::SIGALRM)
}
