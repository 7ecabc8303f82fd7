//! Worker process orchestration
//!
//! The parent forks every instance of every job up front, optionally opens
//! the per-stressor start barriers, then polls children with
//! `waitpid(WNOHANG)`:
//!
//! ```text
//! spawn ──► [sync barrier] ──► poll ──► reap ──► classify ──► report
//!                               │                  │
//!                   deadline: SIGALRM              └─ OOM kill: respawn
//!                   + kill_grace: SIGKILL
//! ```
//!
//! Inside each child the worker sets up signals, OOM score, PRNG and perf
//! counters, runs the job's entry function, records its outcome in its
//! slot and `_exit`s with the outcome code.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use kstress_core::error::{classify_errno, ErrnoClass, StressError, StressResult};
use kstress_core::{kdebug, kerror, kinfo, kwarn, token, ExitOutcome, WorkerState};
use crate::config::{defaults, RunConfig};
use crate::context::WorkerContext;
use crate::memory::SharedRegion;
use crate::perf::{self, PerfTable};
use crate::{entropy, oom, signal};

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Exit code 0
    Success,
    /// Non-zero exit code
    Failure(i32),
    /// Killed by a signal (other than an OOM kill)
    Signalled(i32),
    /// SIGKILL while we were watching for the OOM killer
    OomKilled,
}

impl ExitClass {
    /// Classify a wait status; `None` for stop/continue notifications
    ///
    /// `oom_watch` is false for workers we SIGKILLed ourselves.
    pub fn classify(status: WaitStatus, oom_watch: bool) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, 0) => Some(ExitClass::Success),
            WaitStatus::Exited(_, code) => Some(ExitClass::Failure(code)),
            WaitStatus::Signaled(_, Signal::SIGKILL, _) if oom_watch => Some(ExitClass::OomKilled),
            WaitStatus::Signaled(_, sig, _) => Some(ExitClass::Signalled(sig as i32)),
            _ => None,
        }
    }

    /// Outcome to report once this exit is accepted
    pub fn outcome(&self, force_killed: bool) -> ExitOutcome {
        match *self {
            _ if force_killed => ExitOutcome::MetricsUntrustworthy,
            ExitClass::Success => ExitOutcome::Success,
            ExitClass::Failure(code) => ExitOutcome::from_code(code).unwrap_or(ExitOutcome::Failure),
            ExitClass::Signalled(_) => ExitOutcome::Signalled,
            // Restarts disabled or exhausted: a clean stop
            ExitClass::OomKilled => ExitOutcome::Success,
        }
    }
}

/// What to do after a worker exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Fork the instance again
    Retry,
    /// Take the exit as the instance's result
    Accept,
}

/// When OOM-killed workers are restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restart_on_oom: bool,
    pub max_restarts: u32,
}

impl RestartPolicy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            restart_on_oom: !config.oomable,
            max_restarts: config.max_oom_restarts,
        }
    }

    /// Decide for an exit after `restarts` earlier restarts
    pub fn decide(&self, class: &ExitClass, restarts: u32) -> RestartDecision {
        match class {
            ExitClass::OomKilled if self.restart_on_oom && restarts < self.max_restarts => {
                RestartDecision::Retry
            }
            _ => RestartDecision::Accept,
        }
    }
}

/// Whether a fork that failed with `errno` is worth retrying
pub fn redo_fork_on_error(errno: i32) -> bool {
    classify_errno(errno) == ErrnoClass::Transient
}

/// fork(), retrying transient failures with doubling backoff
pub fn fork_with_retry(config: &RunConfig) -> StressResult<ForkResult> {
    let mut attempt = 0;
    loop {
        // Safety: children only run harness code and leave via _exit
        match unsafe { fork() } {
            Ok(r) => return Ok(r),
            Err(e) if attempt < config.fork_retries && redo_fork_on_error(e as i32) => {
                let wait = config.fork_backoff_for(attempt);
                kdebug!("fork failed ({}), retry {} in {:?}", e.desc(), attempt + 1, wait);
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(StressError::ForkFailed(e as i32)),
        }
    }
}

/// Blocking waitpid that retries EINTR; `None` if the child is already gone
pub(crate) fn wait_blocking(pid: Pid) -> StressResult<Option<WaitStatus>> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Stopped(..)) | Ok(WaitStatus::Continued(..)) => continue,
            Ok(s) => return Ok(Some(s)),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return Ok(None),
            Err(e) => return Err(StressError::WaitFailed(e as i32)),
        }
    }
}

/// SIGKILL `pid` and reap it
pub fn kill_and_wait(pid: i32) -> StressResult<()> {
    signal::send_signal(pid, Signal::SIGKILL)?;
    wait_blocking(Pid::from_raw(pid)).map(|_| ())
}

/// A stressor entry point run inside each worker
pub type EntryFn<'a> = dyn Fn(&mut WorkerContext<'_>) -> ExitOutcome + 'a;

/// One stressor to run
pub struct Job<'a> {
    /// Stressor index in the shared region
    pub index: usize,
    pub name: &'a str,
    pub instances: usize,
    pub entry: &'a EntryFn<'a>,
}

/// A live worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub pid: i32,
    pub stressor: usize,
    pub instance: usize,
    /// Restarts after OOM kills so far
    pub restarts: u32,
    job: usize,
}

impl WorkerHandle {
    /// Last state the worker announced
    pub fn state(&self, region: &SharedRegion) -> WorkerState {
        region
            .slot(self.stressor, self.instance)
            .map_or(WorkerState::Terminated, |s| s.state())
    }
}

/// Final result of one instance
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub instance: usize,
    pub pid: i32,
    pub class: ExitClass,
    pub outcome: ExitOutcome,
    pub force_killed: bool,
    pub restarts: u32,
}

/// Result of one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub index: usize,
    pub name: String,
    /// Instances successfully forked
    pub started: usize,
    /// Set when no instance could be started
    pub spawn_error: Option<StressError>,
    pub workers: Vec<WorkerReport>,
}

impl JobResult {
    fn new(job: &Job<'_>) -> Self {
        Self {
            index: job.index,
            name: job.name.to_string(),
            started: 0,
            spawn_error: None,
            workers: Vec::new(),
        }
    }

    /// Every instance finished with a benign outcome
    pub fn passed(&self) -> bool {
        self.spawn_error.is_none() && self.workers.iter().all(|w| w.outcome.is_benign())
    }

    pub fn count(&self, pred: impl Fn(&WorkerReport) -> bool) -> usize {
        self.workers.iter().filter(|w| pred(w)).count()
    }
}

/// Forks, supervises and reaps worker processes
pub struct Orchestrator<'a> {
    config: RunConfig,
    region: &'a SharedRegion,
    perf: Option<&'a PerfTable>,
    policy: RestartPolicy,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: RunConfig, region: &'a SharedRegion) -> Self {
        let policy = RestartPolicy::from_config(&config);
        Self { config, region, perf: None, policy }
    }

    /// Open perf counters in every worker using `table`
    pub fn with_perf(mut self, table: &'a PerfTable) -> Self {
        self.perf = Some(table);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run every job to completion, all jobs in parallel
    pub fn run(&self, jobs: &[Job<'_>]) -> Vec<JobResult> {
        let mut results: Vec<JobResult> = jobs.iter().map(JobResult::new).collect();
        let mut live = Vec::new();

        for (pos, job) in jobs.iter().enumerate() {
            match self.spawn(pos, job) {
                Ok(handles) => {
                    results[pos].started = handles.len();
                    live.extend(handles);
                }
                Err(e) => {
                    kerror!("{}: cannot start any instance: {}", job.name, e);
                    results[pos].spawn_error = Some(e);
                }
            }
        }

        if self.config.sync_start {
            let timeout = Duration::from_millis(defaults::SYNC_START_TIMEOUT_MS);
            for (job, res) in jobs.iter().zip(&results) {
                if res.started == 0 {
                    continue;
                }
                if let Ok(block) = self.region.stressor_block(job.index) {
                    let arrived = block.barrier.release_when_arrived(res.started as u32, timeout);
                    if arrived < res.started as u32 {
                        kwarn!("{}: released with {} of {} instances", job.name, arrived, res.started);
                    }
                }
            }
        }

        self.wait_all(jobs, live, &mut results);
        results
    }

    /// Prepare a job's slots and fork `job.instances` workers
    ///
    /// Stops at the first fork that fails for good; fails only if no
    /// instance at all was started.
    pub fn spawn(&self, pos: usize, job: &Job<'_>) -> StressResult<Vec<WorkerHandle>> {
        let block = self.region.stressor_block(job.index)?;
        let n = job.instances.min(self.region.max_instances());
        block.prepare();
        for slot in self.region.slots(job.index, n) {
            slot.prepare();
        }

        let mut handles = Vec::with_capacity(n);
        for instance in 0..n {
            match self.spawn_one(pos, job, instance) {
                Ok(h) => handles.push(h),
                Err(e) if handles.is_empty() => return Err(e),
                Err(e) => {
                    kwarn!("{}: started {} of {} instances: {}", job.name, handles.len(), n, e);
                    break;
                }
            }
        }
        Ok(handles)
    }

    fn spawn_one(&self, pos: usize, job: &Job<'_>, instance: usize) -> StressResult<WorkerHandle> {
        let slot = self.region.slot(job.index, instance)?;
        match fork_with_retry(&self.config)? {
            ForkResult::Parent { child } => {
                slot.set_pid(child.as_raw());
                kdebug!("{}: instance {} is pid {}", job.name, instance, child);
                Ok(WorkerHandle {
                    pid: child.as_raw(),
                    stressor: job.index,
                    instance,
                    restarts: 0,
                    job: pos,
                })
            }
            ForkResult::Child => {
                token::reset_stop();
                let code = self.worker_main(job, instance).code();
                // Safety: skip atexit handlers and destructors owned by the parent
                unsafe { libc::_exit(code) }
            }
        }
    }

    /// Everything a worker does between fork and `_exit`
    fn worker_main(&self, job: &Job<'_>, instance: usize) -> ExitOutcome {
        if let Err(e) = signal::install_stop_handlers() {
            kerror!("{}: instance {}: {}", job.name, instance, e);
            return ExitOutcome::Failure;
        }
        let mut ctx = match WorkerContext::new(job.name, job.index, instance, &self.config, self.region) {
            Ok(ctx) => ctx,
            Err(e) => {
                kerror!("{}: instance {}: {}", job.name, instance, e);
                return ExitOutcome::Failure;
            }
        };
        ctx.slot().set_pid(std::process::id() as i32);
        oom::set_oom_adjustment(true);
        let salt = ((job.index as u64) << 32) | instance as u64;
        entropy::reseed(ctx.rng(), &self.config, salt);

        let perf_on = match self.perf {
            Some(table) => {
                perf::perf_open(table, self.region, ctx.slot()).is_ok()
                    && perf::perf_enable(ctx.slot()).is_ok()
            }
            None => false,
        };

        let outcome = match catch_unwind(AssertUnwindSafe(|| (job.entry)(&mut ctx))) {
            Ok(o) => o,
            Err(_) => {
                kerror!("{}: instance {} panicked", job.name, instance);
                ExitOutcome::Failure
            }
        };

        if perf_on {
            let _ = perf::perf_disable(ctx.slot());
            let _ = perf::perf_close(ctx.slot());
        }
        ctx.finish(outcome);
        outcome
    }

    fn wait_all(&self, jobs: &[Job<'_>], mut live: Vec<WorkerHandle>, results: &mut [JobResult]) {
        let poll = Duration::from_millis(defaults::POLL_INTERVAL_MS);
        let deadline = Instant::now() + self.config.timeout;
        let mut alarmed = false;
        let mut kill_at: Option<Instant> = None;

        while !live.is_empty() {
            let now = Instant::now();
            let stopping = !token::keep_running_flag() || self.region.stop_requested();
            if !alarmed && (now >= deadline || stopping) {
                kdebug!("deadline reached, signalling {} workers", live.len());
                for h in &live {
                    let _ = signal::send_alarm(h.pid);
                }
                alarmed = true;
                kill_at = Some(now + self.config.kill_grace);
            }
            if kill_at.is_some_and(|t| now >= t) {
                for h in &live {
                    if let Ok(slot) = self.region.slot(h.stressor, h.instance) {
                        slot.set_force_killed();
                    }
                    kwarn!("{}: instance {} (pid {}) did not stop, killing", jobs[h.job].name, h.instance, h.pid);
                    let _ = signal::send_signal(h.pid, Signal::SIGKILL);
                }
                kill_at = None;
            }

            let mut reaped = false;
            let mut i = 0;
            while i < live.len() {
                let pid = Pid::from_raw(live[i].pid);
                let status = match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => {
                        i += 1;
                        continue;
                    }
                    Err(Errno::EINTR) => continue,
                    Ok(s) => Some(s),
                    Err(e) => {
                        kerror!("waitpid({}) failed: {}", pid, e.desc());
                        None
                    }
                };
                let h = &live[i];
                let force_killed = self
                    .region
                    .slot(h.stressor, h.instance)
                    .map_or(false, |s| s.force_killed());
                let class = match status {
                    Some(s) => match ExitClass::classify(s, !force_killed) {
                        Some(c) => c,
                        None => {
                            i += 1;
                            continue;
                        }
                    },
                    // Lost track of the child; nothing more to learn
                    None => ExitClass::Failure(ExitOutcome::Failure.code()),
                };

                let h = live.swap_remove(i);
                reaped = true;
                if let Some(next) = self.on_exit(jobs, results, h, class, force_killed, alarmed) {
                    live.push(next);
                }
            }

            if !reaped {
                std::thread::sleep(poll);
            }
        }
    }

    /// Record or restart one reaped worker
    fn on_exit(
        &self,
        jobs: &[Job<'_>],
        results: &mut [JobResult],
        h: WorkerHandle,
        class: ExitClass,
        force_killed: bool,
        stopping: bool,
    ) -> Option<WorkerHandle> {
        let job = &jobs[h.job];
        let slot = self.region.slot(h.stressor, h.instance).ok();

        let decision = if stopping {
            RestartDecision::Accept
        } else {
            self.policy.decide(&class, h.restarts)
        };
        if decision == RestartDecision::Retry {
            let restarts = h.restarts + 1;
            kinfo!(
                "{}: instance {} killed by the OOM killer, restarting ({}/{})",
                job.name,
                h.instance,
                restarts,
                self.policy.max_restarts
            );
            if let Some(slot) = slot {
                slot.add_oom_restarts(1);
                slot.set_state(WorkerState::Init);
            }
            if let Ok(block) = self.region.stressor_block(h.stressor) {
                block.add_oom_restarts(1);
            }
            match self.spawn_one(h.job, job, h.instance) {
                Ok(mut next) => {
                    next.restarts = restarts;
                    return Some(next);
                }
                Err(e) => kerror!("{}: restart of instance {} failed: {}", job.name, h.instance, e),
            }
        }

        let outcome = class.outcome(force_killed);
        match class {
            ExitClass::Success => {}
            ExitClass::Failure(code) => {
                kdebug!("{}: instance {} exited with {} ({})", job.name, h.instance, code, outcome)
            }
            ExitClass::Signalled(sig) => {
                kwarn!("{}: instance {} terminated by signal {}", job.name, h.instance, sig)
            }
            ExitClass::OomKilled => kinfo!("{}: instance {} OOM killed, not restarting", job.name, h.instance),
        }
        if let Some(slot) = slot {
            if !matches!(class, ExitClass::Success | ExitClass::Failure(_)) {
                slot.set_exit_code(outcome.code());
            }
            slot.set_state(WorkerState::Terminated);
        }
        results[h.job].workers.push(WorkerReport {
            instance: h.instance,
            pid: h.pid,
            class,
            outcome,
            force_killed,
            restarts: h.restarts,
        });
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fork_guard;

    fn pid() -> Pid {
        Pid::from_raw(1234)
    }

    #[test]
    fn test_classify() {
        assert_eq!(ExitClass::classify(WaitStatus::Exited(pid(), 0), true), Some(ExitClass::Success));
        assert_eq!(ExitClass::classify(WaitStatus::Exited(pid(), 3), true), Some(ExitClass::Failure(3)));
        assert_eq!(
            ExitClass::classify(WaitStatus::Signaled(pid(), Signal::SIGKILL, false), true),
            Some(ExitClass::OomKilled)
        );
        assert_eq!(
            ExitClass::classify(WaitStatus::Signaled(pid(), Signal::SIGKILL, false), false),
            Some(ExitClass::Signalled(libc::SIGKILL))
        );
        assert_eq!(
            ExitClass::classify(WaitStatus::Signaled(pid(), Signal::SIGSEGV, true), true),
            Some(ExitClass::Signalled(libc::SIGSEGV))
        );
        assert_eq!(ExitClass::classify(WaitStatus::StillAlive, true), None);
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(ExitClass::Failure(3).outcome(false), ExitOutcome::NoResource);
        assert_eq!(ExitClass::Failure(99).outcome(false), ExitOutcome::Failure);
        assert_eq!(ExitClass::OomKilled.outcome(false), ExitOutcome::Success);
        assert_eq!(ExitClass::Signalled(9).outcome(true), ExitOutcome::MetricsUntrustworthy);
        assert_eq!(ExitClass::Signalled(11).outcome(false), ExitOutcome::Signalled);
    }

    #[test]
    fn test_restart_policy() {
        let retry = RestartPolicy { restart_on_oom: true, max_restarts: 2 };
        assert_eq!(retry.decide(&ExitClass::OomKilled, 0), RestartDecision::Retry);
        assert_eq!(retry.decide(&ExitClass::OomKilled, 1), RestartDecision::Retry);
        assert_eq!(retry.decide(&ExitClass::OomKilled, 2), RestartDecision::Accept);
        assert_eq!(retry.decide(&ExitClass::Signalled(11), 0), RestartDecision::Accept);

        let oomable = RestartPolicy::from_config(&RunConfig::new().oomable(true));
        assert_eq!(oomable.decide(&ExitClass::OomKilled, 0), RestartDecision::Accept);
    }

    #[test]
    fn test_redo_fork_on_error() {
        assert!(redo_fork_on_error(libc::EAGAIN));
        assert!(redo_fork_on_error(libc::ENOMEM));
        assert!(!redo_fork_on_error(libc::EPERM));
        assert!(!redo_fork_on_error(libc::EINVAL));
    }

    fn count_loop(ctx: &mut WorkerContext<'_>) -> ExitOutcome {
        while ctx.keep_running() {
            ctx.bogo_inc();
        }
        ExitOutcome::Success
    }

    fn kill_self() {
        let _ = signal::send_signal(std::process::id() as i32, Signal::SIGKILL);
    }

    #[test]
    fn test_max_ops_across_instances() {
        let _g = fork_guard();
        let region = SharedRegion::map(1, 8).unwrap();
        let config = RunConfig::new().instances(8).max_ops(500);
        let entry = |ctx: &mut WorkerContext<'_>| count_loop(ctx);
        let jobs = [Job { index: 0, name: "count", instances: 8, entry: &entry }];

        let results = Orchestrator::new(config, &region).run(&jobs);
        assert_eq!(results[0].started, 8);
        assert_eq!(results[0].workers.len(), 8);
        assert!(results[0].passed());
        let total: u64 = region.slots(0, 8).map(|s| s.bogo_get()).sum();
        assert_eq!(total, 8 * 500);
        for s in region.slots(0, 8) {
            assert_eq!(s.state(), WorkerState::Terminated);
            assert!(s.counter_ready());
            assert!(s.pid() > 0);
        }
    }

    #[test]
    fn test_oom_kill_is_restarted() {
        let _g = fork_guard();
        let region = SharedRegion::map(1, 1).unwrap();
        let entry = |ctx: &mut WorkerContext<'_>| {
            if ctx.slot().oom_restarts() == 0 {
                kill_self();
            }
            ExitOutcome::Success
        };
        let jobs = [Job { index: 0, name: "oom", instances: 1, entry: &entry }];

        let results = Orchestrator::new(RunConfig::new(), &region).run(&jobs);
        let w = &results[0].workers[0];
        assert_eq!(w.class, ExitClass::Success);
        assert_eq!(w.outcome, ExitOutcome::Success);
        assert_eq!(w.restarts, 1);
        assert_eq!(region.slot(0, 0).unwrap().oom_restarts(), 1);
        assert_eq!(region.stressor_block(0).unwrap().oom_restarts(), 1);
    }

    #[test]
    fn test_oomable_accepts_oom_kill() {
        let _g = fork_guard();
        let region = SharedRegion::map(1, 1).unwrap();
        let entry = |_: &mut WorkerContext<'_>| {
            kill_self();
            ExitOutcome::Failure
        };
        let jobs = [Job { index: 0, name: "oomable", instances: 1, entry: &entry }];

        let results = Orchestrator::new(RunConfig::new().oomable(true), &region).run(&jobs);
        let w = &results[0].workers[0];
        assert_eq!(w.class, ExitClass::OomKilled);
        assert_eq!(w.outcome, ExitOutcome::Success);
        assert_eq!(w.restarts, 0);
        assert_eq!(region.slot(0, 0).unwrap().oom_restarts(), 0);
    }

    #[test]
    fn test_panic_and_failure_do_not_abort_siblings() {
        let _g = fork_guard();
        let region = SharedRegion::map(3, 2).unwrap();
        let panics = |_: &mut WorkerContext<'_>| -> ExitOutcome {
            std::panic::set_hook(Box::new(|_| {}));
            panic!("stressor bug")
        };
        let no_resource = |_: &mut WorkerContext<'_>| ExitOutcome::NoResource;
        let counts = |ctx: &mut WorkerContext<'_>| count_loop(ctx);
        let jobs = [
            Job { index: 0, name: "panics", instances: 1, entry: &panics },
            Job { index: 1, name: "enomem", instances: 2, entry: &no_resource },
            Job { index: 2, name: "count", instances: 2, entry: &counts },
        ];

        let results = Orchestrator::new(RunConfig::new().max_ops(100), &region).run(&jobs);
        assert_eq!(results[0].workers[0].class, ExitClass::Failure(ExitOutcome::Failure.code()));
        assert!(!results[0].passed());
        assert_eq!(results[1].count(|w| w.outcome == ExitOutcome::NoResource), 2);
        assert!(results[1].passed());
        assert!(results[2].passed());
        assert_eq!(region.slots(2, 2).map(|s| s.bogo_get()).sum::<u64>(), 200);
        assert_eq!(region.slot(1, 0).unwrap().exit_code(), ExitOutcome::NoResource.code());
    }

    #[test]
    fn test_sync_start_releases_all() {
        let _g = fork_guard();
        let region = SharedRegion::map(1, 4).unwrap();
        let config = RunConfig::new().sync_start(true).max_ops(1);
        let entry = |ctx: &mut WorkerContext<'_>| count_loop(ctx);
        let jobs = [Job { index: 0, name: "sync", instances: 4, entry: &entry }];

        let results = Orchestrator::new(config, &region).run(&jobs);
        assert!(results[0].passed());
        let block = region.stressor_block(0).unwrap();
        assert_eq!(block.barrier.arrived(), 4);
        assert!(block.barrier.is_released());
        assert!(region.slots(0, 4).all(|s| s.bogo_get() == 1));
    }

    #[test]
    fn test_deadline_stops_loop() {
        let _g = fork_guard();
        let region = SharedRegion::map(1, 2).unwrap();
        let config = RunConfig::new().timeout(Duration::from_millis(300));
        let entry = |ctx: &mut WorkerContext<'_>| count_loop(ctx);
        let jobs = [Job { index: 0, name: "spin", instances: 2, entry: &entry }];

        let start = Instant::now();
        let results = Orchestrator::new(config, &region).run(&jobs);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(results[0].passed());
        assert_eq!(results[0].count(|w| w.force_killed), 0);
        assert!(region.slots(0, 2).all(|s| s.bogo_get() > 0));
    }

    #[test]
    fn test_stuck_worker_is_force_killed() {
        let _g = fork_guard();
        let region = SharedRegion::map(1, 1).unwrap();
        let config = RunConfig::new()
            .timeout(Duration::from_millis(100))
            .kill_grace(Duration::from_millis(100));
        let entry = |ctx: &mut WorkerContext<'_>| {
            ctx.sync_start_wait();
            // Ignores the stop request
            while !ctx.region().stop_requested() {
                std::thread::sleep(Duration::from_millis(5));
            }
            ExitOutcome::Success
        };
        let jobs = [Job { index: 0, name: "stuck", instances: 1, entry: &entry }];

        let results = Orchestrator::new(config, &region).run(&jobs);
        let w = &results[0].workers[0];
        assert!(w.force_killed);
        assert_eq!(w.class, ExitClass::Signalled(libc::SIGKILL));
        assert_eq!(w.outcome, ExitOutcome::MetricsUntrustworthy);
        assert!(region.slot(0, 0).unwrap().force_killed());
    }

    #[test]
    fn test_kill_and_wait() {
        let _g = fork_guard();
        let child = match fork_with_retry(&RunConfig::new()).unwrap() {
            ForkResult::Parent { child } => child,
            ForkResult::Child => loop {
                std::thread::sleep(Duration::from_millis(10));
            },
        };
        assert!(kill_and_wait(child.as_raw()).is_ok());
        // Reaped already; a second kill finds nothing
        assert!(kill_and_wait(child.as_raw()).is_ok());
    }
}
