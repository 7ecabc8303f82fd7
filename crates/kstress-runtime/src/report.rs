//! Run and perf reports
//!
//! Both reports read the shared region after every worker was reaped and
//! produce two renderings: an aligned console table and a YAML block with
//! one record per stressor.

use std::fmt::Write as _;
use kstress_core::perf::{scale_rate, yaml_key, PerfTotals};
use kstress_core::stats::StatSlot;
use kstress_core::ExitOutcome;
use crate::memory::SharedRegion;
use crate::worker::{ExitClass, JobResult};

/// How the instances of one stressor ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub signalled: usize,
    pub oom_killed: usize,
    pub force_killed: usize,
}

impl OutcomeCounts {
    pub fn from_job(job: &JobResult) -> Self {
        let mut c = Self::default();
        for w in &job.workers {
            if w.force_killed {
                c.force_killed += 1;
            } else if w.class == ExitClass::OomKilled {
                c.oom_killed += 1;
            } else if w.outcome == ExitOutcome::Signalled {
                c.signalled += 1;
            } else if w.outcome.is_benign() {
                c.passed += 1;
            } else {
                c.failed += 1;
            }
        }
        c
    }
}

/// Per-stressor figures for the run summary
#[derive(Debug, Clone, PartialEq)]
pub struct StressorSummary {
    pub name: String,
    pub instances: usize,
    pub bogo_ops: u64,
    /// Longest instance run time in seconds
    pub duration: f64,
    pub bogo_ops_per_sec: f64,
    pub outcomes: OutcomeCounts,
    pub oom_restarts: u64,
    /// Named metrics averaged over the instances that published them
    pub metrics: Vec<(String, f64)>,
    pub spawn_failed: bool,
}

impl StressorSummary {
    pub fn collect(region: &SharedRegion, job: &JobResult) -> Self {
        let slots: Vec<&StatSlot> = region.slots(job.index, job.started).collect();
        let bogo_ops = slots.iter().fold(0u64, |acc, s| acc.saturating_add(s.bogo_get()));
        let duration = slots.iter().map(|s| s.duration()).fold(0.0, f64::max);
        let bogo_ops_per_sec = if duration > 0.0 { bogo_ops as f64 / duration } else { 0.0 };
        let oom_restarts = region
            .stressor_block(job.index)
            .map_or(0, |b| b.oom_restarts());

        Self {
            name: job.name.clone(),
            instances: job.started,
            bogo_ops,
            duration,
            bogo_ops_per_sec,
            outcomes: OutcomeCounts::from_job(job),
            oom_restarts,
            metrics: average_metrics(&slots),
            spawn_failed: job.spawn_error.is_some(),
        }
    }
}

/// Average each metric index over the slots that published it
fn average_metrics(slots: &[&StatSlot]) -> Vec<(String, f64)> {
    // (index, description, sum, count), kept in index order
    let mut acc: Vec<(usize, String, f64, u32)> = Vec::new();
    for slot in slots {
        for (idx, desc, value) in slot.metrics() {
            match acc.iter_mut().find(|e| e.0 == idx) {
                Some(e) => {
                    e.2 += value;
                    e.3 += 1;
                }
                None => acc.push((idx, desc, value, 1)),
            }
        }
    }
    acc.sort_by_key(|e| e.0);
    acc.into_iter()
        .map(|(_, desc, sum, n)| (desc, sum / n as f64))
        .collect()
}

/// Console and YAML renderings of one report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub console: String,
    pub yaml: String,
}

/// Bogo-ops, timing, outcome and metric summary
pub fn summary_report(summaries: &[StressorSummary]) -> Report {
    let mut console = String::new();
    let mut yaml = String::from("metrics:\n");
    let _ = writeln!(
        console,
        "{:<12} {:>14} {:>10} {:>14} {:>5} {:>6} {:>8} {:>5} {:>8}",
        "stressor", "bogo ops", "real (s)", "bogo ops/s", "inst", "passed", "failed", "oom", "restarts"
    );
    for s in summaries {
        let failed = s.outcomes.failed + s.outcomes.signalled + s.outcomes.force_killed;
        let _ = writeln!(
            console,
            "{:<12} {:>14} {:>10.2} {:>14.2} {:>5} {:>6} {:>8} {:>5} {:>8}",
            s.name,
            s.bogo_ops,
            s.duration,
            s.bogo_ops_per_sec,
            s.instances,
            s.outcomes.passed,
            failed,
            s.outcomes.oom_killed,
            s.oom_restarts
        );

        let _ = writeln!(yaml, "  - stressor: {}", s.name);
        let _ = writeln!(yaml, "    bogo-ops: {}", s.bogo_ops);
        let _ = writeln!(yaml, "    bogo-ops-per-second-real-time: {:.6}", s.bogo_ops_per_sec);
        let _ = writeln!(yaml, "    wall-clock-time: {:.6}", s.duration);
        let _ = writeln!(yaml, "    instances: {}", s.instances);
        let _ = writeln!(yaml, "    passed: {}", s.outcomes.passed);
        let _ = writeln!(yaml, "    failed: {}", failed);
        let _ = writeln!(yaml, "    oom-killed: {}", s.outcomes.oom_killed);
        let _ = writeln!(yaml, "    oom-restarts: {}", s.oom_restarts);
        for (desc, value) in &s.metrics {
            let _ = writeln!(yaml, "    {}: {:.6}", yaml_key(desc), value);
        }
    }
    for s in summaries.iter().filter(|s| !s.metrics.is_empty()) {
        for (desc, value) in &s.metrics {
            let _ = writeln!(console, "{:<12} {:>14.2} {}", s.name, value, desc);
        }
    }
    Report { console, yaml }
}

/// Perf counter totals and rates per stressor
///
/// `stressors` pairs a region index with a name; `instances` is how many
/// slots of each to read. Stressors where no instance opened a counter are
/// left out; `None` when that is all of them.
pub fn dump_report(
    region: &SharedRegion,
    stressors: &[(usize, &str)],
    instances: usize,
    duration: f64,
) -> Option<Report> {
    let mut console = String::new();
    let mut yaml = String::from("perfstats:\n");
    let mut any = false;

    for &(idx, name) in stressors {
        let Some(totals) = PerfTotals::accumulate(region.slots(idx, instances).map(|s| &s.perf)) else {
            continue;
        };
        any = true;
        let _ = writeln!(console, "{}:", name);
        let _ = writeln!(yaml, "  - stressor: {}", name);
        let _ = writeln!(yaml, "    duration: {:.6}", duration);

        let dur = if duration > 0.0 { duration } else { 1.0 };
        for (d, total) in totals.valid() {
            let _ = writeln!(console, "  {:>20} {:<28} {}", total, d.label, scale_rate(total, duration));
            let key = d.yaml_key();
            let _ = writeln!(yaml, "    {}_total: {}", key, total);
            let _ = writeln!(yaml, "    {}_per_second: {:.6}", key, total as f64 / dur);
        }
        if let Some(ipc) = totals.instructions_per_cycle() {
            let _ = writeln!(console, "  {:>20.2} {}", ipc, "instructions per cycle");
        }
        if let Some(pct) = totals.cache_miss_percent() {
            let _ = writeln!(console, "  {:>19.2}% {}", pct, "cache misses");
        }
        if let Some(pct) = totals.branch_miss_percent() {
            let _ = writeln!(console, "  {:>19.2}% {}", pct, "branch misses");
        }
    }
    any.then_some(Report { console, yaml })
}
