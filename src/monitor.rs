//! Run-time instrumentation (spec §4.8 / §6): per-phase wall-clock timings
//! and per-worker counters, optionally dumped as JSON via `--monitor-json`.
//!
//! Phase names are exactly `"Probing"`, `"Planning"`, `"Running"`,
//! `"Finalizing"`. `IndexMap` is used for the phase table (not a plain
//! `HashMap`) so the JSON records phases in the order they actually ran,
//! which matters for a human skimming the output.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;

use crate::config::Options;

/// Atomic counters for one worker thread. Cheap to update from hot loops;
/// snapshotted into `WorkerSnapshot` only when a JSON record is produced.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub worker_id: usize,
    blocks_read: AtomicU64,
    bytes_read: AtomicU64,
    read_ns: AtomicU64,
    /// Time blocked inside `BlockCache::publish` waiting for the look-ahead
    /// window to open up.
    wait_on_cache_ns: AtomicU64,
    /// Time blocked opening a fresh provider handle on a handle-cache miss
    /// (waiting, in effect, on the storage backend's own request queue).
    wait_on_queue_ns: AtomicU64,
}

impl WorkerCounters {
    pub fn new(worker_id: usize) -> Self {
        WorkerCounters {
            worker_id,
            ..Default::default()
        }
    }

    pub fn add_block_read(&self, bytes: u64, elapsed: Duration) {
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.read_ns.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn add_wait_on_cache(&self, elapsed: Duration) {
        self.wait_on_cache_ns.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn add_wait_on_queue(&self, elapsed: Duration) {
        self.wait_on_queue_ns.fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.worker_id,
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            wait_on_cache_seconds: self.wait_on_cache_ns.load(Ordering::Relaxed) as f64 / 1e9,
            wait_on_queue_seconds: self.wait_on_queue_ns.load(Ordering::Relaxed) as f64 / 1e9,
        }
    }
}

/// Per-worker row of the monitor JSON's `workers` array, exactly the shape
/// spec §6 / SPEC_FULL §6.3 mandates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerSnapshot {
    pub id: usize,
    pub blocks_read: u64,
    pub bytes_read: u64,
    pub wait_on_cache_seconds: f64,
    pub wait_on_queue_seconds: f64,
}

/// One phase's wall-clock window, seconds since the job (this `Monitor`)
/// started.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub start: f64,
    pub end: f64,
    pub seconds: f64,
}

/// The `plan` key of the monitor JSON: a summary of what the block plan
/// committed the run to, so a reader can sanity-check counters against it
/// without re-deriving the plan.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlanSummary {
    pub output_blocks: usize,
    pub read_tasks: usize,
    pub inputs: usize,
}

#[derive(Debug, Serialize)]
pub struct MonitorRecord {
    pub phases: IndexMap<String, PhaseTiming>,
    pub workers: Vec<WorkerSnapshot>,
    pub config: Option<Options>,
    pub plan: Option<PlanSummary>,
}

/// Shared across every worker and the driver for the duration of one run.
pub struct Monitor {
    phases: Mutex<IndexMap<String, PhaseTiming>>,
    workers: Vec<Arc<WorkerCounters>>,
    start: Instant,
    config: Mutex<Option<Options>>,
    plan: Mutex<Option<PlanSummary>>,
}

impl Monitor {
    pub fn new(num_workers: usize) -> Self {
        Monitor {
            phases: Mutex::new(IndexMap::new()),
            workers: (0..num_workers).map(|id| Arc::new(WorkerCounters::new(id))).collect(),
            start: Instant::now(),
            config: Mutex::new(None),
            plan: Mutex::new(None),
        }
    }

    pub fn worker(&self, id: usize) -> Arc<WorkerCounters> {
        Arc::clone(&self.workers[id])
    }

    /// Echo the run's options into the monitor record (spec §6's `config`
    /// key). Set once, as soon as `Options` is available — unlike `plan`,
    /// config is known before Probing even starts, so it's present on every
    /// record regardless of which phase a run fails in.
    pub fn set_config(&self, options: &Options) {
        *self.config.lock().unwrap() = Some(options.clone());
    }

    /// Record the `plan` key once planning has produced a `BlockPlan`. A run
    /// that fails during Probing or Planning never calls this, so its
    /// monitor record's `plan` stays `None`.
    pub fn set_plan(&self, plan: PlanSummary) {
        *self.plan.lock().unwrap() = Some(plan);
    }

    fn record_span(&self, name: &str, phase_start: Instant, phase_end: Instant) {
        let start = phase_start.saturating_duration_since(self.start).as_secs_f64();
        let end = phase_end.saturating_duration_since(self.start).as_secs_f64();
        let seconds = phase_end.saturating_duration_since(phase_start).as_secs_f64();
        self.phases
            .lock()
            .unwrap()
            .insert(name.to_string(), PhaseTiming { start, end, seconds });
    }

    /// Record a phase that already ran, given only its elapsed duration
    /// (the end of the phase is taken to be "now").
    pub fn record_phase(&self, name: &str, elapsed: Duration) {
        let end = Instant::now();
        let start = end - elapsed;
        self.record_span(name, start, end);
    }

    /// Run `f`, timing it under phase `name`. The phase is only recorded
    /// once `f` returns, so an aborted run simply never gets an entry for
    /// whatever phase was in flight when it failed.
    pub fn time_phase<T>(&self, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let phase_start = Instant::now();
        let result = f();
        let phase_end = Instant::now();
        self.record_span(name, phase_start, phase_end);
        result
    }

    pub fn to_record(&self) -> MonitorRecord {
        MonitorRecord {
            phases: self.phases.lock().unwrap().clone(),
            workers: self.workers.iter().map(|w| w.snapshot()).collect(),
            config: self.config.lock().unwrap().clone(),
            plan: self.plan.lock().unwrap().clone(),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let record = self.to_record();
        let json = serde_json::to_string_pretty(&record).context("failed to serialize monitor record")?;
        std::fs::write(path, json).with_context(|| format!("failed to write monitor JSON to {}", path.display()))?;
        Ok(())
    }
}
