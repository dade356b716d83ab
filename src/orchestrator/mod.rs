//! Concurrency orchestrator
//!
//! A state machine over declared stage sequences: every control tick it
//! computes the desired total concurrency across all schedules and adds or
//! retires workers to match. Retired and in-flight workers drain gracefully;
//! the stage transition to zero concurrency is the only cancellation
//! mechanism, backed by a bounded grace period.

pub mod stage;
pub mod worker;

pub use stage::{measurement_schedule, Profile, ScenarioSchedule, ScenarioStage};
pub use worker::{AdapterSet, WorkerContext};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;

/// What a completed run looked like from the scheduler's side
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub elapsed: Duration,
    pub workers_started: u64,
    pub workers_aborted: u64,
}

struct WorkerHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    fn signal_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Drives worker counts through the declared schedules
pub struct Orchestrator {
    ctx: Arc<WorkerContext>,
    schedules: Vec<ScenarioSchedule>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<WorkerContext>, schedules: Vec<ScenarioSchedule>) -> Result<Self> {
        for schedule in &schedules {
            schedule.validate()?;
        }
        Ok(Self { ctx, schedules })
    }

    /// Run every schedule to completion and drain
    pub async fn run(&self) -> Result<RunOutcome> {
        let start = Instant::now();
        let total = self
            .schedules
            .iter()
            .map(ScenarioSchedule::total_duration)
            .max()
            .unwrap_or_default();
        let tick = self.ctx.config.load.control_tick;

        info!(
            schedules = self.schedules.len(),
            duration_secs = total.as_secs(),
            "run starting"
        );

        let mut active: Vec<WorkerHandle> = Vec::new();
        let mut retiring: Vec<WorkerHandle> = Vec::new();
        let mut next_worker_id = 0u64;
        let mut workers_started = 0u64;
        let mut last_desired = 0usize;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            let desired: usize = self
                .schedules
                .iter()
                .map(|s| s.concurrency_at(elapsed))
                .sum();

            if desired != last_desired {
                self.ctx.metrics.record(
                    "orchestrator.target_concurrency",
                    desired as f64,
                    Default::default(),
                );
                last_desired = desired;
            }

            // drop handles whose workers already exited
            active.retain(|w| !w.handle.is_finished());
            retiring.retain(|w| !w.handle.is_finished());

            while active.len() < desired {
                let stop = Arc::new(AtomicBool::new(false));
                let handle = tokio::spawn(worker::run_worker(
                    self.ctx.clone(),
                    next_worker_id,
                    stop.clone(),
                ));
                active.push(WorkerHandle { stop, handle });
                next_worker_id += 1;
                workers_started += 1;
            }
            while active.len() > desired {
                // retire newest first; it keeps long-lived workers' pooled
                // connections warm through a spike
                if let Some(w) = active.pop() {
                    w.signal_stop();
                    retiring.push(w);
                }
            }

            tokio::time::sleep(tick).await;
        }

        for w in &active {
            w.signal_stop();
        }
        retiring.extend(active.drain(..));

        let workers_aborted = self.drain(retiring).await;
        self.ctx.pool.drain().await;

        let outcome = RunOutcome {
            elapsed: start.elapsed(),
            workers_started,
            workers_aborted,
        };
        info!(
            elapsed_secs = outcome.elapsed.as_secs_f64(),
            workers = outcome.workers_started,
            aborted = outcome.workers_aborted,
            "run complete"
        );
        Ok(outcome)
    }

    /// Join every worker within the grace budget; abort stragglers
    async fn drain(&self, retiring: Vec<WorkerHandle>) -> u64 {
        let deadline = Instant::now() + self.ctx.config.load.drain_grace;
        let mut aborted = 0u64;
        for mut w in retiring {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut w.handle).await {
                Ok(_) => {}
                Err(_) => {
                    w.handle.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            warn!(aborted, "workers exceeded the drain grace period");
        }
        aborted
    }
}
