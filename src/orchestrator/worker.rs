//! Worker iteration loop
//!
//! A worker is one logical concurrent actor executing iterations
//! sequentially: select a workflow, obtain a session, acquire a pooled
//! connection, perform the operation, release, think. Iteration failures are
//! counted and consumed here; nothing propagates past the iteration boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::Config;
use crate::error::{MailstormError, Result};
use crate::metrics::MetricsCollector;
use crate::protocol::{timed_operation, ProtocolAdapter, ProtocolConnection, ProtocolKind};
use crate::scenario::ScenarioEngine;
use crate::session::{ConnectionPool, SessionManager};

/// The three adapters available to a run
pub struct AdapterSet {
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
}

impl AdapterSet {
    pub fn new(adapters: Vec<Arc<dyn ProtocolAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn get(&self, kind: ProtocolKind) -> Option<&Arc<dyn ProtocolAdapter>> {
        self.adapters.iter().find(|a| a.kind() == kind)
    }
}

/// Everything a worker needs, shared across all workers of a run
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub engine: ScenarioEngine,
    pub adapters: AdapterSet,
    pub sessions: Arc<SessionManager>,
    pub pool: Arc<ConnectionPool>,
    pub metrics: Arc<MetricsCollector>,
}

/// Run iterations until the stop flag is raised. The flag is only checked
/// between iterations, so an in-flight iteration always finishes (graceful
/// drain); the bounded per-operation timeout keeps that finite.
pub(crate) async fn run_worker(ctx: Arc<WorkerContext>, worker_id: u64, stop: Arc<AtomicBool>) {
    let mut rng = match ctx.config.load.seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ worker_id.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        None => StdRng::from_entropy(),
    };

    let mut iteration = 0u64;
    while !stop.load(Ordering::Relaxed) {
        iteration += 1;
        ctx.metrics.increment("worker.iterations");
        if let Err(err) = run_iteration(&ctx, worker_id, iteration, &mut rng).await {
            ctx.metrics.increment("worker.iteration_failures");
            debug!(worker_id, iteration, error = %err, "iteration failed");
        }

        // jittered think time avoids synchronized bursts across workers
        let min = ctx.config.load.think_time_min;
        let max = ctx.config.load.think_time_max;
        let think = if max > min {
            min + (max - min).mul_f64(rng.gen::<f64>())
        } else {
            min
        };
        tokio::time::sleep(think).await;
    }
    debug!(worker_id, iterations = iteration, "worker drained");
}

async fn run_iteration(
    ctx: &WorkerContext,
    worker_id: u64,
    iteration: u64,
    rng: &mut StdRng,
) -> Result<()> {
    let workflow = ctx.engine.select(rng);

    // an AuthFailure here skips the iteration; the manager already counted it
    let session = ctx.sessions.get_session(worker_id).await?;

    let adapter = ctx
        .adapters
        .get(workflow.target)
        .ok_or_else(|| MailstormError::InternalError {
            message: format!("no adapter registered for {}", workflow.target),
            component: Some("orchestrator".to_string()),
        })?;

    let mut entry = ctx
        .pool
        .acquire(session.partition, adapter.as_ref(), &session)
        .await?;

    let params = workflow.generate(worker_id, iteration);
    let result = timed_operation(
        &ctx.metrics,
        workflow.target,
        params.operation(),
        ctx.config.load.request_timeout,
        entry.connection.perform(&params, &session),
    )
    .await;

    if let Ok(outcome) = &result {
        ctx.metrics.add("worker.bytes_sent", outcome.bytes_sent);
        ctx.metrics.add("worker.bytes_received", outcome.bytes_received);
    }

    // an operation that poisoned the transport always closes it; otherwise
    // the forced-close roll decides
    let force_close = match &result {
        Err(err) if err.poisons_connection() => true,
        _ => ctx.pool.roll_force_close(rng),
    };
    ctx.pool
        .release(session.partition, workflow.target, entry, force_close)
        .await;

    result.map(|_| ())
}
