//! mailstorm - synthetic load generation and baseline regression harness
//!
//! Drives configurable concurrent synthetic traffic against a multi-protocol
//! mail platform (submission, retrieval, HTTP API), measures latency,
//! throughput and error behavior, and detects performance regressions
//! against previously captured baselines.
//!
//! Data flows one direction: protocol adapters feed timing samples into the
//! metrics collector; the scenario engine picks weighted workflows; the
//! orchestrator ramps worker concurrency through declared stages; the
//! baseline pipeline consumes aggregated metrics offline and produces
//! threshold artifacts.

// Core modules
pub mod config;
pub mod error;
pub mod logging;

// Feature modules
pub mod baseline;
pub mod metrics;
pub mod orchestrator;
pub mod protocol;
pub mod scenario;
pub mod session;

// Public API exports
pub use config::Config;
pub use error::{FailureKind, MailstormError, Result};

// Re-export commonly used types
pub use baseline::{BaselinePipeline, BaselineRecord, BaselineStore, DriftReport};
pub use metrics::{MetricsCollector, RunSummary};
pub use orchestrator::{Orchestrator, Profile};
pub use protocol::{ProtocolKind, TargetSelector};
pub use scenario::ScenarioEngine;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use baseline::{Measurement, MeasurementRunner};
use orchestrator::{measurement_schedule, AdapterSet, ScenarioSchedule, WorkerContext};
use protocol::{
    ActionParams, HttpApiAdapter, ImapAdapter, ProtocolAdapter, ProtocolConnection, SmtpAdapter,
};
use scenario::default_workflows;
use session::{Authenticator, ConnectionPool, HttpAuthenticator, Session, SessionManager};

/// Health/readiness verdict for one target
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target: ProtocolKind,
    pub healthy: bool,
    pub detail: String,
}

/// The assembled harness: adapters, session manager, pool, metrics.
/// One instance serves any number of sequential runs; the collector is
/// reset at the start of each.
pub struct Harness {
    config: Arc<Config>,
    metrics: Arc<MetricsCollector>,
    sessions: Arc<SessionManager>,
    pool: Arc<ConnectionPool>,
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
}

impl Harness {
    /// Wire the harness against the configured targets
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let authenticator: Arc<dyn Authenticator> = Arc::new(HttpAuthenticator::new(&config)?);
        let adapters: Vec<Arc<dyn ProtocolAdapter>> = vec![
            Arc::new(SmtpAdapter::new(&config.target)),
            Arc::new(ImapAdapter::new(&config.target)),
            Arc::new(HttpApiAdapter::new(&config.target)),
        ];
        Self::with_components(config, authenticator, adapters)
    }

    /// Wire the harness with injected components (test seam)
    pub fn with_components(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        adapters: Vec<Arc<dyn ProtocolAdapter>>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsCollector::new());
        let sessions = Arc::new(SessionManager::new(
            &config,
            authenticator,
            metrics.clone(),
        ));
        let pool = Arc::new(ConnectionPool::new(&config, metrics.clone()));
        Ok(Self {
            config,
            metrics,
            sessions,
            pool,
            adapters,
        })
    }

    fn context(&self, target: TargetSelector) -> Result<Arc<WorkerContext>> {
        let engine = ScenarioEngine::new(default_workflows(&self.config, target))?;
        Ok(Arc::new(WorkerContext {
            config: self.config.clone(),
            engine,
            adapters: AdapterSet::new(self.adapters.clone()),
            sessions: self.sessions.clone(),
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
        }))
    }

    /// Run schedules to completion. `rate_window` overrides the window used
    /// for rate computation; by default rates span the whole run.
    async fn run_schedules(
        &self,
        schedules: Vec<ScenarioSchedule>,
        target: TargetSelector,
        rate_window: Option<std::time::Duration>,
    ) -> Result<RunSummary> {
        self.metrics.reset();
        let ctx = self.context(target)?;
        let orchestrator = Orchestrator::new(ctx, schedules)?;
        let outcome = orchestrator.run().await?;
        let window = rate_window.unwrap_or(outcome.elapsed);
        Ok(RunSummary::from_collector(&self.metrics, window))
    }

    /// Run a full load profile against the selected targets
    pub async fn run(&self, profile: Profile, target: TargetSelector) -> Result<RunSummary> {
        info!(profile = profile.as_str(), target = target.as_str(), "load run");
        self.run_schedules(profile.schedules(), target, None).await
    }

    /// Check every configured target's health and readiness
    pub async fn probe(&self) -> Vec<ProbeResult> {
        let session = Session::anonymous();
        let mut results = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let kind = adapter.kind();
            let start = Instant::now();
            let attempt = tokio::time::timeout(self.config.load.request_timeout, async {
                let mut conn = adapter.connect().await?;
                if kind == ProtocolKind::Api {
                    conn.perform(&ActionParams::HealthProbe, &session).await?;
                }
                conn.disconnect().await
            })
            .await;

            let (healthy, detail) = match attempt {
                Ok(Ok(())) => (true, format!("reachable in {:?}", start.elapsed())),
                Ok(Err(err)) => (false, err.to_string()),
                Err(_) => (false, "probe timed out".to_string()),
            };
            results.push(ProbeResult {
                target: kind,
                healthy,
                detail,
            });
        }
        results
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[async_trait]
impl MeasurementRunner for Harness {
    /// One short, flat measurement iteration against a single target
    async fn measure(&self, target: ProtocolKind) -> Result<Measurement> {
        let selector = match target {
            ProtocolKind::Submission => TargetSelector::Submission,
            ProtocolKind::Retrieval => TargetSelector::Retrieval,
            ProtocolKind::Api => TargetSelector::Api,
        };
        let schedules = measurement_schedule(
            self.config.baseline.measure_duration,
            self.config.baseline.measure_concurrency,
        );
        // rates over the flat measurement window, not the climb
        let summary = self
            .run_schedules(
                schedules,
                selector,
                Some(self.config.baseline.measure_duration),
            )
            .await?;
        Ok(Measurement {
            aggregates: summary.aggregates,
            rates: summary.rates,
        })
    }
}
