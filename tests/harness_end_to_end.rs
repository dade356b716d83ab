//! End-to-end harness runs against in-process stub transports
//!
//! Drives the full stack (orchestrator -> workers -> scenario engine ->
//! session manager -> connection pool -> adapter -> metrics) with stub
//! adapters, so the coordination behavior is exercised without a live
//! platform.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use mailstorm::baseline::MeasurementRunner;
use mailstorm::error::{MailstormError, Result};
use mailstorm::protocol::{
    ActionOutcome, ActionParams, ProtocolAdapter, ProtocolConnection, ProtocolKind,
};
use mailstorm::session::{AuthGrant, Authenticator, Session};
use mailstorm::{Config, Harness};

struct StubAuthenticator;

#[async_trait]
impl Authenticator for StubAuthenticator {
    async fn authenticate(&self, _username: &str, _password: &str) -> Result<AuthGrant> {
        Ok(AuthGrant {
            token: "stub-token".to_string(),
            csrf_token: Some("stub-csrf".to_string()),
            expires_in: Duration::from_secs(3600),
        })
    }
}

/// Stub transport answering every operation after a tiny delay.
/// `fail_every` > 0 makes every Nth perform return a server error.
struct StubAdapter {
    kind: ProtocolKind,
    performs: Arc<AtomicU64>,
    fail_every: u64,
}

impl StubAdapter {
    fn new(kind: ProtocolKind, performs: Arc<AtomicU64>, fail_every: u64) -> Arc<Self> {
        Arc::new(Self {
            kind,
            performs,
            fail_every,
        })
    }
}

struct StubConnection {
    performs: Arc<AtomicU64>,
    fail_every: u64,
}

#[async_trait]
impl ProtocolAdapter for StubAdapter {
    fn kind(&self) -> ProtocolKind {
        self.kind
    }

    async fn connect(&self) -> Result<Box<dyn ProtocolConnection>> {
        tokio::time::sleep(Duration::from_micros(200)).await;
        Ok(Box::new(StubConnection {
            performs: self.performs.clone(),
            fail_every: self.fail_every,
        }))
    }
}

#[async_trait]
impl ProtocolConnection for StubConnection {
    async fn authenticate(&mut self, _session: &Session) -> Result<()> {
        Ok(())
    }

    async fn perform(&mut self, params: &ActionParams, _session: &Session) -> Result<ActionOutcome> {
        tokio::time::sleep(Duration::from_micros(500)).await;
        let count = self.performs.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && count % self.fail_every == 0 {
            return Err(MailstormError::ServerError {
                operation: params.operation().to_string(),
                message: "stub-induced failure".to_string(),
            });
        }
        Ok(ActionOutcome {
            bytes_sent: 64,
            bytes_received: 128,
        })
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_broken(&self) -> bool {
        false
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.session.partitions = 8;
    config.load.think_time_min = Duration::from_millis(1);
    config.load.think_time_max = Duration::from_millis(4);
    config.load.request_timeout = Duration::from_secs(2);
    config.load.drain_grace = Duration::from_secs(10);
    config.load.seed = Some(42);
    config.baseline.measure_duration = Duration::from_secs(2);
    config.baseline.measure_concurrency = 3;
    config
}

fn harness_with_stubs(performs: Arc<AtomicU64>, fail_every: u64) -> Harness {
    let adapters: Vec<Arc<dyn ProtocolAdapter>> = vec![
        StubAdapter::new(ProtocolKind::Submission, performs.clone(), fail_every),
        StubAdapter::new(ProtocolKind::Retrieval, performs.clone(), fail_every),
        StubAdapter::new(ProtocolKind::Api, performs, fail_every),
    ];
    Harness::with_components(fast_config(), Arc::new(StubAuthenticator), adapters).unwrap()
}

#[tokio::test]
async fn measurement_run_produces_samples_and_drains() {
    let performs = Arc::new(AtomicU64::new(0));
    let harness = harness_with_stubs(performs.clone(), 0);

    let measurement = harness.measure(ProtocolKind::Api).await.unwrap();

    assert!(performs.load(Ordering::SeqCst) > 0, "no operations ran");
    // every aggregated metric belongs to the selected target or shared
    // session instrumentation
    for name in measurement.aggregates.keys() {
        assert!(
            name.starts_with("api.")
                || name.starts_with("session.")
                || name.starts_with("orchestrator."),
            "unexpected metric for api-only run: {name}"
        );
    }
    assert!(measurement
        .aggregates
        .keys()
        .any(|name| name == "api.connect"));

    let metrics = harness.metrics();
    assert!(metrics.counter("worker.iterations") > 0);
    // graceful drain returned every connection
    assert_eq!(metrics.active_connections(), 0);
}

#[tokio::test]
async fn operation_failures_are_counted_but_never_fatal() {
    let performs = Arc::new(AtomicU64::new(0));
    // every 4th operation fails server-side
    let harness = harness_with_stubs(performs, 4);

    let result = harness.measure(ProtocolKind::Submission).await;
    assert!(result.is_ok(), "iteration failures must not fail the run");

    let metrics = harness.metrics();
    assert!(metrics.counter("worker.iteration_failures") > 0);
    assert!(metrics.counter("submission.send_message.server_error") > 0);
    assert!(metrics.counter("submission.send_message.success") > 0);
    assert!(metrics.counter("worker.iterations") > metrics.counter("worker.iteration_failures"));
}

#[tokio::test]
async fn seeded_runs_reuse_sessions_across_workers() {
    let performs = Arc::new(AtomicU64::new(0));
    let harness = harness_with_stubs(performs, 0);

    harness.measure(ProtocolKind::Retrieval).await.unwrap();

    let metrics = harness.metrics();
    // 3 workers over 8 partitions: the credential cache keeps auth
    // round-trips at or below the worker count
    let auths = metrics.counter("session.auth_success");
    assert!(auths >= 1 && auths <= 3, "expected 1..=3 auths, got {auths}");
}
