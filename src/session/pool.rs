//! Connection pool keyed by (credential partition, protocol)
//!
//! Acquire takes the pooled entry out of the map, so the connection is owned
//! exclusively by the worker while in use; release either returns it or
//! closes it. The forced-close roll is drawn independently per release from
//! the caller's random source, emulating reconnect churn. The only
//! cross-worker pool state is the active-connection gauge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::protocol::{timed_operation, ProtocolAdapter, ProtocolConnection, ProtocolKind};
use crate::session::Session;

/// A pooled connection together with its bookkeeping
pub struct PooledConnection {
    pub connection: Box<dyn ProtocolConnection>,
    pub established_at: Instant,
    pub reuse_count: u64,
}

/// Per-partition connection pool
pub struct ConnectionPool {
    entries: DashMap<(u64, ProtocolKind), PooledConnection>,
    metrics: Arc<MetricsCollector>,
    force_close_probability: f64,
    request_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(config: &Config, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            entries: DashMap::new(),
            metrics,
            force_close_probability: config.pool.force_close_probability,
            request_timeout: config.load.request_timeout,
        }
    }

    /// Return a live pooled connection for the key, or establish a new one.
    /// Establishment latency is recorded as the `connect` operation sample;
    /// transports that need it also run their `authenticate` operation.
    pub async fn acquire(
        &self,
        partition: u64,
        adapter: &dyn ProtocolAdapter,
        session: &Session,
    ) -> Result<PooledConnection> {
        let key = (partition, adapter.kind());

        if let Some((_, entry)) = self.entries.remove(&key) {
            if !entry.connection.is_broken() {
                self.metrics.increment("pool.reuses");
                return Ok(PooledConnection {
                    reuse_count: entry.reuse_count + 1,
                    ..entry
                });
            }
            // broken while pooled: discard and fall through to reconnect
            self.metrics.increment("pool.evictions");
            self.metrics.connection_closed();
        }

        let mut connection = timed_operation(
            &self.metrics,
            adapter.kind(),
            "connect",
            self.request_timeout,
            adapter.connect(),
        )
        .await?;

        timed_operation(
            &self.metrics,
            adapter.kind(),
            "authenticate",
            self.request_timeout,
            connection.authenticate(session),
        )
        .await?;

        self.metrics.connection_opened();
        self.metrics.increment("pool.opened");
        debug!(partition, protocol = %adapter.kind(), "connection established");

        Ok(PooledConnection {
            connection,
            established_at: Instant::now(),
            reuse_count: 0,
        })
    }

    /// Draw the forced-close decision for one release
    pub fn roll_force_close<R: Rng>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.force_close_probability)
    }

    /// Return a connection to the pool, or close it if the forced-close roll
    /// fired or a prior operation flagged it broken.
    pub async fn release(
        &self,
        partition: u64,
        kind: ProtocolKind,
        mut entry: PooledConnection,
        force_close: bool,
    ) {
        let broken = entry.connection.is_broken();
        if broken || force_close {
            let _ = timed_operation(
                &self.metrics,
                kind,
                "disconnect",
                self.request_timeout,
                entry.connection.disconnect(),
            )
            .await;
            self.metrics.connection_closed();
            self.metrics
                .increment(if broken { "pool.evictions" } else { "pool.forced_closes" });
            return;
        }
        self.entries.insert((partition, kind), entry);
    }

    /// Close everything still pooled; called once at run end
    pub async fn drain(&self) {
        let keys: Vec<_> = self.entries.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, mut entry)) = self.entries.remove(&key) {
                let _ = entry.connection.disconnect().await;
                self.metrics.connection_closed();
            }
        }
    }

    /// Number of idle pooled connections
    pub fn pooled_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_force_close_roll_distribution() {
        let config = Config::default();
        let pool = ConnectionPool::new(&config, Arc::new(MetricsCollector::new()));
        let mut rng = StdRng::seed_from_u64(17);

        let trials = 10_000;
        let fired = (0..trials)
            .filter(|_| pool.roll_force_close(&mut rng))
            .count();

        // 5% +/- 1% over 10k trials
        let rate = fired as f64 / trials as f64;
        assert!((0.04..=0.06).contains(&rate), "rate was {rate}");
    }

    #[test]
    fn test_zero_probability_never_fires() {
        let mut config = Config::default();
        config.pool.force_close_probability = 0.0;
        let pool = ConnectionPool::new(&config, Arc::new(MetricsCollector::new()));
        let mut rng = StdRng::seed_from_u64(17);
        assert!((0..1000).all(|_| !pool.roll_force_close(&mut rng)));
    }
}
