//! Central metrics collector
//!
//! A single collector instance is shared by every worker. Duration samples
//! go into an append-only vector; success/failure tallies use monotonic
//! atomic counters. The active-connection gauge is additive with relaxed
//! ordering; only the final settled count needs to be accurate.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::metrics::MetricSample;

/// Append-only sample sink plus counters and gauges
#[derive(Debug)]
pub struct MetricsCollector {
    samples: Mutex<Vec<MetricSample>>,
    counters: DashMap<String, u64>,
    active_connections: AtomicI64,
    started_at: Mutex<Instant>,
}

impl MetricsCollector {
    /// Create a new, empty collector
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            counters: DashMap::new(),
            active_connections: AtomicI64::new(0),
            started_at: Mutex::new(Instant::now()),
        }
    }

    /// Record a named numeric sample with tags
    pub fn record(&self, name: impl Into<String>, value: f64, tags: BTreeMap<String, String>) {
        let name = name.into();
        let offset_ms = self.elapsed().as_millis() as u64;
        debug!(metric = %name, value, "recorded sample");
        self.samples.lock().unwrap().push(MetricSample {
            name,
            value,
            tags,
            offset_ms,
        });
    }

    /// Record a duration sample in milliseconds
    pub fn record_duration(
        &self,
        name: impl Into<String>,
        duration: Duration,
        tags: BTreeMap<String, String>,
    ) {
        self.record(name, duration.as_secs_f64() * 1000.0, tags);
    }

    /// Increment a named counter by one
    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Increment a named counter by n
    pub fn add(&self, name: &str, n: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += n;
    }

    /// Current value of a counter (zero if never incremented)
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    /// Adjust the shared active-connection gauge
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current active-connection gauge reading (approximate while running)
    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Number of samples recorded so far
    pub fn sample_count(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    /// Snapshot of the full sample stream
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().unwrap().clone()
    }

    /// Snapshot of all counters
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Time since the collector was created or last reset
    pub fn elapsed(&self) -> Duration {
        self.started_at.lock().unwrap().elapsed()
    }

    /// Clear all samples, counters and the clock. Used between independent
    /// measurement iterations so each iteration aggregates its own window.
    pub fn reset(&self) {
        self.samples.lock().unwrap().clear();
        self.counters.clear();
        self.active_connections.store(0, Ordering::Relaxed);
        *self.started_at.lock().unwrap() = Instant::now();
        debug!("metrics collector reset");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
