//! Metrics collection and aggregation for mailstorm
//!
//! Instrumented operation code appends immutable samples to a collector;
//! aggregation happens once at run end from the full sample stream. The only
//! shared mutable state is the sample sink itself, monotonic counters, and
//! the active-connection gauge.

pub mod aggregate;
pub mod collector;

pub use aggregate::{aggregate_values, percentile, MetricAggregate, RunSummary};
pub use collector::MetricsCollector;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single named measurement, tagged by operation/endpoint.
/// Immutable once recorded; the sample stream is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
    /// Milliseconds since the collector was started
    pub offset_ms: u64,
}

impl MetricSample {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}
