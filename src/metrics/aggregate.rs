//! End-of-run aggregation and percentile math
//!
//! Percentile rule, applied uniformly everywhere: nearest-rank on the sorted
//! 0-indexed array at index `ceil(p * (n - 1))`, no interpolation. The rule
//! is order-independent by construction (inputs are sorted first) and exact
//! for the small sample counts a short measurement iteration produces.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::MetricsCollector;

/// Aggregate statistics for one metric name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregate {
    pub count: u64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl MetricAggregate {
    /// Look up a percentile field by its threshold-key suffix
    pub fn percentile_field(&self, name: &str) -> Option<f64> {
        match name {
            "p50" => Some(self.p50),
            "p90" => Some(self.p90),
            "p95" => Some(self.p95),
            "p99" => Some(self.p99),
            "mean" => Some(self.mean),
            "max" => Some(self.max),
            _ => None,
        }
    }
}

impl fmt::Display for MetricAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} mean={:.2} p50={:.2} p90={:.2} p95={:.2} p99={:.2} max={:.2}",
            self.count, self.mean, self.p50, self.p90, self.p95, self.p99, self.max
        )
    }
}

/// Nearest-rank percentile of a sorted slice: index `ceil(p * (n - 1))`.
/// `p` is a fraction in [0, 1]. Returns 0.0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (p * (sorted.len() - 1) as f64).ceil() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Aggregate a list of raw values into summary statistics.
/// Sorts in place; input order does not affect the result.
pub fn aggregate_values(values: &mut Vec<f64>) -> MetricAggregate {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let count = values.len() as u64;
    let mean = if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    };
    MetricAggregate {
        count,
        mean,
        p50: percentile(values, 0.50),
        p90: percentile(values, 0.90),
        p95: percentile(values, 0.95),
        p99: percentile(values, 0.99),
        max: values.last().copied().unwrap_or(0.0),
    }
}

/// Serializable per-run summary: aggregated metrics, counters, and rates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub hardware: String,
    pub aggregates: BTreeMap<String, MetricAggregate>,
    pub counters: BTreeMap<String, u64>,
    /// Operations per second per metric name, over the measurement window
    pub rates: BTreeMap<String, f64>,
}

impl RunSummary {
    /// Build a summary from a collector's full sample stream.
    ///
    /// `window` is the measurement window used for rate computation; for a
    /// flat measurement run this is the whole run, for ramped runs callers
    /// pass the post-ramp window so rates are not diluted by ramp-up.
    pub fn from_collector(collector: &MetricsCollector, window: Duration) -> Self {
        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for sample in collector.samples() {
            grouped.entry(sample.name).or_default().push(sample.value);
        }

        let window_secs = window.as_secs_f64();
        let mut aggregates = BTreeMap::new();
        let mut rates = BTreeMap::new();
        for (name, mut values) in grouped {
            let agg = aggregate_values(&mut values);
            if window_secs > 0.0 {
                rates.insert(name.clone(), agg.count as f64 / window_secs);
            }
            aggregates.insert(name, agg);
        }

        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_secs: collector.elapsed().as_secs_f64(),
            hardware: format!("cpus={}", num_cpus::get()),
            aggregates,
            counters: collector.counters(),
            rates,
        }
    }

    /// Pretty JSON for the machine-readable artifact
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== mailstorm run {} ===", self.run_id)?;
        writeln!(
            f,
            "started {} | elapsed {:.1}s | {}",
            self.started_at.to_rfc3339(),
            self.elapsed_secs,
            self.hardware
        )?;
        writeln!(f, "\nlatency (ms):")?;
        for (name, agg) in &self.aggregates {
            writeln!(f, "  {name:<40} {agg}")?;
        }
        if !self.rates.is_empty() {
            writeln!(f, "\nthroughput (ops/sec):")?;
            for (name, rate) in &self.rates {
                writeln!(f, "  {name:<40} {rate:.2}")?;
            }
        }
        if !self.counters.is_empty() {
            writeln!(f, "\ncounters:")?;
            for (name, value) in &self.counters {
                writeln!(f, "  {name:<40} {value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_nearest_rank() {
        // 1..=100 sorted; p99 index = ceil(0.99 * 99) = 99 -> value 100
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 0.99), 100.0);
        // p50 index = ceil(0.50 * 99) = 50 -> value 51
        assert_eq!(percentile(&values, 0.50), 51.0);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 1.0), 100.0);
    }

    #[test]
    fn test_percentile_empty_and_single() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[7.5], 0.95), 7.5);
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let mut forward: Vec<f64> = (1..=1000).map(f64::from).collect();
        let mut reversed: Vec<f64> = (1..=1000).rev().map(f64::from).collect();
        assert_eq!(aggregate_values(&mut forward), aggregate_values(&mut reversed));
    }

    #[test]
    fn test_aggregate_fields() {
        let mut values = vec![10.0, 20.0, 30.0, 40.0];
        let agg = aggregate_values(&mut values);
        assert_eq!(agg.count, 4);
        assert_eq!(agg.mean, 25.0);
        assert_eq!(agg.max, 40.0);
    }

    #[test]
    fn test_run_summary_rates() {
        let collector = MetricsCollector::new();
        for _ in 0..50 {
            collector.record_duration(
                "api.list_messages",
                Duration::from_millis(5),
                Default::default(),
            );
        }
        let summary = RunSummary::from_collector(&collector, Duration::from_secs(10));
        assert_eq!(summary.rates["api.list_messages"], 5.0);
        assert_eq!(summary.aggregates["api.list_messages"].count, 50);
    }
}
