//! Baseline capture and regression comparison
//!
//! A baseline is an averaged, persisted snapshot of performance aggregates
//! for an environment. Thresholds are always derived from exactly one
//! persisted baseline record, never from live traffic; comparisons report
//! percentage drift of a fresh short measurement against the stored record.

pub mod pipeline;
pub mod report;
pub mod store;

pub use pipeline::{BaselinePipeline, Measurement, MeasurementRunner};
pub use report::{DriftEntry, DriftReport};
pub use store::BaselineStore;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricAggregate;

/// Averaged aggregates for one protocol target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetBaseline {
    pub aggregates: BTreeMap<String, MetricAggregate>,
    pub rates: BTreeMap<String, f64>,
}

/// A versioned, immutable snapshot of averaged performance aggregates.
/// Superseded by later versions, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub environment: String,
    pub version: u64,
    pub captured_at: DateTime<Utc>,
    pub iterations: usize,
    pub targets: BTreeMap<String, TargetBaseline>,
    pub thresholds: ThresholdSet,
}

/// Alert ceilings derived from one baseline record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub p95_multiplier: f64,
    pub p99_multiplier: f64,
    /// `{metric}.p95` / `{metric}.p99` -> ceiling value
    pub ceilings: BTreeMap<String, f64>,
}

impl ThresholdSet {
    /// Derive ceilings from averaged per-target aggregates. The multipliers
    /// are heuristics, configurable rather than validated constants.
    pub fn derive(
        targets: &BTreeMap<String, TargetBaseline>,
        p95_multiplier: f64,
        p99_multiplier: f64,
    ) -> Self {
        let mut ceilings = BTreeMap::new();
        for baseline in targets.values() {
            for (metric, agg) in &baseline.aggregates {
                ceilings.insert(format!("{metric}.p95"), agg.p95 * p95_multiplier);
                ceilings.insert(format!("{metric}.p99"), agg.p99 * p99_multiplier);
            }
        }
        Self {
            p95_multiplier,
            p99_multiplier,
            ceilings,
        }
    }
}

/// Field-wise arithmetic mean of aggregates across measurement iterations.
/// A metric is averaged over the iterations in which it appeared.
pub fn average_aggregates(
    iterations: &[BTreeMap<String, MetricAggregate>],
) -> BTreeMap<String, MetricAggregate> {
    let mut grouped: BTreeMap<String, Vec<&MetricAggregate>> = BTreeMap::new();
    for iteration in iterations {
        for (name, agg) in iteration {
            grouped.entry(name.clone()).or_default().push(agg);
        }
    }

    grouped
        .into_iter()
        .map(|(name, aggs)| {
            let n = aggs.len() as f64;
            let mean_of = |f: fn(&MetricAggregate) -> f64| aggs.iter().map(|a| f(a)).sum::<f64>() / n;
            (
                name,
                MetricAggregate {
                    count: (aggs.iter().map(|a| a.count).sum::<u64>() as f64 / n).round() as u64,
                    mean: mean_of(|a| a.mean),
                    p50: mean_of(|a| a.p50),
                    p90: mean_of(|a| a.p90),
                    p95: mean_of(|a| a.p95),
                    p99: mean_of(|a| a.p99),
                    max: mean_of(|a| a.max),
                },
            )
        })
        .collect()
}

/// Simple mean of per-metric rates across iterations
pub fn average_rates(iterations: &[BTreeMap<String, f64>]) -> BTreeMap<String, f64> {
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for iteration in iterations {
        for (name, rate) in iteration {
            grouped.entry(name.clone()).or_default().push(*rate);
        }
    }
    grouped
        .into_iter()
        .map(|(name, rates)| {
            let mean = rates.iter().sum::<f64>() / rates.len() as f64;
            (name, mean)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate_with_p95(p95: f64) -> MetricAggregate {
        MetricAggregate {
            count: 100,
            mean: p95 / 2.0,
            p50: p95 / 2.0,
            p90: p95 * 0.9,
            p95,
            p99: p95 * 1.1,
            max: p95 * 1.2,
        }
    }

    #[test]
    fn test_averaging_is_arithmetic_mean() {
        let iterations: Vec<BTreeMap<String, MetricAggregate>> = [100.0, 110.0, 120.0]
            .iter()
            .map(|&p95| {
                let mut m = BTreeMap::new();
                m.insert("api.list_messages".to_string(), aggregate_with_p95(p95));
                m
            })
            .collect();

        let averaged = average_aggregates(&iterations);
        assert_eq!(averaged["api.list_messages"].p95, 110.0);
    }

    #[test]
    fn test_threshold_derivation() {
        let mut aggregates = BTreeMap::new();
        aggregates.insert("api.list_messages".to_string(), aggregate_with_p95(110.0));
        let mut targets = BTreeMap::new();
        targets.insert(
            "api".to_string(),
            TargetBaseline {
                aggregates,
                rates: BTreeMap::new(),
            },
        );

        let thresholds = ThresholdSet::derive(&targets, 1.2, 1.3);
        let p95_ceiling = thresholds.ceilings["api.list_messages.p95"];
        assert!((p95_ceiling - 132.0).abs() < 1e-9);
        let p99_ceiling = thresholds.ceilings["api.list_messages.p99"];
        assert!((p99_ceiling - 110.0 * 1.1 * 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_rate_averaging() {
        let iterations: Vec<BTreeMap<String, f64>> = [90.0, 100.0, 110.0]
            .iter()
            .map(|&rate| {
                let mut m = BTreeMap::new();
                m.insert("api.list_messages".to_string(), rate);
                m
            })
            .collect();
        let averaged = average_rates(&iterations);
        assert_eq!(averaged["api.list_messages"], 100.0);
    }
}
