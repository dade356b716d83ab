//! Baseline establish and compare pipelines
//!
//! Establish runs N independent short measurement iterations per target,
//! averages every aggregate field arithmetically, persists a versioned
//! record and derives alert thresholds. Compare runs one short measurement
//! and reports percentage drift against the stored record. Both always
//! complete and emit a report; threshold breaches are advisory output, and
//! a non-zero exit is the caller's strict-mode choice.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::baseline::report::{DriftEntry, DriftReport};
use crate::baseline::store::BaselineStore;
use crate::baseline::{average_aggregates, average_rates, BaselineRecord, TargetBaseline, ThresholdSet};
use crate::config::BaselineConfig;
use crate::error::{MailstormError, Result};
use crate::metrics::MetricAggregate;
use crate::protocol::ProtocolKind;

/// Aggregated output of one short measurement iteration
#[derive(Debug, Clone)]
pub struct Measurement {
    pub aggregates: BTreeMap<String, MetricAggregate>,
    pub rates: BTreeMap<String, f64>,
}

/// Executes one measurement iteration against a single target.
/// The harness is the production implementation; tests inject synthetic
/// measurements.
#[async_trait]
pub trait MeasurementRunner: Send + Sync {
    async fn measure(&self, target: ProtocolKind) -> Result<Measurement>;
}

/// Capture-and-compare pipeline over a baseline store
pub struct BaselinePipeline {
    runner: Arc<dyn MeasurementRunner>,
    store: BaselineStore,
    config: BaselineConfig,
}

impl BaselinePipeline {
    pub fn new(
        runner: Arc<dyn MeasurementRunner>,
        store: BaselineStore,
        config: BaselineConfig,
    ) -> Self {
        Self {
            runner,
            store,
            config,
        }
    }

    /// Capture a new baseline for the environment across the given targets
    pub async fn establish(
        &self,
        environment: &str,
        targets: &[ProtocolKind],
    ) -> Result<BaselineRecord> {
        let mut per_target = BTreeMap::new();

        for &target in targets {
            let mut aggregate_iterations = Vec::with_capacity(self.config.iterations);
            let mut rate_iterations = Vec::with_capacity(self.config.iterations);

            for iteration in 1..=self.config.iterations {
                info!(target = %target, iteration, "baseline measurement iteration");
                let measurement = self.runner.measure(target).await?;
                aggregate_iterations.push(measurement.aggregates);
                rate_iterations.push(measurement.rates);
            }

            per_target.insert(
                target.as_str().to_string(),
                TargetBaseline {
                    aggregates: average_aggregates(&aggregate_iterations),
                    rates: average_rates(&rate_iterations),
                },
            );
        }

        let thresholds = ThresholdSet::derive(
            &per_target,
            self.config.p95_multiplier,
            self.config.p99_multiplier,
        );

        let record = BaselineRecord {
            environment: environment.to_string(),
            version: 0, // assigned by the store
            captured_at: Utc::now(),
            iterations: self.config.iterations,
            targets: per_target,
            thresholds,
        };
        self.store.save(record)
    }

    /// Measure once and report drift against the stored latest baseline
    pub async fn compare(&self, environment: &str) -> Result<DriftReport> {
        let baseline = self.store.latest(environment)?.ok_or_else(|| {
            MailstormError::BaselineError {
                message: format!("no baseline recorded for environment {environment}"),
                source: None,
            }
        })?;

        let mut entries = Vec::new();
        for (target_name, target_baseline) in &baseline.targets {
            let target = match target_name.as_str() {
                "submission" => ProtocolKind::Submission,
                "retrieval" => ProtocolKind::Retrieval,
                "api" => ProtocolKind::Api,
                other => {
                    return Err(MailstormError::BaselineError {
                        message: format!("baseline names unknown target {other}"),
                        source: None,
                    })
                }
            };

            info!(target = %target, "drift measurement");
            let current = self.runner.measure(target).await?;

            for (metric, baseline_agg) in &target_baseline.aggregates {
                for field in ["p95", "p99"] {
                    let key = format!("{metric}.{field}");
                    let Some(baseline_value) = baseline_agg.percentile_field(field) else {
                        continue;
                    };
                    let ceiling = baseline.thresholds.ceilings.get(&key).copied();
                    let current_value = current
                        .aggregates
                        .get(metric)
                        .and_then(|agg| agg.percentile_field(field));

                    entries.push(DriftEntry::evaluate(
                        key,
                        baseline_value,
                        current_value,
                        ceiling,
                    ));
                }
            }
        }

        let passed = entries.iter().all(|e| e.passed);
        Ok(DriftReport {
            environment: environment.to_string(),
            baseline_version: baseline.version,
            baseline_captured_at: baseline.captured_at,
            generated_at: Utc::now(),
            entries,
            passed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Scripted runner returning a fixed latency per call, advancing through
    /// a list so each iteration differs.
    struct ScriptedRunner {
        p95_values: std::sync::Mutex<Vec<f64>>,
    }

    impl ScriptedRunner {
        fn new(values: Vec<f64>) -> Self {
            Self {
                p95_values: std::sync::Mutex::new(values),
            }
        }
    }

    #[async_trait]
    impl MeasurementRunner for ScriptedRunner {
        async fn measure(&self, _target: ProtocolKind) -> Result<Measurement> {
            let p95 = self.p95_values.lock().unwrap().remove(0);
            let mut aggregates = BTreeMap::new();
            aggregates.insert(
                "api.list_messages".to_string(),
                MetricAggregate {
                    count: 100,
                    mean: p95 * 0.5,
                    p50: p95 * 0.5,
                    p90: p95 * 0.9,
                    p95,
                    p99: p95 * 1.1,
                    max: p95 * 1.2,
                },
            );
            Ok(Measurement {
                aggregates,
                rates: BTreeMap::new(),
            })
        }
    }

    fn pipeline_with(values: Vec<f64>, dir: &TempDir) -> BaselinePipeline {
        BaselinePipeline::new(
            Arc::new(ScriptedRunner::new(values)),
            BaselineStore::new(dir.path()),
            BaselineConfig {
                directory: dir.path().to_path_buf(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_establish_averages_iterations() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(vec![100.0, 110.0, 120.0], &dir);

        let record = pipeline
            .establish("staging", &[ProtocolKind::Api])
            .await
            .unwrap();

        let agg = &record.targets["api"].aggregates["api.list_messages"];
        assert!((agg.p95 - 110.0).abs() < 1e-9);
        let ceiling = record.thresholds.ceilings["api.list_messages.p95"];
        assert!((ceiling - 132.0).abs() < 1e-9);
        assert_eq!(record.version, 1);
        assert_eq!(record.iterations, 3);
    }

    #[tokio::test]
    async fn test_compare_reports_drift_and_breach() {
        let dir = TempDir::new().unwrap();
        // three establish iterations then one compare measurement at 150
        let pipeline = pipeline_with(vec![100.0, 110.0, 120.0, 150.0], &dir);

        pipeline
            .establish("staging", &[ProtocolKind::Api])
            .await
            .unwrap();
        let report = pipeline.compare("staging").await.unwrap();

        let entry = report
            .entries
            .iter()
            .find(|e| e.metric == "api.list_messages.p95")
            .unwrap();
        // baseline p95 110, current 150 -> +36.36...%
        assert!((entry.drift_percent.unwrap() - (150.0 - 110.0) / 110.0 * 100.0).abs() < 1e-9);
        // ceiling 132 < 150: breach
        assert!(!entry.passed);
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn test_compare_without_baseline_errors() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(vec![], &dir);
        assert!(pipeline.compare("staging").await.is_err());
    }
}
