//! Drift report rendering
//!
//! The comparison output in both machine-readable and human-readable forms.
//! A failed threshold check never aborts the pipeline; `passed` is advisory
//! and the CLI's strict mode decides whether it becomes an exit code.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Drift of one metric percentile against its baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEntry {
    /// `{metric}.{percentile}`, e.g. `submission.send_message.p95`
    pub metric: String,
    pub baseline: f64,
    /// Missing when the compare run produced no samples for the metric
    pub current: Option<f64>,
    pub drift_percent: Option<f64>,
    pub ceiling: Option<f64>,
    pub passed: bool,
}

impl DriftEntry {
    /// Compute drift and the threshold verdict for one metric percentile
    pub fn evaluate(
        metric: String,
        baseline: f64,
        current: Option<f64>,
        ceiling: Option<f64>,
    ) -> Self {
        let drift_percent = current.map(|value| {
            if baseline == 0.0 {
                0.0
            } else {
                (value - baseline) / baseline * 100.0
            }
        });
        let passed = match (current, ceiling) {
            (Some(value), Some(limit)) => value <= limit,
            // nothing measured, or no ceiling derived: nothing to fail
            _ => true,
        };
        Self {
            metric,
            baseline,
            current,
            drift_percent,
            ceiling,
            passed,
        }
    }
}

/// Full comparison result for one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub environment: String,
    pub baseline_version: u64,
    pub baseline_captured_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<DriftEntry>,
    pub passed: bool,
}

impl DriftReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Entries that breached their ceiling
    pub fn breaches(&self) -> impl Iterator<Item = &DriftEntry> {
        self.entries.iter().filter(|e| !e.passed)
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== drift report: {} (baseline v{} from {}) ===",
            self.environment,
            self.baseline_version,
            self.baseline_captured_at.to_rfc3339()
        )?;
        writeln!(
            f,
            "{:<44} {:>10} {:>10} {:>9} {:>10}  verdict",
            "metric", "baseline", "current", "drift", "ceiling"
        )?;
        for entry in &self.entries {
            let current = entry
                .current
                .map_or("missing".to_string(), |v| format!("{v:.2}"));
            let drift = entry
                .drift_percent
                .map_or("-".to_string(), |d| format!("{d:+.1}%"));
            let ceiling = entry
                .ceiling
                .map_or("-".to_string(), |c| format!("{c:.2}"));
            writeln!(
                f,
                "{:<44} {:>10.2} {:>10} {:>9} {:>10}  {}",
                entry.metric,
                entry.baseline,
                current,
                drift,
                ceiling,
                if entry.passed { "ok" } else { "FAIL" }
            )?;
        }
        writeln!(
            f,
            "result: {}",
            if self.passed { "PASS" } else { "FAIL" }
        )
    }
}
