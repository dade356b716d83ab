//! Metrics aggregation behavior tests
//!
//! Percentile aggregation must be idempotent and order-independent, and rate
//! metrics are computed over the measurement window.

use std::time::Duration;

use mailstorm::metrics::{aggregate_values, percentile, MetricsCollector, RunSummary};

#[test]
fn permuting_samples_does_not_change_percentiles() {
    let base: Vec<f64> = (0..5_000).map(|i| ((i * 7919) % 1000) as f64).collect();

    let mut sorted_input = base.clone();
    sorted_input.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut shuffled = base.clone();
    // deterministic shuffle
    let mut rng = fastrand::Rng::with_seed(42);
    rng.shuffle(&mut shuffled);

    let mut a = sorted_input;
    let mut b = shuffled;
    let mut c = base;
    let agg_a = aggregate_values(&mut a);
    let agg_b = aggregate_values(&mut b);
    let agg_c = aggregate_values(&mut c);

    assert_eq!(agg_a, agg_b);
    assert_eq!(agg_b, agg_c);
}

#[test]
fn aggregation_is_idempotent() {
    let mut values: Vec<f64> = (1..=997).map(f64::from).collect();
    let first = aggregate_values(&mut values);
    let second = aggregate_values(&mut values);
    assert_eq!(first, second);
}

#[test]
fn percentile_rule_matches_documented_index() {
    // documented rule: sorted[ceil(p * (n - 1))], 0-indexed
    let values: Vec<f64> = (0..10).map(f64::from).collect();
    // p95 of 10 values: ceil(0.95 * 9) = 9 -> 9.0
    assert_eq!(percentile(&values, 0.95), 9.0);
    // p50: ceil(0.5 * 9) = 5 -> 5.0
    assert_eq!(percentile(&values, 0.50), 5.0);
}

#[test]
fn rates_use_the_measurement_window() {
    let collector = MetricsCollector::new();
    for _ in 0..300 {
        collector.record_duration(
            "submission.send_message",
            Duration::from_millis(3),
            Default::default(),
        );
    }

    // 300 samples over a 30 second window: 10 ops/sec regardless of how
    // long the surrounding ramp took
    let summary = RunSummary::from_collector(&collector, Duration::from_secs(30));
    assert_eq!(summary.rates["submission.send_message"], 10.0);
}

#[test]
fn summary_serializes_and_parses_back() {
    let collector = MetricsCollector::new();
    collector.record("api.list_messages", 4.2, Default::default());
    collector.increment("api.list_messages.success");

    let summary = RunSummary::from_collector(&collector, Duration::from_secs(1));
    let parsed: RunSummary = serde_json::from_str(&summary.to_json()).unwrap();

    assert_eq!(parsed.aggregates["api.list_messages"].count, 1);
    assert_eq!(parsed.counters["api.list_messages.success"], 1);
}

#[test]
fn gauge_counts_settle_after_symmetric_updates() {
    let collector = MetricsCollector::new();
    let n = 1_000;
    for _ in 0..n {
        collector.connection_opened();
    }
    for _ in 0..n {
        collector.connection_closed();
    }
    assert_eq!(collector.active_connections(), 0);
}
