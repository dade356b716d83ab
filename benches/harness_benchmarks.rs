//! Benchmarks for the per-iteration hot paths
//!
//! Workflow selection and sample recording run once per iteration at full
//! concurrency; percentile aggregation runs once per measurement over the
//! whole sample stream. These bound how much overhead the harness itself
//! adds to the numbers it reports.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;

use mailstorm::metrics::{aggregate_values, MetricsCollector};
use mailstorm::protocol::TargetSelector;
use mailstorm::scenario::default_workflows;
use mailstorm::{Config, ScenarioEngine};

fn bench_workflow_selection(c: &mut Criterion) {
    let config = Config::default();
    let engine = ScenarioEngine::new(default_workflows(&config, TargetSelector::All)).unwrap();
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("scenario/select_workflow", |b| {
        b.iter(|| black_box(engine.select(&mut rng).name));
    });
}

fn bench_payload_generation(c: &mut Criterion) {
    let config = Config::default();
    let engine = ScenarioEngine::new(default_workflows(&config, TargetSelector::All)).unwrap();
    let mut rng = StdRng::seed_from_u64(2);

    c.bench_function("scenario/generate_payload", |b| {
        let mut iteration = 0u64;
        b.iter(|| {
            iteration += 1;
            let wf = engine.select(&mut rng);
            black_box(wf.generate(iteration % 500, iteration));
        });
    });
}

fn bench_sample_recording(c: &mut Criterion) {
    let collector = MetricsCollector::new();

    c.bench_function("metrics/record_sample", |b| {
        b.iter(|| {
            collector.record(
                black_box("submission.send_message"),
                black_box(12.5),
                Default::default(),
            );
        });
    });
}

fn bench_percentile_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics/aggregate");
    for size in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let values: Vec<f64> = (0..size)
                .map(|_| fastrand::f64() * 250.0)
                .collect();
            b.iter(|| {
                let mut input = values.clone();
                black_box(aggregate_values(&mut input));
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_workflow_selection,
    bench_payload_generation,
    bench_sample_recording,
    bench_percentile_aggregation
);
criterion_main!(benches);
