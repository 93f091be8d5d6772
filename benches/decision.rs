//! Benchmarks for the decision hot path.
//!
//! Run with: cargo bench -- decision

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rl_live::sampler;
use rl_live::{LiveModel, LiveModelBuilder, ModelData, NullLogger, Result};

fn context(actions: usize) -> String {
    let multi: Vec<String> = (0..actions).map(|i| format!(r#"{{"id":"a{i}"}}"#)).collect();
    format!(r#"{{"User":{{"id":"u1"}},"_multi":[{}]}}"#, multi.join(","))
}

fn explore_only_model() -> LiveModel {
    LiveModelBuilder::new()
        .prefix("bench")
        .decision_logger(Arc::new(NullLogger))
        .build()
        .expect("failed to build model")
}

fn table_model(actions: usize) -> LiveModel {
    let scores: Vec<String> = (0..actions).map(|i| format!("{}", i as f32 / actions as f32)).collect();
    let bytes = format!(r#"{{"id":"bench","epsilon":0.2,"scores":[{}]}}"#, scores.join(",")).into_bytes();
    let model = LiveModelBuilder::new()
        .prefix("bench")
        .model_src("STATIC")
        .register_transport("STATIC", move |_| {
            let bytes = bytes.clone();
            Ok(Box::new(move || -> Result<ModelData> { Ok(ModelData::new(bytes.clone())) })
                as Box<dyn rl_live::DataTransport>)
        })
        .decision_logger(Arc::new(NullLogger))
        .build()
        .expect("failed to build model");
    model.shutdown();
    model.refresh_now().expect("model should load");
    model
}

fn bench_sampler(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampler");
    let salt = sampler::application_salt("bench-app");

    group.bench_function("seed_for", |b| {
        b.iter(|| sampler::seed_for(black_box(salt), black_box("event-0123456789")))
    });

    group.bench_function("epsilon_greedy_16", |b| {
        b.iter(|| sampler::epsilon_greedy(black_box(0.2), 0, black_box(16)))
    });

    let pdf = sampler::epsilon_greedy(0.2, 3, 16).expect("valid pdf");
    group.bench_function("sample_from_pdf_16", |b| {
        b.iter(|| sampler::sample_from_pdf(black_box(42), black_box(&pdf)))
    });

    group.finish();
}

fn bench_choose_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("choose_rank");
    group.throughput(Throughput::Elements(1));

    for actions in [2usize, 8, 32] {
        let ctx = context(actions);

        let model = explore_only_model();
        group.bench_with_input(BenchmarkId::new("explore_only", actions), &ctx, |b, ctx| {
            b.iter(|| model.choose_rank(black_box("event-1"), ctx))
        });

        let model = table_model(actions);
        group.bench_with_input(BenchmarkId::new("table", actions), &ctx, |b, ctx| {
            b.iter(|| model.choose_rank(black_box("event-1"), ctx))
        });
    }

    group.finish();
}

fn bench_report_outcome(c: &mut Criterion) {
    let model = explore_only_model();
    c.bench_function("report_outcome_value", |b| {
        b.iter(|| model.report_outcome_value(black_box("event-1"), black_box(1.0)))
    });
}

criterion_group!(benches, bench_sampler, bench_choose_rank, bench_report_outcome);
criterion_main!(benches);
