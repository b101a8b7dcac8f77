//! Benchmarks for fan-out overhead
//!
//! This benchmark measures:
//! - Parallel fan-out over in-process backends at several fleet sizes
//! - Cost of a response-cache hit versus a real call
//! - Similarity ranking over an aggregate

use ai_lib_fanout::backend::ScriptedBackend;
use ai_lib_fanout::{
    Backend, ComparisonEngine, ExecutionMode, Orchestrator, OrchestratorOptions, Request,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn fleet(n: usize) -> Vec<Arc<dyn Backend>> {
    (0..n)
        .map(|i| {
            Arc::new(ScriptedBackend::new(format!("backend-{}", i))
                .always_reply(format!("answer number {} about backpressure and queues", i)))
                as Arc<dyn Backend>
        })
        .collect()
}

fn bench_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let request = Request::new("Explain backpressure");
    let mut group = c.benchmark_group("fanout");

    for n in [1usize, 4, 16] {
        let backends = fleet(n);
        group.throughput(Throughput::Elements(n as u64));
        for mode in [ExecutionMode::Parallel, ExecutionMode::Sequential] {
            let orchestrator = Orchestrator::new(
                OrchestratorOptions::default()
                    .with_mode(mode)
                    .with_max_concurrency(4),
            )
            .unwrap();
            group.bench_with_input(BenchmarkId::new(mode.as_str(), n), &n, |b, _| {
                b.to_async(&rt)
                    .iter(|| orchestrator.run(black_box(&request), &backends))
            });
        }
    }
    group.finish();
}

fn bench_response_cache(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let request = Request::new("Explain backpressure");
    let backends = fleet(4);
    let cached = Orchestrator::builder().response_cache(64).build().unwrap();
    let uncached = Orchestrator::builder().build().unwrap();
    // warm the cache once
    rt.block_on(cached.run(&request, &backends)).unwrap();

    let mut group = c.benchmark_group("response_cache");
    group.bench_function("hit", |b| {
        b.to_async(&rt)
            .iter(|| cached.run(black_box(&request), &backends))
    });
    group.bench_function("miss", |b| {
        b.to_async(&rt)
            .iter(|| uncached.run(black_box(&request), &backends))
    });
    group.finish();
}

fn bench_compare(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = Orchestrator::builder().build().unwrap();
    let engine = ComparisonEngine::new();
    let mut group = c.benchmark_group("compare");

    for n in [4usize, 16] {
        let agg = rt
            .block_on(orchestrator.run(&Request::new("q"), &fleet(n)))
            .unwrap();
        group.bench_with_input(BenchmarkId::new("jaccard", n), &agg, |b, agg| {
            b.iter(|| black_box(engine.compare(black_box(agg))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_fanout, bench_response_cache, bench_compare);
criterion_main!(benches);
