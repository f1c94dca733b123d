//! Benchmarks for Resilience Overhead
//! Cost each layer adds to a call that succeeds immediately

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use resilience_core::{
    Bulkhead, BulkheadConfig, CallContext, CircuitBreaker, CircuitBreakerConfig, NoopObserver,
    RateLimiter, ResilienceConfig, ResilienceOrchestrator, RetryConfig, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn benchmark_bulkhead(c: &mut Criterion) {
    let rt = runtime();
    let bulkhead = Bulkhead::new("bench", &BulkheadConfig::default()).unwrap();
    let ctx = CallContext::new();
    let (bulkhead, ctx) = (&bulkhead, &ctx);

    c.bench_function("bulkhead_execute", |b| {
        b.to_async(&rt).iter(move || async move {
            black_box(
                bulkhead
                    .execute(ctx, || async { Ok(1u64) }, None)
                    .await
                    .unwrap(),
            )
        })
    });
}

fn benchmark_circuit_breaker(c: &mut Criterion) {
    let rt = runtime();
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default());
    let ctx = CallContext::new();
    let (breaker, ctx) = (&breaker, &ctx);

    c.bench_function("circuit_breaker_execute", |b| {
        b.to_async(&rt).iter(move || async move {
            black_box(
                breaker
                    .execute(ctx, || async { Ok(1u64) }, None)
                    .await
                    .unwrap(),
            )
        })
    });
}

fn benchmark_rate_limiter(c: &mut Criterion) {
    let rt = runtime();
    let limiters = RateLimiter::new();
    rt.block_on(limiters.new_limiter("bench", 1e9, u32::MAX));
    let ctx = CallContext::new();
    let (limiters, ctx) = (&limiters, &ctx);

    c.bench_function("rate_limiter_wait", |b| {
        b.to_async(&rt)
            .iter(move || async move { black_box(limiters.wait(ctx, "bench").await.unwrap()) })
    });
}

fn benchmark_retry_first_success(c: &mut Criterion) {
    let rt = runtime();
    let policy = RetryPolicy::new("bench", RetryConfig::default());
    let ctx = CallContext::new();
    let (policy, ctx) = (&policy, &ctx);

    c.bench_function("retry_first_success", |b| {
        b.to_async(&rt).iter(move || async move {
            black_box(policy.execute(ctx, || async { Ok(1u64) }).await.unwrap())
        })
    });
}

fn benchmark_orchestrator(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("orchestrator_execute");

    for capacity in [1usize, 16, 256].iter() {
        let mut config = ResilienceConfig::default();
        config.bulkhead = BulkheadConfig {
            capacity: *capacity,
            timeout: Duration::from_secs(1),
        };
        config.rate_limiter.rps = u32::MAX;
        config.rate_limiter.burst = u32::MAX;

        let orchestrator = rt
            .block_on(ResilienceOrchestrator::new(
                "bench",
                &config,
                Arc::new(RateLimiter::new()),
                Arc::new(NoopObserver),
            ))
            .unwrap();
        let ctx = CallContext::new();
        let (orchestrator, ctx) = (&orchestrator, &ctx);

        group.bench_with_input(BenchmarkId::from_parameter(capacity), capacity, |b, _| {
            b.to_async(&rt).iter(move || async move {
                black_box(
                    orchestrator
                        .execute(ctx, || async { Ok(1u64) })
                        .await
                        .unwrap(),
                )
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_bulkhead,
    benchmark_circuit_breaker,
    benchmark_rate_limiter,
    benchmark_retry_first_success,
    benchmark_orchestrator
);
criterion_main!(benches);
