//! Resilience hot-path benchmarks
//!
//! Covers the per-call admission checks the gateway performs before every
//! downstream call: circuit permission, outcome recording, admission gates
//! and backoff calculation.
//!
//! Run with: `cargo bench --bench resilience_bench -p bulwark-common
//! --features runtime`

use std::time::Duration;

use bulwark_common::resilience::{
    AdmissionGate, AdmissionGrade, AdmissionRule, BackoffStrategy, CallOutcome, CircuitBreaker,
    CircuitBreakerConfig, ControlBehavior, Histogram, MockClock,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ============================================================================
// Circuit Breaker Benchmarks
// ============================================================================

fn bench_circuit_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");

    group.bench_function("acquire_and_record_success", |b| {
        let breaker = CircuitBreaker::default();
        b.iter(|| {
            if breaker.try_acquire() {
                breaker.record(CallOutcome::Success);
            }
        });
    });

    group.bench_function("rejected_while_open", |b| {
        let breaker = CircuitBreaker::with_clock(
            CircuitBreakerConfig { minimum_calls: 1, ..CircuitBreakerConfig::default() },
            MockClock::new(),
        )
        .unwrap();
        breaker.try_acquire();
        breaker.record(CallOutcome::Failure);
        b.iter(|| black_box(breaker.try_acquire()));
    });

    group.finish();
}

// ============================================================================
// Admission Benchmarks
// ============================================================================

fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission_gate");
    let behaviors = [
        ("direct", ControlBehavior::Direct),
        ("warm_up", ControlBehavior::WarmUp { period: Duration::from_secs(10), cold_factor: 3 }),
        ("rate_limiter", ControlBehavior::RateLimiter { max_queue_wait: Duration::from_millis(5) }),
    ];

    for (name, behavior) in behaviors {
        let rule = AdmissionRule { grade: AdmissionGrade::Qps, threshold: 1_000_000.0, behavior };
        group.bench_with_input(BenchmarkId::new("qps", name), &rule, |b, rule| {
            let gate = AdmissionGate::new();
            b.iter(|| black_box(gate.try_enter(rule)));
        });
    }

    group.finish();
}

// ============================================================================
// Backoff and Histogram Benchmarks
// ============================================================================

fn bench_backoff_and_histogram(c: &mut Criterion) {
    let fibonacci = BackoffStrategy::Fibonacci {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(10),
    };
    c.bench_function("backoff_fibonacci_20", |b| {
        b.iter(|| black_box(fibonacci.calculate_delay(black_box(20))));
    });

    let histogram = Histogram::new();
    c.bench_function("histogram_record", |b| {
        b.iter(|| histogram.record(black_box(Duration::from_micros(1_250))));
    });
}

criterion_group!(benches, bench_circuit_breaker, bench_admission, bench_backoff_and_histogram);
criterion_main!(benches);
