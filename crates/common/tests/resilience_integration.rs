//! Integration tests for resilience module
//!
//! Composes the primitives the way the gateway engine does: a breaker in
//! front of a worker pool or bulkhead, with retry inside the boundary.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulwark_common::resilience::{
    BackoffStrategy, Bulkhead, BulkheadConfig, CallOutcome, CircuitBreaker, CircuitBreakerConfig,
    CircuitState, ClassifiedRetry, MockClock, ResilienceError, RetryConfig, RetryError,
    RetryExecutor, WorkerPool, WorkerPoolConfig,
};
use bulwark_common::{ErrorClassification, ErrorSeverity};

/// Custom error type for testing
#[derive(Debug, Clone, PartialEq)]
struct TestError {
    message: String,
    retryable: bool,
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

impl ErrorClassification for TestError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }
}

fn transient() -> TestError {
    TestError { message: "transient".to_string(), retryable: true }
}

/// Validates that retries run inside one worker slot and stop at the cap.
///
/// # Test Steps
/// 1. Build a one-worker pool and a 3-attempt classified retry executor
/// 2. Run a job that always fails with a retryable error
/// 3. Verify exactly 3 attempts were made and exhaustion carries the cause
#[tokio::test(flavor = "multi_thread")]
async fn test_retry_inside_worker_pool_respects_attempt_cap() {
    let pool =
        WorkerPool::new(WorkerPoolConfig { core_size: 1, max_size: 1, queue_size: 0, queue_timeout: None }).unwrap();
    let retry = Arc::new(
        RetryExecutor::new(
            RetryConfig::builder()
                .max_attempts(3)
                .backoff(BackoffStrategy::Fixed { delay: Duration::from_millis(1) })
                .build()
                .unwrap(),
            ClassifiedRetry,
        )
        .unwrap(),
    );
    let attempts = Arc::new(AtomicU32::new(0));

    let job = {
        let retry = Arc::clone(&retry);
        let attempts = Arc::clone(&attempts);
        async move {
            retry
                .execute(|| {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(transient())
                    }
                })
                .await
        }
    };

    let result = pool.execute(job).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    match result {
        Err(ResilienceError::OperationFailed {
            source: RetryError::AttemptsExhausted { attempts, last_error },
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last_error, transient());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

/// Validates that an open breaker keeps traffic away from the bulkhead.
///
/// # Test Steps
/// 1. Trip the breaker with rejected outcomes
/// 2. Verify the bulkhead sees no new operations while the circuit is open
/// 3. Advance the mock clock past the open duration and verify a probe runs
#[tokio::test(flavor = "multi_thread")]
async fn test_open_circuit_bypasses_bulkhead() {
    let clock = MockClock::new();
    let breaker = CircuitBreaker::with_clock(
        CircuitBreakerConfig {
            minimum_calls: 2,
            half_open_max_calls: 1,
            open_duration: Duration::from_secs(1),
            ..CircuitBreakerConfig::default()
        },
        clock.clone(),
    )
    .unwrap();
    let bulkhead = Bulkhead::new(BulkheadConfig::new(2, Duration::ZERO)).unwrap();

    for _ in 0..2 {
        assert!(breaker.try_acquire());
        breaker.record(CallOutcome::Rejected);
    }
    assert_eq!(breaker.get_state(), CircuitState::Open);

    let before = bulkhead.metrics().total_operations;
    let guarded = breaker
        .execute(|| bulkhead.execute(|| async { Ok::<_, TestError>("downstream") }))
        .await;
    assert!(matches!(guarded, Err(ResilienceError::CircuitOpen)));
    assert_eq!(bulkhead.metrics().total_operations, before);

    clock.advance(Duration::from_secs(1));
    assert!(breaker.try_acquire());
    let probe = bulkhead.execute(|| async { Ok::<_, TestError>("downstream") }).await;
    breaker.record(if probe.is_ok() { CallOutcome::Success } else { CallOutcome::Failure });
    assert_eq!(breaker.get_state(), CircuitState::Closed);
}

/// Validates that non-retryable errors are not retried.
#[tokio::test]
async fn test_classified_retry_stops_on_permanent_error() {
    let executor = RetryExecutor::new(RetryConfig::default(), ClassifiedRetry).unwrap();
    let attempts = AtomicU32::new(0);

    let result = executor
        .execute(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError { message: "bad request".into(), retryable: false }) }
        })
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
}
