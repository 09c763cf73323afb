//! Bounded retry with selectable backoff shape
//!
//! The executor runs an operation up to `max_attempts` times in total. Each
//! failure is shown to a [`RetryPolicy`]; a `Stop` decision ends the loop
//! immediately with [`RetryError::NonRetryable`], otherwise the executor
//! sleeps for the backoff delay and tries again until attempts run out.
//! Attempts are strictly sequential.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::error::{ConfigError, ConfigResult};

/// Errors that can occur during retry operations
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retry attempts have been exhausted
    #[error("All retry attempts exhausted after {attempts} tries: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: E },

    /// The operation failed with a non-retryable error
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable { source: E },

    /// The next backoff would overrun the total time budget
    #[error("Retry time budget exceeded after {elapsed:?}: {last_error}")]
    TimeoutExceeded { elapsed: Duration, last_error: E },
}

impl<E> RetryError<E> {
    /// The error returned by the final attempt
    pub fn into_last_error(self) -> E {
        match self {
            Self::AttemptsExhausted { last_error, .. } | Self::TimeoutExceeded { last_error, .. } => {
                last_error
            }
            Self::NonRetryable { source } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Outcome of a retry execution including result and summary statistics.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: RetryResult<T, E>,
    pub attempts: u32,
    /// Delay slept before each retry, in order
    pub delays: Vec<Duration>,
}

impl<T, E> RetryOutcome<T, E> {
    /// Consume the outcome and return only the result.
    pub fn into_result(self) -> RetryResult<T, E> {
        self.result
    }

    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide whether the failure of attempt `attempt` (0-based) is retried
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the default backoff delay
    Retry,
    /// Retry the operation with a custom delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Backoff shape for calculating retry delays
///
/// Every shape except `Fixed` and `NoWait` is capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackoffStrategy {
    /// Same delay before every retry
    Fixed { delay: Duration },
    /// `base_delay * 2^n`
    Exponential { base_delay: Duration, max_delay: Duration },
    /// `base_delay + n * increment`
    Incremental { base_delay: Duration, increment: Duration, max_delay: Duration },
    /// `base_delay * fib(n + 1)`: 1, 1, 2, 3, 5, 8 ...
    Fibonacci { base_delay: Duration, max_delay: Duration },
    /// Retry immediately
    NoWait,
}

impl BackoffStrategy {
    /// Delay before retry number `retry` (0 is the first retry)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed { delay } => *delay,
            BackoffStrategy::Exponential { base_delay, max_delay } => {
                let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
                base_delay.saturating_mul(factor).min(*max_delay)
            }
            BackoffStrategy::Incremental { base_delay, increment, max_delay } => {
                base_delay.saturating_add(increment.saturating_mul(retry)).min(*max_delay)
            }
            BackoffStrategy::Fibonacci { base_delay, max_delay } => {
                base_delay.saturating_mul(fibonacci(retry + 1)).min(*max_delay)
            }
            BackoffStrategy::NoWait => Duration::ZERO,
        }
    }
}

fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (0u32, 1u32);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Maximum total time to spend retrying
    pub max_total_time: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(10),
            },
            max_total_time: None,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, backoff: BackoffStrategy::NoWait, max_total_time: None }
    }

    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.config.backoff = backoff;
        self
    }

    pub fn max_total_time(mut self, duration: Duration) -> Self {
        self.config.max_total_time = Some(duration);
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// The main retry executor
#[derive(Debug, Clone)]
pub struct RetryExecutor<P> {
    config: RetryConfig,
    policy: P,
}

impl<P> RetryExecutor<P> {
    /// Create a new retry executor with the given configuration and policy
    pub fn new(config: RetryConfig, policy: P) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, policy })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_outcome(operation).await.into_result()
    }

    /// Execute an operation with retry logic and return outcome statistics.
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_with_outcome<F, Fut, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut delays = Vec::new();
        let mut attempt = 0u32;

        loop {
            let attempts = attempt + 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts, "Operation succeeded after retry");
                    }
                    return RetryOutcome { result: Ok(value), attempts, delays };
                }
                Err(error) => error,
            };

            let delay = match self.policy.should_retry(&error, attempt) {
                RetryDecision::Stop => {
                    debug!(attempts, ?error, "Retry policy stopped");
                    return RetryOutcome {
                        result: Err(RetryError::NonRetryable { source: error }),
                        attempts,
                        delays,
                    };
                }
                RetryDecision::Retry => self.config.backoff.calculate_delay(attempt),
                RetryDecision::RetryAfter(custom) => custom,
            };

            if attempts >= self.config.max_attempts {
                warn!(attempts, last_error = ?error, "All retry attempts exhausted");
                return RetryOutcome {
                    result: Err(RetryError::AttemptsExhausted { attempts, last_error: error }),
                    attempts,
                    delays,
                };
            }

            if let Some(budget) = self.config.max_total_time {
                let elapsed = started.elapsed();
                if elapsed + delay > budget {
                    warn!(?elapsed, ?delay, "Retry time budget exceeded");
                    return RetryOutcome {
                        result: Err(RetryError::TimeoutExceeded { elapsed, last_error: error }),
                        attempts,
                        delays,
                    };
                }
            }

            debug!(attempts, ?delay, ?error, "Attempt failed, retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            delays.push(delay);
            attempt += 1;
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::{RetryDecision, RetryPolicy};
    use crate::error::ErrorClassification;

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Retry exactly the errors that classify themselves as retryable,
    /// honouring their suggested delay.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ClassifiedRetry;

    impl<E: ErrorClassification> RetryPolicy<E> for ClassifiedRetry {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            error.retry_after().map_or(RetryDecision::Retry, RetryDecision::RetryAfter)
        }
    }

    /// Predicate-based retry policy
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}
