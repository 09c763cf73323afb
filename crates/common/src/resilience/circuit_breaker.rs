//! Sliding-window circuit breaker
//!
//! The breaker tracks the outcome of every call in a time window. Once the
//! window holds at least `minimum_calls` outcomes and the failure rate reaches
//! `failure_rate_threshold`, the circuit opens and rejects calls for
//! `open_duration`. After that it admits `half_open_max_calls` probes: all of
//! them succeeding closes the circuit, any of them failing re-opens it.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Outcome of a single guarded call as seen by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    /// The isolation boundary behind the breaker refused the call.
    Rejected,
}

impl CallOutcome {
    pub fn is_failure(self) -> bool {
        !matches!(self, CallOutcome::Success)
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure ratio in `(0, 1]` that opens the circuit
    pub failure_rate_threshold: f64,
    /// Outcomes required in the window before the rate is evaluated
    pub minimum_calls: u32,
    /// Length of the sliding outcome window
    pub window: Duration,
    /// Time to stay open before admitting probes
    pub open_duration: Duration,
    /// Probes admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_calls: 20,
            window: Duration::from_secs(10),
            open_duration: Duration::from_secs(5),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(ConfigError::invalid("failure_rate_threshold must be in (0, 1]"));
        }

        if self.minimum_calls == 0 {
            return Err(ConfigError::invalid("minimum_calls must be greater than 0"));
        }

        if self.window.is_zero() {
            return Err(ConfigError::invalid("window must be non-zero"));
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_rate_threshold(mut self, rate: f64) -> Self {
        self.config.failure_rate_threshold = rate;
        self
    }

    pub fn minimum_calls(mut self, calls: u32) -> Self {
        self.config.minimum_calls = calls;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub calls_in_window: usize,
    pub failures_in_window: usize,
    pub half_open_calls: u32,
    pub total_calls: u64,
    pub state_change_time: Instant,
}

impl CircuitBreakerMetrics {
    pub fn failure_rate(&self) -> f64 {
        if self.calls_in_window == 0 {
            0.0
        } else {
            self.failures_in_window as f64 / self.calls_in_window as f64
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    outcomes: VecDeque<(Instant, bool)>,
    failures: usize,
    opened_at: Option<Instant>,
    half_open_admitted: u32,
    half_open_successes: u32,
    total_calls: u64,
    state_change_time: Instant,
}

impl Inner {
    fn evict(&mut self, now: Instant) {
        while let Some(&(at, failed)) = self.outcomes.front() {
            if now.duration_since(at) < self.config.window {
                break;
            }
            self.outcomes.pop_front();
            if failed {
                self.failures -= 1;
            }
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.state_change_time = now;
        self.half_open_admitted = 0;
        self.half_open_successes = 0;
        self.outcomes.clear();
        self.failures = 0;
        self.opened_at = (to == CircuitState::Open).then_some(now);
    }
}

/// Sliding-window circuit breaker
///
/// Cloning yields a handle onto the same state.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    inner: Arc<Mutex<Inner>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("state", &inner.state)
            .field("calls_in_window", &inner.outcomes.len())
            .field("failures_in_window", &inner.failures)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), clock: Arc::clone(&self.clock) }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::from_parts(CircuitBreakerConfig::default(), SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, clock))
    }

    fn from_parts(config: CircuitBreakerConfig, clock: C) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                failures: 0,
                opened_at: None,
                half_open_admitted: 0,
                half_open_successes: 0,
                total_calls: 0,
                state_change_time: now,
            })),
            clock: Arc::new(clock),
        }
    }

    /// Replace thresholds without touching the recorded window.
    ///
    /// Used when a newer configuration snapshot changes the circuit settings
    /// of a key whose breaker already exists.
    pub fn reconfigure(&self, config: CircuitBreakerConfig) -> ConfigResult<()> {
        config.validate()?;
        let mut inner = self.inner.lock();
        if inner.config != config {
            debug!(?config, "Circuit breaker reconfigured");
            inner.config = config;
        }
        Ok(())
    }

    /// Ask for permission to run one call.
    ///
    /// Returns `false` while open (until `open_duration` elapses) and once the
    /// half-open probe budget is used up. The first call after the open period
    /// moves the circuit to half-open and consumes a probe slot.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.total_calls += 1;
                true
            }
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|at| now.duration_since(at) >= inner.config.open_duration);
                if !cooled {
                    return false;
                }
                inner.transition(CircuitState::HalfOpen, now);
                inner.half_open_admitted = 1;
                inner.total_calls += 1;
                info!("Circuit breaker half-open, admitting probes");
                true
            }
            CircuitState::HalfOpen => {
                if inner.half_open_admitted < inner.config.half_open_max_calls {
                    inner.half_open_admitted += 1;
                    inner.total_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Hand back an admission that never produced a call, for example when a
    /// bulkhead behind the breaker refused it. Frees the probe slot in
    /// half-open; no effect otherwise.
    pub fn release_unused(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_admitted = inner.half_open_admitted.saturating_sub(1);
        }
    }

    /// Record the outcome of a call admitted by [`try_acquire`](Self::try_acquire).
    pub fn record(&self, outcome: CallOutcome) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let failed = outcome.is_failure();

        match inner.state {
            CircuitState::Closed => {
                inner.evict(now);
                inner.outcomes.push_back((now, failed));
                if failed {
                    inner.failures += 1;
                }

                let calls = inner.outcomes.len();
                if calls >= inner.config.minimum_calls as usize {
                    let rate = inner.failures as f64 / calls as f64;
                    if rate >= inner.config.failure_rate_threshold {
                        warn!(
                            failure_rate = rate,
                            calls,
                            last_outcome = ?outcome,
                            "Circuit breaker opened"
                        );
                        inner.transition(CircuitState::Open, now);
                    }
                }
            }
            CircuitState::HalfOpen => {
                if failed {
                    warn!(last_outcome = ?outcome, "Circuit breaker re-opened by failed probe");
                    inner.transition(CircuitState::Open, now);
                } else {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= inner.config.half_open_max_calls {
                        info!(
                            probes = inner.half_open_successes,
                            "Circuit breaker closed after successful probes"
                        );
                        inner.transition(CircuitState::Closed, now);
                    }
                }
            }
            CircuitState::Open => {
                // Result of a call admitted before the circuit opened.
            }
        }
    }

    /// Execute an operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(state = %self.get_state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.try_acquire() {
            debug!("Circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen);
        }

        match operation().await {
            Ok(value) => {
                self.record(CallOutcome::Success);
                Ok(value)
            }
            Err(error) => {
                self.record(CallOutcome::Failure);
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Get the current state of the circuit breaker
    ///
    /// Does not perform the open to half-open transition; that happens on the
    /// next [`try_acquire`](Self::try_acquire).
    pub fn get_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get circuit breaker metrics
    pub fn get_metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.evict(now);
        CircuitBreakerMetrics {
            state: inner.state,
            calls_in_window: inner.outcomes.len(),
            failures_in_window: inner.failures,
            half_open_calls: inner.half_open_admitted,
            total_calls: inner.total_calls,
            state_change_time: inner.state_change_time,
        }
    }

    /// Force the circuit closed and forget the window
    pub fn reset(&self) {
        let now = self.clock.now();
        self.inner.lock().transition(CircuitState::Closed, now);
        info!("Circuit breaker manually reset");
    }
}
