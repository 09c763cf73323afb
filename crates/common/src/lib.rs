//! Generic building blocks shared across Bulwark crates.
//!
//! Nothing in here knows about gateways, services or mailboxes. The types are
//! parameterised over the caller's error and clock so the engine in
//! `bulwark-core` can compose them per pool key.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification
//! - `runtime`: async resilience primitives (circuit breaker, bulkhead,
//!   worker pool, admission gate, retry, latency histogram)
//! - `observability`: tracing instrumentation (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
#[macro_use]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    AdmissionDecision, AdmissionGate, AdmissionGrade, BackoffStrategy, Bulkhead, BulkheadConfig,
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, ControlBehavior, Histogram,
    HistogramSnapshot, MockClock, ResilienceError, RetryConfig, RetryDecision, RetryError,
    RetryExecutor, RetryPolicy, SystemClock, WorkerPool, WorkerPoolConfig,
};
