//! Resilience primitives
//!
//! Each primitive guards one resource and knows nothing about the gateway
//! configuration it is sized from. `bulwark-core` keeps one instance per pool
//! key and re-applies sizing from the live configuration on every call.

pub mod admission;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod histogram;
mod permits;
pub mod retry;
pub mod worker_pool;

pub use admission::{
    AdmissionDecision, AdmissionGate, AdmissionGrade, AdmissionRule, AdmissionTicket,
    ControlBehavior,
};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadMetrics};
pub use circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
pub use histogram::{Histogram, HistogramSnapshot};
pub use permits::Permit;
pub use retry::policies::{AlwaysRetry, ClassifiedRetry, PredicateRetry};
pub use retry::{
    BackoffStrategy, RetryConfig, RetryDecision, RetryError, RetryExecutor, RetryOutcome,
    RetryPolicy, RetryResult,
};
pub use worker_pool::{WorkerPool, WorkerPoolConfig, WorkerPoolMetrics};
