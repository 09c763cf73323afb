//! Error types shared by the resilience primitives.

use std::time::Duration;

use thiserror::Error;

/// Simple configuration error for validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur in resilience operations
///
/// Generic over the wrapped operation error `E` so the original cause is
/// preserved next to the isolation-specific variants.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// Operation timed out
    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Admission gate refused the call
    #[error("Admission denied: {reason}")]
    AdmissionDenied { reason: String },

    /// Bulkhead capacity exceeded
    #[error("Bulkhead capacity exceeded: {capacity} concurrent operations")]
    BulkheadFull { capacity: usize },

    /// Worker pool has no free worker and no queue slot
    #[error("Worker pool saturated: {max_size} workers, {queue_size} queued")]
    PoolSaturated { max_size: usize, queue_size: usize },

    /// The worker running the operation panicked or was cancelled
    #[error("Worker ended without producing a result")]
    WorkerLost,

    /// The underlying operation failed
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// True when the isolation boundary refused the call before it started.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen
                | Self::AdmissionDenied { .. }
                | Self::BulkheadFull { .. }
                | Self::PoolSaturated { .. }
        )
    }
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
