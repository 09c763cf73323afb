//! Worker error types

use std::time::Duration;

use thiserror::Error;

/// Lifecycle errors for interval workers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// Worker is already running
    #[error("Worker {name} already running")]
    AlreadyRunning { name: &'static str },

    /// Worker is not running
    #[error("Worker {name} not running")]
    NotRunning { name: &'static str },

    /// The loop did not exit within the join timeout
    #[error("Worker {name} did not stop within {timeout:?}")]
    JoinTimeout { name: &'static str, timeout: Duration },

    /// Task join failed
    #[error("Worker {name} task failed: {message}")]
    TaskJoinFailed { name: &'static str, message: String },
}

/// Convenience type alias for worker lifecycle operations
pub type WorkerResult<T> = Result<T, WorkerError>;
