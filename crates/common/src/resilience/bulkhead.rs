//! Bulkhead pattern for limiting concurrent operations
//!
//! A bulkhead bounds the number of in-flight calls for one resource. Callers
//! over the limit wait up to `max_wait` for a slot and are rejected after
//! that. There is no worker pool behind it; the call runs on the caller's
//! task.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use super::error::{ConfigError, ConfigResult, ResilienceError};
use super::permits::{Permit, ResizablePermits};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    pub max_concurrent: usize,
    /// Longest a caller waits for a slot before being rejected
    pub max_wait: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, max_wait: Duration::from_millis(100) }
    }
}

impl BulkheadConfig {
    pub fn new(max_concurrent: usize, max_wait: Duration) -> Self {
        Self { max_concurrent, max_wait }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

/// Metrics for bulkhead monitoring
#[derive(Debug, Clone)]
pub struct BulkheadMetrics {
    /// Total number of operations executed
    pub total_operations: u64,
    /// Total number of operations rejected after waiting
    pub rejected_operations: u64,
    /// Current number of concurrent operations
    pub current_concurrent: usize,
    /// Slots currently free
    pub available: usize,
    /// Maximum concurrent operations allowed
    pub max_concurrent: usize,
}

impl BulkheadMetrics {
    /// Current utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 1.0;
        }
        self.current_concurrent as f64 / self.max_concurrent as f64
    }
}

/// Bulkhead for limiting concurrent operations
///
/// Clones share the same slots and counters.
#[derive(Clone)]
pub struct Bulkhead {
    config: Arc<Mutex<BulkheadConfig>>,
    permits: Arc<ResizablePermits>,
    total_operations: Arc<AtomicU64>,
    rejected_operations: Arc<AtomicU64>,
}

impl Bulkhead {
    /// Create a new bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            permits: ResizablePermits::new(config.max_concurrent),
            config: Arc::new(Mutex::new(config)),
            total_operations: Arc::new(AtomicU64::new(0)),
            rejected_operations: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Apply a new limit. In-flight calls keep their slots.
    pub fn reconfigure(&self, config: BulkheadConfig) -> ConfigResult<()> {
        config.validate()?;
        let mut current = self.config.lock();
        if current.max_concurrent != config.max_concurrent {
            debug!(
                from = current.max_concurrent,
                to = config.max_concurrent,
                "Bulkhead resized"
            );
            self.permits.resize(config.max_concurrent);
        }
        *current = config;
        Ok(())
    }

    /// Wait up to the configured `max_wait` for a slot.
    pub async fn acquire(&self) -> Option<Permit> {
        let max_wait = self.config.lock().max_wait;
        let permit = if max_wait.is_zero() {
            self.permits.try_acquire()
        } else {
            self.permits.acquire(Some(max_wait)).await
        };
        match permit {
            Some(permit) => {
                self.total_operations.fetch_add(1, Ordering::Relaxed);
                Some(permit)
            }
            None => {
                self.rejected_operations.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Execute an operation with bulkhead protection
    #[instrument(skip(self, operation), fields(concurrent = self.current_concurrent()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(_permit) = self.acquire().await else {
            let capacity = self.max_concurrent();
            debug!(capacity, "Bulkhead rejected operation");
            return Err(ResilienceError::BulkheadFull { capacity });
        };

        operation().await.map_err(|source| ResilienceError::OperationFailed { source })
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.lock().max_concurrent
    }

    /// Get the current number of concurrent operations
    pub fn current_concurrent(&self) -> usize {
        self.permits.in_use()
    }

    /// Slots free right now
    pub fn available(&self) -> usize {
        self.permits.available()
    }

    /// Get bulkhead metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            total_operations: self.total_operations.load(Ordering::Acquire),
            rejected_operations: self.rejected_operations.load(Ordering::Acquire),
            current_concurrent: self.current_concurrent(),
            available: self.available(),
            max_concurrent: self.max_concurrent(),
        }
    }
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("max_concurrent", &self.max_concurrent())
            .field("current_concurrent", &self.current_concurrent())
            .finish()
    }
}
