//! Bounded worker pool for thread-pool style isolation.
//!
//! Work runs on its own spawned task while holding a worker slot, so a caller
//! that stops waiting (deadline exceeded) does not free the worker early; the
//! slot stays busy until the work finishes, as a pool thread would.
//!
//! Admission is immediate: a free worker runs the job, otherwise the job takes
//! a queue slot and waits for a worker, otherwise it is rejected.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError};
use super::permits::ResizablePermits;

/// Worker pool sizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Workers reported as the steady-state size
    pub core_size: usize,
    /// Upper bound on concurrently running jobs
    pub max_size: usize,
    /// Jobs allowed to wait for a worker
    pub queue_size: usize,
    /// Longest a queued job waits for a worker; `None` waits until one frees
    pub queue_timeout: Option<Duration>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { core_size: 10, max_size: 10, queue_size: 5, queue_timeout: None }
    }
}

impl WorkerPoolConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_size == 0 {
            return Err(ConfigError::invalid("max_size must be greater than 0"));
        }
        if self.core_size > self.max_size {
            return Err(ConfigError::invalid("core_size must not exceed max_size"));
        }
        Ok(())
    }
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolMetrics {
    pub active: usize,
    pub queued: usize,
    pub core_size: usize,
    pub max_size: usize,
    pub queue_size: usize,
    pub completed: u64,
    pub rejected: u64,
}

struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded worker pool
#[derive(Clone)]
pub struct WorkerPool {
    config: Arc<Mutex<WorkerPoolConfig>>,
    workers: Arc<ResizablePermits>,
    queued: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            workers: ResizablePermits::new(config.max_size),
            config: Arc::new(Mutex::new(config)),
            queued: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Apply new sizing. Running and queued jobs are unaffected.
    pub fn reconfigure(&self, config: WorkerPoolConfig) -> ConfigResult<()> {
        config.validate()?;
        let mut current = self.config.lock();
        if current.max_size != config.max_size {
            debug!(from = current.max_size, to = config.max_size, "Worker pool resized");
            self.workers.resize(config.max_size);
        }
        *current = config;
        Ok(())
    }

    fn try_enqueue(&self, queue_size: usize) -> Option<QueueSlot<'_>> {
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| (q < queue_size).then_some(q + 1))
            .ok()
            .map(|_| QueueSlot(&self.queued))
    }

    /// Run `job` on a pool worker.
    ///
    /// Rejects with [`ResilienceError::PoolSaturated`] when neither a worker
    /// nor a queue slot is free.
    #[instrument(skip(self, job), fields(active = self.workers.in_use()))]
    pub async fn execute<F, T, E>(&self, job: F) -> Result<T, ResilienceError<E>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (max_size, queue_size, queue_timeout) = {
            let config = self.config.lock();
            (config.max_size, config.queue_size, config.queue_timeout)
        };

        let permit = match self.workers.try_acquire() {
            Some(permit) => permit,
            None => {
                let Some(slot) = self.try_enqueue(queue_size) else {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    debug!(max_size, queue_size, "Worker pool rejected job");
                    return Err(ResilienceError::PoolSaturated { max_size, queue_size });
                };
                let permit = self.workers.acquire(queue_timeout).await;
                drop(slot);
                match (permit, queue_timeout) {
                    (Some(permit), _) => permit,
                    (None, Some(timeout)) => {
                        debug!(?timeout, "Queued job gave up waiting for a worker");
                        return Err(ResilienceError::Timeout { timeout });
                    }
                    (None, None) => {
                        self.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(ResilienceError::PoolSaturated { max_size, queue_size });
                    }
                }
            }
        };

        let completed = Arc::clone(&self.completed);
        let handle = tokio::spawn(async move {
            let result = job.await;
            completed.fetch_add(1, Ordering::Relaxed);
            drop(permit);
            result
        });

        match handle.await {
            Ok(result) => result.map_err(|source| ResilienceError::OperationFailed { source }),
            Err(join_error) => {
                warn!(error = %join_error, "Worker task ended without a result");
                Err(ResilienceError::WorkerLost)
            }
        }
    }

    pub fn config(&self) -> WorkerPoolConfig {
        self.config.lock().clone()
    }

    pub fn active(&self) -> usize {
        self.workers.in_use()
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Peak active workers since the previous call (rolling high-water mark)
    pub fn take_rolling_max_active(&self) -> usize {
        self.workers.take_high_water()
    }

    pub fn metrics(&self) -> WorkerPoolMetrics {
        let config = self.config();
        WorkerPoolMetrics {
            active: self.active(),
            queued: self.queued(),
            core_size: config.core_size,
            max_size: config.max_size,
            queue_size: config.queue_size,
            completed: self.completed.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config())
            .field("active", &self.active())
            .field("queued", &self.queued())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("job failed")]
    struct JobFailed;

    fn pool(max_size: usize, queue_size: usize) -> WorkerPool {
        WorkerPool::new(WorkerPoolConfig {
            core_size: max_size,
            max_size,
            queue_size,
            queue_timeout: None,
        })
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn saturated_pool_with_full_queue_rejects_immediately() {
        let pool = pool(1, 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.execute(async move {
                    let _ = release_rx.await;
                    Ok::<_, JobFailed>(1)
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.execute(async { Ok::<_, JobFailed>(2) }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.queued(), 1);

        let rejected = pool.execute(async { Ok::<_, JobFailed>(3) }).await;
        assert!(matches!(
            rejected,
            Err(ResilienceError::PoolSaturated { max_size: 1, queue_size: 1 })
        ));

        release_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap().unwrap(), 1);
        assert_eq!(queued.await.unwrap().unwrap(), 2);
        assert_eq!(pool.metrics().rejected, 1);
        assert_eq!(pool.metrics().completed, 2);
    }

    #[tokio::test]
    async fn job_error_is_wrapped() {
        let pool = pool(2, 0);
        let result = pool.execute(async { Err::<(), _>(JobFailed) }).await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn rolling_max_active_reports_peak() {
        let pool = pool(4, 0);
        for _ in 0..3 {
            pool.execute(async { Ok::<_, JobFailed>(()) }).await.unwrap();
        }
        assert_eq!(pool.take_rolling_max_active(), 1);
        assert_eq!(pool.take_rolling_max_active(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_job_times_out_waiting_for_worker() {
        let pool = WorkerPool::new(WorkerPoolConfig {
            core_size: 1,
            max_size: 1,
            queue_size: 1,
            queue_timeout: Some(Duration::from_millis(30)),
        })
        .unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.execute(async move {
                    let _ = release_rx.await;
                    Ok::<_, JobFailed>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waited = pool.execute(async { Ok::<_, JobFailed>(()) }).await;
        assert!(matches!(waited, Err(ResilienceError::Timeout { .. })));
        assert_eq!(pool.queued(), 0);

        release_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
    }

    #[test]
    fn config_validation() {
        assert!(WorkerPoolConfig::default().validate().is_ok());
        let bad = WorkerPoolConfig { core_size: 5, max_size: 2, ..WorkerPoolConfig::default() };
        assert!(bad.validate().is_err());
    }
}
