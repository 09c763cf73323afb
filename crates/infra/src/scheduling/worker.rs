//! Fixed-interval background worker
//!
//! Runs one [`PeriodicJob`] every `interval` until stopped. Each run is
//! bounded by `run_timeout`; a failed or timed-out run is logged and the
//! loop carries on with the next tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::{WorkerError, WorkerResult};
use crate::errors::InfraError;

/// A unit of background work run on every tick
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    /// Stable name for logs and errors
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<(), InfraError>;
}

/// Timing for an [`IntervalWorker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub interval: Duration,
    pub run_timeout: Duration,
    pub join_timeout: Duration,
}

impl WorkerConfig {
    /// Tick every `interval`; each run may take at most one interval
    pub fn every(interval: Duration) -> Self {
        Self { interval, run_timeout: interval, join_timeout: Duration::from_secs(5) }
    }

    pub fn every_secs(secs: u64) -> Self {
        Self::every(Duration::from_secs(secs.max(1)))
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }
}

pub struct IntervalWorker<J: PeriodicJob> {
    job: Arc<J>,
    config: WorkerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl<J: PeriodicJob> IntervalWorker<J> {
    pub fn new(job: Arc<J>, config: WorkerConfig) -> Self {
        Self { job, config, cancellation: CancellationToken::new(), task_handle: None }
    }

    pub fn job(&self) -> &Arc<J> {
        &self.job
    }

    /// Spawn the loop. The first run happens one interval after start.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> WorkerResult<()> {
        let name = self.job.name();
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning { name });
        }

        self.cancellation = CancellationToken::new();
        let job = Arc::clone(&self.job);
        let config = self.config;
        let cancel = self.cancellation.clone();

        self.task_handle = Some(tokio::spawn(async move {
            Self::run_loop(job, config, cancel).await;
        }));
        info!(worker = name, interval_ms = config.interval.as_millis() as u64, "Worker started");
        Ok(())
    }

    /// Cancel the loop and wait for the task to finish.
    ///
    /// A run in progress is dropped at its next await point.
    #[instrument(skip(self), fields(worker = self.job.name()))]
    pub async fn stop(&mut self) -> WorkerResult<()> {
        let name = self.job.name();
        let handle = self.task_handle.take().ok_or(WorkerError::NotRunning { name })?;

        self.cancellation.cancel();
        let join_timeout = self.config.join_timeout;
        match tokio::time::timeout(join_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Worker task panicked");
                return Err(WorkerError::TaskJoinFailed { name, message: e.to_string() });
            }
            Err(_) => {
                warn!("Worker task did not complete within timeout");
                return Err(WorkerError::JoinTimeout { name, timeout: join_timeout });
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Run the job once on the caller's task, bounded by the run timeout
    pub async fn run_now(&self) -> Result<(), InfraError> {
        run_bounded(self.job.as_ref(), self.config.run_timeout).await
    }

    async fn run_loop(job: Arc<J>, config: WorkerConfig, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(worker = job.name(), "Worker loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(config.interval) => {
                    let started = Instant::now();
                    match run_bounded(job.as_ref(), config.run_timeout).await {
                        Ok(()) => {
                            debug!(
                                worker = job.name(),
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "Worker run finished"
                            );
                        }
                        Err(InfraError::JobTimeout(timeout)) => {
                            warn!(worker = job.name(), ?timeout, "Worker run timed out");
                        }
                        Err(e) => {
                            error!(worker = job.name(), error = %e, "Worker run failed");
                        }
                    }
                }
            }
        }
    }
}

async fn run_bounded<J: PeriodicJob + ?Sized>(
    job: &J,
    timeout: Duration,
) -> Result<(), InfraError> {
    tokio::time::timeout(timeout, job.run()).await.map_err(|_| InfraError::JobTimeout(timeout))?
}

impl<J: PeriodicJob> Drop for IntervalWorker<J> {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}
