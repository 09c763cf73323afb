//! Background workers for the gateway
//!
//! Every worker follows the same runtime rules:
//! - Explicit lifecycle management (start/stop)
//! - Join handles for spawned tasks
//! - Cancellation token support
//! - Timeout wrapping on every run

pub mod error;
pub mod jobs;
pub mod worker;

pub use error::{WorkerError, WorkerResult};
pub use jobs::{CircuitExportJob, CollectorJob, ConfigRefreshJob, MailboxPurgeJob, OptimizerJob};
pub use worker::{IntervalWorker, PeriodicJob, WorkerConfig};
