//! # Bulwark Infrastructure
//!
//! Infrastructure implementations of core gateway ports.
//!
//! This crate contains:
//! - Configuration loading (TOML/JSON/env) and refresh
//! - The in-memory mailbox store with TTL and capacity
//! - The reqwest callback transport
//! - Interval workers for collection, optimization, refresh and purge
//! - Tracing subscriber setup and the Prometheus exporter
//!
//! ## Architecture
//! - Implements traits defined in `bulwark-core`
//! - Contains all "impure" code (I/O, clocks, background tasks)

pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod http;
pub mod mailbox;
pub mod observability;
pub mod scheduling;

// Re-export commonly used items
pub use bootstrap::{GatewayRuntime, GatewayRuntimeBuilder};
pub use config::{ConfigRefresher, ConfigSource, FileConfigSource, RefreshOutcome};
pub use errors::{InfraError, InfraResult};
pub use http::HttpCallbackTransport;
pub use mailbox::InMemoryMailboxStore;
pub use observability::{init_tracing, LogFormat, PrometheusExporter};
pub use scheduling::{IntervalWorker, PeriodicJob, WorkerConfig, WorkerError};
