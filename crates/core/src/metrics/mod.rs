//! Telemetry plumbing between the strategies and the optimizer

pub mod cache;
pub mod collector;
pub mod ports;

pub use cache::MetricsCache;
pub use collector::{derive_samples, CollectReport, MetricsCollector};
pub use ports::{CompositeGaugeSource, GaugeSource};
