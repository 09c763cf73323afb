//! Metrics exporters
//!
//! Exporters mirror engine gauges into external monitoring formats.

pub mod prometheus;

// Re-export exporter types for convenience
pub use self::prometheus::{MirroredGaugeSource, PrometheusExporter};
