//! Observability infrastructure
//!
//! - `logging`: global `tracing` subscriber installation
//! - `exporters`: Prometheus mirror of engine gauges and circuit states

pub mod exporters;
pub mod logging;

pub use exporters::{MirroredGaugeSource, PrometheusExporter};
pub use logging::{init_tracing, LogFormat};
