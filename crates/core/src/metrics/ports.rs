//! Port interfaces for telemetry
//!
//! The collector reads named gauges through this boundary so that the engine's
//! own gauges and any external registry look the same to it.

use bulwark_domain::GaugeReading;

/// Source of dot-delimited gauge readings
pub trait GaugeSource: Send + Sync {
    /// Current values; rolling values reset as a side effect of the read
    fn read_gauges(&self) -> Vec<GaugeReading>;
}

/// Several sources read as one
pub struct CompositeGaugeSource {
    sources: Vec<std::sync::Arc<dyn GaugeSource>>,
}

impl CompositeGaugeSource {
    pub fn new(sources: Vec<std::sync::Arc<dyn GaugeSource>>) -> Self {
        Self { sources }
    }
}

impl GaugeSource for CompositeGaugeSource {
    fn read_gauges(&self) -> Vec<GaugeReading> {
        self.sources.iter().flat_map(|source| source.read_gauges()).collect()
    }
}
