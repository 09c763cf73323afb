//! Telemetry samples consumed by the optimizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricKind {
    /// Latency percentile in milliseconds
    Latency,
    /// Worker pool high-water mark as a fraction of its size
    ThreadPool,
    /// Occupied bulkhead permits as a fraction of the limit
    Bulkhead,
}

crate::impl_domain_status_conversions!(MetricKind {
    Latency => "LATENCY",
    ThreadPool => "THREAD_POOL",
    Bulkhead => "BULKHEAD",
});

impl MetricKind {
    /// Saturation kinds aggregate by maximum, latency by mean
    pub fn aggregates_by_max(self) -> bool {
        matches!(self, Self::ThreadPool | Self::Bulkhead)
    }
}

/// Cache key for windowed samples
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub service: String,
    pub api: String,
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(service: impl Into<String>, api: impl Into<String>, kind: MetricKind) -> Self {
        Self { service: service.into(), api: api.into(), kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerMetricSample {
    pub service: String,
    pub api: String,
    pub kind: MetricKind,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl OptimizerMetricSample {
    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.service.clone(), self.api.clone(), self.kind)
    }
}

/// One named gauge value as exposed by a runtime gauge source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeReading {
    pub name: String,
    pub value: f64,
}

impl GaugeReading {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), value }
    }
}
