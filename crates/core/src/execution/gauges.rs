//! Live gauges fed by the strategies
//!
//! Names follow the hierarchical convention the collector parses:
//!
//! - `latency.api.<service>.<api>.<percentile>` in milliseconds
//! - `threadpool.<api|pool>.<service>.<name>.{rollingMaxActive,maxSize}`
//! - `bulkhead.<api|pool>.<service>.<name>.{availableConcurrency,maxConcurrency}`
//!
//! Pool and bulkhead readings are withheld while their key is degraded: the
//! live sizes are then below the configured ones, and tuning the configured
//! size from them would undo the degrade.

use std::sync::Arc;
use std::time::Duration;

use bulwark_common::resilience::{Bulkhead, Histogram, WorkerPool};
use bulwark_domain::{ConfigError, GaugeReading, MetricsSettings, PoolScope, ResolvedApi};
use dashmap::DashMap;

use crate::degrade::DegradeRegistry;
use crate::metrics::GaugeSource;

pub const LATENCY_PREFIX: &str = "latency";
pub const THREADPOOL_PREFIX: &str = "threadpool";
pub const BULKHEAD_PREFIX: &str = "bulkhead";
pub const ROLLING_MAX_ACTIVE: &str = "rollingMaxActive";
pub const MAX_SIZE: &str = "maxSize";
pub const AVAILABLE_CONCURRENCY: &str = "availableConcurrency";
pub const MAX_CONCURRENCY: &str = "maxConcurrency";

struct Scoped<T> {
    service: String,
    scope: PoolScope,
    scope_name: String,
    resource: Arc<T>,
}

impl<T> Scoped<T> {
    fn new(resolved: &ResolvedApi, resource: Arc<T>) -> Self {
        Self {
            service: resolved.service.clone(),
            scope: resolved.pool_scope,
            scope_name: resolved.scope_name.clone(),
            resource,
        }
    }

    fn name(&self, prefix: &str, field: &str) -> String {
        format!("{prefix}.{}.{}.{}.{field}", self.scope.as_str(), self.service, self.scope_name)
    }
}

/// Gauges shared by every strategy instance
pub struct RuntimeGauges {
    percentiles: Vec<(String, f64)>,
    latencies: DashMap<(String, String), Arc<Histogram>>,
    pools: DashMap<String, Scoped<WorkerPool>>,
    bulkheads: DashMap<String, Scoped<Bulkhead>>,
    degrade: Option<Arc<DegradeRegistry>>,
}

impl RuntimeGauges {
    /// `percentiles` pairs a label such as `p99` with its quantile
    pub fn new(percentiles: Vec<(String, f64)>) -> Self {
        Self {
            percentiles,
            latencies: DashMap::new(),
            pools: DashMap::new(),
            bulkheads: DashMap::new(),
            degrade: None,
        }
    }

    /// Withhold saturation readings for keys degraded in `degrade`
    #[must_use]
    pub fn with_degrade(mut self, degrade: Arc<DegradeRegistry>) -> Self {
        self.degrade = Some(degrade);
        self
    }

    fn is_degraded(&self, pool_key: &str) -> bool {
        self.degrade.as_ref().is_some_and(|degrade| degrade.factor(pool_key) < 1.0)
    }

    pub fn from_settings(settings: &MetricsSettings) -> Result<Self, ConfigError> {
        Ok(Self::new(settings.quantiles()?))
    }

    pub fn record_latency(&self, service: &str, api: &str, elapsed: Duration) {
        let key = (service.to_string(), api.to_string());
        if let Some(histogram) = self.latencies.get(&key) {
            histogram.record(elapsed);
            return;
        }
        self.latencies.entry(key).or_insert_with(|| Arc::new(Histogram::new())).record(elapsed);
    }

    /// Expose `pool` under the command's pool key; first registration wins
    pub fn register_pool(&self, resolved: &ResolvedApi, pool: &Arc<WorkerPool>) {
        if !self.pools.contains_key(&resolved.pool_key) {
            self.pools
                .entry(resolved.pool_key.clone())
                .or_insert_with(|| Scoped::new(resolved, Arc::clone(pool)));
        }
    }

    pub fn register_bulkhead(&self, resolved: &ResolvedApi, bulkhead: &Arc<Bulkhead>) {
        if !self.bulkheads.contains_key(&resolved.pool_key) {
            self.bulkheads
                .entry(resolved.pool_key.clone())
                .or_insert_with(|| Scoped::new(resolved, Arc::clone(bulkhead)));
        }
    }

    fn latency_readings(&self, readings: &mut Vec<GaugeReading>) {
        for entry in &self.latencies {
            let (service, api) = entry.key();
            let snapshot = entry.value().take_snapshot();
            if snapshot.count() == 0 {
                continue;
            }
            for (label, quantile) in &self.percentiles {
                if let Some(value) = snapshot.percentile(*quantile) {
                    readings.push(GaugeReading::new(
                        format!("{LATENCY_PREFIX}.api.{service}.{api}.{label}"),
                        value.as_secs_f64() * 1_000.0,
                    ));
                }
            }
        }
    }
}

impl GaugeSource for RuntimeGauges {
    fn read_gauges(&self) -> Vec<GaugeReading> {
        let mut readings = Vec::new();
        self.latency_readings(&mut readings);

        for entry in &self.pools {
            let pool = entry.value();
            let rolling_max = pool.resource.take_rolling_max_active();
            if self.is_degraded(entry.key()) {
                continue;
            }
            let max_size = pool.resource.config().max_size;
            readings.push(GaugeReading::new(
                pool.name(THREADPOOL_PREFIX, ROLLING_MAX_ACTIVE),
                rolling_max as f64,
            ));
            readings.push(GaugeReading::new(pool.name(THREADPOOL_PREFIX, MAX_SIZE), max_size as f64));
        }

        for entry in &self.bulkheads {
            if self.is_degraded(entry.key()) {
                continue;
            }
            let bulkhead = entry.value();
            readings.push(GaugeReading::new(
                bulkhead.name(BULKHEAD_PREFIX, AVAILABLE_CONCURRENCY),
                bulkhead.resource.available() as f64,
            ));
            readings.push(GaugeReading::new(
                bulkhead.name(BULKHEAD_PREFIX, MAX_CONCURRENCY),
                bulkhead.resource.max_concurrent() as f64,
            ));
        }

        readings
    }
}
