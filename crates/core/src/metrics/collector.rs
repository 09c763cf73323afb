//! Gauge scraping into optimizer samples
//!
//! Recognised names:
//!
//! - `latency.api.<service>.<api>.<percentile>`: one LATENCY sample
//! - `threadpool.<api|pool>.<service>.<name>.{rollingMaxActive,maxSize}`:
//!   THREAD_POOL sample `rollingMaxActive / maxSize`
//! - `bulkhead.<api|pool>.<service>.<name>.{availableConcurrency,maxConcurrency}`:
//!   BULKHEAD sample `(max - available) / max`
//!
//! A `pool` scoped sample is credited to every API that uses the pool group.

use std::collections::BTreeMap;
use std::sync::Arc;

use bulwark_domain::{GatewayConfig, GaugeReading, MetricKind, OptimizerMetricSample};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::cache::MetricsCache;
use super::ports::GaugeSource;
use crate::config_holder::ConfigHolder;
use crate::execution::gauges::{
    AVAILABLE_CONCURRENCY, BULKHEAD_PREFIX, LATENCY_PREFIX, MAX_CONCURRENCY, MAX_SIZE,
    ROLLING_MAX_ACTIVE, THREADPOOL_PREFIX,
};

/// Counts from one scrape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub readings: usize,
    pub samples: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ScopeKey {
    kind: MetricKind,
    scope: String,
    service: String,
    name: String,
}

#[derive(Debug, Default)]
struct Pair {
    used_or_available: Option<f64>,
    max: Option<f64>,
}

pub struct MetricsCollector {
    source: Arc<dyn GaugeSource>,
    cache: Arc<MetricsCache>,
    config: Arc<ConfigHolder>,
}

impl MetricsCollector {
    pub fn new(
        source: Arc<dyn GaugeSource>,
        cache: Arc<MetricsCache>,
        config: Arc<ConfigHolder>,
    ) -> Self {
        Self { source, cache, config }
    }

    pub fn cache(&self) -> &Arc<MetricsCache> {
        &self.cache
    }

    /// Read every gauge once and push the derived samples into the cache
    #[instrument(skip(self))]
    pub fn collect(&self, now: DateTime<Utc>) -> CollectReport {
        let readings = self.source.read_gauges();
        let snapshot = self.config.current();
        let (samples, skipped) = derive_samples(&readings, &snapshot.config, now);

        let report = CollectReport { readings: readings.len(), samples: samples.len(), skipped };
        self.cache.record_all(samples);
        debug!(?report, "Gauges collected");
        report
    }
}

/// Turn raw readings into samples; returns the samples and the number of
/// readings that could not be used.
pub fn derive_samples(
    readings: &[GaugeReading],
    config: &GatewayConfig,
    now: DateTime<Utc>,
) -> (Vec<OptimizerMetricSample>, usize) {
    let mut samples = Vec::new();
    let mut pairs: BTreeMap<ScopeKey, Pair> = BTreeMap::new();
    let mut skipped = 0;

    for reading in readings {
        let parts: Vec<&str> = reading.name.splitn(5, '.').collect();
        let [family, scope, service, name, field] = parts.as_slice() else {
            debug!(name = %reading.name, "Skipping malformed gauge name");
            skipped += 1;
            continue;
        };

        match (*family, *scope) {
            (LATENCY_PREFIX, "api") => samples.push(OptimizerMetricSample {
                service: (*service).to_string(),
                api: (*name).to_string(),
                kind: MetricKind::Latency,
                value: reading.value,
                observed_at: now,
            }),
            (THREADPOOL_PREFIX | BULKHEAD_PREFIX, "api" | "pool") => {
                let kind = if *family == THREADPOOL_PREFIX {
                    MetricKind::ThreadPool
                } else {
                    MetricKind::Bulkhead
                };
                let key = ScopeKey {
                    kind,
                    scope: (*scope).to_string(),
                    service: (*service).to_string(),
                    name: (*name).to_string(),
                };
                let pair = pairs.entry(key).or_default();
                match (kind, *field) {
                    (MetricKind::ThreadPool, ROLLING_MAX_ACTIVE)
                    | (MetricKind::Bulkhead, AVAILABLE_CONCURRENCY) => {
                        pair.used_or_available = Some(reading.value);
                    }
                    (MetricKind::ThreadPool, MAX_SIZE) | (MetricKind::Bulkhead, MAX_CONCURRENCY) => {
                        pair.max = Some(reading.value);
                    }
                    _ => {
                        debug!(name = %reading.name, "Skipping unknown gauge field");
                        skipped += 1;
                    }
                }
            }
            _ => {
                debug!(name = %reading.name, "Skipping unrecognised gauge");
                skipped += 1;
            }
        }
    }

    for (key, pair) in pairs {
        let (Some(value), Some(max)) = (pair.used_or_available, pair.max) else {
            debug!(?key, "Skipping incomplete gauge pair");
            skipped += 1;
            continue;
        };
        if max <= 0.0 {
            skipped += 1;
            continue;
        }
        let utilization = match key.kind {
            MetricKind::Bulkhead => (max - value) / max,
            _ => value / max,
        };

        let apis = match key.scope.as_str() {
            "pool" => apis_in_group(config, &key.service, &key.name),
            _ => vec![key.name.clone()],
        };
        if apis.is_empty() {
            debug!(?key, "No API uses this pool group");
            skipped += 1;
        }
        for api in apis {
            samples.push(OptimizerMetricSample {
                service: key.service.clone(),
                api,
                kind: key.kind,
                value: utilization,
                observed_at: now,
            });
        }
    }

    (samples, skipped)
}

fn apis_in_group(config: &GatewayConfig, service: &str, group: &str) -> Vec<String> {
    let Some(service) = config.services.get(service) else {
        return Vec::new();
    };
    service
        .apis
        .iter()
        .filter(|(_, api)| {
            api.pool_group.as_deref().or(service.pool_group.as_deref()) == Some(group)
        })
        .map(|(name, _)| name.clone())
        .collect()
}
