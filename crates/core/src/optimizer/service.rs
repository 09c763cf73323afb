//! Metrics-driven tuning of pool sizes and timeouts

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bulwark_domain::{
    ConfigError, GatewayConfig, HttpMethod, MetricKey, MetricKind, OptimizerSettings,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config_holder::ConfigHolder;
use crate::metrics::MetricsCache;

/// Configuration field the optimizer may rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunedField {
    MaxSize,
    MaxConcurrency,
    TimeoutMs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Adjustment {
    pub service: String,
    pub api: String,
    pub field: TunedField,
    pub aggregate: f64,
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedKey {
    pub key: MetricKey,
    pub reason: String,
}

/// What one optimizer run did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizerReport {
    pub adjustments: Vec<Adjustment>,
    pub skipped: Vec<SkippedKey>,
    /// Generation published by this run, if any
    pub generation: Option<u64>,
}

impl OptimizerReport {
    pub fn changed(&self) -> bool {
        self.generation.is_some()
    }
}

/// Value a key was last tuned from, so an unchanged aggregate replays the
/// same step instead of compounding it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Baseline {
    aggregate: f64,
    from: u64,
    to: u64,
}

pub struct Optimizer {
    cache: Arc<MetricsCache>,
    config: Arc<ConfigHolder>,
    baselines: Mutex<HashMap<MetricKey, Baseline>>,
}

impl Optimizer {
    pub fn new(cache: Arc<MetricsCache>, config: Arc<ConfigHolder>) -> Self {
        Self { cache, config, baselines: Mutex::new(HashMap::new()) }
    }

    /// Aggregate the cache, derive new sizes and timeouts, and publish them
    /// as one new generation when anything changed.
    #[instrument(skip(self))]
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<OptimizerReport, ConfigError> {
        let settings = self.config.current().config.optimizer.clone();
        if !settings.enabled {
            debug!("Optimizer disabled");
            return Ok(OptimizerReport::default());
        }

        let mut report = OptimizerReport::default();
        let aggregates = aggregate(&self.cache.snapshot(now), &settings, &mut report.skipped);
        if aggregates.is_empty() {
            return Ok(report);
        }

        let mut baselines = self.baselines.lock();
        let published = self.config.update(|config| {
            let mut by_service: BTreeMap<String, Vec<(MetricKey, f64)>> = BTreeMap::new();
            for (key, value) in aggregates {
                by_service.entry(key.service.clone()).or_default().push((key, value));
            }

            for (service, keys) in by_service {
                let before = config.services.get(&service).cloned();
                let mut planned = Vec::new();
                let mut pending = Vec::new();
                for (key, value) in keys {
                    match tune(config, &key, value, &settings, &baselines) {
                        Ok(Some((adjustment, baseline))) => {
                            pending.push((key, baseline));
                            planned.push(adjustment);
                        }
                        Ok(None) => {}
                        Err(reason) => report.skipped.push(SkippedKey { key, reason }),
                    }
                }

                if let Err(error) = config.validate() {
                    warn!(service = %service, error = %error, "Discarding optimizer changes");
                    if let Some(before) = before {
                        config.services.insert(service.clone(), before);
                    }
                    continue;
                }
                baselines.extend(pending);
                report.adjustments.extend(planned);
            }
        })?;

        report.adjustments.retain(|adjustment| adjustment.from != adjustment.to);
        if let Some(snapshot) = published {
            for adjustment in &report.adjustments {
                info!(
                    service = %adjustment.service,
                    api = %adjustment.api,
                    field = ?adjustment.field,
                    from = adjustment.from,
                    to = adjustment.to,
                    aggregate = adjustment.aggregate,
                    "Optimizer adjusted configuration"
                );
            }
            report.generation = Some(snapshot.generation);
        } else {
            report.adjustments.clear();
        }
        Ok(report)
    }
}

/// Max for saturation kinds, mean for latency. Keys with fewer samples than
/// `min_samples` are left out.
fn aggregate(
    snapshot: &BTreeMap<MetricKey, Vec<f64>>,
    settings: &OptimizerSettings,
    skipped: &mut Vec<SkippedKey>,
) -> BTreeMap<MetricKey, f64> {
    let mut aggregates = BTreeMap::new();
    for (key, values) in snapshot {
        if values.len() < settings.min_samples {
            skipped.push(SkippedKey {
                key: key.clone(),
                reason: format!("{} of {} samples", values.len(), settings.min_samples),
            });
            continue;
        }
        if values.iter().any(|v| !v.is_finite()) {
            skipped.push(SkippedKey { key: key.clone(), reason: "non-finite sample".into() });
            continue;
        }
        let value = if key.kind.aggregates_by_max() {
            values.iter().copied().fold(f64::MIN, f64::max)
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        aggregates.insert(key.clone(), value);
    }
    aggregates
}

/// Plan and apply the change for one key on `config`.
///
/// Returns the adjustment together with the baseline to remember, `None`
/// when tuning is switched off for the kind.
fn tune(
    config: &mut GatewayConfig,
    key: &MetricKey,
    value: f64,
    settings: &OptimizerSettings,
    baselines: &HashMap<MetricKey, Baseline>,
) -> Result<Option<(Adjustment, Baseline)>, String> {
    let service = config
        .services
        .get_mut(&key.service)
        .ok_or_else(|| format!("unknown service {}", key.service))?;
    let pool = service.pool.clone();
    let api = service.apis.get_mut(&key.api).ok_or_else(|| format!("unknown api {}", key.api))?;

    let (field, current) = match key.kind {
        MetricKind::ThreadPool => (TunedField::MaxSize, api.max_size.unwrap_or(pool.max_size) as u64),
        MetricKind::Bulkhead => {
            (TunedField::MaxConcurrency, api.max_concurrency.unwrap_or(pool.max_concurrency) as u64)
        }
        MetricKind::Latency if settings.tune_timeouts => {
            (TunedField::TimeoutMs, api.timeout_ms.unwrap_or(pool.timeout_ms))
        }
        MetricKind::Latency => return Ok(None),
    };

    let base = match baselines.get(key) {
        Some(baseline) if baseline.aggregate == value && baseline.to == current => baseline.from,
        _ => current,
    };
    let next = match field {
        TunedField::TimeoutMs => derive_timeout(value, api.method, settings),
        _ => step_size(base, value, settings),
    };

    if next != current {
        match field {
            TunedField::MaxSize => {
                let size = usize::try_from(next).map_err(|e| e.to_string())?;
                api.max_size = Some(size);
                let core = api.core_size.unwrap_or(pool.core_size);
                if core > size {
                    api.core_size = Some(size);
                }
            }
            TunedField::MaxConcurrency => {
                api.max_concurrency = Some(usize::try_from(next).map_err(|e| e.to_string())?);
            }
            TunedField::TimeoutMs => api.timeout_ms = Some(next),
        }
    }

    Ok(Some((
        Adjustment {
            service: key.service.clone(),
            api: key.api.clone(),
            field,
            aggregate: value,
            from: current,
            to: next,
        },
        Baseline { aggregate: value, from: base, to: next },
    )))
}

/// Grow by `ceil(size * bandwidth)` above the band, shrink by
/// `floor(size / bandwidth)` below it, clamp to the configured bounds.
pub fn step_size(size: u64, utilization: f64, settings: &OptimizerSettings) -> u64 {
    let stepped = if utilization > settings.max_utilization {
        (size as f64 * settings.bandwidth).ceil() as u64
    } else if utilization < settings.min_utilization {
        (size as f64 / settings.bandwidth).floor() as u64
    } else {
        return size;
    };
    stepped.clamp(settings.min_pool_size as u64, settings.max_pool_size as u64)
}

/// `max(min_timeout_ms, ceil(latency + buffer))`
pub fn derive_timeout(latency_ms: f64, method: HttpMethod, settings: &OptimizerSettings) -> u64 {
    let buffered = (latency_ms + settings.buffer_ms(method) as f64).ceil() as u64;
    buffered.max(settings.min_timeout_ms)
}
