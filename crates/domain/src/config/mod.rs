//! Gateway configuration snapshot
//!
//! A snapshot is plain data. Defaults are applied by serde at construction
//! time, `validate` rejects anything the engine cannot run with, and
//! `resolve` flattens one service/API pair into the per-command view.

mod resolved;
mod service;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{METRIC_NAME_SEPARATOR, MIN_ADMISSION_THRESHOLD};
use crate::errors::ConfigError;
use crate::types::HttpMethod;

pub use resolved::{PoolScope, ResolvedApi};
pub use service::{
    AdmissionGradeKind, AdmissionSettings, ApiConfig, BackoffKind, CircuitSettings,
    ControlBehaviorKind, EndpointSpec, PoolSettings, RetrySettings, ServiceConfig, StrategyKind,
};

/// Root configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub services: BTreeMap<String, ServiceConfig>,
    pub callback: CallbackSettings,
    pub mailbox: MailboxSettings,
    pub optimizer: OptimizerSettings,
    pub metrics: MetricsSettings,
}

/// Delivery of asynchronous results to caller-supplied addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackSettings {
    /// Per-attempt timeout when the caller does not supply one
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub method: HttpMethod,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self { timeout_ms: 5_000, max_attempts: 3, backoff_ms: 200, method: HttpMethod::Post }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxSettings {
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self { ttl_seconds: 86_400, max_entries: 100_000 }
    }
}

/// Thresholds for the pool size and timeout feedback loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Shrink below this utilization
    pub min_utilization: f64,
    /// Grow above this utilization
    pub max_utilization: f64,
    /// Multiplicative step for growing and shrinking
    pub bandwidth: f64,
    /// Samples needed per metric kind before an API is adjusted
    pub min_samples: usize,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub min_timeout_ms: u64,
    /// Added to observed latency for GET, HEAD and OPTIONS
    pub idempotent_buffer_ms: u64,
    /// Added to observed latency for every other method
    pub all_methods_buffer_ms: u64,
    pub tune_timeouts: bool,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            min_utilization: 0.6,
            max_utilization: 0.85,
            bandwidth: 1.2,
            min_samples: 3,
            min_pool_size: 1,
            max_pool_size: 200,
            min_timeout_ms: 100,
            idempotent_buffer_ms: 100,
            all_methods_buffer_ms: 300,
            tune_timeouts: true,
        }
    }
}

impl OptimizerSettings {
    /// Timeout buffer for an API's method
    pub fn buffer_ms(&self, method: HttpMethod) -> u64 {
        if method.is_idempotent_read() {
            self.idempotent_buffer_ms
        } else {
            self.all_methods_buffer_ms
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub scrape_interval_secs: u64,
    /// Samples older than this are evicted on read
    pub window_secs: u64,
    /// Latency percentile labels such as `p90` or `p99.9`
    pub percentiles: Vec<String>,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            scrape_interval_secs: 10,
            window_secs: 300,
            percentiles: vec!["p90".to_owned(), "p99".to_owned()],
        }
    }
}

impl MetricsSettings {
    /// Labels paired with their quantile in `0.0..=1.0`
    pub fn quantiles(&self) -> Result<Vec<(String, f64)>, ConfigError> {
        self.percentiles
            .iter()
            .map(|label| {
                parse_percentile(label).map(|q| (label.clone(), q)).ok_or_else(|| {
                    ConfigError::invalid("metrics.percentiles", format!("invalid label {label}"))
                })
            })
            .collect()
    }
}

/// `p90` -> 0.9, `p99.9` -> 0.999
pub fn parse_percentile(label: &str) -> Option<f64> {
    let value: f64 = label.strip_prefix('p')?.parse().ok()?;
    (0.0..=100.0).contains(&value).then_some(value / 100.0)
}

impl GatewayConfig {
    pub fn with_service(mut self, name: impl Into<String>, service: ServiceConfig) -> Self {
        self.services.insert(name.into(), service);
        self
    }

    /// Reject snapshots the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (service_name, service) in &self.services {
            let at = |field: &str| format!("services.{service_name}.{field}");

            check_name(&format!("services.{service_name}"), service_name)?;
            if let Some(group) = &service.pool_group {
                check_name(&at("pool_group"), group)?;
            }
            validate_endpoint(&at("endpoint"), &service.endpoint)?;
            validate_pool(&at("pool"), &service.pool)?;
            validate_circuit(&at("circuit"), &service.circuit)?;
            if let Some(retry) = &service.retry {
                validate_retry(&at("retry"), retry)?;
            }
            if let Some(admission) = &service.admission {
                validate_admission(&at("admission"), admission)?;
            }

            for (api_name, api) in &service.apis {
                let api_at = |field: &str| format!("services.{service_name}.apis.{api_name}.{field}");

                check_name(&format!("services.{service_name}.apis.{api_name}"), api_name)?;
                if let Some(group) = &api.pool_group {
                    check_name(&api_at("pool_group"), group)?;
                }
                validate_pool(&api_at("pool"), &api.merged_pool(&service.pool))?;
                if let Some(retry) = &api.retry {
                    validate_retry(&api_at("retry"), retry)?;
                }
                if let Some(admission) = &api.admission {
                    validate_admission(&api_at("admission"), admission)?;
                }
                let strategy = api.strategy.unwrap_or(service.strategy);
                if strategy == StrategyKind::AdmissionControl
                    && api.admission.is_none()
                    && service.admission.is_none()
                {
                    return Err(ConfigError::invalid(
                        api_at("admission"),
                        "admission_control strategy needs an admission rule",
                    ));
                }
            }
        }

        self.validate_optimizer()?;

        if self.callback.max_attempts == 0 {
            return Err(ConfigError::invalid("callback.max_attempts", "must be at least 1"));
        }
        if self.mailbox.max_entries == 0 {
            return Err(ConfigError::invalid("mailbox.max_entries", "must be greater than 0"));
        }
        if self.metrics.scrape_interval_secs == 0 {
            return Err(ConfigError::invalid("metrics.scrape_interval_secs", "must be greater than 0"));
        }
        self.metrics.quantiles()?;
        Ok(())
    }

    fn validate_optimizer(&self) -> Result<(), ConfigError> {
        let optimizer = &self.optimizer;
        if !(0.0..=1.0).contains(&optimizer.min_utilization)
            || !(0.0..=1.0).contains(&optimizer.max_utilization)
            || optimizer.min_utilization >= optimizer.max_utilization
        {
            return Err(ConfigError::invalid(
                "optimizer.min_utilization",
                "utilization bounds must satisfy 0 <= min < max <= 1",
            ));
        }
        if !(optimizer.bandwidth > 1.0) {
            return Err(ConfigError::invalid("optimizer.bandwidth", "must be greater than 1.0"));
        }
        if optimizer.min_pool_size == 0 || optimizer.min_pool_size > optimizer.max_pool_size {
            return Err(ConfigError::invalid(
                "optimizer.min_pool_size",
                "pool bounds must satisfy 0 < min <= max",
            ));
        }
        if optimizer.interval_secs == 0 {
            return Err(ConfigError::invalid("optimizer.interval_secs", "must be greater than 0"));
        }
        Ok(())
    }
}

fn check_name(field: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::invalid(field, "name must not be empty"));
    }
    if name.contains(METRIC_NAME_SEPARATOR) {
        return Err(ConfigError::invalid(
            field,
            format!("name {name} must not contain '{METRIC_NAME_SEPARATOR}'"),
        ));
    }
    Ok(())
}

fn validate_endpoint(field: &str, endpoint: &EndpointSpec) -> Result<(), ConfigError> {
    match endpoint {
        EndpointSpec::Simple { host, port, .. } if host.is_empty() || *port == 0 => {
            Err(ConfigError::invalid(field, "simple endpoint needs a host and a non-zero port"))
        }
        EndpointSpec::Discovery { service_id } if service_id.is_empty() => {
            Err(ConfigError::invalid(field, "discovery endpoint needs a service_id"))
        }
        _ => Ok(()),
    }
}

fn validate_pool(field: &str, pool: &PoolSettings) -> Result<(), ConfigError> {
    if pool.max_size == 0 || pool.max_concurrency == 0 || pool.timeout_ms == 0 {
        return Err(ConfigError::invalid(
            field,
            "max_size, max_concurrency and timeout_ms must be greater than 0",
        ));
    }
    if pool.core_size > pool.max_size {
        return Err(ConfigError::invalid(field, "core_size must not exceed max_size"));
    }
    Ok(())
}

fn validate_circuit(field: &str, circuit: &CircuitSettings) -> Result<(), ConfigError> {
    if !(circuit.failure_rate_threshold > 0.0 && circuit.failure_rate_threshold <= 1.0) {
        return Err(ConfigError::invalid(field, "failure_rate_threshold must be in (0, 1]"));
    }
    if circuit.window_ms == 0 || circuit.half_open_max_calls == 0 {
        return Err(ConfigError::invalid(
            field,
            "window_ms and half_open_max_calls must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_retry(field: &str, retry: &RetrySettings) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::invalid(field, "max_attempts must be at least 1"));
    }
    Ok(())
}

fn validate_admission(field: &str, admission: &AdmissionSettings) -> Result<(), ConfigError> {
    if !(admission.threshold.is_finite() && admission.threshold >= MIN_ADMISSION_THRESHOLD) {
        return Err(ConfigError::invalid(
            field,
            format!("threshold must be finite and at least {MIN_ADMISSION_THRESHOLD}"),
        ));
    }
    if admission.behavior == ControlBehaviorKind::WarmUp && admission.cold_factor < 2 {
        return Err(ConfigError::invalid(field, "warm_up needs cold_factor >= 2"));
    }
    if let Some(resource) = &admission.resource {
        check_name(field, resource)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ServiceConfig {
        ServiceConfig::new(EndpointSpec::Simple {
            scheme: "http".into(),
            host: "orders".into(),
            port: 8080,
        })
        .with_api("create", ApiConfig::new(HttpMethod::Post, "/orders"))
    }

    fn invalid_field(config: &GatewayConfig) -> String {
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn default_snapshot_is_valid() {
        let config = GatewayConfig::default().with_service("orders", service());
        config.validate().unwrap();
        assert_eq!(config.callback.timeout_ms, 5_000);
        assert_eq!(config.mailbox.ttl_seconds, 86_400);
    }

    #[test]
    fn dotted_names_are_rejected() {
        let config = GatewayConfig::default().with_service("orders.v2", service());
        assert_eq!(invalid_field(&config), "services.orders.v2");
    }

    #[test]
    fn api_override_breaking_core_le_max_is_rejected() {
        let mut service = service();
        if let Some(api) = service.apis.get_mut("create") {
            api.core_size = Some(20);
        }
        let config = GatewayConfig::default().with_service("orders", service);
        assert_eq!(invalid_field(&config), "services.orders.apis.create.pool");
    }

    #[test]
    fn optimizer_bounds_are_checked() {
        let mut config = GatewayConfig::default();
        config.optimizer.bandwidth = 1.0;
        assert_eq!(invalid_field(&config), "optimizer.bandwidth");

        let mut config = GatewayConfig::default();
        config.optimizer.min_utilization = 0.9;
        assert_eq!(invalid_field(&config), "optimizer.min_utilization");
    }

    #[test]
    fn admission_strategy_requires_rule() {
        let mut service = service();
        service.strategy = StrategyKind::AdmissionControl;
        let config = GatewayConfig::default().with_service("orders", service);
        assert_eq!(invalid_field(&config), "services.orders.apis.create.admission");
    }

    #[test]
    fn admission_threshold_must_be_finite_and_bounded_below() {
        for threshold in [1e-20, 0.0, f64::INFINITY, f64::NAN] {
            let mut service = service();
            service.admission = Some(AdmissionSettings {
                threshold,
                behavior: ControlBehaviorKind::RateLimiter,
                ..AdmissionSettings::default()
            });
            let config = GatewayConfig::default().with_service("orders", service);
            assert_eq!(invalid_field(&config), "services.orders.admission", "threshold {threshold}");
        }
    }

    #[test]
    fn percentile_labels() {
        assert_eq!(parse_percentile("p90"), Some(0.9));
        assert!((parse_percentile("p99.9").unwrap() - 0.999).abs() < 1e-9);
        assert_eq!(parse_percentile("90"), None);
        assert_eq!(parse_percentile("p120"), None);
    }

    #[test]
    fn toml_snapshot_applies_defaults() {
        let raw = r#"
            [services.orders]
            endpoint = { kind = "simple", host = "orders", port = 8080 }
            strategy = "bulkhead"

            [services.orders.apis.list]
            method = "GET"
            path = "/orders"
            timeout_ms = 400
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();

        let service = &config.services["orders"];
        assert_eq!(service.strategy, StrategyKind::Bulkhead);
        assert_eq!(service.pool.max_concurrency, 10);
        assert_eq!(service.apis["list"].timeout_ms, Some(400));
        assert_eq!(config.metrics.percentiles, vec!["p90", "p99"]);
    }
}
