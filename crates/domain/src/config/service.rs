//! Per-service and per-API configuration records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::HttpMethod;

// ============================================================================
// Endpoint and strategy selection
// ============================================================================

/// Where a service lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndpointSpec {
    /// Fixed address
    Simple {
        #[serde(default = "default_scheme")]
        scheme: String,
        host: String,
        port: u16,
    },
    /// Looked up by logical id through a discovery resolver
    Discovery { service_id: String },
}

fn default_scheme() -> String {
    "http".to_owned()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    PoolIsolation,
    Bulkhead,
    AdmissionControl,
}

crate::impl_domain_status_conversions!(StrategyKind {
    PoolIsolation => "pool_isolation",
    Bulkhead => "bulkhead",
    AdmissionControl => "admission_control",
});

// ============================================================================
// Isolation sizing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub core_size: usize,
    pub max_size: usize,
    pub queue_size: usize,
    /// Deadline for one downstream attempt
    pub timeout_ms: u64,
    /// Bulkhead permit count
    pub max_concurrency: usize,
    /// Longest wait for a bulkhead permit
    pub max_wait_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            core_size: 10,
            max_size: 10,
            queue_size: 5,
            timeout_ms: 1000,
            max_concurrency: 10,
            max_wait_ms: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    pub failure_rate_threshold: f64,
    pub minimum_calls: u32,
    pub window_ms: u64,
    pub open_duration_ms: u64,
    pub half_open_max_calls: u32,
    /// Count unacceptable statuses as circuit failures
    pub trip_on_business_error: bool,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_calls: 20,
            window_ms: 10_000,
            open_duration_ms: 5_000,
            half_open_max_calls: 3,
            trip_on_business_error: false,
        }
    }
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
    Incremental,
    Fibonacci,
    NoWait,
}

/// Retry shape for one API. Hashable so identical shapes share a retryer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total downstream attempts, including the first
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
    /// Step added per retry by the incremental shape
    pub increment_ms: u64,
    /// Cap on a single delay
    pub max_delay_ms: u64,
    /// Budget across all attempts and delays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_ms: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            base_delay_ms: 100,
            increment_ms: 100,
            max_delay_ms: 10_000,
            max_total_ms: None,
        }
    }
}

// ============================================================================
// Admission control
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionGradeKind {
    #[default]
    Qps,
    Concurrency,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlBehaviorKind {
    #[default]
    Direct,
    WarmUp,
    RateLimiter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Resource key the rule is evaluated against; falls back to the
    /// service rule's resource, then to the API name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub grade: AdmissionGradeKind,
    pub threshold: f64,
    pub behavior: ControlBehaviorKind,
    pub warm_up_period_ms: u64,
    pub cold_factor: u32,
    pub max_queue_wait_ms: u64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            resource: None,
            grade: AdmissionGradeKind::Qps,
            threshold: 100.0,
            behavior: ControlBehaviorKind::Direct,
            warm_up_period_ms: 10_000,
            cold_factor: 3,
            max_queue_wait_ms: 500,
        }
    }
}

// ============================================================================
// Service and API records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub endpoint: EndpointSpec,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub circuit: CircuitSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission: Option<AdmissionSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_group: Option<String>,
    /// Statuses treated as success; any 2xx when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptable_status: Option<Vec<u16>>,
    #[serde(default)]
    pub apis: BTreeMap<String, ApiConfig>,
}

impl ServiceConfig {
    pub fn new(endpoint: EndpointSpec) -> Self {
        Self {
            endpoint,
            strategy: StrategyKind::default(),
            pool: PoolSettings::default(),
            circuit: CircuitSettings::default(),
            retry: None,
            admission: None,
            pool_group: None,
            acceptable_status: None,
            apis: BTreeMap::new(),
        }
    }

    pub fn with_api(mut self, name: impl Into<String>, api: ApiConfig) -> Self {
        self.apis.insert(name.into(), api);
        self
    }
}

/// One API of a service. Every `Option` field overrides the service value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub method: HttpMethod,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_wait_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admission: Option<AdmissionSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptable_status: Option<Vec<u16>>,
}

impl ApiConfig {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), ..Self::default() }
    }

    /// Pool settings with this API's overrides applied over `base`
    pub fn merged_pool(&self, base: &PoolSettings) -> PoolSettings {
        PoolSettings {
            core_size: self.core_size.unwrap_or(base.core_size),
            max_size: self.max_size.unwrap_or(base.max_size),
            queue_size: self.queue_size.unwrap_or(base.queue_size),
            timeout_ms: self.timeout_ms.unwrap_or(base.timeout_ms),
            max_concurrency: self.max_concurrency.unwrap_or(base.max_concurrency),
            max_wait_ms: self.max_wait_ms.unwrap_or(base.max_wait_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_overrides_win_over_service_pool() {
        let api = ApiConfig {
            max_size: Some(4),
            core_size: Some(2),
            timeout_ms: Some(250),
            ..ApiConfig::new(HttpMethod::Get, "/orders")
        };
        let merged = api.merged_pool(&PoolSettings::default());

        assert_eq!(merged.max_size, 4);
        assert_eq!(merged.core_size, 2);
        assert_eq!(merged.timeout_ms, 250);
        assert_eq!(merged.queue_size, 5);
        assert_eq!(merged.max_concurrency, 10);
    }

    #[test]
    fn endpoint_spec_is_tagged() {
        let simple: EndpointSpec =
            serde_json::from_str(r#"{"kind":"simple","host":"orders","port":8080}"#).unwrap();
        assert_eq!(
            simple,
            EndpointSpec::Simple { scheme: "http".into(), host: "orders".into(), port: 8080 }
        );

        let discovery: EndpointSpec =
            serde_json::from_str(r#"{"kind":"discovery","service_id":"orders-v2"}"#).unwrap();
        assert_eq!(discovery, EndpointSpec::Discovery { service_id: "orders-v2".into() });
    }
}
