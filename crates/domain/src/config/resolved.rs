//! Flattened per-command view of one service/API pair

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::service::{
    AdmissionSettings, CircuitSettings, EndpointSpec, PoolSettings, RetrySettings, StrategyKind,
};
use super::GatewayConfig;
use crate::errors::ExecutionError;
use crate::types::HttpMethod;

/// Whether a pool key names one API or a shared pool group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolScope {
    Api,
    Pool,
}

impl PoolScope {
    /// Segment used in runtime gauge names
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Pool => "pool",
        }
    }
}

/// Everything a command needs, taken from exactly one snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedApi {
    pub generation: u64,
    pub service: String,
    pub api: String,
    pub method: HttpMethod,
    pub path: String,
    pub endpoint: EndpointSpec,
    pub strategy: StrategyKind,
    /// Unit of isolation, metric emission and degrade lookup
    pub pool_key: String,
    pub pool_scope: PoolScope,
    /// API name or pool group name, depending on `pool_scope`
    pub scope_name: String,
    pub pool: PoolSettings,
    pub circuit: CircuitSettings,
    pub retry: Option<RetrySettings>,
    pub admission: Option<AdmissionSettings>,
    pub admission_resource: String,
    pub acceptable_status: Option<Vec<u16>>,
}

impl ResolvedApi {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.pool.timeout_ms)
    }

    /// Any 2xx when no explicit list is configured
    pub fn is_acceptable(&self, status: u16) -> bool {
        match &self.acceptable_status {
            Some(accepted) => accepted.contains(&status),
            None => (200..300).contains(&status),
        }
    }
}

impl GatewayConfig {
    /// Flatten `service`/`api` into a [`ResolvedApi`] tagged with `generation`.
    ///
    /// API-level values win over service-level ones.
    pub fn resolve(
        &self,
        service_name: &str,
        api_name: &str,
        generation: u64,
    ) -> Result<ResolvedApi, ExecutionError> {
        let unknown = || ExecutionError::UnknownRoute {
            service: service_name.to_owned(),
            api: api_name.to_owned(),
        };
        let service = self.services.get(service_name).ok_or_else(unknown)?;
        let api = service.apis.get(api_name).ok_or_else(unknown)?;

        let (pool_key, pool_scope, scope_name) =
            match api.pool_group.as_ref().or(service.pool_group.as_ref()) {
                Some(group) => (group.clone(), PoolScope::Pool, group.clone()),
                None => (format!("{service_name}-{api_name}"), PoolScope::Api, api_name.to_owned()),
            };

        let admission = api.admission.clone().or_else(|| service.admission.clone());
        let admission_resource = api
            .admission
            .as_ref()
            .and_then(|rule| rule.resource.clone())
            .or_else(|| service.admission.as_ref().and_then(|rule| rule.resource.clone()))
            .unwrap_or_else(|| api_name.to_owned());

        Ok(ResolvedApi {
            generation,
            service: service_name.to_owned(),
            api: api_name.to_owned(),
            method: api.method,
            path: api.path.clone(),
            endpoint: service.endpoint.clone(),
            strategy: api.strategy.unwrap_or(service.strategy),
            pool_key,
            pool_scope,
            scope_name,
            pool: api.merged_pool(&service.pool),
            circuit: service.circuit.clone(),
            retry: api.retry.clone().or_else(|| service.retry.clone()),
            admission,
            admission_resource,
            acceptable_status: api
                .acceptable_status
                .clone()
                .or_else(|| service.acceptable_status.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, ServiceConfig};

    fn config() -> GatewayConfig {
        let service = ServiceConfig {
            pool_group: None,
            admission: Some(AdmissionSettings {
                resource: Some("orders-shared".into()),
                ..AdmissionSettings::default()
            }),
            ..ServiceConfig::new(EndpointSpec::Discovery { service_id: "orders".into() })
        }
        .with_api("list", ApiConfig::new(HttpMethod::Get, "/orders"))
        .with_api(
            "create",
            ApiConfig {
                pool_group: Some("writes".into()),
                acceptable_status: Some(vec![201]),
                admission: Some(AdmissionSettings {
                    resource: Some("orders-create".into()),
                    ..AdmissionSettings::default()
                }),
                ..ApiConfig::new(HttpMethod::Post, "/orders")
            },
        );
        GatewayConfig::default().with_service("orders", service)
    }

    #[test]
    fn pool_key_defaults_to_service_api() {
        let resolved = config().resolve("orders", "list", 7).unwrap();
        assert_eq!(resolved.pool_key, "orders-list");
        assert_eq!(resolved.pool_scope, PoolScope::Api);
        assert_eq!(resolved.scope_name, "list");
        assert_eq!(resolved.generation, 7);
        assert!(resolved.is_acceptable(204));
        assert!(!resolved.is_acceptable(503));
    }

    #[test]
    fn pool_group_overrides_key() {
        let resolved = config().resolve("orders", "create", 1).unwrap();
        assert_eq!(resolved.pool_key, "writes");
        assert_eq!(resolved.pool_scope, PoolScope::Pool);
        assert!(resolved.is_acceptable(201));
        assert!(!resolved.is_acceptable(200));
    }

    #[test]
    fn admission_resource_priority() {
        let config = config();
        assert_eq!(config.resolve("orders", "create", 1).unwrap().admission_resource, "orders-create");
        assert_eq!(config.resolve("orders", "list", 1).unwrap().admission_resource, "orders-shared");

        let mut bare = config.clone();
        if let Some(service) = bare.services.get_mut("orders") {
            service.admission = None;
        }
        assert_eq!(bare.resolve("orders", "list", 1).unwrap().admission_resource, "list");
    }

    #[test]
    fn unknown_route() {
        let err = config().resolve("orders", "missing", 1).unwrap_err();
        assert_eq!(err.fast_fail_status(), 404);
        assert!(config().resolve("billing", "list", 1).is_err());
    }
}
