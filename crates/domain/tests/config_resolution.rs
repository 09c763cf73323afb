//! Loading a full snapshot through the public API and resolving commands from it

use bulwark_domain::{
    BackoffKind, ConfigError, ControlBehaviorKind, EndpointSpec, GatewayConfig, HttpMethod,
    PoolScope, StrategyKind,
};

const SNAPSHOT: &str = r#"
{
  "services": {
    "orders": {
      "endpoint": { "kind": "simple", "scheme": "https", "host": "orders.internal", "port": 8443 },
      "strategy": "pool_isolation",
      "pool": { "core_size": 4, "max_size": 8, "queue_size": 2, "timeout_ms": 800 },
      "retry": { "max_attempts": 3, "backoff": "exponential", "base_delay_ms": 50, "max_delay_ms": 10000 },
      "apis": {
        "get": { "method": "GET", "path": "/orders/{id}" },
        "create": { "method": "POST", "path": "/orders", "timeout_ms": 1500, "retry": { "max_attempts": 1, "backoff": "no_wait" } }
      }
    },
    "search": {
      "endpoint": { "kind": "discovery", "service_id": "search-v3" },
      "strategy": "admission_control",
      "admission": { "grade": "qps", "threshold": 50, "behavior": "rate_limiter", "max_queue_wait_ms": 200 },
      "pool_group": "search-shared",
      "apis": {
        "query": { "method": "GET", "path": "/search" }
      }
    }
  },
  "optimizer": { "bandwidth": 1.5, "min_samples": 5 }
}
"#;

#[test]
fn json_snapshot_resolves_per_api() {
    let config: GatewayConfig = serde_json::from_str(SNAPSHOT).unwrap();
    config.validate().unwrap();

    let get = config.resolve("orders", "get", 3).unwrap();
    assert_eq!(get.method, HttpMethod::Get);
    assert_eq!(get.pool.max_size, 8);
    assert_eq!(get.pool.timeout_ms, 800);
    assert_eq!(get.retry.as_ref().map(|r| r.backoff), Some(BackoffKind::Exponential));
    assert!(matches!(get.endpoint, EndpointSpec::Simple { port: 8443, .. }));

    let create = config.resolve("orders", "create", 3).unwrap();
    assert_eq!(create.pool.timeout_ms, 1500);
    assert_eq!(create.retry.as_ref().map(|r| r.max_attempts), Some(1));

    let query = config.resolve("search", "query", 3).unwrap();
    assert_eq!(query.strategy, StrategyKind::AdmissionControl);
    assert_eq!(query.pool_scope, PoolScope::Pool);
    assert_eq!(query.pool_key, "search-shared");
    assert_eq!(query.admission_resource, "query");
    assert_eq!(
        query.admission.as_ref().map(|rule| rule.behavior),
        Some(ControlBehaviorKind::RateLimiter)
    );

    assert_eq!(config.optimizer.bandwidth, 1.5);
    assert_eq!(config.optimizer.max_utilization, 0.85);
}

#[test]
fn unknown_method_fails_to_parse() {
    let raw = SNAPSHOT.replace(r#""method": "POST""#, r#""method": "BREW""#);
    assert!(serde_json::from_str::<GatewayConfig>(&raw).is_err());
}

#[test]
fn zero_retry_attempts_is_a_config_error() {
    let raw = SNAPSHOT.replace(r#""max_attempts": 1"#, r#""max_attempts": 0"#);
    let config: GatewayConfig = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        config.validate(),
        Err(ConfigError::Invalid {
            field: "services.orders.apis.create.retry".into(),
            message: "max_attempts must be at least 1".into(),
        })
    );
}
