//! Retry wiring for downstream attempts
//!
//! Each API's [`RetrySettings`] become a [`RetryExecutor`] that is built once
//! and shared by every command carrying identical settings.

use std::sync::Arc;
use std::time::Duration;

use bulwark_common::resilience::{
    BackoffStrategy, RetryConfig, RetryDecision, RetryExecutor, RetryPolicy,
};
use bulwark_common::ErrorClassification;
use bulwark_domain::{BackoffKind, ExecutionError, GatewayResponse, RetrySettings};
use moka::sync::Cache;

const RETRYER_CACHE_CAPACITY: u64 = 1_024;

/// Failure of a single downstream attempt
#[derive(Debug)]
pub enum AttemptError {
    /// The downstream answered with a status outside the acceptable set
    Unacceptable(GatewayResponse),
    Failed(ExecutionError),
}

impl AttemptError {
    pub fn into_cause(self) -> ExecutionError {
        match self {
            Self::Unacceptable(response) => {
                ExecutionError::UnacceptableStatus { status: response.status }
            }
            Self::Failed(error) => error,
        }
    }
}

/// Retries unacceptable statuses and transient failures; stops on everything
/// the isolation boundary produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptabilityPolicy;

impl RetryPolicy<AttemptError> for AcceptabilityPolicy {
    fn should_retry(&self, error: &AttemptError, _attempt: u32) -> RetryDecision {
        match error {
            AttemptError::Unacceptable(_) => RetryDecision::Retry,
            AttemptError::Failed(error) if error.is_retryable() => RetryDecision::Retry,
            AttemptError::Failed(_) => RetryDecision::Stop,
        }
    }
}

/// Map configured retry settings onto the executor's config
pub fn retry_config(settings: Option<&RetrySettings>) -> RetryConfig {
    let Some(settings) = settings else {
        return RetryConfig::no_retry();
    };
    let base_delay = Duration::from_millis(settings.base_delay_ms);
    let max_delay = Duration::from_millis(settings.max_delay_ms);
    let backoff = match settings.backoff {
        BackoffKind::Fixed => BackoffStrategy::Fixed { delay: base_delay },
        BackoffKind::Exponential => BackoffStrategy::Exponential { base_delay, max_delay },
        BackoffKind::Incremental => BackoffStrategy::Incremental {
            base_delay,
            increment: Duration::from_millis(settings.increment_ms),
            max_delay,
        },
        BackoffKind::Fibonacci => BackoffStrategy::Fibonacci { base_delay, max_delay },
        BackoffKind::NoWait => BackoffStrategy::NoWait,
    };
    RetryConfig {
        max_attempts: settings.max_attempts,
        backoff,
        max_total_time: settings.max_total_ms.map(Duration::from_millis),
    }
}

type RetryerKey = (String, String, Option<RetrySettings>);

/// Executors keyed by (service, api, retry settings)
#[derive(Clone)]
pub struct RetryerCache {
    retryers: Cache<RetryerKey, Arc<RetryExecutor<AcceptabilityPolicy>>>,
}

impl Default for RetryerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryerCache {
    pub fn new() -> Self {
        Self { retryers: Cache::new(RETRYER_CACHE_CAPACITY) }
    }

    /// Cached executor for `settings`, built on first use
    pub fn get(
        &self,
        service: &str,
        api: &str,
        settings: Option<&RetrySettings>,
    ) -> Result<Arc<RetryExecutor<AcceptabilityPolicy>>, ExecutionError> {
        let key = (service.to_string(), api.to_string(), settings.cloned());
        self.retryers
            .try_get_with(key, || {
                RetryExecutor::new(retry_config(settings), AcceptabilityPolicy).map(Arc::new)
            })
            .map_err(|e| ExecutionError::Internal(format!("invalid retry settings: {e}")))
    }

    pub fn len(&self) -> u64 {
        self.retryers.run_pending_tasks();
        self.retryers.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use bulwark_domain::TransportError;

    use super::*;

    fn settings(backoff: BackoffKind) -> RetrySettings {
        RetrySettings { max_attempts: 3, backoff, ..RetrySettings::default() }
    }

    #[test]
    fn identical_settings_share_one_executor() {
        let cache = RetryerCache::new();
        let exponential = settings(BackoffKind::Exponential);

        let first = cache.get("orders", "list", Some(&exponential)).unwrap();
        let second = cache.get("orders", "list", Some(&exponential.clone())).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let fixed = cache.get("orders", "list", Some(&settings(BackoffKind::Fixed))).unwrap();
        assert!(!Arc::ptr_eq(&first, &fixed));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn missing_settings_mean_single_attempt() {
        assert_eq!(retry_config(None).max_attempts, 1);
    }

    #[test]
    fn backoff_kinds_map_to_strategies() {
        let config = retry_config(Some(&settings(BackoffKind::Incremental)));
        assert!(matches!(config.backoff, BackoffStrategy::Incremental { .. }));
        let config = retry_config(Some(&settings(BackoffKind::NoWait)));
        assert_eq!(config.backoff, BackoffStrategy::NoWait);
    }

    #[test]
    fn policy_stops_on_rejections() {
        let policy = AcceptabilityPolicy;
        let unacceptable = AttemptError::Unacceptable(GatewayResponse::new(503, ""));
        assert_eq!(policy.should_retry(&unacceptable, 0), RetryDecision::Retry);

        let transport = AttemptError::Failed(TransportError::Connection("reset".into()).into());
        assert_eq!(policy.should_retry(&transport, 0), RetryDecision::Retry);

        let unavailable =
            AttemptError::Failed(ExecutionError::EndpointUnavailable { service: "orders".into() });
        assert_eq!(policy.should_retry(&unavailable, 0), RetryDecision::Stop);
    }
}
