//! Degrade factors per pool key
//!
//! An operator signal shrinks a pool's effective size and timeout without
//! touching its configuration. Strategies read the factor when a command is
//! built; they never write it.

use dashmap::DashMap;
use tracing::info;

use bulwark_domain::GatewayError;

/// Process-wide table of `pool_key -> multiplier in (0, 1]`
#[derive(Debug, Default)]
pub struct DegradeRegistry {
    factors: DashMap<String, f64>,
}

impl DegradeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the factor for `pool_key`
    pub fn set(&self, pool_key: impl Into<String>, factor: f64) -> Result<(), GatewayError> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(GatewayError::InvalidInput(format!(
                "degrade factor must be in (0, 1], got {factor}"
            )));
        }
        let pool_key = pool_key.into();
        info!(pool_key = %pool_key, factor, "Degrade factor applied");
        self.factors.insert(pool_key, factor);
        Ok(())
    }

    /// Drop the factor for `pool_key`; returns the removed value
    pub fn remove(&self, pool_key: &str) -> Option<f64> {
        let removed = self.factors.remove(pool_key).map(|(_, factor)| factor);
        if removed.is_some() {
            info!(pool_key, "Degrade factor removed");
        }
        removed
    }

    /// Factor for `pool_key`; 1.0 when none is set
    pub fn factor(&self, pool_key: &str) -> f64 {
        self.factors.get(pool_key).map_or(1.0, |entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

/// `floor(value * factor)`, never below 1
pub fn degrade_size(value: usize, factor: f64) -> usize {
    ((value as f64 * factor).floor() as usize).max(1)
}

/// `floor(value * factor)` milliseconds, never below 1
pub fn degrade_millis(value: u64, factor: f64) -> u64 {
    ((value as f64 * factor).floor() as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_means_no_degrade() {
        let registry = DegradeRegistry::new();
        assert_eq!(registry.factor("orders-list"), 1.0);
        assert!(registry.is_empty());
    }

    #[test]
    fn set_and_remove_round_trip() {
        let registry = DegradeRegistry::new();
        registry.set("orders-list", 0.5).unwrap();
        assert_eq!(degrade_size(10, registry.factor("orders-list")), 5);
        assert_eq!(degrade_millis(1000, registry.factor("orders-list")), 500);

        assert_eq!(registry.remove("orders-list"), Some(0.5));
        assert_eq!(degrade_size(10, registry.factor("orders-list")), 10);
        assert_eq!(registry.remove("orders-list"), None);
    }

    #[test]
    fn out_of_range_factor_is_refused() {
        let registry = DegradeRegistry::new();
        assert!(registry.set("k", 0.0).is_err());
        assert!(registry.set("k", 1.5).is_err());
        assert!(registry.set("k", f64::NAN).is_err());
        assert!(registry.set("k", 1.0).is_ok());
    }

    #[test]
    fn degraded_size_never_reaches_zero() {
        assert_eq!(degrade_size(1, 0.1), 1);
        assert_eq!(degrade_millis(5, 0.01), 1);
    }
}
