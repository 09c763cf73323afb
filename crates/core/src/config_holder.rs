//! Live configuration holder
//!
//! Readers take an `Arc` to the current snapshot and keep using it for as
//! long as they need; a publish swaps the pointer and never mutates a
//! snapshot in place. The lock is held only for the pointer copy or swap.

use std::sync::Arc;

use bulwark_domain::{ConfigError, GatewayConfig};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::info;

/// One published configuration generation
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub config: GatewayConfig,
    pub generation: u64,
    /// SHA-256 over the canonical JSON form, hex encoded
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// SHA-256 of the canonical serialized form.
///
/// Every map in the snapshot is a `BTreeMap`, so serialization order is
/// stable and equal configurations hash equally.
pub fn content_hash(config: &GatewayConfig) -> Result<String, ConfigError> {
    let canonical = serde_json::to_vec(config).map_err(|e| ConfigError::Parse {
        format: "json".to_owned(),
        message: e.to_string(),
    })?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Atomically swappable holder of the live snapshot
#[derive(Debug)]
pub struct ConfigHolder {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigHolder {
    /// Validate and publish `config` as generation 1
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let content_hash = content_hash(&config)?;
        Ok(Self {
            current: RwLock::new(Arc::new(ConfigSnapshot {
                config,
                generation: 1,
                content_hash,
                updated_at: Utc::now(),
            })),
        })
    }

    /// The snapshot every reader should resolve from
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&*self.current.read())
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Validate and publish a new snapshot with the next generation.
    ///
    /// Invalid configurations are refused and the live snapshot is kept.
    pub fn set(&self, config: GatewayConfig) -> Result<Arc<ConfigSnapshot>, ConfigError> {
        config.validate()?;
        let content_hash = content_hash(&config)?;

        let mut current = self.current.write();
        let snapshot = Arc::new(ConfigSnapshot {
            config,
            generation: current.generation + 1,
            content_hash,
            updated_at: Utc::now(),
        });
        *current = Arc::clone(&snapshot);
        drop(current);

        info!(
            generation = snapshot.generation,
            hash = %snapshot.content_hash,
            "Published configuration snapshot"
        );
        Ok(snapshot)
    }

    /// Publish only when the content differs from the live snapshot.
    ///
    /// Returns `None` when the hash is unchanged.
    pub fn set_if_changed(
        &self,
        config: GatewayConfig,
    ) -> Result<Option<Arc<ConfigSnapshot>>, ConfigError> {
        let hash = content_hash(&config)?;
        if hash == self.current.read().content_hash {
            return Ok(None);
        }
        self.set(config).map(Some)
    }

    /// Apply `edit` to the live configuration and publish the result if it
    /// changed. The read-modify-write holds the write lock, so concurrent
    /// writers cannot lose each other's edits.
    pub fn update<F>(&self, edit: F) -> Result<Option<Arc<ConfigSnapshot>>, ConfigError>
    where
        F: FnOnce(&mut GatewayConfig),
    {
        let mut current = self.current.write();
        let mut config = current.config.clone();
        edit(&mut config);

        let hash = content_hash(&config)?;
        if hash == current.content_hash {
            return Ok(None);
        }
        config.validate()?;

        let snapshot = Arc::new(ConfigSnapshot {
            config,
            generation: current.generation + 1,
            content_hash: hash,
            updated_at: Utc::now(),
        });
        *current = Arc::clone(&snapshot);
        drop(current);

        info!(
            generation = snapshot.generation,
            hash = %snapshot.content_hash,
            "Published edited configuration snapshot"
        );
        Ok(Some(snapshot))
    }
}
