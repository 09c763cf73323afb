//! Periodic and pushed configuration refresh
//!
//! A refresher remembers the content hash of the last snapshot its source
//! produced. Only a change at the source is published, so optimizer tuning
//! applied to the live snapshot survives refreshes of an unchanged file.
//! A changed source replaces the live snapshot wholesale.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bulwark_core::{content_hash, ConfigHolder};
use bulwark_domain::{ConfigError, GatewayConfig};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::loader::{apply_env_overrides, parse_config};

/// Somewhere a complete configuration can be fetched from
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<GatewayConfig, ConfigError>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// Re-reads one file on every fetch
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn fetch(&self) -> Result<GatewayConfig, ConfigError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| ConfigError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config = parse_config(&contents, &self.path)?;
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Result of one refresh attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Unchanged,
    Published { generation: u64 },
    /// The fetched configuration was unusable; the live snapshot stays
    Rejected(ConfigError),
}

pub struct ConfigRefresher {
    source: Arc<dyn ConfigSource>,
    holder: Arc<ConfigHolder>,
    last_hash: Mutex<Option<String>>,
}

impl ConfigRefresher {
    /// Seeds the last-seen hash from the live snapshot, which is normally
    /// what the source produced at startup.
    pub fn new(source: Arc<dyn ConfigSource>, holder: Arc<ConfigHolder>) -> Self {
        let seed = holder.current().content_hash.clone();
        Self { source, holder, last_hash: Mutex::new(Some(seed)) }
    }

    pub fn holder(&self) -> &Arc<ConfigHolder> {
        &self.holder
    }

    /// Fetch from the source and publish when its content changed
    #[instrument(skip(self), fields(source = %self.source.describe()))]
    pub async fn refresh(&self) -> RefreshOutcome {
        let config = match self.source.fetch().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Configuration fetch failed, keeping live snapshot");
                return RefreshOutcome::Rejected(e);
            }
        };

        let hash = match content_hash(&config) {
            Ok(hash) => hash,
            Err(e) => return RefreshOutcome::Rejected(e),
        };
        if self.last_hash.lock().as_deref() == Some(hash.as_str()) {
            debug!("Configuration source unchanged");
            return RefreshOutcome::Unchanged;
        }

        // Remember the hash even when validation fails so a broken file is
        // reported once per edit rather than on every tick.
        *self.last_hash.lock() = Some(hash);

        match self.holder.set(config) {
            Ok(snapshot) => {
                info!(generation = snapshot.generation, "Published refreshed configuration");
                RefreshOutcome::Published { generation: snapshot.generation }
            }
            Err(e) => {
                warn!(error = %e, "Refreshed configuration is invalid, keeping live snapshot");
                RefreshOutcome::Rejected(e)
            }
        }
    }

    /// Publish an externally pushed configuration
    ///
    /// # Errors
    /// Returns the validation error; the live snapshot is left untouched.
    #[instrument(skip(self, config))]
    pub fn push(&self, config: GatewayConfig) -> Result<RefreshOutcome, ConfigError> {
        match self.holder.set_if_changed(config)? {
            Some(snapshot) => {
                info!(generation = snapshot.generation, "Published pushed configuration");
                Ok(RefreshOutcome::Published { generation: snapshot.generation })
            }
            None => Ok(RefreshOutcome::Unchanged),
        }
    }
}
