//! Configuration loader
//!
//! Loads the gateway configuration from a TOML or JSON file, applies
//! environment overrides and validates the result. Any failure is fatal at
//! startup.
//!
//! ## Environment Variables
//! - `BULWARK_CONFIG_PATH`: explicit config file path
//! - `BULWARK_OPTIMIZER_ENABLED`: overrides `optimizer.enabled` (true/false)
//! - `BULWARK_MAILBOX_TTL_SECONDS`: overrides `mailbox.ttl_seconds`
//!
//! ## File Locations
//! Without `BULWARK_CONFIG_PATH` the loader probes, in order:
//! 1. `./bulwark.toml`
//! 2. `./bulwark.json`
//! 3. `./config/bulwark.toml`

use std::path::{Path, PathBuf};

use bulwark_domain::{ConfigError, GatewayConfig};

pub const CONFIG_PATH_ENV: &str = "BULWARK_CONFIG_PATH";
pub const OPTIMIZER_ENABLED_ENV: &str = "BULWARK_OPTIMIZER_ENABLED";
pub const MAILBOX_TTL_ENV: &str = "BULWARK_MAILBOX_TTL_SECONDS";

const PROBED_PATHS: [&str; 3] = ["bulwark.toml", "bulwark.json", "config/bulwark.toml"];

/// Load configuration from `BULWARK_CONFIG_PATH` or the probed locations
///
/// # Errors
/// Returns `ConfigError` if no file is found, the file cannot be read or
/// parsed, an override is malformed, or validation fails.
pub fn load() -> Result<GatewayConfig, ConfigError> {
    let explicit = std::env::var(CONFIG_PATH_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);
    load_from_file(explicit)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected
/// by extension.
///
/// # Errors
/// Returns `ConfigError::NotFound` when nothing matches, otherwise the
/// first read, parse, override or validation failure.
pub fn load_from_file(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound { searched: p.display().to_string() });
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| ConfigError::NotFound {
            searched: PROBED_PATHS.join(", "),
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
        path: config_path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut config = parse_config(&contents, &config_path)?;
    apply_env_overrides(&mut config)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// `path` only selects the format (`.toml` or `.json`, JSON when absent).
///
/// # Errors
/// Returns `ConfigError::Parse` if the format is unsupported or the content
/// does not deserialize.
pub fn parse_config(contents: &str, path: &Path) -> Result<GatewayConfig, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "toml".to_owned(), message: e.to_string() }),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "json".to_owned(), message: e.to_string() }),
        other => Err(ConfigError::Parse {
            format: other.to_owned(),
            message: "unsupported config format".to_owned(),
        }),
    }
}

/// Probe the standard locations relative to the working directory
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let found = PROBED_PATHS.iter().map(|p| cwd.join(p)).find(|p| p.exists());

    if let Some(path) = &found {
        tracing::debug!(path = %path.display(), "Found config file");
    }
    found
}

/// Apply `BULWARK_*` overrides from the process environment
///
/// # Errors
/// Returns `ConfigError::Invalid` when an override value does not parse.
pub fn apply_env_overrides(config: &mut GatewayConfig) -> Result<(), ConfigError> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

/// Apply overrides read through `lookup`
///
/// # Errors
/// Returns `ConfigError::Invalid` when an override value does not parse.
pub fn apply_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(OPTIMIZER_ENABLED_ENV) {
        config.optimizer.enabled = parse_bool(&raw).ok_or_else(|| {
            ConfigError::invalid("optimizer.enabled", format!("expected true/false, got {raw}"))
        })?;
    }

    if let Some(raw) = lookup(MAILBOX_TTL_ENV) {
        config.mailbox.ttl_seconds = raw.trim().parse::<u64>().map_err(|e| {
            ConfigError::invalid("mailbox.ttl_seconds", format!("invalid value {raw}: {e}"))
        })?;
    }

    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = GatewayConfig::default();
        apply_overrides(
            &mut config,
            lookup(&[(OPTIMIZER_ENABLED_ENV, "false"), (MAILBOX_TTL_ENV, "60")]),
        )
        .unwrap();

        assert!(!config.optimizer.enabled);
        assert_eq!(config.mailbox.ttl_seconds, 60);
    }

    #[test]
    fn malformed_override_is_rejected() {
        let mut config = GatewayConfig::default();
        let err = apply_overrides(&mut config, lookup(&[(MAILBOX_TTL_ENV, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "mailbox.ttl_seconds"));
    }

    #[test]
    fn unknown_extension_is_a_parse_error() {
        let err = parse_config("", Path::new("gateway.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref format, .. } if format == "yaml"));
    }
}
