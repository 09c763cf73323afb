//! Configuration loading and refresh
//!
//! Startup loading from files and environment, and periodic or pushed
//! republishing into the live `ConfigHolder`.

pub mod loader;
pub mod refresh;

// Re-export commonly used items
pub use loader::{apply_env_overrides, load, load_from_file, parse_config, probe_config_paths};
pub use refresh::{ConfigRefresher, ConfigSource, FileConfigSource, RefreshOutcome};
