//! Engine configuration loader for Atomflow.
//!
//! Reads `atomflow.toml` and deserializes it into [`EngineConfig`]. Falls back
//! to defaults when the file is missing, malformed, or fails validation.

use std::path::{Path, PathBuf};

use atomflow_types::config::{CacheBackend, EngineConfig};

use crate::sqlite::pool::default_cache_path;

/// File name looked up in the working directory when no path is given.
pub const CONFIG_FILE_NAME: &str = "atomflow.toml";

/// Load engine configuration from `path`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse or validate, logs a warning and
///   returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    let config = match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match config.validate() {
        Ok(()) => config,
        Err(err) => {
            tracing::warn!("Invalid config in {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Resolve the SQLite cache file.
///
/// Priority:
/// 1. Explicit override (e.g. a `--cache` flag)
/// 2. `cache.path` from the config
/// 3. `~/.atomflow/cache.db` (or `$ATOMFLOW_DATA_DIR/cache.db`)
///
/// Returns `None` when the memory backend is configured and no override is
/// given.
pub fn resolve_cache_path(config: &EngineConfig, override_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return Some(path.to_path_buf());
    }
    match config.cache.backend {
        CacheBackend::Memory => None,
        CacheBackend::Sqlite => Some(
            config
                .cache
                .path
                .clone()
                .unwrap_or_else(default_cache_path),
        ),
    }
}
