//! Engine configuration types.
//!
//! `EngineConfig` represents the `atomflow.toml` file that controls
//! scheduling concurrency, the default retry policy, and the cache backend.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::retry::RetryPolicy;

/// Top-level configuration for a workflow engine.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of atoms running at once. `1` executes strictly in
    /// topological order.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Policy used by atoms that declare none.
    #[serde(default)]
    pub default_retry: RetryPolicy,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration with sequential execution.
    pub fn sequential() -> Self {
        Self {
            max_concurrency: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrency == 0 {
            return Err(EngineError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        self.default_retry.validate()
    }
}

/// Where cached atom outcomes live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Database file for the SQLite backend. Defaults to
    /// `~/.atomflow/cache.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// Process-local map; nothing survives the process.
    #[default]
    Memory,
    /// Durable SQLite database.
    Sqlite,
}
