//! Cache types: fingerprints and cache entries.
//!
//! A [`Fingerprint`] is derived from an atom's identity, the content of its
//! resolved inputs, and its invalidation salt. A [`CacheEntry`] maps a
//! fingerprint to the outcome of the invocation that produced it. Entries are
//! superseded when an atom's fingerprint changes, never mutated in place.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atom::AtomError;

/// Hex-encoded cache key for one atom invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for log lines and tables.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The stored outcome of an atom invocation.
///
/// Failures are cached too, so an unchanged input does not silently
/// re-attempt a deterministic failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedOutcome {
    Success { value: Value },
    Failure { error: AtomError },
}

impl CachedOutcome {
    pub fn from_result(result: &Result<Value, AtomError>) -> Self {
        match result {
            Ok(value) => Self::Success {
                value: value.clone(),
            },
            Err(error) => Self::Failure {
                error: error.clone(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn into_result(self) -> Result<Value, AtomError> {
        match self {
            Self::Success { value } => Ok(value),
            Self::Failure { error } => Err(error),
        }
    }
}

/// A cached atom outcome keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    /// Name of the atom that produced the entry.
    pub atom: String,
    pub outcome: CachedOutcome,
    /// Attempts the producing invocation needed.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        fingerprint: Fingerprint,
        atom: impl Into<String>,
        outcome: CachedOutcome,
        attempts: u32,
    ) -> Self {
        Self {
            fingerprint,
            atom: atom.into(),
            outcome,
            attempts,
            created_at: Utc::now(),
        }
    }
}

/// Per-atom summary of a durable cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub atom: String,
    pub entries: u64,
    /// Entries holding a cached failure.
    pub failures: u64,
    pub last_written: DateTime<Utc>,
}
