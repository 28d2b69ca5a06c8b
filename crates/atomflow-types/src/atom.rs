//! Per-atom outcome types.
//!
//! An atom body either returns a JSON value or an [`AtomFailure`]. The engine
//! wraps the final outcome of each atom in an [`AtomResult`], which carries the
//! terminal [`AtomStatus`] and, on failure, an [`AtomError`] descriptor.
//! Per-atom errors are data in the execution report, never control flow.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// AtomFailure
// ---------------------------------------------------------------------------

/// A failure returned by an atom body.
///
/// `kind` is a short machine-readable classifier matched against a retry
/// policy's retryable kinds; `message` is for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AtomFailure {
    pub kind: String,
    pub message: String,
}

impl AtomFailure {
    /// Kind recorded when an atom body panics.
    pub const PANIC: &'static str = "panic";
    /// Kind recorded when an attempt exceeds its per-attempt timeout.
    pub const TIMEOUT: &'static str = "timeout";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// A failure captured from a panicking body.
    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(Self::PANIC, message)
    }

    /// A failure for an attempt that ran longer than `timeout_ms`.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(Self::TIMEOUT, format!("attempt exceeded {timeout_ms}ms"))
    }
}

impl From<std::io::Error> for AtomFailure {
    fn from(err: std::io::Error) -> Self {
        Self::new("io", err.to_string())
    }
}

impl From<serde_json::Error> for AtomFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new("serde", err.to_string())
    }
}

// ---------------------------------------------------------------------------
// AtomError
// ---------------------------------------------------------------------------

/// Why an atom has no value in an execution report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AtomError {
    /// The body failed with a non-retryable failure, or under a
    /// single-attempt policy.
    #[error("atom failed after {attempts} attempt(s): {failure}")]
    Execution { failure: AtomFailure, attempts: u32 },

    /// Every attempt allowed by a retrying policy failed.
    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetryExhausted { attempts: u32, last: AtomFailure },

    /// A dependency did not produce a value, so the body was never invoked.
    #[error("skipped because dependency '{dependency}' did not succeed")]
    SkippedDueToDependencyFailure { dependency: String },

    /// The execution was cancelled before this atom finished.
    #[error("execution cancelled")]
    Cancelled,
}

impl AtomError {
    /// Number of body invocations behind this error (0 for skips and
    /// cancellations).
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Execution { attempts, .. } | Self::RetryExhausted { attempts, .. } => *attempts,
            Self::SkippedDueToDependencyFailure { .. } | Self::Cancelled => 0,
        }
    }

    /// The underlying body failure, if the body ran.
    pub fn failure(&self) -> Option<&AtomFailure> {
        match self {
            Self::Execution { failure, .. } => Some(failure),
            Self::RetryExhausted { last, .. } => Some(last),
            Self::SkippedDueToDependencyFailure { .. } | Self::Cancelled => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AtomStatus
// ---------------------------------------------------------------------------

/// Terminal state of an atom within one `execute` call.
///
/// `Pending -> {CacheHit, Running} -> {Succeeded, Failed, Skipped}`; the
/// transient states are never reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomStatus {
    /// Reused a cached outcome (which may itself be a cached failure).
    CacheHit,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl AtomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AtomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AtomResult
// ---------------------------------------------------------------------------

/// The result of one atom in one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomResult {
    pub status: AtomStatus,
    /// Raw value on success, error descriptor otherwise.
    pub outcome: Result<Value, AtomError>,
    /// Hex fingerprint the outcome is cached under. Absent for skipped atoms
    /// and atoms cancelled before they started.
    pub fingerprint: Option<String>,
    /// Body invocations made in this call (0 for cache hits).
    pub attempts: u32,
    pub duration_ms: u64,
}

impl AtomResult {
    /// A dependency failed; the body was not invoked.
    pub fn skipped(dependency: impl Into<String>) -> Self {
        Self {
            status: AtomStatus::Skipped,
            outcome: Err(AtomError::SkippedDueToDependencyFailure {
                dependency: dependency.into(),
            }),
            fingerprint: None,
            attempts: 0,
            duration_ms: 0,
        }
    }

    pub fn cancelled(fingerprint: Option<String>, attempts: u32, duration_ms: u64) -> Self {
        Self {
            status: AtomStatus::Cancelled,
            outcome: Err(AtomError::Cancelled),
            fingerprint,
            attempts,
            duration_ms,
        }
    }

    /// The value produced by the atom, if it succeeded (or hit a cached
    /// success).
    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AtomError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Whether the body ran during this call.
    pub fn was_executed(&self) -> bool {
        matches!(self.status, AtomStatus::Succeeded | AtomStatus::Failed)
    }
}
