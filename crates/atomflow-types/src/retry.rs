//! Retry policy configuration.
//!
//! A [`RetryPolicy`] bounds how often an atom body is invoked, how long to
//! wait between attempts, which failure kinds are worth retrying, and how long
//! a single attempt may run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry configuration for an atom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts.
    #[serde(default)]
    pub backoff: Backoff,
    /// Failure kinds that are retried.
    #[serde(default)]
    pub retry_on: RetryOn,
    /// Per-attempt timeout in milliseconds. `None` lets an attempt run
    /// indefinitely.
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
            retry_on: RetryOn::default(),
            attempt_timeout_ms: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that invokes the body exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
            retry_on: RetryOn::All,
            attempt_timeout_ms: None,
        }
    }

    /// `max_attempts` attempts with no delay between them.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Attempt budget, never below one.
    pub fn attempt_limit(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    /// Whether a failure of `kind` may be retried under this policy.
    pub fn is_retryable(&self, kind: &str) -> bool {
        self.retry_on.matches(kind)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    /// Reject policies that can never run a body.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry policy max_attempts must be at least 1".to_string(),
            ));
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(EngineError::Config(
                "retry policy attempt_timeout_ms must be positive".to_string(),
            ));
        }
        if let Backoff::Exponential { multiplier, .. } = self.backoff {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(EngineError::Config(format!(
                    "exponential backoff multiplier must be >= 1.0, got {multiplier}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Wait strategy between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait the same delay after every failed attempt.
    Fixed { delay_ms: u64 },
    /// `initial_ms * multiplier^(attempt - 1)`, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        max_ms: u64,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            initial_ms: 100,
            multiplier: default_multiplier(),
            max_ms: 5_000,
        }
    }
}

impl Backoff {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let raw = (*initial_ms as f64) * multiplier.powi(exponent);
                let capped = raw.min(*max_ms as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RetryOn
// ---------------------------------------------------------------------------

/// Which failure kinds a policy retries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Every failure kind.
    #[default]
    All,
    /// Only the listed kinds.
    Only(Vec<String>),
    /// Every kind except the listed ones.
    Except(Vec<String>),
}

impl RetryOn {
    pub fn matches(&self, kind: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(kinds) => kinds.iter().any(|k| k == kind),
            Self::Except(kinds) => !kinds.iter().any(|k| k == kind),
        }
    }
}
