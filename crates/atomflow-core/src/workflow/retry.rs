//! Retry executor for a single atom invocation.
//!
//! Stateless: every call takes the body, its inputs, and the policy as
//! parameters. Each attempt is guarded against panics (captured as a failure
//! of kind `panic`) and, if the policy sets one, a per-attempt timeout
//! (failure of kind `timeout`). Cancellation is observed both while a body
//! runs and while waiting out a backoff delay.
//!
//! A body attempt runs while holding an [`AttemptSlot`]; the slot's permit is
//! given back for the duration of each backoff delay so other atoms can run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use atomflow_types::atom::{AtomError, AtomFailure};
use atomflow_types::retry::RetryPolicy;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::registry::AtomFn;

// ---------------------------------------------------------------------------
// AttemptSlot
// ---------------------------------------------------------------------------

/// A concurrency permit that is held while a body runs and released while
/// the atom waits between attempts.
pub struct AttemptSlot {
    semaphore: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
}

impl AttemptSlot {
    /// Slot starting out with a permit already taken from `semaphore`.
    pub fn new(semaphore: Arc<Semaphore>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            semaphore,
            permit: Some(permit),
        }
    }

    /// Slot that never waits for anything else.
    pub fn unbounded() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            permit: None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }

    fn release(&mut self) {
        self.permit = None;
    }

    /// Take a permit unless one is already held. Returns `false` if the
    /// semaphore was closed.
    async fn acquire(&mut self) -> bool {
        if self.permit.is_some() {
            return true;
        }
        match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => {
                self.permit = Some(permit);
                true
            }
            Err(_) => false,
        }
    }
}

/// Final outcome of running an atom under a retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    pub result: Result<Value, AtomError>,
    /// Body invocations made (0 if cancelled before the first one).
    pub attempts: u32,
}

impl RetryOutcome {
    fn cancelled(attempts: u32) -> Self {
        Self {
            result: Err(AtomError::Cancelled),
            attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, Err(AtomError::Cancelled))
    }
}

// ---------------------------------------------------------------------------
// RetryExecutor
// ---------------------------------------------------------------------------

/// Stateless retry loop for atom bodies.
pub struct RetryExecutor;

impl RetryExecutor {
    /// Determine whether another attempt should follow a failure.
    ///
    /// `attempt` is 1-based (first execution is attempt 1).
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, failure: &AtomFailure) -> bool {
        attempt < policy.attempt_limit() && policy.is_retryable(&failure.kind)
    }

    /// Run `body` with `inputs` until it succeeds, a failure is not worth
    /// retrying, the attempt budget runs out, or `cancel` fires.
    ///
    /// Every attempt runs while `slot` holds a permit; the permit is released
    /// during backoff delays.
    pub async fn run(
        atom: &str,
        body: &AtomFn,
        inputs: Vec<Value>,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        slot: &mut AttemptSlot,
    ) -> RetryOutcome {
        let limit = policy.attempt_limit();
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome::cancelled(attempts);
            }
            let acquired = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RetryOutcome::cancelled(attempts),
                acquired = slot.acquire() => acquired,
            };
            if !acquired {
                return RetryOutcome::cancelled(attempts);
            }
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(atom, attempt = attempts, "atom interrupted by cancellation");
                    return RetryOutcome::cancelled(attempts);
                }
                result = Self::attempt(body, inputs.clone(), policy) => result,
            };

            let failure = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(failure) => failure,
            };

            if !Self::should_retry(policy, attempts, &failure) {
                let retryable = policy.is_retryable(&failure.kind);
                tracing::warn!(
                    atom,
                    attempt = attempts,
                    max_attempts = limit,
                    kind = %failure.kind,
                    error = %failure.message,
                    retryable,
                    "atom failed"
                );
                let error = if retryable && limit > 1 {
                    AtomError::RetryExhausted {
                        attempts,
                        last: failure,
                    }
                } else {
                    AtomError::Execution { failure, attempts }
                };
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }

            let delay = policy.delay_after(attempts);
            tracing::warn!(
                atom,
                attempt = attempts,
                max_attempts = limit,
                kind = %failure.kind,
                error = %failure.message,
                delay_ms = delay.as_millis() as u64,
                "atom attempt failed, retrying"
            );

            if !delay.is_zero() {
                slot.release();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return RetryOutcome::cancelled(attempts),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// One guarded invocation of the body.
    async fn attempt(
        body: &AtomFn,
        inputs: Vec<Value>,
        policy: &RetryPolicy,
    ) -> Result<Value, AtomFailure> {
        // A body may panic while building its future as well as while running it.
        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| body(inputs))) {
            Ok(future) => future,
            Err(payload) => return Err(AtomFailure::panic(panic_message(payload.as_ref()))),
        };
        let guarded = AssertUnwindSafe(future).catch_unwind();

        let outcome = match policy.attempt_timeout() {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(AtomFailure::timeout(limit.as_millis() as u64)),
            },
            None => guarded.await,
        };

        outcome.unwrap_or_else(|payload| Err(AtomFailure::panic(panic_message(payload.as_ref()))))
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "atom body panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
