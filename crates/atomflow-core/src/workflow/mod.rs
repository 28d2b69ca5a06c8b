//! Engine core: registration, graph validation, fingerprinting, retries, and
//! cached topological execution.
//!
//! - `registry` -- atom definitions and duplicate detection
//! - `dag` -- graph builder, cycle detection, closure and wave computation
//! - `fingerprint` -- cache keys from atom identity and input content
//! - `retry` -- per-atom retry loop with backoff, timeouts, and panic capture
//! - `state` -- per-call bookkeeping (forced set, partial results, readiness)
//! - `executor` -- the `WorkflowEngine` scheduler

pub mod dag;
pub mod executor;
pub mod fingerprint;
pub mod registry;
pub mod retry;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
