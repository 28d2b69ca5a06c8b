//! Test helpers shared by the workflow modules.

use std::sync::Arc;

use atomflow_types::atom::AtomFailure;
use dashmap::DashMap;
use serde_json::Value;

use super::fingerprint::ContentHasher;
use super::registry::AtomDefinition;

/// Returns the content unchanged, so fingerprints stay readable in
/// assertions.
pub(crate) struct IdentityHasher;

impl ContentHasher for IdentityHasher {
    fn compute_hash(&self, content: &str) -> String {
        content.to_string()
    }
}

/// Counts body invocations per atom.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog {
    calls: Arc<DashMap<String, u32>>,
}

impl CallLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, atom: &str) {
        *self.calls.entry(atom.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn count(&self, atom: &str) -> u32 {
        self.calls.get(atom).map(|c| *c).unwrap_or(0)
    }

    pub(crate) fn total(&self) -> u32 {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    pub(crate) fn reset(&self) {
        self.calls.clear();
    }
}

/// A synchronous atom that records each invocation in `log`.
pub(crate) fn tracked<F>(log: &CallLog, name: &str, deps: &[&str], body: F) -> AtomDefinition
where
    F: Fn(&[Value]) -> Result<Value, AtomFailure> + Send + Sync + 'static,
{
    let log = log.clone();
    let atom = name.to_string();
    AtomDefinition::from_sync_fn(name, move |inputs| {
        log.record(&atom);
        body(inputs)
    })
    .depends_on(deps.iter().copied())
}
