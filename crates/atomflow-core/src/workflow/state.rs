//! Per-call execution bookkeeping.
//!
//! `ExecutionState` lives for one `execute` call. It owns the forced set, the
//! partial results map, and the count of unresolved dependencies per atom.
//! Only the coordinator mutates it; atom tasks receive owned inputs.

use std::collections::{BTreeSet, HashMap, HashSet};

use atomflow_types::atom::{AtomResult, AtomStatus};
use atomflow_types::error::EngineError;
use serde_json::Value;
use uuid::Uuid;

use super::dag::DependencyGraph;
use super::executor::ExecutionReport;
use super::registry::{AtomDefinition, AtomRegistry};

#[derive(Debug)]
pub struct ExecutionState {
    order: Vec<String>,
    /// Atoms that bypass the cache in this call.
    forced: HashSet<String>,
    /// Distinct dependencies per atom not yet recorded.
    pending: HashMap<String, usize>,
    /// Topological positions of atoms whose dependencies are all recorded.
    ready: BTreeSet<usize>,
    results: HashMap<String, AtomResult>,
}

impl ExecutionState {
    /// Prepare state for one call.
    ///
    /// Fails with `UnknownAtom` if `recompute` names an unregistered atom.
    /// Named atoms force their whole downstream closure; atoms flagged
    /// `force_recompute` force only themselves.
    pub fn new(
        graph: &DependencyGraph,
        registry: &AtomRegistry,
        recompute: &[&str],
    ) -> Result<Self, EngineError> {
        if let Some(unknown) = recompute.iter().find(|name| !graph.contains(name)) {
            return Err(EngineError::UnknownAtom(unknown.to_string()));
        }

        let mut forced: HashSet<String> = graph
            .downstream_closure(recompute.iter().copied())
            .into_iter()
            .collect();
        forced.extend(
            registry
                .iter()
                .filter(|atom| atom.is_force_recompute())
                .map(|atom| atom.name().to_string()),
        );

        let order = graph.order().to_vec();
        let mut pending = HashMap::with_capacity(order.len());
        let mut ready = BTreeSet::new();
        for (idx, name) in order.iter().enumerate() {
            let count = graph.dependencies(name).len();
            if count == 0 {
                ready.insert(idx);
            }
            pending.insert(name.clone(), count);
        }

        Ok(Self {
            order,
            forced,
            pending,
            ready,
            results: HashMap::new(),
        })
    }

    /// Take the earliest ready atom in topological order.
    pub fn pop_ready(&mut self) -> Option<String> {
        let idx = self.ready.pop_first()?;
        Some(self.order[idx].clone())
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn is_forced(&self, name: &str) -> bool {
        self.forced.contains(name)
    }

    /// Forced atoms in topological order.
    pub fn forced(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|name| self.forced.contains(name.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Values of `definition`'s dependencies in declared order, or the name
    /// of the first dependency that has no value.
    pub fn resolve_inputs(&self, definition: &AtomDefinition) -> Result<Vec<Value>, String> {
        definition
            .dependencies()
            .iter()
            .map(|dep| {
                self.results
                    .get(dep)
                    .and_then(AtomResult::value)
                    .cloned()
                    .ok_or_else(|| dep.clone())
            })
            .collect()
    }

    /// Record a terminal result and release dependents whose dependencies
    /// are now all recorded.
    pub fn record(&mut self, graph: &DependencyGraph, name: &str, result: AtomResult) {
        if self.results.insert(name.to_string(), result).is_some() {
            return;
        }
        for dependent in graph.dependents(name) {
            if let Some(count) = self.pending.get_mut(dependent.as_str()) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    if let Some(idx) = graph.position(dependent) {
                        self.ready.insert(idx);
                    }
                }
            }
        }
    }

    /// Record a skip for every ready atom whose first dependency without a
    /// value failed or was skipped, following the skips through to their own
    /// dependents. Atoms waiting on a cancelled dependency, or on nothing,
    /// are left alone. Returns the number of atoms skipped.
    pub fn skip_blocked_ready(&mut self, graph: &DependencyGraph) -> usize {
        let mut skipped = 0;
        loop {
            let blocked: Vec<(usize, String)> = self
                .ready
                .iter()
                .filter_map(|&idx| {
                    let name = &self.order[idx];
                    let dep = graph
                        .dependencies(name)
                        .iter()
                        .find(|dep| self.results.get(*dep).and_then(AtomResult::value).is_none())?;
                    let status = self.results.get(dep)?.status;
                    (status != AtomStatus::Cancelled).then(|| (idx, dep.clone()))
                })
                .collect();
            if blocked.is_empty() {
                return skipped;
            }
            for (idx, dependency) in blocked {
                self.ready.remove(&idx);
                let name = self.order[idx].clone();
                self.record(graph, &name, AtomResult::skipped(dependency));
                skipped += 1;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&AtomResult> {
        self.results.get(name)
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.order.len()
    }

    /// Freeze into a report. Atoms without a result were never started and
    /// are reported as cancelled.
    pub fn into_report(mut self, execution_id: Uuid) -> ExecutionReport {
        for name in &self.order {
            self.results
                .entry(name.clone())
                .or_insert_with(|| AtomResult::cancelled(None, 0, 0));
        }
        ExecutionReport::new(execution_id, self.order, self.results)
    }
}
