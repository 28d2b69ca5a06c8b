//! Workflow engine: cached, dependency-ordered execution of registered atoms.
//!
//! Every `execute` call rebuilds the dependency graph from the registry, so
//! structural errors surface before any body runs. Atoms are then scheduled
//! as soon as all their dependencies are terminal, bounded by
//! `max_concurrency`, and ready atoms launch in topological order. Each atom
//! task computes its fingerprint, consults the cache unless forced, and
//! otherwise runs its body through the retry executor and stores the outcome,
//! success or failure.
//!
//! # Execution flow
//!
//! 1. Build the `DependencyGraph` and validate the recompute names.
//! 2. Derive the forced set (`ExecutionState`).
//! 3. Pop ready atoms; skip those with an unsuccessful dependency, spawn the
//!    rest on a `JoinSet` while semaphore permits remain.
//! 4. Record each finished atom, releasing its dependents.
//! 5. Freeze the state into an `ExecutionReport`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use atomflow_types::atom::{AtomError, AtomFailure, AtomResult, AtomStatus};
use atomflow_types::cache::{CacheEntry, CachedOutcome};
use atomflow_types::config::EngineConfig;
use atomflow_types::error::EngineError;
use atomflow_types::retry::RetryPolicy;
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::storage::cache_store::CacheStore;

use super::dag::DependencyGraph;
use super::fingerprint::{ContentHasher, Fingerprinter};
use super::registry::{AtomDefinition, AtomRegistry};
use super::retry::{AttemptSlot, RetryExecutor};
use super::state::ExecutionState;

// ---------------------------------------------------------------------------
// ExecutionReport
// ---------------------------------------------------------------------------

/// Immutable outcome of one `execute` call: one result per registered atom,
/// iterated in topological order.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    execution_id: Uuid,
    order: Vec<String>,
    results: HashMap<String, AtomResult>,
}

impl ExecutionReport {
    pub(crate) fn new(
        execution_id: Uuid,
        order: Vec<String>,
        results: HashMap<String, AtomResult>,
    ) -> Self {
        Self {
            execution_id,
            order,
            results,
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Topological order the atoms were scheduled in.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn get(&self, name: &str) -> Option<&AtomResult> {
        self.results.get(name)
    }

    /// Value of `name`, if it succeeded or hit a cached success.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(AtomResult::value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AtomResult)> {
        self.order
            .iter()
            .filter_map(|name| self.results.get(name).map(|r| (name.as_str(), r)))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Atoms whose body ran during this call, in topological order.
    pub fn executed(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, result)| result.was_executed())
            .map(|(name, _)| name)
            .collect()
    }

    pub fn count(&self, status: AtomStatus) -> usize {
        self.results.values().filter(|r| r.status == status).count()
    }

    /// Whether every atom produced a value.
    pub fn is_success(&self) -> bool {
        self.results.values().all(AtomResult::is_success)
    }
}

impl Serialize for ExecutionReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Results<'a>(&'a ExecutionReport);

        impl Serialize for Results<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_map(self.0.iter())
            }
        }

        let mut report = serializer.serialize_struct("ExecutionReport", 3)?;
        report.serialize_field("execution_id", &self.execution_id)?;
        report.serialize_field("order", &self.order)?;
        report.serialize_field("results", &Results(self))?;
        report.end()
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Executes registered atoms against a cache store.
pub struct WorkflowEngine<C: CacheStore + 'static> {
    registry: AtomRegistry,
    cache: Arc<C>,
    fingerprinter: Fingerprinter,
    config: EngineConfig,
}

impl<C: CacheStore + 'static> WorkflowEngine<C> {
    /// Create an engine with the default configuration.
    pub fn new(cache: Arc<C>, hasher: Arc<dyn ContentHasher>) -> Self {
        Self {
            registry: AtomRegistry::new(),
            cache,
            fingerprinter: Fingerprinter::new(hasher),
            config: EngineConfig::default(),
        }
    }

    /// Replace the configuration after validating it.
    pub fn with_config(mut self, config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Register an atom. Fails if the name is already taken.
    pub fn register(&mut self, definition: AtomDefinition) -> Result<(), EngineError> {
        self.registry.register(definition)
    }

    pub fn registry(&self) -> &AtomRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build and validate the dependency graph for the current registry.
    pub fn graph(&self) -> Result<DependencyGraph, EngineError> {
        DependencyGraph::build(&self.registry)
    }

    /// Parallel layers of the current graph.
    pub fn plan(&self) -> Result<Vec<Vec<String>>, EngineError> {
        Ok(self.graph()?.waves())
    }

    /// Execute every registered atom, force-recomputing `recompute` and
    /// everything downstream of it.
    pub async fn execute(&self, recompute: &[&str]) -> Result<ExecutionReport, EngineError> {
        self.execute_with_cancel(recompute, CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), stopping early once `cancel` fires.
    ///
    /// After cancellation no new atoms start, running bodies are interrupted
    /// at their next await point without storing a result, and every atom
    /// that did not finish is reported as `Cancelled`.
    pub async fn execute_with_cancel(
        &self,
        recompute: &[&str],
        cancel: CancellationToken,
    ) -> Result<ExecutionReport, EngineError> {
        let graph = DependencyGraph::build(&self.registry)?;
        let mut state = ExecutionState::new(&graph, &self.registry, recompute)?;
        let execution_id = Uuid::now_v7();
        let started = Instant::now();

        tracing::info!(
            execution_id = %execution_id,
            atoms = graph.len(),
            forced = ?state.forced(),
            max_concurrency = self.config.max_concurrency,
            "starting execution"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut join_set: JoinSet<(String, AtomResult)> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, String> = HashMap::new();

        loop {
            let schedulable = !cancel.is_cancelled() && state.has_ready();
            if !schedulable && join_set.is_empty() {
                break;
            }

            // Permits come back both when atoms finish and when a retrying
            // atom starts a backoff delay, so wait on the semaphore directly.
            tokio::select! {
                biased;
                Some(joined) = join_set.join_next_with_id() => {
                    self.record_joined(&graph, &mut state, &mut running, execution_id, joined);
                }
                permit = Arc::clone(&semaphore).acquire_owned(), if schedulable => {
                    let Ok(permit) = permit else {
                        break;
                    };
                    let Some(name) = state.pop_ready() else {
                        continue;
                    };
                    let definition = self.registry.get(&name)?;

                    let inputs = match state.resolve_inputs(definition) {
                        Ok(inputs) => inputs,
                        Err(dependency) => {
                            tracing::debug!(
                                execution_id = %execution_id,
                                atom = name.as_str(),
                                dependency = dependency.as_str(),
                                "skipping atom, dependency did not succeed"
                            );
                            state.record(&graph, &name, AtomResult::skipped(dependency));
                            continue;
                        }
                    };

                    let job = AtomJob {
                        policy: definition
                            .retry_policy()
                            .cloned()
                            .unwrap_or_else(|| self.config.default_retry.clone()),
                        definition: definition.clone(),
                        inputs,
                        forced: state.is_forced(&name),
                        cache: Arc::clone(&self.cache),
                        fingerprinter: self.fingerprinter.clone(),
                        cancel: cancel.clone(),
                        execution_id,
                        slot: AttemptSlot::new(Arc::clone(&semaphore), permit),
                    };
                    let handle = join_set.spawn(job.run());
                    running.insert(handle.id(), name);
                }
                _ = cancel.cancelled(), if schedulable => {}
                else => break,
            }
        }

        if cancel.is_cancelled() {
            let skipped = state.skip_blocked_ready(&graph);
            if skipped > 0 {
                tracing::debug!(
                    execution_id = %execution_id,
                    skipped,
                    "skipped ready atoms with failed dependencies after cancellation"
                );
            }
        }

        if cancel.is_cancelled() && !state.is_complete() {
            tracing::info!(execution_id = %execution_id, "execution cancelled");
        }

        let report = state.into_report(execution_id);

        tracing::info!(
            execution_id = %execution_id,
            succeeded = report.count(AtomStatus::Succeeded),
            cache_hits = report.count(AtomStatus::CacheHit),
            failed = report.count(AtomStatus::Failed),
            skipped = report.count(AtomStatus::Skipped),
            cancelled = report.count(AtomStatus::Cancelled),
            duration_ms = started.elapsed().as_millis() as u64,
            "execution finished"
        );

        Ok(report)
    }

    /// Record a finished atom task. A task that did not complete is recorded
    /// as a failed atom.
    fn record_joined(
        &self,
        graph: &DependencyGraph,
        state: &mut ExecutionState,
        running: &mut HashMap<tokio::task::Id, String>,
        execution_id: Uuid,
        joined: Result<(tokio::task::Id, (String, AtomResult)), JoinError>,
    ) {
        match joined {
            Ok((id, (name, result))) => {
                running.remove(&id);
                state.record(graph, &name, result);
            }
            Err(err) => {
                // Bodies are panic-guarded, so this is an engine-side panic
                // or an aborted task.
                if let Some(name) = running.remove(&err.id()) {
                    tracing::warn!(
                        execution_id = %execution_id,
                        atom = name.as_str(),
                        error = %err,
                        "atom task did not complete"
                    );
                    let failure = AtomFailure::panic(err.to_string());
                    let result = AtomResult {
                        status: AtomStatus::Failed,
                        outcome: Err(AtomError::Execution {
                            failure,
                            attempts: 1,
                        }),
                        fingerprint: None,
                        attempts: 1,
                        duration_ms: 0,
                    };
                    state.record(graph, &name, result);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AtomJob
// ---------------------------------------------------------------------------

/// Everything one spawned atom task owns.
struct AtomJob<C> {
    definition: AtomDefinition,
    inputs: Vec<Value>,
    forced: bool,
    policy: RetryPolicy,
    cache: Arc<C>,
    fingerprinter: Fingerprinter,
    cancel: CancellationToken,
    execution_id: Uuid,
    slot: AttemptSlot,
}

impl<C: CacheStore> AtomJob<C> {
    async fn run(mut self) -> (String, AtomResult) {
        let name = self.definition.name().to_string();
        let started = Instant::now();
        let fingerprint = self.fingerprinter.compute(&self.definition, &self.inputs);

        if self.cancel.is_cancelled() {
            let result = AtomResult::cancelled(Some(fingerprint.into_string()), 0, 0);
            return (name, result);
        }

        if !self.forced {
            match self.cache.get(&fingerprint).await {
                Ok(Some(entry)) => {
                    tracing::debug!(
                        execution_id = %self.execution_id,
                        atom = name.as_str(),
                        fingerprint = fingerprint.short(),
                        cached_success = entry.outcome.is_success(),
                        "cache hit"
                    );
                    let result = AtomResult {
                        status: AtomStatus::CacheHit,
                        outcome: entry.outcome.into_result(),
                        fingerprint: Some(fingerprint.into_string()),
                        attempts: 0,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                    return (name, result);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        atom = name.as_str(),
                        fingerprint = fingerprint.short(),
                        error = %err,
                        "cache lookup failed, treating as miss"
                    );
                }
            }
        }

        tracing::debug!(
            execution_id = %self.execution_id,
            atom = name.as_str(),
            fingerprint = fingerprint.short(),
            forced = self.forced,
            "running atom"
        );

        let outcome = RetryExecutor::run(
            &name,
            self.definition.body(),
            self.inputs,
            &self.policy,
            &self.cancel,
            &mut self.slot,
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if outcome.is_cancelled() {
            let result =
                AtomResult::cancelled(Some(fingerprint.into_string()), outcome.attempts, duration_ms);
            return (name, result);
        }

        let entry = CacheEntry::new(
            fingerprint.clone(),
            name.as_str(),
            CachedOutcome::from_result(&outcome.result),
            outcome.attempts,
        );
        if let Err(err) = self.cache.put(&entry).await {
            tracing::warn!(
                atom = name.as_str(),
                fingerprint = fingerprint.short(),
                error = %err,
                "failed to store atom outcome"
            );
        }

        let status = if outcome.result.is_ok() {
            AtomStatus::Succeeded
        } else {
            AtomStatus::Failed
        };
        tracing::debug!(
            execution_id = %self.execution_id,
            atom = name.as_str(),
            status = %status,
            attempts = outcome.attempts,
            duration_ms,
            "atom finished"
        );

        let result = AtomResult {
            status,
            outcome: outcome.result,
            fingerprint: Some(fingerprint.into_string()),
            attempts: outcome.attempts,
            duration_ms,
        };
        (name, result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use atomflow_types::cache::Fingerprint;
    use atomflow_types::error::RepositoryError;
    use atomflow_types::retry::Backoff;
    use serde_json::json;
    use tokio::sync::Barrier;

    use crate::storage::memory::MemoryCacheStore;
    use crate::workflow::testing::{CallLog, IdentityHasher, tracked};

    fn engine() -> WorkflowEngine<MemoryCacheStore> {
        engine_with_cache(Arc::new(MemoryCacheStore::new()))
    }

    fn engine_with_cache<C: CacheStore + 'static>(cache: Arc<C>) -> WorkflowEngine<C> {
        let config = EngineConfig {
            default_retry: RetryPolicy::immediate(1),
            ..EngineConfig::default()
        };
        WorkflowEngine::new(cache, Arc::new(IdentityHasher))
            .with_config(config)
            .unwrap()
    }

    fn text(value: &Value) -> String {
        value.as_str().unwrap_or_default().to_string()
    }

    /// load -> clean -> analyze, plus an independent `audit`.
    fn pipeline(engine: &mut WorkflowEngine<MemoryCacheStore>, log: &CallLog) {
        engine
            .register(tracked(log, "load", &[], |_| Ok(json!("  Hello World  "))))
            .unwrap();
        engine
            .register(tracked(log, "clean", &["load"], |inputs| {
                Ok(json!(text(&inputs[0]).trim().to_lowercase()))
            }))
            .unwrap();
        engine
            .register(tracked(log, "analyze", &["clean"], |inputs| {
                Ok(json!(text(&inputs[0]).split_whitespace().count()))
            }))
            .unwrap();
        engine
            .register(tracked(log, "audit", &[], |_| Ok(json!("ok"))))
            .unwrap();
    }

    // -------------------------------------------------------------------
    // Caching and recompute
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_first_run_executes_everything() {
        let log = CallLog::new();
        let mut engine = engine();
        pipeline(&mut engine, &log);

        let report = engine.execute(&[]).await.unwrap();
        assert_eq!(report.len(), 4);
        assert_eq!(report.order(), ["load", "clean", "analyze", "audit"]);
        assert_eq!(report.executed(), vec!["load", "clean", "analyze", "audit"]);
        assert_eq!(report.value("clean"), Some(&json!("hello world")));
        assert_eq!(report.value("analyze"), Some(&json!(2)));
        assert!(report.is_success());
        assert_eq!(log.total(), 4);
    }

    #[tokio::test]
    async fn test_second_run_is_full_cache_hit() {
        let log = CallLog::new();
        let mut engine = engine();
        pipeline(&mut engine, &log);

        let first = engine.execute(&[]).await.unwrap();
        log.reset();
        let second = engine.execute(&[]).await.unwrap();

        assert_eq!(log.total(), 0);
        assert_eq!(second.count(AtomStatus::CacheHit), 4);
        assert!(second.executed().is_empty());
        for (name, result) in second.iter() {
            let before = first.get(name).unwrap();
            assert_eq!(result.value(), before.value());
            assert_eq!(result.fingerprint, before.fingerprint);
            assert_eq!(result.attempts, 0);
        }
    }

    #[tokio::test]
    async fn test_recompute_reruns_atom_and_downstream_only() {
        let log = CallLog::new();
        let mut engine = engine();
        pipeline(&mut engine, &log);
        engine.execute(&[]).await.unwrap();
        log.reset();

        let report = engine.execute(&["clean"]).await.unwrap();
        assert_eq!(report.executed(), vec!["clean", "analyze"]);
        assert_eq!(report.get("load").unwrap().status, AtomStatus::CacheHit);
        assert_eq!(report.get("audit").unwrap().status, AtomStatus::CacheHit);
        assert_eq!(log.count("clean"), 1);
        assert_eq!(log.count("analyze"), 1);
        assert_eq!(log.count("load"), 0);
    }

    #[tokio::test]
    async fn test_forcing_leaves_siblings_alone() {
        let log = CallLog::new();
        let mut engine = engine();
        engine.register(tracked(&log, "load", &[], |_| Ok(json!(1)))).unwrap();
        engine
            .register(tracked(&log, "left", &["load"], |i| Ok(json!(i[0].as_i64().unwrap_or(0) + 1))))
            .unwrap();
        engine
            .register(tracked(&log, "right", &["load"], |i| Ok(json!(i[0].as_i64().unwrap_or(0) * 10))))
            .unwrap();
        engine
            .register(tracked(&log, "join", &["left", "right"], |i| {
                Ok(json!([i[0].clone(), i[1].clone()]))
            }))
            .unwrap();
        engine.execute(&[]).await.unwrap();
        log.reset();

        let report = engine.execute(&["left"]).await.unwrap();
        assert_eq!(report.executed(), vec!["left", "join"]);
        assert_eq!(log.count("right"), 0);
        assert_eq!(report.value("join"), Some(&json!([2, 10])));
    }

    #[tokio::test]
    async fn test_upstream_change_reruns_affected_atoms() {
        let log = CallLog::new();
        let source = Arc::new(Mutex::new("alpha beta".to_string()));
        let mut engine = engine();

        let input = Arc::clone(&source);
        engine
            .register(
                tracked(&log, "read", &[], move |_| {
                    let text = input.lock().map(|s| s.clone()).unwrap_or_default();
                    Ok(json!(text))
                })
                .force_recompute(true),
            )
            .unwrap();
        engine
            .register(tracked(&log, "count", &["read"], |i| {
                Ok(json!(text(&i[0]).split_whitespace().count()))
            }))
            .unwrap();
        engine
            .register(tracked(&log, "double", &["count"], |i| {
                Ok(json!(i[0].as_u64().unwrap_or(0) * 2))
            }))
            .unwrap();
        engine
            .register(tracked(&log, "constant", &[], |_| Ok(json!("c"))))
            .unwrap();

        engine.execute(&[]).await.unwrap();
        log.reset();

        // Unchanged input: the flagged atom re-runs, nothing downstream does.
        let report = engine.execute(&[]).await.unwrap();
        assert_eq!(report.executed(), vec!["read"]);
        assert_eq!(report.get("count").unwrap().status, AtomStatus::CacheHit);
        log.reset();

        // Same word count: `count` re-runs, `double` sees an unchanged value.
        *source.lock().unwrap() = "gamma delta".to_string();
        let report = engine.execute(&[]).await.unwrap();
        assert_eq!(report.executed(), vec!["read", "count"]);
        assert_eq!(report.get("double").unwrap().status, AtomStatus::CacheHit);
        log.reset();

        *source.lock().unwrap() = "one two three".to_string();
        let report = engine.execute(&[]).await.unwrap();
        assert_eq!(report.executed(), vec!["read", "count", "double"]);
        assert_eq!(report.value("double"), Some(&json!(6)));
        assert_eq!(log.count("constant"), 0);
    }

    #[tokio::test]
    async fn test_salt_change_invalidates_shared_cache() {
        let cache = Arc::new(MemoryCacheStore::new());
        let log = CallLog::new();

        let mut v1 = engine_with_cache(Arc::clone(&cache));
        v1.register(tracked(&log, "model", &[], |_| Ok(json!(1))).salt("v1"))
            .unwrap();
        v1.execute(&[]).await.unwrap();

        let mut same = engine_with_cache(Arc::clone(&cache));
        same.register(tracked(&log, "model", &[], |_| Ok(json!(1))).salt("v1"))
            .unwrap();
        let report = same.execute(&[]).await.unwrap();
        assert_eq!(report.get("model").unwrap().status, AtomStatus::CacheHit);

        let mut v2 = engine_with_cache(Arc::clone(&cache));
        v2.register(tracked(&log, "model", &[], |_| Ok(json!(1))).salt("v2"))
            .unwrap();
        let report = v2.execute(&[]).await.unwrap();
        assert_eq!(report.get("model").unwrap().status, AtomStatus::Succeeded);
        assert_eq!(log.count("model"), 2);
        assert_eq!(cache.fingerprints_for("model").len(), 2);
    }

    // -------------------------------------------------------------------
    // Structural errors
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_cycle_fails_before_any_body_runs() {
        let log = CallLog::new();
        let mut engine = engine();
        engine.register(tracked(&log, "free", &[], |_| Ok(json!(0)))).unwrap();
        engine.register(tracked(&log, "a", &["b"], |_| Ok(json!(1)))).unwrap();
        engine.register(tracked(&log, "b", &["a"], |_| Ok(json!(2)))).unwrap();

        let err = engine.execute(&[]).await.unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected { .. }));
        assert_eq!(err.to_string(), "cycle detected: a -> b -> a");
        assert_eq!(log.total(), 0);
    }

    #[tokio::test]
    async fn test_unknown_dependency_fails_before_execution() {
        let log = CallLog::new();
        let mut engine = engine();
        engine.register(tracked(&log, "load", &[], |_| Ok(json!(0)))).unwrap();
        engine
            .register(tracked(&log, "clean", &["lod"], |_| Ok(json!(1))))
            .unwrap();

        let err = engine.execute(&[]).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::UnknownDependency {
                atom: "clean".to_string(),
                dependency: "lod".to_string(),
            }
        );
        assert_eq!(log.total(), 0);
    }

    #[tokio::test]
    async fn test_unknown_recompute_name() {
        let log = CallLog::new();
        let mut engine = engine();
        pipeline(&mut engine, &log);
        let err = engine.execute(&["missing"]).await.unwrap_err();
        assert_eq!(err, EngineError::UnknownAtom("missing".to_string()));
        assert_eq!(log.total(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let log = CallLog::new();
        let mut engine = engine();
        engine.register(tracked(&log, "load", &[], |_| Ok(json!(0)))).unwrap();
        let err = engine
            .register(tracked(&log, "load", &[], |_| Ok(json!(1))))
            .unwrap_err();
        assert_eq!(err, EngineError::DuplicateAtom("load".to_string()));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_concurrency: 0,
            ..EngineConfig::default()
        };
        let result = WorkflowEngine::new(Arc::new(MemoryCacheStore::new()), Arc::new(IdentityHasher))
            .with_config(config);
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let report = engine().execute(&[]).await.unwrap();
        assert!(report.is_empty());
    }

    // -------------------------------------------------------------------
    // Retries and failures
    // -------------------------------------------------------------------

    fn fails_until(log: &CallLog, name: &str, successes_after: u32) -> AtomDefinition {
        let calls = log.clone();
        let atom = name.to_string();
        tracked(log, name, &[], move |_| {
            if calls.count(&atom) <= successes_after {
                Err(AtomFailure::new("flaky", "not yet"))
            } else {
                Ok(json!("done"))
            }
        })
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let log = CallLog::new();
        let mut engine = engine();
        engine
            .register(fails_until(&log, "fetch", 2).retry(RetryPolicy::immediate(3)))
            .unwrap();

        let report = engine.execute(&[]).await.unwrap();
        let fetch = report.get("fetch").unwrap();
        assert_eq!(fetch.status, AtomStatus::Succeeded);
        assert_eq!(fetch.attempts, 3);
        assert_eq!(log.count("fetch"), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let log = CallLog::new();
        let mut engine = engine();
        engine
            .register(fails_until(&log, "fetch", 2).retry(RetryPolicy::immediate(2)))
            .unwrap();

        let report = engine.execute(&[]).await.unwrap();
        let fetch = report.get("fetch").unwrap();
        assert_eq!(fetch.status, AtomStatus::Failed);
        assert!(matches!(
            fetch.error(),
            Some(AtomError::RetryExhausted { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_propagates_as_skip() {
        let log = CallLog::new();
        let mut engine = engine();
        engine
            .register(tracked(&log, "a", &[], |_| Err(AtomFailure::new("io", "disk gone"))))
            .unwrap();
        engine.register(tracked(&log, "b", &["a"], |_| Ok(json!(1)))).unwrap();
        engine.register(tracked(&log, "c", &["b"], |_| Ok(json!(2)))).unwrap();
        engine.register(tracked(&log, "d", &[], |_| Ok(json!(3)))).unwrap();

        let report = engine.execute(&[]).await.unwrap();
        assert_eq!(report.len(), 4);
        assert_eq!(report.get("a").unwrap().status, AtomStatus::Failed);

        let b = report.get("b").unwrap();
        assert_eq!(b.status, AtomStatus::Skipped);
        assert!(b.fingerprint.is_none());
        assert_eq!(
            b.error(),
            Some(&AtomError::SkippedDueToDependencyFailure {
                dependency: "a".to_string()
            })
        );
        assert_eq!(
            report.get("c").unwrap().error(),
            Some(&AtomError::SkippedDueToDependencyFailure {
                dependency: "b".to_string()
            })
        );
        assert_eq!(report.get("d").unwrap().status, AtomStatus::Succeeded);
        assert_eq!(log.count("b"), 0);
        assert_eq!(log.count("c"), 0);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_cached_failure_is_replayed_until_forced() {
        let log = CallLog::new();
        let mut engine = engine();
        engine
            .register(tracked(&log, "a", &[], |_| Err(AtomFailure::new("parse", "bad header"))))
            .unwrap();
        engine.register(tracked(&log, "b", &["a"], |_| Ok(json!(1)))).unwrap();
        engine.execute(&[]).await.unwrap();

        let report = engine.execute(&[]).await.unwrap();
        let a = report.get("a").unwrap();
        assert_eq!(a.status, AtomStatus::CacheHit);
        assert_eq!(a.error().and_then(|e| e.failure()).map(|f| f.kind.as_str()), Some("parse"));
        assert_eq!(report.get("b").unwrap().status, AtomStatus::Skipped);
        assert_eq!(log.count("a"), 1);

        let report = engine.execute(&["a"]).await.unwrap();
        assert_eq!(report.get("a").unwrap().status, AtomStatus::Failed);
        assert_eq!(log.count("a"), 2);
    }

    #[tokio::test]
    async fn test_panicking_body_fails_atom() {
        let log = CallLog::new();
        let mut engine = engine();
        engine
            .register(AtomDefinition::from_sync_fn("boom", |_| panic!("index out of range")))
            .unwrap();
        engine.register(tracked(&log, "after", &["boom"], |_| Ok(json!(1)))).unwrap();

        let report = engine.execute(&[]).await.unwrap();
        let boom = report.get("boom").unwrap();
        assert_eq!(boom.status, AtomStatus::Failed);
        let failure = boom.error().and_then(|e| e.failure()).unwrap();
        assert_eq!(failure.kind, AtomFailure::PANIC);
        assert_eq!(report.get("after").unwrap().status, AtomStatus::Skipped);
    }

    #[tokio::test]
    async fn test_engine_default_retry_policy_applies() {
        let log = CallLog::new();
        let config = EngineConfig {
            default_retry: RetryPolicy::immediate(4),
            ..EngineConfig::default()
        };
        let mut engine = WorkflowEngine::new(Arc::new(MemoryCacheStore::new()), Arc::new(IdentityHasher))
            .with_config(config)
            .unwrap();
        engine.register(fails_until(&log, "fetch", 3)).unwrap();

        let report = engine.execute(&[]).await.unwrap();
        assert_eq!(report.get("fetch").unwrap().attempts, 4);
    }

    // -------------------------------------------------------------------
    // Cache store failures
    // -------------------------------------------------------------------

    /// Store whose every operation fails.
    struct BrokenCache;

    impl CacheStore for BrokenCache {
        async fn get(&self, _: &Fingerprint) -> Result<Option<CacheEntry>, RepositoryError> {
            Err(RepositoryError::Connection)
        }
        async fn put(&self, _: &CacheEntry) -> Result<(), RepositoryError> {
            Err(RepositoryError::Query("disk full".to_string()))
        }
        async fn remove(&self, _: &Fingerprint) -> Result<(), RepositoryError> {
            Err(RepositoryError::Connection)
        }
        async fn clear(&self) -> Result<(), RepositoryError> {
            Err(RepositoryError::Connection)
        }
        async fn len(&self) -> Result<usize, RepositoryError> {
            Err(RepositoryError::Connection)
        }
    }

    #[tokio::test]
    async fn test_cache_errors_do_not_fail_atoms() {
        let log = CallLog::new();
        let mut engine = engine_with_cache(Arc::new(BrokenCache));
        engine.register(tracked(&log, "load", &[], |_| Ok(json!(1)))).unwrap();
        engine
            .register(tracked(&log, "next", &["load"], |i| Ok(i[0].clone())))
            .unwrap();

        let first = engine.execute(&[]).await.unwrap();
        assert!(first.is_success());
        let second = engine.execute(&[]).await.unwrap();
        assert_eq!(second.executed(), vec!["load", "next"]);
        assert_eq!(log.total(), 4);
    }

    // -------------------------------------------------------------------
    // Scheduling
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_independent_atoms_run_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let mut engine = engine();
        for name in ["left", "right"] {
            let barrier = Arc::clone(&barrier);
            engine
                .register(AtomDefinition::from_fn(name, move |_| {
                    let barrier = Arc::clone(&barrier);
                    async move {
                        // Completes only if both atoms are in flight at once.
                        barrier.wait().await;
                        Ok(json!(true))
                    }
                }))
                .unwrap();
        }

        let report = tokio::time::timeout(Duration::from_secs(5), engine.execute(&[]))
            .await
            .expect("independent atoms deadlocked")
            .unwrap();
        assert_eq!(report.count(AtomStatus::Succeeded), 2);
    }

    #[tokio::test]
    async fn test_sequential_config_runs_in_topological_order() {
        let started = Arc::new(Mutex::new(Vec::new()));
        let config = EngineConfig {
            default_retry: RetryPolicy::no_retry(),
            ..EngineConfig::sequential()
        };
        let mut engine = WorkflowEngine::new(Arc::new(MemoryCacheStore::new()), Arc::new(IdentityHasher))
            .with_config(config)
            .unwrap();

        let atoms: [(&str, &[&str]); 5] = [
            ("report", &["stats", "plot"]),
            ("plot", &["clean"]),
            ("stats", &["clean"]),
            ("clean", &["load"]),
            ("load", &[]),
        ];
        for (name, deps) in atoms {
            let started = Arc::clone(&started);
            let atom = name.to_string();
            engine
                .register(
                    AtomDefinition::from_fn(name, move |_| {
                        let started = Arc::clone(&started);
                        let atom = atom.clone();
                        async move {
                            started.lock().unwrap().push(atom);
                            tokio::task::yield_now().await;
                            Ok(json!(null))
                        }
                    })
                    .depends_on(deps.iter().copied()),
                )
                .unwrap();
        }

        let report = engine.execute(&[]).await.unwrap();
        let started = started.lock().unwrap().clone();
        assert_eq!(started, report.order());
        assert_eq!(started, ["load", "clean", "stats", "plot", "report"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_scheduling_and_skips_storage() {
        let log = CallLog::new();
        let cache = Arc::new(MemoryCacheStore::new());
        let mut engine = engine_with_cache(Arc::clone(&cache));
        engine.register(tracked(&log, "quick", &[], |_| Ok(json!(1)))).unwrap();
        engine
            .register(AtomDefinition::from_fn("slow", |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!("late"))
            }))
            .unwrap();
        engine
            .register(tracked(&log, "after", &["slow"], |_| Ok(json!(2))))
            .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let report = engine.execute_with_cancel(&[], cancel).await.unwrap();
        assert_eq!(report.len(), 3);
        assert_eq!(report.get("quick").unwrap().status, AtomStatus::Succeeded);
        assert_eq!(report.get("slow").unwrap().status, AtomStatus::Cancelled);
        assert_eq!(report.get("after").unwrap().status, AtomStatus::Cancelled);
        assert_eq!(log.count("after"), 0);
        assert!(cache.fingerprints_for("slow").is_empty());
        assert_eq!(cache.fingerprints_for("quick").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_does_not_hold_concurrency_slot() {
        let config = EngineConfig {
            max_concurrency: 2,
            default_retry: RetryPolicy::no_retry(),
            ..EngineConfig::default()
        };
        let mut engine =
            WorkflowEngine::new(Arc::new(MemoryCacheStore::new()), Arc::new(IdentityHasher))
                .with_config(config)
                .unwrap();
        let policy = RetryPolicy::immediate(3).with_backoff(Backoff::Fixed { delay_ms: 10_000 });
        for name in ["flaky_a", "flaky_b"] {
            engine
                .register(
                    AtomDefinition::from_fn(name, |_| async {
                        Err::<Value, _>(AtomFailure::new("io", "down"))
                    })
                    .retry(policy.clone()),
                )
                .unwrap();
        }
        let origin = tokio::time::Instant::now();
        let started_after = Arc::new(Mutex::new(None));
        let record = Arc::clone(&started_after);
        engine
            .register(AtomDefinition::from_fn("independent", move |_| {
                *record.lock().unwrap() = Some(origin.elapsed());
                async { Ok(json!("done")) }
            }))
            .unwrap();

        let report = engine.execute(&[]).await.unwrap();
        assert_eq!(
            report.get("independent").unwrap().status,
            AtomStatus::Succeeded
        );
        assert!(matches!(
            report.get("flaky_a").unwrap().error(),
            Some(AtomError::RetryExhausted { attempts: 3, .. })
        ));

        // Both slots are taken by the flaky atoms at first; the independent
        // atom gets one as soon as a flaky atom starts its 10s backoff.
        let waited = started_after.lock().unwrap().unwrap();
        assert!(waited < Duration::from_secs(1), "independent atom waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_still_skips_dependents_of_failures() {
        let mut engine =
            WorkflowEngine::new(Arc::new(MemoryCacheStore::new()), Arc::new(IdentityHasher))
                .with_config(EngineConfig {
                    default_retry: RetryPolicy::no_retry(),
                    ..EngineConfig::sequential()
                })
                .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        engine
            .register(AtomDefinition::from_fn("broken", |_| async {
                Err::<Value, _>(AtomFailure::new("io", "down"))
            }))
            .unwrap();
        engine
            .register(AtomDefinition::from_fn("slow", move |_| {
                trigger.cancel();
                async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(json!("late"))
                }
            }))
            .unwrap();
        engine
            .register(
                AtomDefinition::from_fn("consumer", |inputs| async move { Ok(inputs[0].clone()) })
                    .depends_on(["broken"]),
            )
            .unwrap();

        let report = engine.execute_with_cancel(&[], cancel).await.unwrap();
        assert_eq!(report.get("broken").unwrap().status, AtomStatus::Failed);
        assert_eq!(report.get("slow").unwrap().status, AtomStatus::Cancelled);
        let consumer = report.get("consumer").unwrap();
        assert_eq!(consumer.status, AtomStatus::Skipped);
        assert_eq!(
            consumer.error(),
            Some(&AtomError::SkippedDueToDependencyFailure {
                dependency: "broken".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let log = CallLog::new();
        let mut engine = engine();
        pipeline(&mut engine, &log);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine.execute_with_cancel(&[], cancel).await.unwrap();
        assert_eq!(report.count(AtomStatus::Cancelled), 4);
        assert_eq!(log.total(), 0);
    }

    // -------------------------------------------------------------------
    // Report
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn test_report_serializes_in_topological_order() {
        let log = CallLog::new();
        let mut engine = engine();
        pipeline(&mut engine, &log);
        let report = engine.execute(&[]).await.unwrap();

        let json = serde_json::to_string(&report).unwrap();
        let load = json.find("\"load\":{").unwrap();
        let analyze = json.find("\"analyze\":{").unwrap();
        assert!(load < analyze);

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["results"]["analyze"]["status"], "succeeded");
        assert_eq!(value["results"]["analyze"]["outcome"]["Ok"], 2);
        assert_eq!(value["order"][0], "load");
    }

    #[tokio::test]
    async fn test_plan_groups_waves() {
        let log = CallLog::new();
        let mut engine = engine();
        pipeline(&mut engine, &log);
        let plan = engine.plan().unwrap();
        assert_eq!(plan[0], ["load", "audit"]);
        assert_eq!(plan[1], ["clean"]);
        assert_eq!(plan[2], ["analyze"]);
    }
}
