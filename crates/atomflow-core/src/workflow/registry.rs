//! Atom definitions and the registry that holds them.
//!
//! An atom is a named async callable with an ordered list of dependency
//! names. The body receives one resolved value per declared dependency, in
//! declared order. Dependency names are not checked here; the graph builder
//! resolves them, so atoms can be registered in any order.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use atomflow_types::atom::AtomFailure;
use atomflow_types::error::EngineError;
use atomflow_types::retry::RetryPolicy;
use serde_json::Value;

use super::retry::panic_message;

/// Boxed future returned by an atom body.
pub type AtomFuture = Pin<Box<dyn Future<Output = Result<Value, AtomFailure>> + Send + 'static>>;

/// Type-erased atom body.
pub type AtomFn = Arc<dyn Fn(Vec<Value>) -> AtomFuture + Send + Sync>;

/// Per-atom override for digesting one resolved input into fingerprint
/// material. Used for values whose JSON content is a poor identity.
pub type DigestFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

// ---------------------------------------------------------------------------
// AtomDefinition
// ---------------------------------------------------------------------------

/// A registered unit of computation.
#[derive(Clone)]
pub struct AtomDefinition {
    name: String,
    dependencies: Vec<String>,
    retry: Option<RetryPolicy>,
    force_recompute: bool,
    salt: Option<String>,
    input_digest: Option<DigestFn>,
    body: AtomFn,
}

impl AtomDefinition {
    /// Define an atom from an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AtomFailure>> + Send + 'static,
    {
        let body: AtomFn = Arc::new(move |inputs: Vec<Value>| -> AtomFuture { Box::pin(body(inputs)) });
        Self::new(name, body)
    }

    /// Define an atom from a synchronous closure.
    ///
    /// The closure runs on tokio's blocking pool once the returned future is
    /// first polled. A timed-out or cancelled attempt stops waiting for it;
    /// the closure itself runs to completion in the background.
    pub fn from_sync_fn<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, AtomFailure> + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let body: AtomFn = Arc::new(move |inputs: Vec<Value>| -> AtomFuture {
            let body = Arc::clone(&body);
            Box::pin(async move {
                match tokio::task::spawn_blocking(move || body(&inputs)).await {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => {
                        Err(AtomFailure::panic(panic_message(err.into_panic().as_ref())))
                    }
                    Err(err) => Err(AtomFailure::panic(err.to_string())),
                }
            })
        });
        Self::new(name, body)
    }

    /// Define an atom from an already type-erased body.
    pub fn new(name: impl Into<String>, body: AtomFn) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            retry: None,
            force_recompute: false,
            salt: None,
            input_digest: None,
            body,
        }
    }

    /// Declare the atom's dependencies, in the order the body receives them.
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Override the engine's default retry policy for this atom.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Always bypass the cache for this atom. Dependents still hit the cache
    /// when the atom's value is unchanged.
    pub fn force_recompute(mut self, force: bool) -> Self {
        self.force_recompute = force;
        self
    }

    /// Mix an invalidation salt into the fingerprint. Changing it invalidates
    /// the atom (and, through its value, whatever consumes it).
    pub fn salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// Replace the content hash of each resolved input with `digest`.
    pub fn input_digest<F>(mut self, digest: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.input_digest = Some(Arc::new(digest));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    pub fn is_force_recompute(&self) -> bool {
        self.force_recompute
    }

    pub fn salt_value(&self) -> Option<&str> {
        self.salt.as_deref()
    }

    pub fn input_digest_fn(&self) -> Option<&DigestFn> {
        self.input_digest.as_ref()
    }

    pub fn body(&self) -> &AtomFn {
        &self.body
    }
}

impl fmt::Debug for AtomDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomDefinition")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("retry", &self.retry)
            .field("force_recompute", &self.force_recompute)
            .field("salt", &self.salt)
            .field("input_digest", &self.input_digest.as_ref().map(|_| "<fn>"))
            .field("body", &"<fn>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AtomRegistry
// ---------------------------------------------------------------------------

/// Atom definitions in registration order.
///
/// Registration order has no execution significance beyond breaking ties
/// between atoms the graph leaves unordered.
#[derive(Debug, Clone, Default)]
pub struct AtomRegistry {
    atoms: Vec<AtomDefinition>,
    index: HashMap<String, usize>,
}

impl AtomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an atom. Fails if the name is already taken.
    pub fn register(&mut self, definition: AtomDefinition) -> Result<(), EngineError> {
        if self.index.contains_key(definition.name()) {
            return Err(EngineError::DuplicateAtom(definition.name().to_string()));
        }
        if let Some(policy) = definition.retry_policy() {
            policy.validate()?;
        }

        tracing::debug!(
            atom = definition.name(),
            dependencies = ?definition.dependencies(),
            "registered atom"
        );

        self.index
            .insert(definition.name().to_string(), self.atoms.len());
        self.atoms.push(definition);
        Ok(())
    }

    /// Look up an atom by name.
    pub fn get(&self, name: &str) -> Result<&AtomDefinition, EngineError> {
        self.index
            .get(name)
            .map(|&idx| &self.atoms[idx])
            .ok_or_else(|| EngineError::UnknownAtom(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Position of an atom in registration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Atom names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.atoms.iter().map(|atom| atom.name())
    }

    /// Atom definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &AtomDefinition> {
        self.atoms.iter()
    }
}
