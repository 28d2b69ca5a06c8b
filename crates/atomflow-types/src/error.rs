use thiserror::Error;

/// Structural and configuration errors.
///
/// These are detected before any atom body runs and abort the call. Per-atom
/// runtime failures are reported as [`crate::atom::AtomError`] data instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("atom '{0}' is already registered")]
    DuplicateAtom(String),

    #[error("unknown atom '{0}'")]
    UnknownAtom(String),

    #[error("atom '{atom}' depends on unknown atom '{dependency}'")]
    UnknownDependency { atom: String, dependency: String },

    #[error("cycle detected: {}", .cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors from cache store operations (used by trait definitions in atomflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
