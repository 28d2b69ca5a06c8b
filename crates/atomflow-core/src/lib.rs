//! Execution engine and cache store trait definitions for Atomflow.
//!
//! This crate defines the "ports" (the `CacheStore` and `ContentHasher`
//! traits) that the infrastructure layer implements, plus the engine itself.
//! It depends only on `atomflow-types` -- never on `atomflow-infra` or any
//! database/IO crate.

pub mod storage;
pub mod workflow;

pub use storage::cache_store::CacheStore;
pub use storage::memory::MemoryCacheStore;
pub use workflow::dag::DependencyGraph;
pub use workflow::executor::{ExecutionReport, WorkflowEngine};
pub use workflow::fingerprint::{ContentHasher, Fingerprinter};
pub use workflow::registry::{AtomDefinition, AtomRegistry};
pub use workflow::retry::{RetryExecutor, RetryOutcome};
