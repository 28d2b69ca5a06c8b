//! Cache store trait.
//!
//! Defines the key-value capability the engine uses to persist atom
//! outcomes by fingerprint. Implementations live in `storage::memory` and in
//! atomflow-infra.

use atomflow_types::cache::{CacheEntry, Fingerprint};
use atomflow_types::error::RepositoryError;

/// Trait for fingerprint-keyed outcome storage.
///
/// `put` supersedes any prior entry for the same fingerprint; readers of the
/// old entry keep their copy. Eviction, if any, is the implementation's
/// policy, never the engine's.
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait CacheStore: Send + Sync {
    /// Get the entry for a fingerprint. Returns None if absent.
    fn get(
        &self,
        fingerprint: &Fingerprint,
    ) -> impl std::future::Future<Output = Result<Option<CacheEntry>, RepositoryError>> + Send;

    /// Store an entry under its fingerprint (upsert).
    fn put(
        &self,
        entry: &CacheEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove an entry. No-op if absent.
    fn remove(
        &self,
        fingerprint: &Fingerprint,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove every entry.
    fn clear(&self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Number of stored entries.
    fn len(&self) -> impl std::future::Future<Output = Result<usize, RepositoryError>> + Send;
}
