//! In-memory cache store backed by a concurrent hash map.
//!
//! Suitable for a single process: nothing survives a restart. `DashMap`
//! shards its locks, so lookups and stores for different fingerprints never
//! contend and operations on one fingerprint are linearized.

use atomflow_types::cache::{CacheEntry, Fingerprint};
use atomflow_types::error::RepositoryError;
use dashmap::DashMap;

use super::cache_store::CacheStore;

/// Process-local implementation of [`CacheStore`].
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<Fingerprint, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprints currently stored for `atom`.
    pub fn fingerprints_for(&self, atom: &str) -> Vec<Fingerprint> {
        self.entries
            .iter()
            .filter(|entry| entry.value().atom == atom)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl CacheStore for MemoryCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, RepositoryError> {
        Ok(self.entries.get(fingerprint).map(|entry| entry.value().clone()))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), RepositoryError> {
        self.entries
            .insert(entry.fingerprint.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), RepositoryError> {
        self.entries.remove(fingerprint);
        Ok(())
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        self.entries.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, RepositoryError> {
        Ok(self.entries.len())
    }
}
