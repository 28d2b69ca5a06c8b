//! SQLite cache store implementation.
//!
//! Implements `CacheStore` from `atomflow-core` using sqlx with split
//! read/write pools. Outcomes are stored as JSON text and deserialized on
//! read; a store for an existing fingerprint replaces the row.

use atomflow_core::storage::cache_store::CacheStore;
use atomflow_types::cache::{CacheEntry, CacheStats, CachedOutcome, Fingerprint};
use atomflow_types::error::RepositoryError;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CacheStore`.
#[derive(Debug)]
pub struct SqliteCacheStore {
    pool: DatabasePool,
}

impl SqliteCacheStore {
    /// Create a new cache store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Per-atom entry counts, ordered by atom name.
    pub async fn stats(&self) -> Result<Vec<CacheStats>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT atom,
                      COUNT(*) AS entries,
                      SUM(CASE WHEN succeeded = 0 THEN 1 ELSE 0 END) AS failures,
                      MAX(created_at) AS last_written
               FROM atom_cache
               GROUP BY atom
               ORDER BY atom"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut stats = Vec::with_capacity(rows.len());
        for row in &rows {
            let atom: String = row
                .try_get("atom")
                .map_err(query_error)?;
            let entries: i64 = row
                .try_get("entries")
                .map_err(query_error)?;
            let failures: i64 = row
                .try_get("failures")
                .map_err(query_error)?;
            let last_written: String = row
                .try_get("last_written")
                .map_err(query_error)?;

            stats.push(CacheStats {
                atom,
                entries: entries.max(0) as u64,
                failures: failures.max(0) as u64,
                last_written: parse_datetime(&last_written)?,
            });
        }

        Ok(stats)
    }

    /// Remove every entry produced by `atom`. Returns the number removed.
    pub async fn remove_atom(&self, atom: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM atom_cache WHERE atom = ?")
            .bind(atom)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct CacheRow {
    fingerprint: String,
    atom: String,
    outcome: String,
    attempts: i64,
    created_at: String,
}

impl CacheRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            fingerprint: row.try_get("fingerprint")?,
            atom: row.try_get("atom")?,
            outcome: row.try_get("outcome")?,
            attempts: row.try_get("attempts")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry, RepositoryError> {
        let outcome: CachedOutcome = serde_json::from_str(&self.outcome)
            .map_err(|e| RepositoryError::Serialization(format!("invalid outcome JSON: {e}")))?;
        let attempts = u32::try_from(self.attempts)
            .map_err(|e| RepositoryError::Query(format!("invalid attempts: {e}")))?;

        Ok(CacheEntry {
            fingerprint: Fingerprint::new(self.fingerprint),
            atom: self.atom,
            outcome,
            attempts,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Pool and I/O failures are connection errors; anything else is a query
/// error.
fn query_error(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            tracing::debug!(error = %err, "cache database connection failed");
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// ---------------------------------------------------------------------------
// CacheStore implementation
// ---------------------------------------------------------------------------

impl CacheStore for SqliteCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT fingerprint, atom, outcome, attempts, created_at FROM atom_cache WHERE fingerprint = ?",
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let cache_row =
                    CacheRow::from_row(&row).map_err(query_error)?;
                Ok(Some(cache_row.into_entry()?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), RepositoryError> {
        let outcome = serde_json::to_string(&entry.outcome)
            .map_err(|e| RepositoryError::Serialization(format!("failed to serialize outcome: {e}")))?;

        sqlx::query(
            r#"INSERT INTO atom_cache (fingerprint, atom, outcome, succeeded, attempts, created_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (fingerprint) DO UPDATE SET
                   atom = excluded.atom,
                   outcome = excluded.outcome,
                   succeeded = excluded.succeeded,
                   attempts = excluded.attempts,
                   created_at = excluded.created_at"#,
        )
        .bind(entry.fingerprint.as_str())
        .bind(&entry.atom)
        .bind(&outcome)
        .bind(entry.outcome.is_success())
        .bind(i64::from(entry.attempts))
        .bind(format_datetime(&entry.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM atom_cache WHERE fingerprint = ?")
            .bind(fingerprint.as_str())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM atom_cache")
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(())
    }

    async fn len(&self) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM atom_cache")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;

        Ok(count.max(0) as usize)
    }
}
