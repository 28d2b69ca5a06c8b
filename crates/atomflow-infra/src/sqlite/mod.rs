//! SQLite storage layer.
//!
//! Durable cache store backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod cache;
pub mod pool;
