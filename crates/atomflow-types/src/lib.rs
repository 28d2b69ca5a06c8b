//! Shared domain types for Atomflow.
//!
//! This crate contains the types shared by the engine, the storage adapters,
//! and the CLI: atom outcomes, retry policies, cache entries, engine
//! configuration, and the structural error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod atom;
pub mod cache;
pub mod config;
pub mod error;
pub mod retry;
