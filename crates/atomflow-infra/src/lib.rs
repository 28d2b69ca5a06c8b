//! Infrastructure layer for Atomflow.
//!
//! Contains implementations of the ports defined in `atomflow-core`: the
//! SQLite cache store and SHA-256 content hashing, plus the `atomflow.toml`
//! configuration loader.

pub mod config;
pub mod crypto;
pub mod sqlite;
