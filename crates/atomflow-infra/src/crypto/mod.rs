//! Cryptographic operations for Atomflow.
//!
//! - `hash`: SHA-256 content hashing for cache fingerprints

pub mod hash;
