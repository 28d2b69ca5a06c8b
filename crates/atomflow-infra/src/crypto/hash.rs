//! SHA-256 backend for atom fingerprints.
//!
//! The engine calls the hasher twice per fingerprint. First, once per
//! resolved input, over its canonical JSON encoding (object keys sorted at
//! every level). Then once over the fingerprint material, a run of
//! `tag:len:value;` fields naming the atom, its salt when set, and each input
//! digest in declared order. Both results are 64 lowercase hex characters,
//! which is also the key format of the `atom_cache` table.

use sha2::{Digest, Sha256};

use atomflow_core::workflow::fingerprint::ContentHasher;

/// Fingerprint hasher backed by SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256ContentHasher;

impl Sha256ContentHasher {
    pub fn new() -> Self {
        Self
    }
}

impl ContentHasher for Sha256ContentHasher {
    fn compute_hash(&self, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use atomflow_core::workflow::fingerprint::canonical_json;
    use atomflow_core::{AtomDefinition, Fingerprinter};
    use serde_json::json;

    use super::*;

    fn fingerprinter() -> Fingerprinter {
        Fingerprinter::new(Arc::new(Sha256ContentHasher::new()))
    }

    fn clean() -> AtomDefinition {
        AtomDefinition::from_sync_fn("clean", |_| Ok(json!(null)))
    }

    #[test]
    fn test_input_digest_hashes_canonical_json() {
        let hasher = Sha256ContentHasher::new();
        let input = json!({"rows": 3, "source": "orders.csv"});

        assert_eq!(canonical_json(&input), r#"{"rows":3,"source":"orders.csv"}"#);
        assert_eq!(
            fingerprinter().input_digest(&clean(), &input),
            hasher.compute_hash(r#"{"rows":3,"source":"orders.csv"}"#)
        );
    }

    #[test]
    fn test_fingerprint_is_digest_of_material() {
        let hasher = Sha256ContentHasher::new();
        let input = json!([1, 2, 3]);
        let input_digest = hasher.compute_hash("[1,2,3]");
        let material = format!("atom:5:clean;input:64:{input_digest};");

        let fp = fingerprinter().compute(&clean(), &[input]);
        assert_eq!(fp.as_str(), hasher.compute_hash(&material));
    }

    #[test]
    fn test_salt_is_part_of_material() {
        let hasher = Sha256ContentHasher::new();
        let salted = clean().salt("v2");

        let fp = fingerprinter().compute(&salted, &[]);
        assert_eq!(fp.as_str(), hasher.compute_hash("atom:5:clean;salt:2:v2;"));
        assert_ne!(fp, fingerprinter().compute(&clean(), &[]));
    }

    #[test]
    fn test_key_order_does_not_change_fingerprint() {
        let fp = fingerprinter();
        let a = fp.compute(&clean(), &[json!({"rows": 3, "cols": {"x": 1, "y": 2}})]);
        let b = fp.compute(&clean(), &[json!({"cols": {"y": 2, "x": 1}, "rows": 3})]);
        let c = fp.compute(&clean(), &[json!({"rows": 4, "cols": {"x": 1, "y": 2}})]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fingerprint_is_cache_key_shaped() {
        let fp = fingerprinter().compute(&clean(), &[json!("abc")]);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
