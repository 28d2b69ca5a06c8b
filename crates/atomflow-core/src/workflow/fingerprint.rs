//! Cache keys for atom invocations.
//!
//! A fingerprint covers the atom's name, its invalidation salt, and a digest
//! of every resolved input in declared order. Because inputs are digested by
//! value, any upstream change reaches every consumer's fingerprint without a
//! separate dirty-propagation pass.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use atomflow_types::cache::Fingerprint;
use serde_json::Value;

use super::registry::AtomDefinition;

/// Abstraction over content hashing for cache keys.
///
/// Defined in atomflow-core so the engine can fingerprint inputs without
/// coupling to a specific hashing algorithm. The `Sha256ContentHasher`
/// adapter lives in atomflow-infra.
pub trait ContentHasher: Send + Sync {
    /// Compute a hex-encoded hash of the given content.
    fn compute_hash(&self, content: &str) -> String;
}

/// Derives [`Fingerprint`]s from atom definitions and resolved inputs.
#[derive(Clone)]
pub struct Fingerprinter {
    hasher: Arc<dyn ContentHasher>,
}

impl Fingerprinter {
    pub fn new(hasher: Arc<dyn ContentHasher>) -> Self {
        Self { hasher }
    }

    /// Digest of one resolved input: the atom's own digest function if it
    /// declares one, else a hash of the canonical JSON encoding.
    pub fn input_digest(&self, definition: &AtomDefinition, input: &Value) -> String {
        match definition.input_digest_fn() {
            Some(digest) => digest(input),
            None => self.hasher.compute_hash(&canonical_json(input)),
        }
    }

    /// Fingerprint of invoking `definition` with `inputs`.
    ///
    /// Every field is written as `tag:len:value;`, so two different input
    /// sequences never produce the same material.
    pub fn compute(&self, definition: &AtomDefinition, inputs: &[Value]) -> Fingerprint {
        let mut material = String::new();
        push_field(&mut material, "atom", definition.name());
        if let Some(salt) = definition.salt_value() {
            push_field(&mut material, "salt", salt);
        }
        for input in inputs {
            push_field(&mut material, "input", &self.input_digest(definition, input));
        }
        Fingerprint::new(self.hasher.compute_hash(&material))
    }
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter").finish_non_exhaustive()
    }
}

fn push_field(material: &mut String, tag: &str, value: &str) {
    // Writing to a String cannot fail.
    let _ = write!(material, "{tag}:{}:{value};", value.len());
}

/// JSON encoding with object keys sorted at every level, independent of the
/// map representation `serde_json` was built with.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
