//! Idempotency key derivation.
//!
//! A key is `{tenant}:{call_sid}:{operation}:{sha256(canonical_json(input))}`.
//! The canonicalization step guarantees that semantically identical inputs
//! (regardless of field insertion order, regardless of explicit-null vs
//! absent fields) hash identically, while the tenant/call/operation prefix
//! guarantees two distinct logical operations never collide.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// A fully derived idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Derives a key from its scope and the operation's input payload.
    pub fn derive(tenant: &str, call_sid: &str, operation: &str, input: &Value) -> Self {
        let canonical = canonical_json(input);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(format!("{tenant}:{call_sid}:{operation}:{digest}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serializes a JSON value into its canonical textual form.
///
/// Object members are written in sorted key order, `null` members are
/// dropped (an absent field and an explicit null are the same input), and
/// array element order is preserved.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys are encoded through serde_json for correct escaping.
                out.push_str(&Value::String((*k).clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
