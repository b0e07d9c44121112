//! # Stable JSON Hashing
//!
//! The canonical identity of a message's data portion: keys sorted
//! lexicographically at every depth, no insignificant whitespace,
//! standard JSON number formatting, hashed with SHA-256 and emitted as
//! lowercase hex.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Deep-copy a JSON value with every object's keys in lexicographic
/// order.
///
/// `serde_json`'s default map is ordered, so rebuilding each object is
/// enough; the copy also protects against callers that assembled maps
/// through a preserve-order build elsewhere.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                out.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// The stable serialization of a JSON value.
#[must_use]
pub fn stable_json_string(value: &Value) -> String {
    // Serializing a Value cannot fail: keys are strings by construction.
    serde_json::to_string(&canonicalize(value)).expect("JSON value serialization is infallible")
}

/// Lowercase hex SHA-256 of raw bytes.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Lowercase hex SHA-256 of a value's stable serialization.
#[must_use]
pub fn stable_hash_hex(value: &Value) -> String {
    sha256_hex(stable_json_string(value).as_bytes())
}
