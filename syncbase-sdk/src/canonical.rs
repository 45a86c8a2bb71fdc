//! Canonical encoding for action payloads.
//!
//! The signed bytes for an action are the JCS-style canonicalization (RFC
//! 8785 shape: object keys sorted lexicographically, no insignificant
//! whitespace) of the payload with its `timestamp` field removed. Removing
//! `timestamp` lets a peer stamp an action locally without re-signing it —
//! `timestamp` is advisory, not authenticated (see `crypto::create_signed_action`).

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonicalize a value to its JCS-shaped string form.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    Ok(canonicalize_value(&v))
}

/// Canonicalize a payload for signing: same as [`canonicalize`] but with the
/// top-level `timestamp` key elided first.
pub fn canonicalize_for_signing<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut v = serde_json::to_value(value)?;
    if let Value::Object(ref mut map) = v {
        map.remove("timestamp");
    }
    Ok(canonicalize_value(&v).into_bytes())
}

fn canonicalize_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let mut out = String::from("{");
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(k).expect("string key always serializes"));
                out.push(':');
                out.push_str(&canonicalize_value(v));
            }
            out.push('}');
            out
        }
        Value::Array(arr) => {
            let mut out = String::from("[");
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize_value(v));
            }
            out.push(']');
            out
        }
        _ => serde_json::to_string(value).expect("primitive always serializes"),
    }
}

/// SHA-256 of the canonical form (hex-encoded).
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
