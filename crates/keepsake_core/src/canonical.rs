//! Deterministic canonicalization and content hashing.
//!
//! Two structurally equal JSON payloads must hash to the same value
//! regardless of object key order, so object keys are sorted
//! lexicographically (recursively) before serialization. Arrays preserve
//! order, `null` serializes as the literal `null`, and absent fields are
//! simply absent. The canonical UTF-8 bytes are hashed with SHA-256 and
//! emitted as lowercase hex.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// An opaque payload held by the content store.
///
/// The core never interprets payload contents; JSON payloads exist as a
/// distinct variant only so they can be canonicalized before hashing.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Bytes(Vec<u8>),
}

impl Payload {
    /// The canonical byte form used for hashing and persistence.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Payload::Json(value) => Ok(canonicalize(value)?.into_bytes()),
            Payload::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Storage format tag (`json` or `bytes`).
    pub fn format(&self) -> &'static str {
        match self {
            Payload::Json(_) => "json",
            Payload::Bytes(_) => "bytes",
        }
    }

    /// Rebuild a payload from its stored format tag and bytes.
    ///
    /// Unknown tags fall back to raw bytes rather than failing, so a
    /// store written by a newer version stays readable.
    pub fn from_stored(format: &str, bytes: Vec<u8>) -> Result<Self> {
        match format {
            "json" => Ok(Payload::Json(serde_json::from_slice(&bytes)?)),
            _ => Ok(Payload::Bytes(bytes)),
        }
    }
}

/// Serialize a JSON value in canonical form: object keys sorted
/// lexicographically at every depth, array order preserved.
pub fn canonicalize(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&sort_keys(value))?)
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// SHA-256 of raw bytes as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// SHA-256 of a payload's canonical bytes as lowercase hex.
pub fn hash_payload(payload: &Payload) -> Result<String> {
    Ok(hash_bytes(&payload.canonical_bytes()?))
}
