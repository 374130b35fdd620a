//! Stable hashing helpers for definitions, reports, and key-based row routing.

use blake3::Hasher;
use serde::Serialize;

use crate::types::{type_rank, Row, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    let out = h.finalize();
    Hash256(out.into())
}

/// Hash any serde-serializable value deterministically (via JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, crate::error::Error> {
    let bytes = serde_json::to_vec(v).map_err(|e| crate::error::Error::Hash(e.to_string()))?;
    Ok(hash_bytes(&bytes))
}

/// Hash the values at `key_indices` of a row into a 64-bit routing key.
///
/// Identical key values always produce the same result, independent of the
/// process, so copies of a downstream step see stable key affinity.
/// Indices beyond the row's arity hash as nulls.
pub fn hash_row_key(row: &Row, key_indices: &[usize]) -> u64 {
    let mut hasher = Hasher::new();
    for &idx in key_indices {
        hash_value(row.get(idx).unwrap_or(&Value::Null), &mut hasher);
    }
    let hash = hasher.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(first)
}

fn hash_value(value: &Value, hasher: &mut Hasher) {
    // Discriminant first so that e.g. Integer(1) and Date(1) differ.
    hasher.update(&[type_rank(value)]);

    match value {
        Value::Null => {}
        Value::String(s) | Value::BigNumber(s) => {
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Integer(i) | Value::Date(i) => {
            hasher.update(&i.to_le_bytes());
        }
        Value::Number(f) => {
            hasher.update(&f.to_bits().to_le_bytes());
        }
        Value::Boolean(b) => {
            hasher.update(&[*b as u8]);
        }
        Value::Binary(b) => {
            hasher.update(&(b.len() as u64).to_le_bytes());
            hasher.update(b);
        }
        Value::Serializable(v) => {
            let text = v.to_string();
            hasher.update(&(text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
    }
}
