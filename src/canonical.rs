//! Canonical serialization for deterministic hashing.
//!
//! This module provides functions to serialize data in a canonical, deterministic format
//! suitable for scope keys, data cursors and persisted conflict identities.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: Struct fields serialize in declaration order
//! - Stable Vec order: Vectors serialize in index order
//! - No HashMap allowed: Use BTreeMap for maps in hashed data
//! - Stable float format: floats are quantized before they enter a hash

use serde::Serialize;
use sha2::{Digest, Sha256};
use xxhash_rust::xxh64::xxh64;

/// Quantization factor for float normalization.
/// Floats are multiplied by this value and rounded to i64.
const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

/// Serialize a value to canonical JSON bytes for hashing.
///
/// Every hashed type in this crate is a plain struct of strings, integers and
/// ordered collections, so serialization cannot fail.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("Canonical serialization failed")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = to_canonical_bytes(value);
    xxh64(&bytes, 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

/// SHA-256 of raw bytes as lowercase hex.
///
/// Used for identifiers that are persisted outside the process and must stay
/// stable across releases.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Quantize a float to an i64 for deterministic hashing.
///
/// NaN quantizes to zero.
pub fn quantize(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    (value * FLOAT_QUANTIZATION_FACTOR).round() as i64
}

/// Round a derived metric to the quantization grid.
///
/// Derived metrics are rounded before they are stored so that floating-point
/// noise from summation order never leaks into snapshot bytes.
pub fn round_metric(value: f64) -> f64 {
    quantize(value) as f64 / FLOAT_QUANTIZATION_FACTOR
}
