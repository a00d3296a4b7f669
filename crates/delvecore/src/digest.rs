//! Stable non-cryptographic digest over a canonical serialization.
//!
//! This backs the snapshot `world_hash`: two independent servers that agree on
//! the observable state must print the same 8-hex digest. Canonical form is
//! JSON with object keys in ascending order (the default `serde_json::Value`
//! map is ordered) and shortest round-trip numbers.

use serde::Serialize;

const FNV_OFFSET: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut h = FNV_OFFSET;
    for b in bytes {
        h = (h ^ u32::from(*b)).wrapping_mul(FNV_PRIME);
    }
    h
}

/// Digest any serializable value as 8 lowercase hex characters.
///
/// Serialization goes through `serde_json::Value` so struct field order does
/// not leak into the digest; only the values do.
pub fn digest<T: Serialize>(value: &T) -> String {
    let canonical = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
    let text = serde_json::to_string(&canonical).unwrap_or_default();
    format!("{:08x}", fnv1a_32(text.as_bytes()))
}
