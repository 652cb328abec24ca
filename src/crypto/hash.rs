//! Content addressing and key-derivation hashes
//!
//! All hashes are SHA-256 with a domain prefix so that a digest computed for
//! one purpose can never be replayed as another:
//! - log entry content addresses over RFC 8785 canonical JSON
//! - identity addresses derived from public keys
//! - deterministic key seeds derived from arbitrary-length key material
//!
//! JSON canonicalization uses `serde_json_canonicalizer` so that the same
//! entry hashes identically on every replica regardless of key order.

use sha2::{Digest, Sha256};

/// 32-byte SHA-256 hash
pub type Hash256 = [u8; 32];

// ============================================================================
// Domain Separation Constants
// ============================================================================

/// Domain prefix for log entry content addresses
pub const DOMAIN_ENTRY: &[u8] = b"EVENTLOG_ENTRY_V1";

/// Domain prefix for identity address derivation
pub const DOMAIN_ADDRESS: &[u8] = b"EVENTLOG_ADDRESS_V1";

/// Domain prefix for stretching non-32-byte key material into a seed
pub const DOMAIN_KEY_SEED: &[u8] = b"EVENTLOG_KEY_SEED_V1";

/// Number of hash bytes kept in an identity address
pub const ADDRESS_LENGTH: usize = 20;

// ============================================================================
// Canonical JSON (RFC 8785 JCS)
// ============================================================================

/// Convert a JSON value to its RFC 8785 canonical string.
///
/// Fails only for values that have no canonical form (non-finite floats),
/// which `serde_json::Value` cannot normally hold.
pub fn canonicalize_json(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    serde_json_canonicalizer::to_string(value)
}

/// SHA-256 of the canonical JSON form, no domain prefix
pub fn canonical_json_hash(value: &serde_json::Value) -> Result<Hash256, serde_json::Error> {
    let canonical = canonicalize_json(value)?;
    Ok(sha256(canonical.as_bytes()))
}

/// Content address of a log entry.
///
/// Preimage: `DOMAIN_ENTRY || JCS({"author", "clock", "payload"})`
pub fn entry_hash(
    payload: &serde_json::Value,
    author: &str,
    clock: u64,
) -> Result<Hash256, serde_json::Error> {
    let preimage = serde_json::json!({
        "author": author,
        "clock": clock,
        "payload": payload,
    });
    let canonical = canonicalize_json(&preimage)?;

    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_ENTRY);
    hasher.update(canonical.as_bytes());
    Ok(hasher.finalize().into())
}

// ============================================================================
// Identity Derivation
// ============================================================================

/// Stable address of a public key: `0x` + hex of the first 20 hash bytes
pub fn address_from_public_key(public_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_ADDRESS);
    hasher.update(public_key);
    let digest: Hash256 = hasher.finalize().into();
    format!("0x{}", hex::encode(&digest[..ADDRESS_LENGTH]))
}

/// Deterministic 32-byte seed from key material of any length.
///
/// Material that is already 32 bytes is used as is.
pub fn derive_key_seed(material: &[u8]) -> Hash256 {
    if let Ok(seed) = <Hash256>::try_from(material) {
        return seed;
    }
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_KEY_SEED);
    hasher.update((material.len() as u32).to_be_bytes());
    hasher.update(material);
    hasher.finalize().into()
}

/// Hash raw bytes with SHA-256 (no domain prefix)
pub fn sha256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_key_ordering() {
        let value = json!({"zebra": 1, "apple": 2, "nested": {"b": 1, "a": 2}});
        let canonical = canonicalize_json(&value).unwrap();
        assert_eq!(canonical, r#"{"apple":2,"nested":{"a":2,"b":1},"zebra":1}"#);
    }

    #[test]
    fn test_entry_hash_ignores_key_order() {
        let a = json!({"data": {"x": 1, "y": 2}, "timestamp": 10});
        let b = json!({"timestamp": 10, "data": {"y": 2, "x": 1}});
        assert_eq!(
            entry_hash(&a, "0xabc", 1).unwrap(),
            entry_hash(&b, "0xabc", 1).unwrap()
        );
    }

    #[test]
    fn test_entry_hash_binds_author_and_clock() {
        let payload = json!({"data": 1});
        let base = entry_hash(&payload, "0xabc", 1).unwrap();
        assert_ne!(base, entry_hash(&payload, "0xdef", 1).unwrap());
        assert_ne!(base, entry_hash(&payload, "0xabc", 2).unwrap());
    }

    #[test]
    fn test_entry_hash_is_domain_separated() {
        let payload = json!({"data": 1});
        let plain = canonical_json_hash(&json!({
            "author": "0xabc",
            "clock": 1,
            "payload": payload,
        }))
        .unwrap();
        assert_ne!(plain, entry_hash(&payload, "0xabc", 1).unwrap());
    }

    #[test]
    fn test_address_format() {
        let address = address_from_public_key(&[7u8; 32]);
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 2 + ADDRESS_LENGTH * 2);
        assert_eq!(address, address_from_public_key(&[7u8; 32]));
        assert_ne!(address, address_from_public_key(&[8u8; 32]));
    }

    #[test]
    fn test_key_seed_passthrough_and_stretch() {
        let exact = [9u8; 32];
        assert_eq!(derive_key_seed(&exact), exact);

        let short = derive_key_seed(b"short");
        assert_ne!(short, [0u8; 32]);
        assert_eq!(short, derive_key_seed(b"short"));
        assert_ne!(short, derive_key_seed(b"short2"));
    }
}
