//! Deterministic two-level sharding of entity IDs.
//!
//! Shards are the first two and next two hex digits of a keyed SHA-256 of
//! the entity ID. The key is a per-database secret generated once on first
//! open and persisted alongside the data.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the sharding key in bytes.
pub const KEY_LEN: usize = 32;

/// Generate a fresh sharding key from the OS entropy source.
pub fn generate_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Derive the two shard levels for an entity ID under a key.
pub fn shard(key: &[u8], entity_id: &str) -> (String, String) {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(entity_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    (digest[0..2].to_string(), digest[2..4].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_is_deterministic() {
        let key = vec![7u8; KEY_LEN];
        assert_eq!(shard(&key, "homer"), shard(&key, "homer"));
    }

    #[test]
    fn shard_depends_on_key_and_id() {
        let key_a = vec![1u8; KEY_LEN];
        let key_b = vec![2u8; KEY_LEN];
        assert_ne!(shard(&key_a, "homer"), shard(&key_b, "homer"));
        assert_ne!(shard(&key_a, "homer"), shard(&key_a, "marge"));
    }

    #[test]
    fn shards_are_two_lowercase_hex_digits() {
        let (s1, s2) = shard(&[0u8; KEY_LEN], "x");
        for s in [&s1, &s2] {
            assert_eq!(s.len(), 2);
            assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn shard_matches_prefix_of_keyed_digest() {
        let key = b"0123456789abcdef0123456789abcdef".to_vec();
        let mut hasher = Sha256::new();
        hasher.update(&key);
        hasher.update(b"lisa");
        let digest = hex::encode(hasher.finalize());
        let (s1, s2) = shard(&key, "lisa");
        assert_eq!(format!("{s1}{s2}"), digest[..4]);
    }

    #[test]
    fn generated_keys_are_distinct() {
        let a = generate_key();
        let b = generate_key();
        assert_eq!(a.len(), KEY_LEN);
        assert_ne!(a, b);
    }
}
