//! Content checksums and whitespace partitioning.
//!
//! File bytes are stored split into a whitespace prefix, the trimmed body,
//! and a whitespace suffix, so that whitespace-insensitive content queries
//! can index the trimmed body directly. Whitespace classification treats
//! each byte as a Unicode code point.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Checksums over the full and trimmed bytes of a file revision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub length: i64,
    pub trimmed_length: i64,
    pub sha256: Vec<u8>,
    pub trimmed_sha256: Vec<u8>,
}

impl Checksums {
    /// Compute checksums for a byte sequence.
    pub fn compute(data: &[u8]) -> Self {
        let trimmed = trim_bytes(data);
        Self {
            length: data.len() as i64,
            trimmed_length: trimmed.len() as i64,
            sha256: Sha256::digest(data).to_vec(),
            trimmed_sha256: Sha256::digest(trimmed).to_vec(),
        }
    }
}

fn is_space_byte(b: u8) -> bool {
    (b as char).is_whitespace()
}

/// The bytes with leading and trailing whitespace bytes removed.
pub fn trim_bytes(data: &[u8]) -> &[u8] {
    let Some(first) = data.iter().position(|&b| !is_space_byte(b)) else {
        return &[];
    };
    let last = data
        .iter()
        .rposition(|&b| !is_space_byte(b))
        .expect("non-space byte exists");
    &data[first..=last]
}

/// Split bytes into (whitespace prefix, trimmed body, whitespace suffix).
///
/// All-whitespace input goes entirely into the prefix. Concatenating the
/// three parts always reproduces the input exactly.
pub fn partition(data: &[u8]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let Some(first) = data.iter().position(|&b| !is_space_byte(b)) else {
        return (data.to_vec(), Vec::new(), Vec::new());
    };
    let last = data
        .iter()
        .rposition(|&b| !is_space_byte(b))
        .expect("non-space byte exists");
    (
        data[..first].to_vec(),
        data[first..=last].to_vec(),
        data[last + 1..].to_vec(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(parts: &(Vec<u8>, Vec<u8>, Vec<u8>)) -> Vec<u8> {
        let mut out = parts.0.clone();
        out.extend_from_slice(&parts.1);
        out.extend_from_slice(&parts.2);
        out
    }

    #[test]
    fn partition_plain() {
        let parts = partition(b"  hello world \n");
        assert_eq!(parts.0, b"  ");
        assert_eq!(parts.1, b"hello world");
        assert_eq!(parts.2, b" \n");
    }

    #[test]
    fn partition_all_whitespace_goes_to_prefix() {
        let parts = partition(b" \t\n ");
        assert_eq!(parts.0, b" \t\n ");
        assert!(parts.1.is_empty());
        assert!(parts.2.is_empty());
    }

    #[test]
    fn partition_empty() {
        let parts = partition(b"");
        assert!(parts.0.is_empty() && parts.1.is_empty() && parts.2.is_empty());
    }

    #[test]
    fn partition_reassembles() {
        for data in [
            &b"hello"[..],
            b" x ",
            b"\n\nabc\t",
            b"",
            b"   ",
            b"\x00binary\x00 ",
            b"\xffhigh bytes\xfe",
        ] {
            let parts = partition(data);
            assert_eq!(reassemble(&parts), data, "partition of {data:?}");
            assert_eq!(parts.1.as_slice(), trim_bytes(data));
        }
    }

    #[test]
    fn trimmed_has_no_whitespace_edges() {
        let trimmed = trim_bytes(b"\t mid dle \n");
        assert_eq!(trimmed, b"mid dle");
    }

    #[test]
    fn checksums_recompute_both_digests() {
        let c = Checksums::compute(b"  data  ");
        assert_eq!(c.length, 8);
        assert_eq!(c.trimmed_length, 4);
        assert_eq!(c.sha256.len(), 32);
        assert_ne!(c.sha256, c.trimmed_sha256);
        assert_eq!(c.trimmed_sha256, Checksums::compute(b"data").sha256);
    }

    #[test]
    fn empty_checksums_match_empty_digest() {
        let c = Checksums::compute(b"");
        assert_eq!(
            hex::encode(&c.sha256),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(c.sha256, c.trimmed_sha256);
    }
}
