//! Hashing helpers.
//!
//! Transaction ids use `double_sha256` over canonical bytes. BLAKE3 hashes
//! notary receipt payloads.

use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `SHA-256(SHA-256(data))`.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// BLAKE3 of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn double_sha256_differs_from_single() {
        assert_ne!(sha256(b"concord"), double_sha256(b"concord"));
        assert_eq!(double_sha256(b"concord"), sha256(&sha256(b"concord")));
    }

    #[test]
    fn blake3_is_deterministic() {
        assert_eq!(blake3_hash(b"receipt"), blake3_hash(b"receipt"));
        assert_ne!(blake3_hash(b"receipt"), blake3_hash(b"receipts"));
    }
}
