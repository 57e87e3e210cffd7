//! # Cryptographic Primitives
//!
//! Thin wrappers over audited implementations:
//!
//! - **Ed25519** (`ed25519-dalek`) for every signature in the protocol:
//!   pseudonym keys, node identity keys and notary keys.
//! - **SHA-256** (`sha2`) for transaction ids (double-hashed).
//! - **BLAKE3** for notary receipt payloads.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, double_sha256, sha256};
pub use keys::{ConcordKeypair, ConcordPublicKey, ConcordSignature, KeyError};
