//! # Key Management Primitives
//!
//! Ed25519 keypairs, public keys and signatures for Concord.
//!
//! Three kinds of keys flow through the protocol, all of them plain
//! Ed25519 underneath:
//!
//! - **Node identity keys**: long-lived, one per node. They sign the
//!   origin attestation on every transaction a node initiates.
//! - **Pseudonym keys**: single-use, one per account per transition. They
//!   are the keys named in a transition's authorization command.
//! - **Notary keys**: sign commit receipts.
//!
//! Secret key bytes are never logged and `ConcordKeypair` does not
//! implement `Serialize`. Exporting key material is an explicit call.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while parsing or reconstructing keys.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: expected {SECRET_KEY_LENGTH} bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature bytes: expected 64 bytes")]
    InvalidSignature,
}

/// An Ed25519 signing keypair.
///
/// Cloning is allowed because the key manager hands out signing handles to
/// the flow, but every clone is another copy of secret material.
pub struct ConcordKeypair {
    signing_key: SigningKey,
}

/// The public half of a keypair. Ordered so it can key a `BTreeMap`,
/// which keeps signature sets and signer lists deterministic. Serialized
/// as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConcordPublicKey {
    bytes: [u8; 32],
}

/// A 64-byte Ed25519 signature.
///
/// Serialized as lowercase hex. A signature of the wrong length simply
/// fails verification.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConcordSignature {
    bytes: Vec<u8>,
}

impl ConcordKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Used by tests and by the
    /// node when it loads a persisted identity key.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a hex-encoded 32-byte secret key.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; SECRET_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// The public key for this keypair.
    pub fn public_key(&self) -> ConcordPublicKey {
        ConcordPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign arbitrary bytes. Ed25519 signing is deterministic.
    pub fn sign(&self, message: &[u8]) -> ConcordSignature {
        let sig = self.signing_key.sign(message);
        ConcordSignature {
            bytes: sig.to_bytes().to_vec(),
        }
    }

    /// Verify a signature against this keypair's public key.
    pub fn verify(&self, message: &[u8], signature: &ConcordSignature) -> bool {
        self.public_key().verify(message, signature)
    }

    /// Export the raw secret key. Handle with care.
    pub fn secret_key_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes()
    }
}

impl Clone for ConcordKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for ConcordKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConcordKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// ConcordPublicKey
// ---------------------------------------------------------------------------

impl ConcordPublicKey {
    /// Wrap raw bytes without point validation.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Parse and validate a public key from a byte slice.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verify `signature` over `message`. Any malformed input is `false`.
    pub fn verify(&self, message: &[u8], signature: &ConcordSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Some(dalek_sig) = signature.to_dalek_signature() else {
            return false;
        };
        verifying_key.verify(message, &dalek_sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse a hex-encoded public key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }

    /// Base58 form, used as the short display name of a pseudonym.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.bytes).into_string()
    }
}

impl fmt::Display for ConcordPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ConcordPublicKey {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<ConcordPublicKey> for String {
    fn from(key: ConcordPublicKey) -> Self {
        key.to_hex()
    }
}

impl fmt::Debug for ConcordPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConcordPublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// ConcordSignature
// ---------------------------------------------------------------------------

impl ConcordSignature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `None` if the stored bytes are not exactly 64 long.
    pub fn to_dalek_signature(&self) -> Option<DalekSignature> {
        let arr: [u8; 64] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidSignature)?;
        if bytes.len() != 64 {
            return Err(KeyError::InvalidSignature);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Display for ConcordSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ConcordSignature {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<ConcordSignature> for String {
    fn from(sig: ConcordSignature) -> Self {
        sig.to_hex()
    }
}

impl fmt::Debug for ConcordSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        if hex_str.len() >= 128 {
            write!(f, "ConcordSignature({}...{})", &hex_str[..8], &hex_str[120..])
        } else {
            write!(f, "ConcordSignature({})", hex_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = ConcordKeypair::generate();
        let sig = kp.sign(b"start transition");
        assert!(kp.verify(b"start transition", &sig));
        assert!(!kp.verify(b"end transition", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = ConcordKeypair::generate();
        let kp2 = ConcordKeypair::generate();
        let sig = kp1.sign(b"message");
        assert!(!kp2.public_key().verify(b"message", &sig));
    }

    #[test]
    fn seed_is_deterministic() {
        let seed = [7u8; 32];
        assert_eq!(
            ConcordKeypair::from_seed(&seed).public_key(),
            ConcordKeypair::from_seed(&seed).public_key()
        );
    }

    #[test]
    fn secret_key_hex_roundtrip() {
        let kp = ConcordKeypair::generate();
        let restored = ConcordKeypair::from_hex(&hex::encode(kp.secret_key_bytes())).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
        assert!(ConcordKeypair::from_hex("deadbeef").is_err());
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let pk = ConcordKeypair::generate().public_key();
        assert_eq!(ConcordPublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
    }

    #[test]
    fn public_key_rejects_wrong_length() {
        assert!(ConcordPublicKey::try_from_slice(&[0u8; 16]).is_err());
    }

    #[test]
    fn truncated_signature_fails_without_panicking() {
        let kp = ConcordKeypair::generate();
        let sig = ConcordSignature { bytes: vec![1, 2, 3] };
        assert!(!kp.verify(b"anything", &sig));
        assert!(ConcordSignature::from_hex("abcd").is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = ConcordKeypair::generate();
        let debug = format!("{:?}", kp);
        assert!(debug.starts_with("ConcordKeypair(pub="));
        assert!(!debug.contains(&hex::encode(kp.secret_key_bytes())));
    }

    #[test]
    fn keys_and_signatures_serialize_as_hex() {
        let kp = ConcordKeypair::generate();
        let pk = kp.public_key();
        let sig = kp.sign(b"m");

        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", pk.to_hex()));
        assert_eq!(serde_json::from_str::<ConcordPublicKey>(&json).unwrap(), pk);

        let json = serde_json::to_string(&sig).unwrap();
        assert_eq!(serde_json::from_str::<ConcordSignature>(&json).unwrap(), sig);
        assert!(serde_json::from_str::<ConcordSignature>("\"00\"").is_err());
    }

    #[test]
    fn public_keys_order_by_bytes() {
        let low = ConcordPublicKey::from_bytes([0u8; 32]);
        let high = ConcordPublicKey::from_bytes([0xFF; 32]);
        assert!(low < high);
    }
}
