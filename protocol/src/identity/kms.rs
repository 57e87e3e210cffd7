//! Key management service.
//!
//! Holds the node identity key and every pseudonym key the node has
//! minted for its own accounts. It also remembers which account a
//! *remote* pseudonym belongs to once a counterparty has told us, so the
//! vault can answer "records involving account X" regardless of which key
//! represented X.

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::keys::{ConcordKeypair, ConcordPublicKey, ConcordSignature};

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("no private key held for {0}")]
    UnknownKey(String),
}

/// The node's signing capability.
pub trait KeyManagementService: Send + Sync {
    /// The node identity public key.
    fn identity_key(&self) -> ConcordPublicKey;

    /// Mint a new pseudonym key for `account`.
    fn fresh_key(&self, account: Uuid) -> ConcordPublicKey;

    /// Sign `message` with the private half of `key`.
    fn sign(&self, key: &ConcordPublicKey, message: &[u8]) -> Result<ConcordSignature, KmsError>;

    /// `true` if this node holds the private half of `key`.
    fn owns(&self, key: &ConcordPublicKey) -> bool;

    /// Record that `key` represents `account` (used for remote pseudonyms).
    fn register_external(&self, key: ConcordPublicKey, account: Uuid);

    /// The account a key was minted or registered for.
    fn account_for_key(&self, key: &ConcordPublicKey) -> Option<Uuid>;
}

/// Keys in memory. Good for tests and the in-process network.
pub struct InMemoryKeyManager {
    identity: ConcordKeypair,
    keys: DashMap<ConcordPublicKey, ConcordKeypair>,
    owners: DashMap<ConcordPublicKey, Uuid>,
}

impl InMemoryKeyManager {
    pub fn new(identity: ConcordKeypair) -> Self {
        let keys = DashMap::new();
        keys.insert(identity.public_key(), identity.clone());
        Self {
            identity,
            keys,
            owners: DashMap::new(),
        }
    }

    /// Number of keys with private material, identity key included.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

impl KeyManagementService for InMemoryKeyManager {
    fn identity_key(&self) -> ConcordPublicKey {
        self.identity.public_key()
    }

    fn fresh_key(&self, account: Uuid) -> ConcordPublicKey {
        let keypair = ConcordKeypair::generate();
        let public = keypair.public_key();
        self.keys.insert(public.clone(), keypair);
        self.owners.insert(public.clone(), account);
        public
    }

    fn sign(&self, key: &ConcordPublicKey, message: &[u8]) -> Result<ConcordSignature, KmsError> {
        self.keys
            .get(key)
            .map(|kp| kp.sign(message))
            .ok_or_else(|| KmsError::UnknownKey(key.to_hex()))
    }

    fn owns(&self, key: &ConcordPublicKey) -> bool {
        self.keys.contains_key(key)
    }

    fn register_external(&self, key: ConcordPublicKey, account: Uuid) {
        self.owners.insert(key, account);
    }

    fn account_for_key(&self, key: &ConcordPublicKey) -> Option<Uuid> {
        self.owners.get(key).map(|entry| *entry.value())
    }
}
