//! Signature collection.
//!
//! Every signer signs the transaction id bytes. Signatures accumulate in a
//! [`SignatureSet`] keyed by signer public key, which only ever grows and
//! only admits keys the command names. The initiating node additionally
//! attaches an [`OriginAttestation`] made with its identity key. The
//! attestation sits next to the set, never inside it, so a fully signed set
//! holds exactly the command's signers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::builder::ProposedTransaction;
use crate::crypto::keys::{ConcordPublicKey, ConcordSignature};
use crate::identity::{KeyManagementService, KmsError, NodeIdentity};

/// Domain tag for origin attestations, so an attestation can never be
/// replayed as a transaction signature.
const ORIGIN_DOMAIN: &[u8] = b"concord/origin/";

// ---------------------------------------------------------------------------
// TransactionSignature
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub by: ConcordPublicKey,
    pub signature: ConcordSignature,
}

impl TransactionSignature {
    /// Sign `tx` with `key` held by `kms`.
    pub fn create(
        tx: &ProposedTransaction,
        key: &ConcordPublicKey,
        kms: &dyn KeyManagementService,
    ) -> Result<Self, KmsError> {
        let signature = kms.sign(key, tx.id.as_bytes())?;
        Ok(Self {
            by: key.clone(),
            signature,
        })
    }

    pub fn is_valid_for(&self, tx_id: &str) -> bool {
        self.by.verify(tx_id.as_bytes(), &self.signature)
    }
}

// ---------------------------------------------------------------------------
// SignatureSet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureSetError {
    #[error("signer {0} is not required by the command")]
    UnexpectedSigner(String),

    #[error("signature by {0} does not verify")]
    InvalidSignature(String),
}

/// Signatures over one transaction, one per required signer key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSet {
    signatures: BTreeMap<ConcordPublicKey, TransactionSignature>,
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `sig` after checking it against `tx`.
    ///
    /// A second signature by the same key replaces the first, so merging is
    /// idempotent per signer. Ed25519 signatures are deterministic, so a
    /// repeated merge leaves the set unchanged.
    pub fn merge(
        &mut self,
        tx: &ProposedTransaction,
        sig: TransactionSignature,
    ) -> Result<(), SignatureSetError> {
        if !tx.command.requires(&sig.by) {
            return Err(SignatureSetError::UnexpectedSigner(sig.by.to_hex()));
        }
        if !sig.is_valid_for(&tx.id) {
            return Err(SignatureSetError::InvalidSignature(sig.by.to_hex()));
        }
        self.signatures.insert(sig.by.clone(), sig);
        Ok(())
    }

    /// Merge several, stopping at the first bad one.
    pub fn merge_all(
        &mut self,
        tx: &ProposedTransaction,
        sigs: impl IntoIterator<Item = TransactionSignature>,
    ) -> Result<(), SignatureSetError> {
        for sig in sigs {
            self.merge(tx, sig)?;
        }
        Ok(())
    }

    /// Required signers with no signature yet.
    pub fn missing(&self, tx: &ProposedTransaction) -> Vec<ConcordPublicKey> {
        tx.command
            .signers
            .iter()
            .filter(|key| !self.signatures.contains_key(key))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self, tx: &ProposedTransaction) -> bool {
        self.missing(tx).is_empty()
    }

    /// Re-check every signature. Used by receivers that did not build the set.
    pub fn verify_all(&self, tx: &ProposedTransaction) -> Result<(), SignatureSetError> {
        for (key, sig) in &self.signatures {
            if key != &sig.by || !tx.command.requires(key) {
                return Err(SignatureSetError::UnexpectedSigner(key.to_hex()));
            }
            if !sig.is_valid_for(&tx.id) {
                return Err(SignatureSetError::InvalidSignature(key.to_hex()));
            }
        }
        Ok(())
    }

    pub fn signers(&self) -> impl Iterator<Item = &ConcordPublicKey> {
        self.signatures.keys()
    }

    pub fn get(&self, key: &ConcordPublicKey) -> Option<&TransactionSignature> {
        self.signatures.get(key)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// OriginAttestation
// ---------------------------------------------------------------------------

/// The initiating node vouching for a proposal with its identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginAttestation {
    pub node: NodeIdentity,
    pub signature: ConcordSignature,
}

impl OriginAttestation {
    fn message(tx_id: &str) -> Vec<u8> {
        let mut msg = ORIGIN_DOMAIN.to_vec();
        msg.extend_from_slice(tx_id.as_bytes());
        msg
    }

    pub fn create(
        tx: &ProposedTransaction,
        node: NodeIdentity,
        kms: &dyn KeyManagementService,
    ) -> Result<Self, KmsError> {
        let signature = kms.sign(&node.owning_key, &Self::message(&tx.id))?;
        Ok(Self { node, signature })
    }

    pub fn is_valid_for(&self, tx_id: &str) -> bool {
        self.node
            .owning_key
            .verify(&Self::message(tx_id), &self.signature)
    }
}

// ---------------------------------------------------------------------------
// SignedTransaction
// ---------------------------------------------------------------------------

/// A proposal travelling with its signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub proposal: ProposedTransaction,
    pub signatures: SignatureSet,
    pub attestation: OriginAttestation,
}

impl SignedTransaction {
    pub fn id(&self) -> &str {
        &self.proposal.id
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signatures.is_complete(&self.proposal)
    }

    pub fn missing_signers(&self) -> Vec<ConcordPublicKey> {
        self.signatures.missing(&self.proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::ConcordKeypair;
    use crate::identity::{InMemoryKeyManager, NodeName, PseudonymousIdentity};
    use crate::transaction::builder::tests::notary_ref;
    use crate::transaction::builder::TransitionBuilder;
    use uuid::Uuid;

    struct Fixture {
        kms: InMemoryKeyManager,
        tx: ProposedTransaction,
        source_key: ConcordPublicKey,
        target_key: ConcordPublicKey,
    }

    fn fixture() -> Fixture {
        let kms = InMemoryKeyManager::new(ConcordKeypair::generate());
        let source_key = kms.fresh_key(Uuid::new_v4());
        let target_key = kms.fresh_key(Uuid::new_v4());
        let tx = TransitionBuilder::new(notary_ref())
            .source(PseudonymousIdentity {
                account_id: Uuid::new_v4(),
                owning_key: source_key.clone(),
                host: NodeName::from("A"),
            })
            .target(PseudonymousIdentity {
                account_id: Uuid::new_v4(),
                owning_key: target_key.clone(),
                host: NodeName::from("B"),
            })
            .assemble()
            .unwrap();
        Fixture {
            kms,
            tx,
            source_key,
            target_key,
        }
    }

    #[test]
    fn merge_is_idempotent_per_signer() {
        let f = fixture();
        let sig = TransactionSignature::create(&f.tx, &f.source_key, &f.kms).unwrap();

        let mut once = SignatureSet::new();
        once.merge(&f.tx, sig.clone()).unwrap();

        let mut twice = SignatureSet::new();
        twice.merge(&f.tx, sig.clone()).unwrap();
        twice.merge(&f.tx, sig).unwrap();

        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn complete_set_holds_exactly_the_command_signers() {
        let f = fixture();
        let mut set = SignatureSet::new();
        assert_eq!(set.missing(&f.tx).len(), 2);

        set.merge(&f.tx, TransactionSignature::create(&f.tx, &f.target_key, &f.kms).unwrap())
            .unwrap();
        assert!(!set.is_complete(&f.tx));
        assert_eq!(set.missing(&f.tx), vec![f.source_key.clone()]);

        set.merge(&f.tx, TransactionSignature::create(&f.tx, &f.source_key, &f.kms).unwrap())
            .unwrap();
        assert!(set.is_complete(&f.tx));

        let signers: Vec<_> = set.signers().cloned().collect();
        assert_eq!(signers, f.tx.command.signers);
        assert!(set.verify_all(&f.tx).is_ok());
    }

    #[test]
    fn unexpected_signer_is_refused() {
        let f = fixture();
        let identity = f.kms.identity_key();
        let sig = TransactionSignature::create(&f.tx, &identity, &f.kms).unwrap();

        let mut set = SignatureSet::new();
        assert!(matches!(
            set.merge(&f.tx, sig),
            Err(SignatureSetError::UnexpectedSigner(_))
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn signature_over_other_transaction_is_refused() {
        let f = fixture();
        let other = TransitionBuilder::new(notary_ref())
            .source(PseudonymousIdentity {
                account_id: Uuid::new_v4(),
                owning_key: f.source_key.clone(),
                host: NodeName::from("A"),
            })
            .target(PseudonymousIdentity {
                account_id: Uuid::new_v4(),
                owning_key: f.target_key.clone(),
                host: NodeName::from("B"),
            })
            .assemble()
            .unwrap();
        let foreign = TransactionSignature::create(&other, &f.source_key, &f.kms).unwrap();

        let mut set = SignatureSet::new();
        assert!(matches!(
            set.merge(&f.tx, foreign),
            Err(SignatureSetError::InvalidSignature(_))
        ));
    }

    #[test]
    fn attestation_verifies_only_for_its_transaction() {
        let f = fixture();
        let node = NodeIdentity {
            name: NodeName::from("A"),
            owning_key: f.kms.identity_key(),
        };
        let attestation = OriginAttestation::create(&f.tx, node, &f.kms).unwrap();

        assert!(attestation.is_valid_for(&f.tx.id));
        assert!(!attestation.is_valid_for("ff"));
    }
}
