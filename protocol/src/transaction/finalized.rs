//! Notarised transactions.
//!
//! A [`NotaryReceipt`] is the ordering service's signed statement that it
//! committed a transaction's inputs and claims. Paired with a fully signed
//! transaction it forms a [`FinalizedTransaction`], the immutable artifact
//! every participant and observer stores.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::signing::{SignatureSetError, SignedTransaction};
use super::types::NotaryRef;
use crate::crypto::hash::blake3_hash;
use crate::crypto::keys::{ConcordKeypair, ConcordSignature};

const RECEIPT_DOMAIN: &[u8] = b"concord/notary/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotaryReceipt {
    pub tx_id: String,
    pub notary: NotaryRef,
    /// Unix timestamp in milliseconds.
    pub committed_at: i64,
    pub signature: ConcordSignature,
}

impl NotaryReceipt {
    fn digest(tx_id: &str, committed_at: i64) -> [u8; 32] {
        let mut buf = RECEIPT_DOMAIN.to_vec();
        buf.extend_from_slice(tx_id.as_bytes());
        buf.extend_from_slice(&committed_at.to_le_bytes());
        blake3_hash(&buf)
    }

    /// Issue a receipt. `keypair` must be the key named in `notary`.
    pub fn issue(tx_id: &str, notary: NotaryRef, committed_at: i64, keypair: &ConcordKeypair) -> Self {
        let signature = keypair.sign(&Self::digest(tx_id, committed_at));
        Self {
            tx_id: tx_id.to_string(),
            notary,
            committed_at,
            signature,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.notary
            .key
            .verify(&Self::digest(&self.tx_id, self.committed_at), &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinalityCheckError {
    #[error("signature set incomplete, missing {0} signer(s)")]
    Incomplete(usize),

    #[error(transparent)]
    Signatures(#[from] SignatureSetError),

    #[error("origin attestation does not verify")]
    BadAttestation,

    #[error("receipt is for {receipt}, transaction is {tx}")]
    ReceiptMismatch { receipt: String, tx: String },

    #[error("receipt issued by {issuer}, transaction names {pinned}")]
    WrongNotary { issuer: String, pinned: String },

    #[error("receipt signature does not verify")]
    BadReceipt,
}

/// Fully signed transaction plus the notary's receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedTransaction {
    pub signed: SignedTransaction,
    pub receipt: NotaryReceipt,
}

impl FinalizedTransaction {
    pub fn id(&self) -> &str {
        self.signed.id()
    }

    /// Everything a receiver must check before storing.
    pub fn verify(&self) -> Result<(), FinalityCheckError> {
        let proposal = &self.signed.proposal;

        let missing = self.signed.missing_signers();
        if !missing.is_empty() {
            return Err(FinalityCheckError::Incomplete(missing.len()));
        }
        self.signed.signatures.verify_all(proposal)?;

        if !self.signed.attestation.is_valid_for(&proposal.id) {
            return Err(FinalityCheckError::BadAttestation);
        }

        if self.receipt.tx_id != proposal.id {
            return Err(FinalityCheckError::ReceiptMismatch {
                receipt: self.receipt.tx_id.clone(),
                tx: proposal.id.clone(),
            });
        }
        if self.receipt.notary != proposal.notary {
            return Err(FinalityCheckError::WrongNotary {
                issuer: self.receipt.notary.name.to_string(),
                pinned: proposal.notary.name.to_string(),
            });
        }
        if !self.receipt.is_valid() {
            return Err(FinalityCheckError::BadReceipt);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeName;

    fn notary() -> (NotaryRef, ConcordKeypair) {
        let keypair = ConcordKeypair::generate();
        (
            NotaryRef {
                name: NodeName::from("O=Notary"),
                key: keypair.public_key(),
            },
            keypair,
        )
    }

    #[test]
    fn receipt_verifies_with_issuing_key() {
        let (notary, keypair) = notary();
        let receipt = NotaryReceipt::issue("abcd", notary, 42, &keypair);
        assert!(receipt.is_valid());
    }

    #[test]
    fn receipt_with_altered_fields_fails() {
        let (notary, keypair) = notary();
        let mut receipt = NotaryReceipt::issue("abcd", notary, 42, &keypair);
        receipt.committed_at = 43;
        assert!(!receipt.is_valid());

        // Signed by a key other than the one the receipt names.
        let (other, _) = self::notary();
        let receipt = NotaryReceipt::issue("abcd", other, 42, &keypair);
        assert!(!receipt.is_valid());
    }
}
