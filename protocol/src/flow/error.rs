//! Flow error taxonomy.
//!
//! Everything before full signature collection aborts the run with nothing
//! persisted. From notarisation on, the outcome is final: failures after
//! that point are reported as [`PostCommitException`]s on the outcome and
//! never unwind the committed transaction.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::identity::{KmsError, NodeName};
use crate::network::TransportError;
use crate::notary::NotaryError;
use crate::storage::DbError;
use crate::transaction::{SignatureSetError, VerificationError};

#[derive(Debug, Error)]
pub enum FlowError {
    /// Unknown account or record. Fatal, not retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// The account already has an active transition in the local vault.
    #[error("account {account} already has an active transition")]
    Conflict { account: String },

    /// The local legality check failed. The same input always fails.
    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    /// The counterparty declined.
    #[error("rejected by counterparty: {reason}")]
    Rejected { reason: String },

    /// Signature collection finished without every required signer.
    #[error("{} required signature(s) missing", missing.len())]
    IncompleteSignatures { missing: Vec<String> },

    /// The notary found a conflicting prior commitment.
    #[error("notary rejected transaction: {key} already committed by {conflicting_tx}")]
    ConsensusRejected { conflicting_tx: String, key: String },

    /// One-way delivery to an observer or participant failed.
    #[error("delivery to {node} failed: {reason}")]
    Delivery { node: String, reason: String },

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("notary: {0}")]
    Notary(NotaryError),

    #[error("storage: {0}")]
    Storage(#[from] DbError),

    #[error("key management: {0}")]
    KeyManagement(#[from] KmsError),

    #[error("signature set: {0}")]
    Signatures(#[from] SignatureSetError),

    /// The peer replied with something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<NotaryError> for FlowError {
    fn from(e: NotaryError) -> Self {
        match e {
            NotaryError::Conflict { key, conflicting_tx } => {
                FlowError::ConsensusRejected { conflicting_tx, key }
            }
            other => FlowError::Notary(other),
        }
    }
}

impl FlowError {
    /// Stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Verification(_) => "verification",
            Self::Rejected { .. } => "rejected",
            Self::IncompleteSignatures { .. } => "incomplete_signatures",
            Self::ConsensusRejected { .. } => "consensus_rejected",
            Self::Delivery { .. } => "delivery",
            Self::Transport(_) => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Notary(_) => "notary",
            Self::Storage(_) => "storage",
            Self::KeyManagement(_) => "key_management",
            Self::Signatures(_) => "signatures",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// A failure after the notary committed. Reported, never unwound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostCommitException {
    /// A participant did not acknowledge the finalized transaction.
    Distribution { node: NodeName, reason: String },
    /// The observer did not receive its compliance copy.
    Compliance { observer: NodeName, reason: String },
    /// This node's own vault failed to record the committed transaction.
    LocalRecord { reason: String },
}
