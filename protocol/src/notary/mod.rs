//! # Notary Module
//!
//! The ordering service: the authoritative arbiter of uniqueness. A
//! transaction is final once its notary has atomically committed its
//! inputs and claims and issued a signed [`NotaryReceipt`]. Any later
//! transaction touching a committed key is rejected with
//! [`NotaryError::Conflict`] naming the transaction that holds it.
//!
//! Flows only see the [`OrderingService`] trait. [`UniquenessNotary`] is a
//! single-node implementation on sled.

pub mod service;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::NodeName;
use crate::storage::DbError;
use crate::transaction::{NotaryReceipt, NotaryRef, SignatureSetError, SignedTransaction};

pub use service::UniquenessNotary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotarisationRequest {
    pub transaction: SignedTransaction,
    pub requested_by: NodeName,
}

#[derive(Debug, Error)]
pub enum NotaryError {
    #[error("transaction names notary {requested}, this is {actual}")]
    WrongNotary { requested: String, actual: String },

    #[error("{0} required signature(s) missing")]
    IncompleteSignatures(usize),

    #[error("invalid signatures: {0}")]
    InvalidSignatures(#[from] SignatureSetError),

    #[error("malformed transaction: {0}")]
    Malformed(String),

    /// Another transaction already committed `key`.
    #[error("{key} already committed by {conflicting_tx}")]
    Conflict { key: String, conflicting_tx: String },

    #[error("notary storage: {0}")]
    Storage(#[from] DbError),
}

/// An atomic commit service for transactions.
#[async_trait]
pub trait OrderingService: Send + Sync {
    fn identity(&self) -> NotaryRef;

    /// Commit the request's inputs and claims, or reject on conflict.
    async fn commit(&self, request: NotarisationRequest) -> Result<NotaryReceipt, NotaryError>;
}
