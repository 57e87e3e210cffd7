//! Transaction construction via the builder pattern.
//!
//! [`TransitionBuilder`] assembles a [`ProposedTransaction`]: the record,
//! the notary it is pinned to, the authorization command with its signer
//! set and the uniqueness claims. `build()` runs the injected
//! [`LegalityVerifier`] before returning, so an illegal proposal never
//! leaves the node.
//!
//! The builder does not sign. That happens in [`super::signing`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{
    Command, CommandKind, NotaryRef, ResolvedInput, StateRef, TransitionRecord, UniquenessKey,
};
use super::verification::{LegalityVerifier, VerificationError};
use crate::config::TRANSACTION_FORMAT_VERSION;
use crate::crypto::hash::double_sha256;
use crate::crypto::keys::ConcordPublicKey;
use crate::identity::PseudonymousIdentity;

// ---------------------------------------------------------------------------
// ProposedTransaction
// ---------------------------------------------------------------------------

/// A transaction ready for signature collection.
///
/// The `id` is `hex(double_sha256(signable_bytes))`. Every signature is over
/// the id, so any change to any field invalidates every signature already
/// collected. That is what makes the proposal immutable once signing starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedTransaction {
    pub id: String,
    pub version: u16,
    pub notary: NotaryRef,
    pub command: Command,
    /// Prior records consumed. Empty for a creation.
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Vec<TransitionRecord>,
    /// Keys the notary must commit alongside the inputs.
    pub claims: Vec<UniquenessKey>,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl ProposedTransaction {
    /// Canonical bytes for the id.
    ///
    /// Fixed-width little-endian integers and length prefixes. Serde is
    /// not used because field ordering is not guaranteed across formats.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);

        buf.extend_from_slice(&self.version.to_le_bytes());

        buf.extend_from_slice(self.notary.name.as_str().as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(self.notary.key.as_bytes());

        buf.extend_from_slice(self.command.kind.to_string().as_bytes());
        buf.push(0x00);
        buf.extend_from_slice(&(self.command.signers.len() as u32).to_le_bytes());
        for signer in &self.command.signers {
            buf.extend_from_slice(signer.as_bytes());
        }

        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(input.state_ref.tx_id.as_bytes());
            buf.push(0x00);
            buf.extend_from_slice(&input.state_ref.index.to_le_bytes());
            buf.extend_from_slice(&input.record.canonical_bytes());
        }

        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&output.canonical_bytes());
        }

        buf.extend_from_slice(&(self.claims.len() as u32).to_le_bytes());
        for claim in &self.claims {
            let bytes = claim.to_key_bytes();
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(&bytes);
        }

        buf.extend_from_slice(&self.timestamp.to_le_bytes());

        buf
    }

    pub fn compute_id(&self) -> String {
        hex::encode(double_sha256(&self.signable_bytes()))
    }

    /// The record this transaction is about: the new output for a start,
    /// the consumed input for a conclusion.
    pub fn record(&self) -> Option<&TransitionRecord> {
        match self.command.kind {
            CommandKind::Start => self.outputs.first(),
            CommandKind::Conclude => self.inputs.first().map(|input| &input.record),
        }
    }

    /// Reference to output `index` of this transaction.
    pub fn output_ref(&self, index: u32) -> StateRef {
        StateRef::new(self.id.clone(), index)
    }

    pub fn required_signers(&self) -> &[ConcordPublicKey] {
        &self.command.signers
    }

    /// Input refs plus claims: the full set the notary commits.
    pub fn uniqueness_keys(&self) -> Vec<UniquenessKey> {
        self.inputs
            .iter()
            .map(|input| UniquenessKey::State(input.state_ref.clone()))
            .chain(self.claims.iter().cloned())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TransitionBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`ProposedTransaction`].
///
/// ```rust,no_run
/// use concord_protocol::transaction::{StructuralVerifier, TransitionBuilder};
/// # fn demo(notary: concord_protocol::transaction::NotaryRef,
/// #         alice: concord_protocol::identity::PseudonymousIdentity,
/// #         bob: concord_protocol::identity::PseudonymousIdentity) {
/// let tx = TransitionBuilder::new(notary)
///     .source(alice)
///     .target(bob)
///     .build(&StructuralVerifier)
///     .unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TransitionBuilder {
    notary: NotaryRef,
    kind: CommandKind,
    source: Option<PseudonymousIdentity>,
    target: Option<PseudonymousIdentity>,
    input: Option<ResolvedInput>,
    linear_id: Option<Uuid>,
    timestamp: Option<i64>,
}

impl TransitionBuilder {
    /// Start a new record.
    pub fn new(notary: NotaryRef) -> Self {
        Self {
            notary,
            kind: CommandKind::Start,
            source: None,
            target: None,
            input: None,
            linear_id: None,
            timestamp: None,
        }
    }

    /// Conclude (consume) an existing record.
    pub fn conclude(notary: NotaryRef, input: ResolvedInput) -> Self {
        Self {
            kind: CommandKind::Conclude,
            input: Some(input),
            ..Self::new(notary)
        }
    }

    pub fn source(mut self, source: PseudonymousIdentity) -> Self {
        self.source = Some(source);
        self
    }

    pub fn target(mut self, target: PseudonymousIdentity) -> Self {
        self.target = Some(target);
        self
    }

    /// Fix the linear id. A random one is used otherwise.
    pub fn linear_id(mut self, linear_id: Uuid) -> Self {
        self.linear_id = Some(linear_id);
        self
    }

    /// Override the timestamp (milliseconds). Mainly for deterministic tests.
    pub fn timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    /// Assemble without running any verifier.
    pub fn assemble(self) -> Result<ProposedTransaction, VerificationError> {
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let (command, inputs, outputs, claims) = match self.kind {
            CommandKind::Start => {
                let source = self.source.ok_or(VerificationError::MissingField("source"))?;
                let target = self.target.ok_or(VerificationError::MissingField("target"))?;
                let record = TransitionRecord::new(
                    self.linear_id.unwrap_or_else(Uuid::new_v4),
                    &source,
                    &target,
                );
                let command = Command::new(
                    CommandKind::Start,
                    [record.source_key.clone(), record.target_key.clone()],
                );
                let claims = vec![
                    UniquenessKey::ActiveAccount(record.source_account),
                    UniquenessKey::ActiveAccount(record.target_account),
                ];
                (command, Vec::new(), vec![record], claims)
            }
            CommandKind::Conclude => {
                let input = self.input.ok_or(VerificationError::MissingField("input"))?;
                let command = Command::new(
                    CommandKind::Conclude,
                    [input.record.source_key.clone(), input.record.target_key.clone()],
                );
                (command, vec![input], Vec::new(), Vec::new())
            }
        };

        let mut tx = ProposedTransaction {
            id: String::new(),
            version: TRANSACTION_FORMAT_VERSION,
            notary: self.notary,
            command,
            inputs,
            outputs,
            claims,
            timestamp,
        };
        tx.id = tx.compute_id();
        Ok(tx)
    }

    /// Assemble and verify locally.
    pub fn build(self, verifier: &dyn LegalityVerifier) -> Result<ProposedTransaction, VerificationError> {
        let tx = self.assemble()?;
        verifier.verify(&tx)?;
        Ok(tx)
    }
}
