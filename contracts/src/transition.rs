//! # Transition Contract
//!
//! Rules for the two commands a transition record can carry.
//!
//! ## Start
//!
//! - no inputs, exactly one output
//! - the record links two distinct accounts through two distinct keys
//! - the linear id is not nil
//! - the signers are exactly `{source_key, target_key}`
//! - the claims are exactly the two accounts' active-account keys
//!
//! ## Conclude
//!
//! - exactly one input, no outputs, no claims
//! - the signers are exactly the input record's two keys
//!
//! Either side of a record may conclude it; both must sign.

use thiserror::Error;
use tracing::debug;

use concord_protocol::crypto::keys::ConcordPublicKey;
use concord_protocol::transaction::{
    CommandKind, LegalityVerifier, ProposedTransaction, StructuralVerifier, TransitionRecord,
    UniquenessKey, VerificationError,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A broken contract rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("{command} must have {expected} input(s), found {found}")]
    InputCount {
        command: CommandKind,
        expected: usize,
        found: usize,
    },

    #[error("{command} must have {expected} output(s), found {found}")]
    OutputCount {
        command: CommandKind,
        expected: usize,
        found: usize,
    },

    #[error("source and target must be different accounts")]
    SameAccount,

    #[error("source and target must use different keys")]
    SameKey,

    #[error("linear id must not be nil")]
    NilLinearId,

    #[error("signers must be exactly the record's participant keys")]
    SignerMismatch,

    #[error("claims must be exactly {expected}, found {found}")]
    ClaimMismatch { expected: String, found: String },
}

impl From<ContractViolation> for VerificationError {
    fn from(v: ContractViolation) -> Self {
        VerificationError::Rule(v.to_string())
    }
}

// ---------------------------------------------------------------------------
// TransitionContract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContract;

impl TransitionContract {
    pub fn new() -> Self {
        Self
    }

    /// Contract rules only, without the structural checks.
    pub fn check_rules(&self, tx: &ProposedTransaction) -> Result<(), ContractViolation> {
        match tx.command.kind {
            CommandKind::Start => check_start(tx),
            CommandKind::Conclude => check_conclude(tx),
        }
    }
}

impl LegalityVerifier for TransitionContract {
    fn verify(&self, tx: &ProposedTransaction) -> Result<(), VerificationError> {
        StructuralVerifier.verify(tx)?;
        self.check_rules(tx).map_err(|violation| {
            debug!(tx_id = %tx.id, %violation, "transition contract violated");
            VerificationError::from(violation)
        })
    }
}

fn expect_counts(
    tx: &ProposedTransaction,
    inputs: usize,
    outputs: usize,
) -> Result<(), ContractViolation> {
    let command = tx.command.kind;
    if tx.inputs.len() != inputs {
        return Err(ContractViolation::InputCount {
            command,
            expected: inputs,
            found: tx.inputs.len(),
        });
    }
    if tx.outputs.len() != outputs {
        return Err(ContractViolation::OutputCount {
            command,
            expected: outputs,
            found: tx.outputs.len(),
        });
    }
    Ok(())
}

/// `true` if `signers` (sorted, deduplicated) is exactly the record's keys.
fn signed_by_participants(signers: &[ConcordPublicKey], record: &TransitionRecord) -> bool {
    let mut expected = vec![record.source_key.clone(), record.target_key.clone()];
    expected.sort();
    expected.dedup();
    signers == expected.as_slice()
}

fn describe(claims: &[UniquenessKey]) -> String {
    let parts: Vec<String> = claims.iter().map(|c| c.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

fn check_start(tx: &ProposedTransaction) -> Result<(), ContractViolation> {
    expect_counts(tx, 0, 1)?;
    let record = &tx.outputs[0];

    if record.source_account == record.target_account {
        return Err(ContractViolation::SameAccount);
    }
    if record.source_key == record.target_key {
        return Err(ContractViolation::SameKey);
    }
    if record.linear_id.is_nil() {
        return Err(ContractViolation::NilLinearId);
    }
    if !signed_by_participants(&tx.command.signers, record) {
        return Err(ContractViolation::SignerMismatch);
    }

    let expected = [
        UniquenessKey::ActiveAccount(record.source_account),
        UniquenessKey::ActiveAccount(record.target_account),
    ];
    let covered = tx.claims.len() == expected.len() && expected.iter().all(|k| tx.claims.contains(k));
    if !covered {
        return Err(ContractViolation::ClaimMismatch {
            expected: describe(&expected),
            found: describe(&tx.claims),
        });
    }
    Ok(())
}

fn check_conclude(tx: &ProposedTransaction) -> Result<(), ContractViolation> {
    expect_counts(tx, 1, 0)?;
    if !tx.claims.is_empty() {
        return Err(ContractViolation::ClaimMismatch {
            expected: describe(&[]),
            found: describe(&tx.claims),
        });
    }
    if !signed_by_participants(&tx.command.signers, &tx.inputs[0].record) {
        return Err(ContractViolation::SignerMismatch);
    }
    Ok(())
}
