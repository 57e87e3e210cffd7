//! Transaction verification.
//!
//! Legality is a pluggable capability: every node injects a
//! [`LegalityVerifier`] and runs it independently on every transaction it
//! builds or is asked to sign. A counterparty never trusts the initiator's
//! verdict.
//!
//! [`StructuralVerifier`] holds the checks every transaction must pass
//! regardless of domain rules: id integrity, format version, timestamp
//! window and a well-formed command. Domain verifiers (see the
//! `concord-contracts` crate) call it first.

use chrono::Utc;
use thiserror::Error;

use super::builder::ProposedTransaction;
use crate::config::TRANSACTION_FORMAT_VERSION;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The id does not match the double-SHA-256 of the signable bytes.
    #[error("transaction ID mismatch: expected {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("unsupported transaction format version {0}")]
    UnsupportedVersion(u16),

    #[error("timestamp {timestamp_ms} is {delta_secs}s in the future (max allowed: {max_secs}s)")]
    TimestampTooFarInFuture {
        timestamp_ms: i64,
        delta_secs: i64,
        max_secs: i64,
    },

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("command names no signers")]
    NoSigners,

    /// A domain rule failed. The message names the rule.
    #[error("contract rule violated: {0}")]
    Rule(String),
}

// ---------------------------------------------------------------------------
// LegalityVerifier
// ---------------------------------------------------------------------------

/// Pure legality check over a proposed transaction.
pub trait LegalityVerifier: Send + Sync {
    fn verify(&self, tx: &ProposedTransaction) -> Result<(), VerificationError>;
}

/// Maximum allowed clock skew for transaction timestamps, in seconds.
const MAX_FUTURE_SECONDS: i64 = 300;

/// Domain-independent checks, cheapest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralVerifier;

impl LegalityVerifier for StructuralVerifier {
    fn verify(&self, tx: &ProposedTransaction) -> Result<(), VerificationError> {
        if tx.version != TRANSACTION_FORMAT_VERSION {
            return Err(VerificationError::UnsupportedVersion(tx.version));
        }

        if tx.command.signers.is_empty() {
            return Err(VerificationError::NoSigners);
        }

        let now_ms = Utc::now().timestamp_millis();
        if tx.timestamp > now_ms {
            let delta_secs = (tx.timestamp - now_ms) / 1000;
            if delta_secs > MAX_FUTURE_SECONDS {
                return Err(VerificationError::TimestampTooFarInFuture {
                    timestamp_ms: tx.timestamp,
                    delta_secs,
                    max_secs: MAX_FUTURE_SECONDS,
                });
            }
        }

        let expected = tx.compute_id();
        if tx.id != expected {
            return Err(VerificationError::IdMismatch {
                expected,
                actual: tx.id.clone(),
            });
        }

        Ok(())
    }
}

/// Accepts everything. For tests that need a verifier out of the way.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl LegalityVerifier for AcceptAll {
    fn verify(&self, _tx: &ProposedTransaction) -> Result<(), VerificationError> {
        Ok(())
    }
}

/// Rejects everything with a fixed reason.
#[derive(Debug, Clone)]
pub struct RejectAll(pub String);

impl LegalityVerifier for RejectAll {
    fn verify(&self, _tx: &ProposedTransaction) -> Result<(), VerificationError> {
        Err(VerificationError::Rule(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::builder::tests::sample_proposal;

    #[test]
    fn well_formed_proposal_passes() {
        let tx = sample_proposal();
        assert!(StructuralVerifier.verify(&tx).is_ok());
    }

    #[test]
    fn tampered_id_is_rejected() {
        let mut tx = sample_proposal();
        tx.id = "00".repeat(32);
        assert!(matches!(
            StructuralVerifier.verify(&tx),
            Err(VerificationError::IdMismatch { .. })
        ));
    }

    #[test]
    fn tampered_field_breaks_id() {
        let mut tx = sample_proposal();
        tx.timestamp -= 1;
        assert!(matches!(
            StructuralVerifier.verify(&tx),
            Err(VerificationError::IdMismatch { .. })
        ));
    }

    #[test]
    fn future_timestamp_is_rejected() {
        let mut tx = sample_proposal();
        tx.timestamp = Utc::now().timestamp_millis() + 3_600_000;
        tx.id = tx.compute_id();
        assert!(matches!(
            StructuralVerifier.verify(&tx),
            Err(VerificationError::TimestampTooFarInFuture { .. })
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut tx = sample_proposal();
        tx.version = 99;
        tx.id = tx.compute_id();
        assert_eq!(
            StructuralVerifier.verify(&tx),
            Err(VerificationError::UnsupportedVersion(99))
        );
    }

    #[test]
    fn reject_all_carries_reason() {
        let err = RejectAll("nope".into()).verify(&sample_proposal()).unwrap_err();
        assert_eq!(err.to_string(), "contract rule violated: nope");
    }
}
