//! Cross-node signature collection.
//!
//! ```text
//! BUILT ──self_sign──▶ SELF_SIGNED ──collect_from──▶ AWAITING_REMOTE ──finish──▶ FULLY_SIGNED
//!   └──────────────────────────┴─────────────── any error ──────────────────────▶ FAILED
//! ```
//!
//! The proposal is fixed at construction. Every state change is published
//! on the node's event channel.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::FlowError;
use super::events::{CoSigningState, FlowStep};
use super::{within, NodeServices};
use crate::crypto::keys::ConcordPublicKey;
use crate::identity::NodeName;
use crate::network::{SessionId, SessionMessage, SessionReply};
use crate::transaction::{
    OriginAttestation, ProposedTransaction, SignatureSet, SignedTransaction, TransactionSignature,
};

pub struct CoSigningCoordinator<'a> {
    services: &'a NodeServices,
    flow_id: Uuid,
    session: SessionId,
    proposal: ProposedTransaction,
    signatures: SignatureSet,
    attestation: Option<OriginAttestation>,
    state: CoSigningState,
}

impl<'a> CoSigningCoordinator<'a> {
    pub fn new(services: &'a NodeServices, flow_id: Uuid, proposal: ProposedTransaction) -> Self {
        let coordinator = Self {
            services,
            flow_id,
            session: Uuid::new_v4(),
            proposal,
            signatures: SignatureSet::new(),
            attestation: None,
            state: CoSigningState::Built,
        };
        coordinator.publish();
        coordinator
    }

    pub fn state(&self) -> CoSigningState {
        self.state
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn signatures(&self) -> &SignatureSet {
        &self.signatures
    }

    fn publish(&self) {
        debug!(
            tx_id = %self.proposal.id,
            session = %self.session,
            state = %self.state,
            "co-signing state"
        );
        self.services
            .emit(self.flow_id, FlowStep::CoSigning { state: self.state });
    }

    fn transition(&mut self, next: CoSigningState) {
        self.state = next;
        self.publish();
    }

    fn fail(&mut self, err: FlowError) -> FlowError {
        warn!(tx_id = %self.proposal.id, error = %err, "co-signing failed");
        self.transition(CoSigningState::Failed);
        err
    }

    fn expect_state(&mut self, allowed: &[CoSigningState], op: &str) -> Result<(), FlowError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            let state = self.state;
            Err(self.fail(FlowError::Protocol(format!("{op} not allowed in state {state}"))))
        }
    }

    fn snapshot(&self) -> Result<SignedTransaction, FlowError> {
        let attestation = self
            .attestation
            .clone()
            .ok_or_else(|| FlowError::Protocol("transaction has no origin attestation".into()))?;
        Ok(SignedTransaction {
            proposal: self.proposal.clone(),
            signatures: self.signatures.clone(),
            attestation,
        })
    }

    fn sign_locally(
        &self,
        keys: &[ConcordPublicKey],
    ) -> Result<(SignatureSet, OriginAttestation), FlowError> {
        let kms = self.services.kms.as_ref();
        let mut signatures = SignatureSet::new();
        for key in keys {
            let sig = TransactionSignature::create(&self.proposal, key, kms)?;
            signatures.merge(&self.proposal, sig)?;
        }
        let attestation =
            OriginAttestation::create(&self.proposal, self.services.identity.clone(), kms)?;
        Ok((signatures, attestation))
    }

    /// Sign with the local `keys` and attach the node's origin attestation.
    pub fn self_sign(&mut self, keys: &[ConcordPublicKey]) -> Result<(), FlowError> {
        self.expect_state(&[CoSigningState::Built], "self-sign")?;

        let result = self.sign_locally(keys);

        match result {
            Ok((signatures, attestation)) => {
                self.signatures = signatures;
                self.attestation = Some(attestation);
                self.transition(CoSigningState::SelfSigned);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Ask `counterparty` to re-verify and sign with `keys`.
    pub async fn collect_from(
        &mut self,
        counterparty: &NodeName,
        keys: Vec<ConcordPublicKey>,
    ) -> Result<(), FlowError> {
        self.expect_state(
            &[CoSigningState::SelfSigned, CoSigningState::AwaitingRemote],
            "remote signature request",
        )?;
        let transaction = match self.snapshot() {
            Ok(tx) => tx,
            Err(e) => return Err(self.fail(e)),
        };
        self.transition(CoSigningState::AwaitingRemote);

        let message = SessionMessage::CollectSignatures {
            session: self.session,
            transaction,
            keys: keys.clone(),
        };
        let after = self.services.config.signature_timeout();
        let sent = within(
            "signature request",
            after,
            self.services.transport.send(counterparty, message),
        )
        .await;

        let reply = match sent {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(self.fail(e.into())),
            Err(e) => return Err(self.fail(e)),
        };

        match reply {
            SessionReply::Signatures(sigs) => {
                for sig in sigs {
                    if !keys.contains(&sig.by) {
                        let err = FlowError::Protocol(format!(
                            "{counterparty} signed with unrequested key {}",
                            sig.by.to_base58()
                        ));
                        return Err(self.fail(err));
                    }
                    if let Err(e) = self.signatures.merge(&self.proposal, sig) {
                        return Err(self.fail(e.into()));
                    }
                }
                info!(
                    tx_id = %self.proposal.id,
                    %counterparty,
                    collected = self.signatures.len(),
                    "counterparty signatures merged"
                );
                Ok(())
            }
            SessionReply::Rejected { reason } => Err(self.fail(FlowError::Rejected { reason })),
            SessionReply::Error { message } => Err(self.fail(FlowError::Protocol(format!(
                "{counterparty} could not process signature request: {message}"
            )))),
            other => Err(self.fail(FlowError::Protocol(format!(
                "unexpected reply to signature request: {other:?}"
            )))),
        }
    }

    /// Close collection. Fails unless every command signer has signed.
    pub fn finish(mut self) -> Result<SignedTransaction, FlowError> {
        let missing = self.signatures.missing(&self.proposal);
        if !missing.is_empty() {
            let missing = missing.iter().map(|k| k.to_hex()).collect();
            return Err(self.fail(FlowError::IncompleteSignatures { missing }));
        }
        let signed = match self.snapshot() {
            Ok(signed) => signed,
            Err(e) => return Err(self.fail(e)),
        };
        self.transition(CoSigningState::FullySigned);
        Ok(signed)
    }
}
