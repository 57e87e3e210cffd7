//! The responder side of every session.
//!
//! Each node runs one responder task. It drains the node's inbox and
//! handles every envelope on its own task, so a slow verification never
//! blocks key requests or finality receipts for other sessions.
//!
//! The responder trusts nothing the initiator says: it re-runs its own
//! legality verifier, checks the origin attestation against the network
//! map, only signs with keys it minted for accounts it hosts, and only
//! stores finalized transactions whose signatures and notary receipt
//! verify against its own pinned notary.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::NodeServices;
use crate::config::is_compatible_version;
use crate::identity::{NodeName, PseudonymousIdentity};
use crate::network::{Envelope, SessionId, SessionMessage, SessionReply};
use crate::storage::RecordRole;
use crate::transaction::{
    CommandKind, FinalizedTransaction, SignedTransaction, TransactionSignature,
};
use crate::crypto::keys::ConcordPublicKey;
use uuid::Uuid;

/// Why a message was declined. Rejections go back as
/// [`SessionReply::Rejected`], failures as [`SessionReply::Error`].
enum Decline {
    Rejected(String),
    Failed(String),
}

type Handled = Result<SessionReply, Decline>;

pub struct TransitionResponder {
    services: Arc<NodeServices>,
    /// Sessions we signed in, by session id, with the transaction id.
    /// Entries leave on finality or after `FlowConfig::session_ttl`.
    pending: Arc<DashMap<SessionId, String>>,
}

impl TransitionResponder {
    pub fn new(services: Arc<NodeServices>) -> Arc<Self> {
        Arc::new(Self {
            services,
            pending: Arc::new(DashMap::new()),
        })
    }

    /// Sessions signed but neither finalized nor expired.
    pub fn pending_sessions(&self) -> usize {
        self.pending.len()
    }

    /// Serve `inbox` until it closes or `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Envelope>, mut shutdown: watch::Receiver<bool>) {
        info!(node = %self.services.name(), "responder started");
        loop {
            tokio::select! {
                envelope = inbox.recv() => {
                    let Some(envelope) = envelope else { break };
                    let responder = Arc::clone(&self);
                    tokio::spawn(async move { responder.handle(envelope).await });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(node = %self.services.name(), "responder stopped");
    }

    /// Handle one envelope and send its reply.
    pub async fn handle(&self, envelope: Envelope) {
        let from = envelope.from.clone();
        let kind = envelope.message.kind();

        let result = if !is_compatible_version(&envelope.version) {
            Err(Decline::Failed(format!(
                "incompatible protocol version {}",
                envelope.version
            )))
        } else {
            match &envelope.message {
                SessionMessage::RequestKey { account_id } => self.on_request_key(account_id),
                SessionMessage::CollectSignatures {
                    session,
                    transaction,
                    keys,
                } => self.on_collect_signatures(&from, *session, transaction, keys),
                SessionMessage::Finality { session, finalized } => {
                    self.on_finality(*session, finalized)
                }
                SessionMessage::Report { finalized } => self.on_report(finalized),
            }
        };

        let reply = match result {
            Ok(reply) => {
                debug!(node = %self.services.name(), %from, kind, "session message handled");
                reply
            }
            Err(Decline::Rejected(reason)) => {
                warn!(node = %self.services.name(), %from, kind, %reason, "session message rejected");
                SessionReply::Rejected { reason }
            }
            Err(Decline::Failed(message)) => {
                warn!(node = %self.services.name(), %from, kind, %message, "session message failed");
                SessionReply::Error { message }
            }
        };
        envelope.respond(reply);
    }

    fn on_request_key(&self, account_id: &Uuid) -> Handled {
        let account = self
            .services
            .directory
            .by_id(account_id)
            .ok_or_else(|| Decline::Failed(format!("unknown account {account_id}")))?;
        if &account.host != self.services.name() {
            return Err(Decline::Failed(format!(
                "account '{}' is not hosted here",
                account.name
            )));
        }
        let key = self.services.kms.fresh_key(account.id);
        Ok(SessionReply::Key(PseudonymousIdentity {
            account_id: account.id,
            owning_key: key,
            host: account.host,
        }))
    }

    fn on_collect_signatures(
        &self,
        from: &NodeName,
        session: SessionId,
        transaction: &SignedTransaction,
        keys: &[ConcordPublicKey],
    ) -> Handled {
        let proposal = &transaction.proposal;

        // The initiator must be who the transport says it is.
        let attestation = &transaction.attestation;
        let known = self.services.transport.identity_of(from);
        if attestation.node.name != *from
            || known.as_ref() != Some(&attestation.node)
            || !attestation.is_valid_for(&proposal.id)
        {
            return Err(Decline::Rejected(format!("origin attestation from {from} does not verify")));
        }

        if proposal.notary != self.services.notary.identity() {
            return Err(Decline::Rejected(format!(
                "transaction names untrusted notary {}",
                proposal.notary.name
            )));
        }

        self.services
            .verifier
            .verify(proposal)
            .map_err(|e| Decline::Rejected(format!("verification failed: {e}")))?;

        transaction
            .signatures
            .verify_all(proposal)
            .map_err(|e| Decline::Rejected(e.to_string()))?;

        let record = proposal
            .record()
            .ok_or_else(|| Decline::Rejected("transaction carries no record".into()))?;

        if proposal.command.kind == CommandKind::Conclude {
            let stored = self
                .services
                .vault
                .get_record(&record.linear_id)
                .map_err(|e| Decline::Failed(e.to_string()))?;
            if !stored.map(|s| s.is_active()).unwrap_or(false) {
                return Err(Decline::Rejected(format!(
                    "record {} is not active here",
                    record.linear_id
                )));
            }
        }

        if keys.is_empty() {
            return Err(Decline::Rejected("no keys requested".into()));
        }
        let mut signatures = Vec::with_capacity(keys.len());
        for key in keys {
            if !proposal.command.requires(key) {
                return Err(Decline::Rejected(format!(
                    "key {} is not a required signer",
                    key.to_base58()
                )));
            }
            let ours = self.services.kms.owns(key)
                && self
                    .services
                    .kms
                    .account_for_key(key)
                    .map(|account| record.involves(&account))
                    .unwrap_or(false);
            if !ours {
                return Err(Decline::Rejected(format!(
                    "key {} does not belong to an account in this record",
                    key.to_base58()
                )));
            }
            let sig = TransactionSignature::create(proposal, key, self.services.kms.as_ref())
                .map_err(|e| Decline::Failed(e.to_string()))?;
            signatures.push(sig);
        }

        self.pending.insert(session, proposal.id.clone());
        self.expire_later(session, proposal.id.clone());
        info!(
            node = %self.services.name(),
            tx_id = %proposal.id,
            %session,
            initiator = %from,
            "transaction signed"
        );
        Ok(SessionReply::Signatures(signatures))
    }

    /// Forget `session` once its TTL passes, unless finality already did.
    fn expire_later(&self, session: SessionId, tx_id: String) {
        let pending = Arc::clone(&self.pending);
        let ttl = self.services.config.session_ttl();
        let node = self.services.name().clone();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if pending.remove_if(&session, |_, signed| *signed == tx_id).is_some() {
                debug!(%node, %session, %tx_id, "signed session expired without finality");
            }
        });
    }

    fn check_finalized(&self, finalized: &FinalizedTransaction) -> Result<(), Decline> {
        finalized
            .verify()
            .map_err(|e| Decline::Rejected(format!("finalized transaction does not verify: {e}")))?;
        if finalized.receipt.notary != self.services.notary.identity() {
            return Err(Decline::Rejected(format!(
                "receipt from untrusted notary {}",
                finalized.receipt.notary.name
            )));
        }
        Ok(())
    }

    fn on_finality(&self, session: SessionId, finalized: &FinalizedTransaction) -> Handled {
        self.check_finalized(finalized)?;

        let signed_here = self
            .pending
            .get(&session)
            .map(|tx_id| tx_id.value() == finalized.id())
            .unwrap_or(false);
        let involves_us = finalized
            .signed
            .proposal
            .command
            .signers
            .iter()
            .any(|key| self.services.kms.owns(key));
        if !signed_here && !involves_us {
            return Err(Decline::Rejected("this node is not a participant".into()));
        }

        self.services
            .vault
            .record_finalized(finalized, RecordRole::Participant)
            .map_err(|e| Decline::Failed(e.to_string()))?;
        self.pending.remove(&session);
        info!(node = %self.services.name(), tx_id = %finalized.id(), "finalized transaction recorded");
        Ok(SessionReply::Ack)
    }

    fn on_report(&self, finalized: &FinalizedTransaction) -> Handled {
        self.check_finalized(finalized)?;
        self.services
            .vault
            .record_finalized(finalized, RecordRole::Observer)
            .map_err(|e| Decline::Failed(e.to_string()))?;
        info!(node = %self.services.name(), tx_id = %finalized.id(), "compliance copy recorded");
        Ok(SessionReply::Ack)
    }
}
