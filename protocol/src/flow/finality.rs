//! Notarisation and distribution.
//!
//! Once the notary accepts, the transaction is final. Recording it locally
//! and distributing it to the other participants happen after that point,
//! so their failures are collected as [`PostCommitException`]s rather than
//! returned as errors. A local vault failure does not stop distribution:
//! the counterparty still records a transaction that is already final.

use tracing::{info, warn};
use uuid::Uuid;

use super::error::{FlowError, PostCommitException};
use super::events::FlowStep;
use super::{within, NodeServices};
use crate::identity::NodeName;
use crate::network::{SessionId, SessionMessage, SessionReply};
use crate::notary::NotarisationRequest;
use crate::storage::RecordRole;
use crate::transaction::{FinalizedTransaction, SignedTransaction};

/// A committed transaction and whatever went wrong distributing it.
#[derive(Debug, Clone)]
pub struct Finality {
    pub finalized: FinalizedTransaction,
    pub exceptions: Vec<PostCommitException>,
}

pub struct FinalityBroadcaster<'a> {
    services: &'a NodeServices,
    flow_id: Uuid,
}

impl<'a> FinalityBroadcaster<'a> {
    pub fn new(services: &'a NodeServices, flow_id: Uuid) -> Self {
        Self { services, flow_id }
    }

    /// Notarise `signed`, record it here, then send it to every node in
    /// `participants` other than this one.
    pub async fn finalize(
        &self,
        signed: SignedTransaction,
        session: SessionId,
        participants: &[NodeName],
    ) -> Result<Finality, FlowError> {
        let missing = signed.missing_signers();
        if !missing.is_empty() {
            return Err(FlowError::IncompleteSignatures {
                missing: missing.iter().map(|k| k.to_hex()).collect(),
            });
        }

        self.services.emit(self.flow_id, FlowStep::Notarising);
        let request = NotarisationRequest {
            transaction: signed.clone(),
            requested_by: self.services.name().clone(),
        };
        let after = self.services.config.notary_timeout();
        let receipt = within("notarisation", after, self.services.notary.commit(request)).await??;

        let finalized = FinalizedTransaction {
            signed,
            receipt,
        };
        if let Err(e) = finalized.verify() {
            // The notary committed something we cannot verify. Nothing is
            // recorded; the commit itself cannot be undone from here.
            return Err(FlowError::Protocol(format!("notary receipt rejected: {e}")));
        }

        let mut exceptions = Vec::new();
        match self
            .services
            .vault
            .record_finalized(&finalized, RecordRole::Participant)
        {
            Ok(()) => info!(
                tx_id = %finalized.id(),
                notary = %finalized.receipt.notary.name,
                "transaction finalized"
            ),
            Err(e) => {
                warn!(tx_id = %finalized.id(), error = %e, "committed transaction not recorded locally");
                exceptions.push(PostCommitException::LocalRecord {
                    reason: e.to_string(),
                });
            }
        }

        self.services.emit(self.flow_id, FlowStep::Distributing);
        let mut sent_to: Vec<&NodeName> = Vec::new();
        for node in participants {
            if node == self.services.name() || sent_to.contains(&node) {
                continue;
            }
            sent_to.push(node);
            if let Err(reason) = self.distribute(&finalized, session, node).await {
                warn!(tx_id = %finalized.id(), %node, %reason, "distribution failed");
                exceptions.push(PostCommitException::Distribution {
                    node: node.clone(),
                    reason,
                });
            }
        }

        Ok(Finality {
            finalized,
            exceptions,
        })
    }

    async fn distribute(
        &self,
        finalized: &FinalizedTransaction,
        session: SessionId,
        node: &NodeName,
    ) -> Result<(), String> {
        let message = SessionMessage::Finality {
            session,
            finalized: finalized.clone(),
        };
        let after = self.services.config.delivery_timeout();
        match within("distribution", after, self.services.transport.send(node, message)).await {
            Ok(Ok(SessionReply::Ack)) => Ok(()),
            Ok(Ok(SessionReply::Rejected { reason })) => Err(format!("rejected: {reason}")),
            Ok(Ok(SessionReply::Error { message })) => Err(message),
            Ok(Ok(other)) => Err(format!("unexpected reply {other:?}")),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowConfig;
    use crate::crypto::keys::ConcordKeypair;
    use crate::identity::{
        AccountDirectory, InMemoryKeyManager, KeyManagementService, NodeIdentity, PseudonymousIdentity,
    };
    use crate::network::InMemoryNetwork;
    use crate::notary::{OrderingService, UniquenessNotary};
    use crate::storage::{DbError, DbResult, RecordStore, StoredRecord};
    use crate::transaction::{
        OriginAttestation, SignatureSet, StructuralVerifier, TransactionSignature, TransitionBuilder,
    };
    use std::sync::Arc;
    use tokio::sync::broadcast;

    /// Reads find nothing, writes always fail.
    struct FailingVault;

    impl RecordStore for FailingVault {
        fn query_by_account(&self, _account: &Uuid) -> DbResult<Vec<StoredRecord>> {
            Ok(Vec::new())
        }

        fn record_finalized(&self, _tx: &FinalizedTransaction, _role: RecordRole) -> DbResult<()> {
            Err(DbError::Serialization("disk full".into()))
        }

        fn get_record(&self, _linear_id: &Uuid) -> DbResult<Option<StoredRecord>> {
            Ok(None)
        }

        fn get_transaction(&self, _tx_id: &str) -> DbResult<Option<FinalizedTransaction>> {
            Ok(None)
        }

        fn mark_consumed(&self, linear_id: &Uuid, _by_tx: &str) -> DbResult<()> {
            Err(DbError::NotFound(linear_id.to_string()))
        }

        fn all_records(&self) -> DbResult<Vec<StoredRecord>> {
            Ok(Vec::new())
        }

        fn transaction_count(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn local_vault_failure_is_reported_and_distribution_continues() {
        let network = InMemoryNetwork::new();
        let identity_key = ConcordKeypair::generate();
        let local = NodeIdentity {
            name: NodeName::from("O=PartyA"),
            owning_key: identity_key.public_key(),
        };
        let _local_inbox = network.register(local.clone());
        let peer = NodeName::from("O=PartyB");
        let mut peer_inbox = network.register(NodeIdentity {
            name: peer.clone(),
            owning_key: ConcordKeypair::generate().public_key(),
        });

        let kms = Arc::new(InMemoryKeyManager::new(identity_key));
        let notary = Arc::new(
            UniquenessNotary::open_temporary(NodeName::from("O=Notary"), ConcordKeypair::generate())
                .unwrap(),
        );
        let (events, _) = broadcast::channel(16);
        let services = NodeServices {
            identity: local.clone(),
            kms: kms.clone(),
            directory: Arc::new(AccountDirectory::new()),
            vault: Arc::new(FailingVault),
            notary: notary.clone(),
            transport: Arc::new(network.handle(local.name.clone())),
            verifier: Arc::new(StructuralVerifier),
            config: FlowConfig::with_notary("O=Notary"),
            events,
        };

        let pseudonym = |account: Uuid| PseudonymousIdentity {
            account_id: account,
            owning_key: kms.fresh_key(account),
            host: local.name.clone(),
        };
        let proposal = TransitionBuilder::new(notary.identity())
            .source(pseudonym(Uuid::new_v4()))
            .target(pseudonym(Uuid::new_v4()))
            .assemble()
            .unwrap();
        let mut signatures = SignatureSet::new();
        for key in proposal.command.signers.clone() {
            let sig = TransactionSignature::create(&proposal, &key, kms.as_ref()).unwrap();
            signatures.merge(&proposal, sig).unwrap();
        }
        let attestation = OriginAttestation::create(&proposal, local.clone(), kms.as_ref()).unwrap();
        let signed = SignedTransaction {
            proposal,
            signatures,
            attestation,
        };

        let counterparty = tokio::spawn(async move {
            let envelope = peer_inbox.recv().await.unwrap();
            let got_finality = matches!(envelope.message, SessionMessage::Finality { .. });
            envelope.respond(SessionReply::Ack);
            got_finality
        });

        let finality = FinalityBroadcaster::new(&services, Uuid::new_v4())
            .finalize(signed, Uuid::new_v4(), &[peer])
            .await
            .unwrap();

        assert!(counterparty.await.unwrap());
        assert_eq!(notary.committed_count(), 1);
        assert_eq!(finality.exceptions.len(), 1);
        assert!(matches!(
            finality.exceptions[0],
            PostCommitException::LocalRecord { .. }
        ));
    }
}
