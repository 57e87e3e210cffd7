//! Initiating flows.
//!
//! [`StartTransitionFlow`] runs the whole pipeline for a new record:
//!
//! ```text
//! resolve accounts ─▶ uniqueness guard ─▶ provision keys ─▶ build + verify
//!     ─▶ self-sign ─▶ remote signature ─▶ notarise + distribute ─▶ report
//! ```
//!
//! The guard runs before the first network message, so a known conflict
//! costs no round trips. [`ConcludeTransitionFlow`] consumes an existing
//! record through the same co-signing and finality steps.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::compliance::ComplianceReporter;
use super::cosign::CoSigningCoordinator;
use super::error::{FlowError, PostCommitException};
use super::events::FlowStep;
use super::finality::FinalityBroadcaster;
use super::provisioner::KeyProvisioner;
use super::uniqueness::UniquenessGuard;
use super::NodeServices;
use crate::crypto::keys::ConcordPublicKey;
use crate::identity::NodeName;
use crate::transaction::{
    FinalizedTransaction, ProposedTransaction, ResolvedInput, SignedTransaction, TransitionBuilder,
    VerificationError,
};

/// What a successful flow hands back.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub flow_id: Uuid,
    /// Stable identifier of the record created or concluded.
    pub linear_id: Uuid,
    pub transaction: FinalizedTransaction,
    /// Post-commit failures. The transaction is final regardless.
    pub exceptions: Vec<PostCommitException>,
    pub elapsed_ms: u64,
}

impl TransitionOutcome {
    pub fn tx_id(&self) -> &str {
        self.transaction.id()
    }
}

// ---------------------------------------------------------------------------
// Shared tail: co-sign, finalize, report
// ---------------------------------------------------------------------------

/// Remote keys grouped by the node that holds them.
type RemoteSigners = BTreeMap<NodeName, Vec<ConcordPublicKey>>;

async fn sign_finalize_report(
    services: &NodeServices,
    flow_id: Uuid,
    proposal: ProposedTransaction,
    local_keys: Vec<ConcordPublicKey>,
    remote: RemoteSigners,
    observer: Option<&NodeName>,
) -> Result<(FinalizedTransaction, Vec<PostCommitException>), FlowError> {
    let mut coordinator = CoSigningCoordinator::new(services, flow_id, proposal);
    coordinator.self_sign(&local_keys)?;
    for (host, keys) in &remote {
        coordinator.collect_from(host, keys.clone()).await?;
    }
    let session = coordinator.session();
    let signed: SignedTransaction = coordinator.finish()?;

    let participants: Vec<NodeName> = remote.keys().cloned().collect();
    let finality = FinalityBroadcaster::new(services, flow_id)
        .finalize(signed, session, &participants)
        .await?;
    let mut exceptions = finality.exceptions;

    if let Some(observer) = observer {
        services.emit(flow_id, FlowStep::Reporting);
        if let Err(e) = ComplianceReporter::new(services)
            .report(&finality.finalized, observer)
            .await
        {
            warn!(
                tx_id = %finality.finalized.id(),
                %observer,
                error = %e,
                "compliance exception: manual follow-up required"
            );
            exceptions.push(PostCommitException::Compliance {
                observer: observer.clone(),
                reason: e.to_string(),
            });
        }
    }

    Ok((finality.finalized, exceptions))
}

fn finish(
    services: &NodeServices,
    flow_id: Uuid,
    started: Instant,
    result: Result<(Uuid, FinalizedTransaction, Vec<PostCommitException>), FlowError>,
) -> Result<TransitionOutcome, FlowError> {
    match result {
        Ok((linear_id, transaction, exceptions)) => {
            services.emit(
                flow_id,
                FlowStep::Finished {
                    tx_id: transaction.id().to_string(),
                },
            );
            Ok(TransitionOutcome {
                flow_id,
                linear_id,
                transaction,
                exceptions,
                elapsed_ms: started.elapsed().as_millis() as u64,
            })
        }
        Err(e) => {
            warn!(%flow_id, error = %e, kind = e.kind(), "flow failed");
            services.emit(flow_id, FlowStep::Failed { error: e.to_string() });
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// StartTransitionFlow
// ---------------------------------------------------------------------------

/// Create a record between a local account and any other account.
#[derive(Debug, Clone)]
pub struct StartTransitionFlow {
    pub source: String,
    pub target: String,
    /// Receives a compliance copy after finalization.
    pub observer: Option<NodeName>,
}

impl StartTransitionFlow {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            observer: None,
        }
    }

    pub fn observed_by(mut self, observer: NodeName) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn run(&self, services: &NodeServices) -> Result<TransitionOutcome, FlowError> {
        let flow_id = Uuid::new_v4();
        let started = Instant::now();
        let span = info_span!(
            "start_transition",
            %flow_id,
            node = %services.name(),
            source = %self.source,
            target = %self.target
        );
        let result = self.execute(services, flow_id).instrument(span).await;
        finish(services, flow_id, started, result)
    }

    async fn execute(
        &self,
        services: &NodeServices,
        flow_id: Uuid,
    ) -> Result<(Uuid, FinalizedTransaction, Vec<PostCommitException>), FlowError> {
        let provisioner = KeyProvisioner::new(services);

        services.emit(flow_id, FlowStep::ResolvingAccounts);
        let source = provisioner.resolve_account(&self.source)?;
        let target = provisioner.resolve_account(&self.target)?;
        if source.id == target.id {
            return Err(VerificationError::Rule(format!(
                "account '{}' cannot transition with itself",
                source.name
            ))
            .into());
        }

        services.emit(flow_id, FlowStep::CheckingUniqueness);
        let guard = UniquenessGuard::new(services.vault.as_ref());
        guard.ensure_available(&source)?;
        guard.ensure_available(&target)?;

        services.emit(flow_id, FlowStep::ProvisioningKeys);
        let source_identity = provisioner.local_pseudonym(&source)?;
        let target_identity = provisioner.request_remote_key(&target).await?;

        services.emit(flow_id, FlowStep::Building);
        let proposal = TransitionBuilder::new(services.notary.identity())
            .source(source_identity.clone())
            .target(target_identity.clone())
            .build(services.verifier.as_ref())?;
        let linear_id = proposal
            .record()
            .map(|r| r.linear_id)
            .ok_or_else(|| FlowError::Protocol("start transaction has no output".into()))?;
        info!(tx_id = %proposal.id, %linear_id, "transition proposed");

        let mut local_keys = vec![source_identity.owning_key];
        let mut remote = RemoteSigners::new();
        if &target.host == services.name() {
            local_keys.push(target_identity.owning_key);
        } else {
            remote.insert(target.host.clone(), vec![target_identity.owning_key]);
        }

        let (finalized, exceptions) = sign_finalize_report(
            services,
            flow_id,
            proposal,
            local_keys,
            remote,
            self.observer.as_ref(),
        )
        .await?;
        Ok((linear_id, finalized, exceptions))
    }
}

// ---------------------------------------------------------------------------
// ConcludeTransitionFlow
// ---------------------------------------------------------------------------

/// Consume an active record this node participates in, freeing both
/// accounts for a new transition.
#[derive(Debug, Clone)]
pub struct ConcludeTransitionFlow {
    pub linear_id: Uuid,
    pub observer: Option<NodeName>,
}

impl ConcludeTransitionFlow {
    pub fn new(linear_id: Uuid) -> Self {
        Self {
            linear_id,
            observer: None,
        }
    }

    pub fn observed_by(mut self, observer: NodeName) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn run(&self, services: &NodeServices) -> Result<TransitionOutcome, FlowError> {
        let flow_id = Uuid::new_v4();
        let started = Instant::now();
        let span = info_span!(
            "conclude_transition",
            %flow_id,
            node = %services.name(),
            linear_id = %self.linear_id
        );
        let result = self.execute(services, flow_id).instrument(span).await;
        finish(services, flow_id, started, result)
    }

    async fn execute(
        &self,
        services: &NodeServices,
        flow_id: Uuid,
    ) -> Result<(Uuid, FinalizedTransaction, Vec<PostCommitException>), FlowError> {
        services.emit(flow_id, FlowStep::ResolvingAccounts);
        let stored = services
            .vault
            .get_record(&self.linear_id)?
            .filter(|stored| stored.is_active())
            .ok_or_else(|| FlowError::NotFound(format!("active record {}", self.linear_id)))?;
        let record = stored.record.clone();

        let mut local_keys = Vec::new();
        let mut remote = RemoteSigners::new();
        for (account, key) in [
            (record.source_account, &record.source_key),
            (record.target_account, &record.target_key),
        ] {
            if services.kms.owns(key) {
                local_keys.push(key.clone());
                continue;
            }
            let host = services
                .directory
                .by_id(&account)
                .map(|a| a.host)
                .ok_or_else(|| FlowError::NotFound(format!("host of account {account}")))?;
            remote.entry(host).or_default().push(key.clone());
        }
        if local_keys.is_empty() {
            return Err(FlowError::NotFound(format!(
                "no local signing key for record {}",
                self.linear_id
            )));
        }

        services.emit(flow_id, FlowStep::Building);
        let input = ResolvedInput {
            state_ref: stored.state_ref,
            record,
        };
        let proposal = TransitionBuilder::conclude(services.notary.identity(), input)
            .build(services.verifier.as_ref())?;
        info!(tx_id = %proposal.id, linear_id = %self.linear_id, "conclusion proposed");

        let (finalized, exceptions) = sign_finalize_report(
            services,
            flow_id,
            proposal,
            local_keys,
            remote,
            self.observer.as_ref(),
        )
        .await?;
        Ok((self.linear_id, finalized, exceptions))
    }
}
