//! # Flow Module
//!
//! The multi-party workflow that turns two account names into a finalized,
//! uniquely-owned record.
//!
//! ```text
//! provisioner.rs: account resolution, pseudonymous key provisioning
//! uniqueness.rs : local active-transition check
//! cosign.rs     : signature collection state machine
//! finality.rs   : notarisation and distribution
//! compliance.rs : one-way observer delivery
//! initiator.rs  : StartTransitionFlow / ConcludeTransitionFlow
//! responder.rs  : counterparty, participant and observer side
//! node.rs       : ConcordNode facade
//! ```
//!
//! Every component borrows a [`NodeServices`], the bundle of per-node
//! dependencies. Nothing in here knows which transport, vault or notary
//! implementation it is talking to.

pub mod compliance;
pub mod cosign;
pub mod error;
pub mod events;
pub mod finality;
pub mod initiator;
pub mod node;
pub mod provisioner;
pub mod responder;
pub mod uniqueness;

pub use compliance::ComplianceReporter;
pub use cosign::CoSigningCoordinator;
pub use error::{FlowError, PostCommitException};
pub use events::{CoSigningState, FlowEvent, FlowStep};
pub use finality::{Finality, FinalityBroadcaster};
pub use initiator::{ConcludeTransitionFlow, StartTransitionFlow, TransitionOutcome};
pub use node::ConcordNode;
pub use provisioner::KeyProvisioner;
pub use responder::TransitionResponder;
pub use uniqueness::UniquenessGuard;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::FlowConfig;
use crate::identity::{AccountDirectory, KeyManagementService, NodeIdentity, NodeName};
use crate::network::SessionTransport;
use crate::notary::OrderingService;
use crate::storage::RecordStore;
use crate::transaction::LegalityVerifier;

// ---------------------------------------------------------------------------
// NodeServices
// ---------------------------------------------------------------------------

/// Everything a flow needs from its hosting node.
pub struct NodeServices {
    pub identity: NodeIdentity,
    pub kms: Arc<dyn KeyManagementService>,
    pub directory: Arc<AccountDirectory>,
    pub vault: Arc<dyn RecordStore>,
    /// The notary this node pins. Transactions naming another are refused.
    pub notary: Arc<dyn OrderingService>,
    pub transport: Arc<dyn SessionTransport>,
    pub verifier: Arc<dyn LegalityVerifier>,
    pub config: FlowConfig,
    pub events: broadcast::Sender<FlowEvent>,
}

impl NodeServices {
    pub fn name(&self) -> &NodeName {
        &self.identity.name
    }

    /// Publish a progress event. Having no subscribers is fine.
    pub(crate) fn emit(&self, flow_id: Uuid, step: FlowStep) {
        let _ = self.events.send(FlowEvent { flow_id, step });
    }
}

/// Bound a suspension point of a flow.
pub(crate) async fn within<F: Future>(
    stage: &'static str,
    after: Duration,
    fut: F,
) -> Result<F::Output, FlowError> {
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| FlowError::Timeout { stage, after })
}
