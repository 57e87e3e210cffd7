//! # Concord Node
//!
//! [`ConcordNode`] is the handle an application holds for one participant
//! node. It owns the node's [`NodeServices`] and exposes the two initiating
//! flows plus the responder loop that answers everyone else.
//!
//! ```text
//! ConcordNode::new() -> spawn_responder(inbox, shutdown) -> start_transition() ...
//! ```

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::error::FlowError;
use super::events::FlowEvent;
use super::initiator::{ConcludeTransitionFlow, StartTransitionFlow, TransitionOutcome};
use super::responder::TransitionResponder;
use super::NodeServices;
use crate::identity::{NodeIdentity, NodeName};
use crate::network::Envelope;

#[derive(Clone)]
pub struct ConcordNode {
    services: Arc<NodeServices>,
    responder: Arc<TransitionResponder>,
}

impl ConcordNode {
    pub fn new(services: NodeServices) -> Self {
        let services = Arc::new(services);
        Self {
            responder: TransitionResponder::new(Arc::clone(&services)),
            services,
        }
    }

    pub fn name(&self) -> &NodeName {
        self.services.name()
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.services.identity
    }

    pub fn services(&self) -> &Arc<NodeServices> {
        &self.services
    }

    /// Progress events for every flow this node initiates.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.services.events.subscribe()
    }

    /// Create a record between `source` (hosted here) and `target`,
    /// optionally reporting it to `observer`.
    pub async fn start_transition(
        &self,
        source: &str,
        target: &str,
        observer: Option<NodeName>,
    ) -> Result<TransitionOutcome, FlowError> {
        let mut flow = StartTransitionFlow::new(source, target);
        flow.observer = observer;
        flow.run(&self.services).await
    }

    /// Consume the active record `linear_id`.
    pub async fn conclude_transition(
        &self,
        linear_id: Uuid,
        observer: Option<NodeName>,
    ) -> Result<TransitionOutcome, FlowError> {
        let mut flow = ConcludeTransitionFlow::new(linear_id);
        flow.observer = observer;
        flow.run(&self.services).await
    }

    /// Answer session messages from `inbox` until `shutdown` fires.
    pub fn spawn_responder(
        &self,
        inbox: mpsc::Receiver<Envelope>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.responder).run(inbox, shutdown))
    }

    /// Sessions this node signed in that have neither been finalized nor
    /// expired.
    pub fn pending_sessions(&self) -> usize {
        self.responder.pending_sessions()
    }
}
