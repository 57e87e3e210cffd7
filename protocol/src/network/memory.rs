//! In-process network: one tokio mpsc inbox per node, a oneshot per reply.
//!
//! Good enough to run several nodes, a notary and an observer inside one
//! process, which is how the node binary simulates a deployment and how the
//! end-to-end tests run.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use super::messages::{Envelope, SessionMessage, SessionReply};
use super::transport::{NetworkMap, SessionTransport, TransportError};
use crate::config::{NODE_INBOX_CAPACITY, PROTOCOL_VERSION};
use crate::identity::{NodeIdentity, NodeName};

#[derive(Debug, Default)]
pub struct InMemoryNetwork {
    inboxes: DashMap<NodeName, mpsc::Sender<Envelope>>,
    map: NetworkMap,
    messages_sent: AtomicU64,
    sent_by: DashMap<NodeName, u64>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a node to the map and open its inbox.
    pub fn register(&self, identity: NodeIdentity) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(NODE_INBOX_CAPACITY);
        self.inboxes.insert(identity.name.clone(), tx);
        self.map.register(identity);
        rx
    }

    /// Take a node off the network. It stays in the map, so peers still know
    /// its identity but cannot reach it.
    pub fn disconnect(&self, name: &NodeName) {
        self.inboxes.remove(name);
    }

    /// Transport handle for `local`.
    pub fn handle(self: &Arc<Self>, local: NodeName) -> NetworkHandle {
        NetworkHandle {
            local,
            network: Arc::clone(self),
        }
    }

    pub fn map(&self) -> &NetworkMap {
        &self.map
    }

    /// Every send attempt, delivered or not.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_sent_by(&self, name: &NodeName) -> u64 {
        self.sent_by.get(name).map(|v| *v).unwrap_or(0)
    }

    async fn deliver(
        &self,
        from: &NodeName,
        to: &NodeName,
        message: SessionMessage,
    ) -> Result<SessionReply, TransportError> {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        *self.sent_by.entry(from.clone()).or_insert(0) += 1;
        trace!(%from, %to, kind = message.kind(), "session message");

        let inbox = self
            .inboxes
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::UnknownNode(to.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            from: from.clone(),
            version: PROTOCOL_VERSION.to_string(),
            message,
            reply: reply_tx,
        };
        inbox
            .send(envelope)
            .await
            .map_err(|_| TransportError::Closed(to.to_string()))?;

        reply_rx
            .await
            .map_err(|_| TransportError::NoReply(to.to_string()))
    }
}

/// One node's view of the [`InMemoryNetwork`].
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    local: NodeName,
    network: Arc<InMemoryNetwork>,
}

#[async_trait]
impl SessionTransport for NetworkHandle {
    fn local(&self) -> &NodeName {
        &self.local
    }

    async fn send(&self, to: &NodeName, message: SessionMessage) -> Result<SessionReply, TransportError> {
        self.network.deliver(&self.local, to, message).await
    }

    fn identity_of(&self, name: &NodeName) -> Option<NodeIdentity> {
        self.network.map.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::ConcordKeypair;
    use uuid::Uuid;

    fn identity(name: &str) -> NodeIdentity {
        NodeIdentity {
            name: NodeName::from(name),
            owning_key: ConcordKeypair::generate().public_key(),
        }
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let network = InMemoryNetwork::new();
        let mut inbox = network.register(identity("B"));
        network.register(identity("A"));

        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                assert_eq!(envelope.from, NodeName::from("A"));
                envelope.respond(SessionReply::Ack);
            }
        });

        let handle = network.handle(NodeName::from("A"));
        let reply = handle
            .send(&NodeName::from("B"), SessionMessage::RequestKey { account_id: Uuid::new_v4() })
            .await
            .unwrap();
        assert!(matches!(reply, SessionReply::Ack));
        assert_eq!(network.messages_sent(), 1);
        assert_eq!(network.messages_sent_by(&NodeName::from("A")), 1);
        assert_eq!(network.messages_sent_by(&NodeName::from("B")), 0);
    }

    #[tokio::test]
    async fn unknown_and_disconnected_nodes_fail() {
        let network = InMemoryNetwork::new();
        let _inbox = network.register(identity("B"));
        let handle = network.handle(NodeName::from("A"));
        let msg = || SessionMessage::RequestKey { account_id: Uuid::new_v4() };

        let err = handle.send(&NodeName::from("Z"), msg()).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownNode("Z".into()));

        network.disconnect(&NodeName::from("B"));
        let err = handle.send(&NodeName::from("B"), msg()).await.unwrap_err();
        assert_eq!(err, TransportError::UnknownNode("B".into()));
        assert!(handle.identity_of(&NodeName::from("B")).is_some());
    }

    #[tokio::test]
    async fn dropped_envelope_is_no_reply() {
        let network = InMemoryNetwork::new();
        let mut inbox = network.register(identity("B"));
        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                drop(envelope);
            }
        });

        let handle = network.handle(NodeName::from("A"));
        let err = handle
            .send(&NodeName::from("B"), SessionMessage::RequestKey { account_id: Uuid::new_v4() })
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NoReply("B".into()));
    }
}
