//! The session transport seam and the network map.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use super::messages::{SessionMessage, SessionReply};
use crate::identity::{NodeIdentity, NodeName};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no route to {0}")]
    UnknownNode(String),

    #[error("inbox of {0} is closed")]
    Closed(String),

    #[error("{0} dropped the session without replying")]
    NoReply(String),
}

/// Bidirectional request/reply channel to other nodes.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// The node this transport sends from.
    fn local(&self) -> &NodeName;

    async fn send(&self, to: &NodeName, message: SessionMessage) -> Result<SessionReply, TransportError>;

    /// Well-known identity of a node, from the network map.
    fn identity_of(&self, name: &NodeName) -> Option<NodeIdentity>;
}

/// Name → identity for every node on the network.
#[derive(Debug, Default)]
pub struct NetworkMap {
    nodes: DashMap<NodeName, NodeIdentity>,
}

impl NetworkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: NodeIdentity) {
        self.nodes.insert(identity.name.clone(), identity);
    }

    pub fn get(&self, name: &NodeName) -> Option<NodeIdentity> {
        self.nodes.get(name).map(|entry| entry.value().clone())
    }

    /// All node names, sorted.
    pub fn names(&self) -> Vec<NodeName> {
        let mut names: Vec<NodeName> = self.nodes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
