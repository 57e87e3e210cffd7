//! # In-process Cluster
//!
//! Wires several [`ConcordNode`]s, one [`UniquenessNotary`] and an
//! [`InMemoryNetwork`] together inside one process. The node binary uses it
//! to simulate a deployment and the end-to-end tests use it to run real
//! flows without sockets.
//!
//! ```text
//! ClusterBuilder::new(notary)
//!     .node("PartyA", verifier) .node("PartyB", verifier)
//!     .account("alice", "PartyA") .account("bob", "PartyB")
//!     .build()?
//! ```
//!
//! With a data directory every vault and the notary live on disk under it,
//! one sled database per node, so a cluster rebuilt over the same directory
//! sees everything committed before.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{FlowConfig, FLOW_EVENT_CAPACITY};
use crate::crypto::keys::ConcordKeypair;
use crate::flow::{ConcordNode, NodeServices};
use crate::identity::{Account, AccountDirectory, InMemoryKeyManager, NodeIdentity, NodeName};
use crate::network::InMemoryNetwork;
use crate::notary::{OrderingService, UniquenessNotary};
use crate::storage::{DbError, LedgerDB};
use crate::transaction::LegalityVerifier;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("storage: {0}")]
    Storage(#[from] DbError),

    #[error("account '{account}' is hosted on unknown node {host}")]
    UnknownHost { account: String, host: String },

    #[error("nodes are configured for notary {configured}, cluster notary is {actual}")]
    NotaryMismatch { configured: String, actual: String },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct ClusterBuilder {
    notary: NodeName,
    config: FlowConfig,
    nodes: Vec<(NodeName, Arc<dyn LegalityVerifier>)>,
    accounts: Vec<Account>,
    data_dir: Option<PathBuf>,
}

impl ClusterBuilder {
    pub fn new(notary: impl Into<NodeName>) -> Self {
        let notary = notary.into();
        Self {
            config: FlowConfig::with_notary(notary.as_str()),
            notary,
            nodes: Vec::new(),
            accounts: Vec::new(),
            data_dir: None,
        }
    }

    /// Flow settings shared by every node. The pinned notary must match.
    pub fn config(mut self, config: FlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node(mut self, name: impl Into<NodeName>, verifier: Arc<dyn LegalityVerifier>) -> Self {
        self.nodes.push((name.into(), verifier));
        self
    }

    pub fn account(self, name: &str, host: impl Into<NodeName>) -> Self {
        let account = Account::new(name, host.into());
        self.register(account)
    }

    /// Add an account as is, keeping whatever id it already has.
    pub fn register(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Open storage, register every node and spawn its responder.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Cluster, ClusterError> {
        if self.config.notary != self.notary.as_str() {
            return Err(ClusterError::NotaryMismatch {
                configured: self.config.notary.clone(),
                actual: self.notary.to_string(),
            });
        }

        let directory = Arc::new(AccountDirectory::new());
        for account in self.accounts {
            if !self.nodes.iter().any(|(name, _)| *name == account.host) {
                return Err(ClusterError::UnknownHost {
                    account: account.name,
                    host: account.host.to_string(),
                });
            }
            directory.register(account);
        }

        let notary_keypair = ConcordKeypair::generate();
        let notary = Arc::new(match &self.data_dir {
            Some(dir) => UniquenessNotary::open(self.notary.clone(), notary_keypair, dir.join("notary"))?,
            None => UniquenessNotary::open_temporary(self.notary.clone(), notary_keypair)?,
        });

        let network = InMemoryNetwork::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut nodes = BTreeMap::new();

        for (name, verifier) in self.nodes {
            let vault = Arc::new(match &self.data_dir {
                Some(dir) => LedgerDB::open(dir.join(storage_dir_name(&name)))?,
                None => LedgerDB::open_temporary()?,
            });

            let identity_key = ConcordKeypair::generate();
            let identity = NodeIdentity {
                name: name.clone(),
                owning_key: identity_key.public_key(),
            };
            let inbox = network.register(identity.clone());
            let (events, _) = broadcast::channel(FLOW_EVENT_CAPACITY);

            let node = ConcordNode::new(NodeServices {
                identity,
                kms: Arc::new(InMemoryKeyManager::new(identity_key)),
                directory: Arc::clone(&directory),
                vault: vault.clone(),
                notary: notary.clone(),
                transport: Arc::new(network.handle(name.clone())),
                verifier,
                config: self.config.clone(),
                events,
            });
            let responder = node.spawn_responder(inbox, shutdown_rx.clone());
            nodes.insert(
                name,
                ClusterNode {
                    node,
                    vault,
                    responder,
                },
            );
        }

        info!(
            nodes = nodes.len(),
            accounts = directory.len(),
            notary = %self.notary,
            persistent = self.data_dir.is_some(),
            "cluster started"
        );

        Ok(Cluster {
            network,
            directory,
            notary,
            nodes,
            shutdown: shutdown_tx,
        })
    }
}

/// Filesystem-safe directory name for a node's vault.
fn storage_dir_name(name: &NodeName) -> String {
    name.as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

struct ClusterNode {
    node: ConcordNode,
    vault: Arc<LedgerDB>,
    responder: JoinHandle<()>,
}

pub struct Cluster {
    network: Arc<InMemoryNetwork>,
    directory: Arc<AccountDirectory>,
    notary: Arc<UniquenessNotary>,
    nodes: BTreeMap<NodeName, ClusterNode>,
    shutdown: watch::Sender<bool>,
}

impl Cluster {
    pub fn network(&self) -> &Arc<InMemoryNetwork> {
        &self.network
    }

    pub fn directory(&self) -> &Arc<AccountDirectory> {
        &self.directory
    }

    pub fn notary(&self) -> &Arc<UniquenessNotary> {
        &self.notary
    }

    pub fn notary_name(&self) -> NodeName {
        self.notary.identity().name
    }

    pub fn node(&self, name: &str) -> Option<&ConcordNode> {
        self.nodes.get(&NodeName::from(name)).map(|n| &n.node)
    }

    pub fn vault(&self, name: &str) -> Option<&Arc<LedgerDB>> {
        self.nodes.get(&NodeName::from(name)).map(|n| &n.vault)
    }

    pub fn node_names(&self) -> Vec<NodeName> {
        self.nodes.keys().cloned().collect()
    }

    /// Cut `name` off the network. Its responder keeps running but nothing
    /// reaches it.
    pub fn disconnect(&self, name: &str) {
        warn!(node = name, "disconnecting node");
        self.network.disconnect(&NodeName::from(name));
    }

    /// Stop every responder and flush every vault.
    pub async fn shutdown(self) -> Result<(), ClusterError> {
        let _ = self.shutdown.send(true);
        for (name, member) in self.nodes {
            if let Err(e) = member.responder.await {
                warn!(node = %name, error = %e, "responder task ended abnormally");
            }
            member.vault.flush()?;
        }
        info!("cluster stopped");
        Ok(())
    }
}
