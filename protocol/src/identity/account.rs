//! Accounts, nodes and pseudonyms.
//!
//! A *node* is a physical participant with a long-lived identity key. An
//! *account* is a logical party hosted on exactly one node. Accounts never
//! sign with the node's key: for every transition each account is
//! represented by a fresh [`PseudonymousIdentity`], so two transitions by
//! the same account cannot be linked by key.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::crypto::keys::ConcordPublicKey;

// ---------------------------------------------------------------------------
// NodeName / NodeIdentity
// ---------------------------------------------------------------------------

/// X.500-style legal name of a node, e.g. `O=PartyA,L=London,C=GB`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeName(String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A node's well-known identity: its name and its identity public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub name: NodeName,
    pub owning_key: ConcordPublicKey,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A logical account and the node that hosts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub host: NodeName,
}

/// Namespace for name-based account ids.
const ACCOUNT_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_2a4e_9b3d_4f7a_8e05_d2c4_71b9_a03e);

impl Account {
    /// An account whose id is derived from its host and name (UUID v5), so
    /// the same account keeps its id across restarts over one data
    /// directory.
    pub fn new(name: impl Into<String>, host: NodeName) -> Self {
        let name = name.into();
        Self {
            id: Self::derive_id(&host, &name),
            name,
            host,
        }
    }

    pub fn derive_id(host: &NodeName, name: &str) -> Uuid {
        let mut seed = Vec::with_capacity(host.as_str().len() + name.len() + 1);
        seed.extend_from_slice(host.as_str().as_bytes());
        seed.push(0);
        seed.extend_from_slice(name.as_bytes());
        Uuid::new_v5(&ACCOUNT_NAMESPACE, &seed)
    }
}

/// A single-use public key standing in for an account in one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudonymousIdentity {
    pub account_id: Uuid,
    pub owning_key: ConcordPublicKey,
    pub host: NodeName,
}

// ---------------------------------------------------------------------------
// AccountDirectory
// ---------------------------------------------------------------------------

/// Name-indexed view of the accounts this node knows about.
///
/// In a deployment this is fed by account-info sharing between nodes. The
/// in-process network shares one directory between all nodes.
#[derive(Debug, Default)]
pub struct AccountDirectory {
    by_name: DashMap<String, Account>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account. A second account with the same name replaces
    /// the first, which mirrors how an updated account info supersedes the
    /// old one.
    pub fn register(&self, account: Account) {
        self.by_name.insert(account.name.clone(), account);
    }

    /// Create and register an account hosted on `host`.
    pub fn create(&self, name: &str, host: &NodeName) -> Account {
        let account = Account::new(name, host.clone());
        self.register(account.clone());
        account
    }

    pub fn by_name(&self, name: &str) -> Option<Account> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    pub fn by_id(&self, id: &Uuid) -> Option<Account> {
        self.by_name
            .iter()
            .find(|entry| entry.value().id == *id)
            .map(|entry| entry.value().clone())
    }

    /// Accounts hosted on `host`, sorted by name.
    pub fn hosted_on(&self, host: &NodeName) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .by_name
            .iter()
            .filter(|entry| &entry.value().host == host)
            .map(|entry| entry.value().clone())
            .collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        accounts
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_resolve_by_name_and_id() {
        let dir = AccountDirectory::new();
        let host = NodeName::from("O=PartyA,L=London,C=GB");
        let alice = dir.create("alice", &host);

        assert_eq!(dir.by_name("alice"), Some(alice.clone()));
        assert_eq!(dir.by_id(&alice.id), Some(alice));
        assert!(dir.by_name("mallory").is_none());
    }

    #[test]
    fn hosted_on_filters_and_sorts() {
        let dir = AccountDirectory::new();
        let a = NodeName::from("A");
        let b = NodeName::from("B");
        dir.create("zed", &a);
        dir.create("amy", &a);
        dir.create("bob", &b);

        let names: Vec<_> = dir.hosted_on(&a).into_iter().map(|acc| acc.name).collect();
        assert_eq!(names, vec!["amy", "zed"]);
        assert_eq!(dir.len(), 3);
    }

    #[test]
    fn account_ids_are_stable_per_host_and_name() {
        let a = NodeName::from("O=PartyA,L=London,C=GB");
        let b = NodeName::from("O=PartyB,L=New York,C=US");
        assert_eq!(Account::new("alice", a.clone()).id, Account::new("alice", a.clone()).id);
        assert_ne!(Account::new("alice", a.clone()).id, Account::new("alice", b).id);
        assert_ne!(Account::new("alice", a.clone()).id, Account::new("bob", a).id);
    }

    #[test]
    fn node_name_display() {
        assert_eq!(NodeName::new("O=Regulator").to_string(), "O=Regulator");
    }
}
