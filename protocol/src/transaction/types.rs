//! Core type definitions for transition transactions.
//!
//! These form the vocabulary every node shares: the record being agreed,
//! the command authorizing it, pointers to prior outputs and the keys the
//! notary commits to guarantee uniqueness.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::crypto::keys::ConcordPublicKey;
use crate::identity::{NodeName, PseudonymousIdentity};

// ---------------------------------------------------------------------------
// TransitionRecord
// ---------------------------------------------------------------------------

/// The shared record two accounts agree on.
///
/// Both accounts appear twice: once by account id (stable) and once by the
/// pseudonym key that represents the account in this transition only.
/// The record is never mutated after creation. It stays *active* until a
/// later transaction consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Stable identifier across the record's lifetime.
    pub linear_id: Uuid,
    pub source_account: Uuid,
    pub target_account: Uuid,
    pub source_key: ConcordPublicKey,
    pub target_key: ConcordPublicKey,
}

impl TransitionRecord {
    pub fn new(linear_id: Uuid, source: &PseudonymousIdentity, target: &PseudonymousIdentity) -> Self {
        Self {
            linear_id,
            source_account: source.account_id,
            target_account: target.account_id,
            source_key: source.owning_key.clone(),
            target_key: target.owning_key.clone(),
        }
    }

    /// `true` if `account` is either side of this record.
    pub fn involves(&self, account: &Uuid) -> bool {
        self.source_account == *account || self.target_account == *account
    }

    pub fn accounts(&self) -> [Uuid; 2] {
        [self.source_account, self.target_account]
    }

    pub fn participant_keys(&self) -> [&ConcordPublicKey; 2] {
        [&self.source_key, &self.target_key]
    }

    /// Canonical bytes: linear id, both account ids, both keys.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 * 3 + 32 * 2);
        buf.extend_from_slice(self.linear_id.as_bytes());
        buf.extend_from_slice(self.source_account.as_bytes());
        buf.extend_from_slice(self.target_account.as_bytes());
        buf.extend_from_slice(self.source_key.as_bytes());
        buf.extend_from_slice(self.target_key.as_bytes());
        buf
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// What a transaction does to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Create a new record between two accounts.
    Start,
    /// Consume an existing record, freeing both accounts.
    Conclude,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Conclude => write!(f, "Conclude"),
        }
    }
}

/// The authorization command: a kind plus the keys that must sign.
///
/// Signers are kept sorted and deduplicated so two commands naming the same
/// keys in a different order produce the same transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    pub signers: Vec<ConcordPublicKey>,
}

impl Command {
    pub fn new(kind: CommandKind, signers: impl IntoIterator<Item = ConcordPublicKey>) -> Self {
        let mut signers: Vec<ConcordPublicKey> = signers.into_iter().collect();
        signers.sort();
        signers.dedup();
        Self { kind, signers }
    }

    pub fn requires(&self, key: &ConcordPublicKey) -> bool {
        self.signers.binary_search(key).is_ok()
    }
}

// ---------------------------------------------------------------------------
// StateRef / ResolvedInput
// ---------------------------------------------------------------------------

/// Pointer to output `index` of transaction `tx_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateRef {
    pub tx_id: String,
    pub index: u32,
}

impl StateRef {
    pub fn new(tx_id: impl Into<String>, index: u32) -> Self {
        Self {
            tx_id: tx_id.into(),
            index,
        }
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.tx_id, self.index)
    }
}

/// An input together with the record it points at, so every verifier can
/// check the transaction without its own vault lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInput {
    pub state_ref: StateRef,
    pub record: TransitionRecord,
}

// ---------------------------------------------------------------------------
// UniquenessKey
// ---------------------------------------------------------------------------

/// Something the notary commits to at most one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UniquenessKey {
    /// A prior output. Consuming it twice is a double spend.
    State(StateRef),
    /// "This account has an active record". Held until the record is
    /// consumed.
    ActiveAccount(Uuid),
}

impl UniquenessKey {
    /// Key bytes used in the notary's claim tree.
    pub fn to_key_bytes(&self) -> Vec<u8> {
        match self {
            Self::State(state) => {
                let mut buf = Vec::with_capacity(1 + state.tx_id.len() + 4);
                buf.push(0x01);
                buf.extend_from_slice(state.tx_id.as_bytes());
                buf.extend_from_slice(&state.index.to_be_bytes());
                buf
            }
            Self::ActiveAccount(account) => {
                let mut buf = Vec::with_capacity(17);
                buf.push(0x02);
                buf.extend_from_slice(account.as_bytes());
                buf
            }
        }
    }
}

impl fmt::Display for UniquenessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(state) => write!(f, "state {}", state),
            Self::ActiveAccount(account) => write!(f, "account {}", account),
        }
    }
}

// ---------------------------------------------------------------------------
// NotaryRef
// ---------------------------------------------------------------------------

/// The ordering service a transaction is pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotaryRef {
    pub name: NodeName,
    pub key: ConcordPublicKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::ConcordKeypair;

    fn pseudonym(host: &str) -> PseudonymousIdentity {
        PseudonymousIdentity {
            account_id: Uuid::new_v4(),
            owning_key: ConcordKeypair::generate().public_key(),
            host: NodeName::from(host),
        }
    }

    #[test]
    fn record_involves_both_accounts_only() {
        let a = pseudonym("A");
        let b = pseudonym("B");
        let record = TransitionRecord::new(Uuid::new_v4(), &a, &b);

        assert!(record.involves(&a.account_id));
        assert!(record.involves(&b.account_id));
        assert!(!record.involves(&Uuid::new_v4()));
        assert_eq!(record.participant_keys(), [&a.owning_key, &b.owning_key]);
    }

    #[test]
    fn command_signers_are_order_independent() {
        let k1 = ConcordKeypair::generate().public_key();
        let k2 = ConcordKeypair::generate().public_key();
        let c1 = Command::new(CommandKind::Start, vec![k1.clone(), k2.clone()]);
        let c2 = Command::new(CommandKind::Start, vec![k2.clone(), k1.clone(), k2.clone()]);

        assert_eq!(c1, c2);
        assert_eq!(c1.signers.len(), 2);
        assert!(c1.requires(&k1));
        assert!(!c1.requires(&ConcordKeypair::generate().public_key()));
    }

    #[test]
    fn uniqueness_key_bytes_are_disjoint_by_kind() {
        let account = Uuid::new_v4();
        let state = UniquenessKey::State(StateRef::new("ab", 0));
        let active = UniquenessKey::ActiveAccount(account);

        assert_eq!(state.to_key_bytes()[0], 0x01);
        assert_eq!(active.to_key_bytes()[0], 0x02);
        assert_eq!(active.to_key_bytes().len(), 17);
    }

    #[test]
    fn state_ref_display() {
        assert_eq!(StateRef::new("deadbeef", 3).to_string(), "deadbeef(3)");
    }
}
