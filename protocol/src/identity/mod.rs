//! # Identity Module
//!
//! Who is who in a transition:
//!
//! 1. **Nodes** ([`NodeIdentity`]): named participants with a long-lived
//!    identity key.
//! 2. **Accounts** ([`Account`]): logical parties hosted on a node,
//!    resolved by name through the [`AccountDirectory`].
//! 3. **Pseudonyms** ([`PseudonymousIdentity`]): single-use keys minted by
//!    the [`KeyManagementService`] for one account in one transition.

pub mod account;
pub mod kms;

pub use account::{Account, AccountDirectory, NodeIdentity, NodeName, PseudonymousIdentity};
pub use kms::{InMemoryKeyManager, KeyManagementService, KmsError};
