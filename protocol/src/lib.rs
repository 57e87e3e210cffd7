// Copyright (c) 2026 Concord Contributors. MIT License.
// See LICENSE for details.

//! # Concord Protocol Core Library
//!
//! Concord lets a node create a shared record between two accounts, possibly
//! hosted on different nodes, such that both owners co-sign it, an
//! independent notary guarantees no account takes part in two active
//! records, and a non-participant observer receives a compliance copy.
//!
//! ## Architecture
//!
//! - **crypto**: Ed25519 keys and signatures, SHA-256/BLAKE3 hashing.
//! - **identity**: node identities, accounts, pseudonymous keys, the KMS.
//! - **transaction**: records, commands, proposals, signatures, receipts.
//! - **storage**: the per-node vault on sled.
//! - **notary**: the ordering service that commits uniqueness claims.
//! - **network**: session messages and the in-process transport.
//! - **flow**: key provisioning, uniqueness guard, co-signing, finality,
//!   compliance reporting, and the responder that answers them.
//! - **cluster**: in-process wiring of nodes, notary and network.
//! - **config**: protocol constants and per-node flow settings.
//!
//! ## Lifecycle of a transition
//!
//! ```text
//! alice@PartyA ──start──▶ key from PartyB ──▶ build ──▶ co-sign with PartyB
//!     ──▶ notary commit ──▶ PartyB records ──▶ Regulator receives a copy
//! ```

pub mod cluster;
pub mod config;
pub mod crypto;
pub mod flow;
pub mod identity;
pub mod network;
pub mod notary;
pub mod storage;
pub mod transaction;

pub use cluster::{Cluster, ClusterBuilder, ClusterError};
pub use flow::{ConcordNode, FlowError, NodeServices, PostCommitException, TransitionOutcome};
