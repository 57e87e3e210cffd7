//! # Concord Contracts
//!
//! Legality rules every node runs before it signs, or lets anyone else sign,
//! a transition. A contract is a [`LegalityVerifier`]: the initiator runs it
//! when building a proposal and every counterparty runs it again on receipt,
//! independently.
//!
//! - **Transition**: the rules for creating and concluding a
//!   [`TransitionRecord`](concord_protocol::transaction::TransitionRecord).
//!
//! ## Design Principles
//!
//! 1. Structural checks (version, id integrity, clock skew) run first, so a
//!    contract only ever reasons about a well-formed proposal.
//! 2. Every rule failure names the rule that failed.
//! 3. Contracts are pure: no I/O, no clock beyond the structural window.
//!
//! [`LegalityVerifier`]: concord_protocol::transaction::LegalityVerifier

pub mod transition;

pub use transition::{ContractViolation, TransitionContract};
