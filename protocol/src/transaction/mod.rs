//! # Transaction Module
//!
//! Construction, signing and verification of the transactions that create
//! and conclude [`TransitionRecord`]s.
//!
//! ## Architecture
//!
//! ```text
//! types.rs       : TransitionRecord, Command, StateRef, UniquenessKey, NotaryRef
//! builder.rs     : ProposedTransaction and the fluent TransitionBuilder
//! verification.rs: LegalityVerifier trait and structural checks
//! signing.rs     : TransactionSignature, SignatureSet, origin attestation
//! finalized.rs   : NotaryReceipt and FinalizedTransaction
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Build**: [`TransitionBuilder`] assembles and verifies a proposal.
//! 2. **Sign**: each required signer adds a [`TransactionSignature`] to the
//!    [`SignatureSet`]; the initiating node attaches an [`OriginAttestation`].
//! 3. **Notarise**: the notary commits inputs and claims and issues a
//!    [`NotaryReceipt`].
//! 4. **Store**: every participant verifies and records the
//!    [`FinalizedTransaction`].
//!
//! Transaction ids are `double_sha256` of the canonical bytes, and every
//! signature is over the id, so nothing in a proposal can change once the
//! first signature exists.

pub mod builder;
pub mod finalized;
pub mod signing;
pub mod types;
pub mod verification;

pub use builder::{ProposedTransaction, TransitionBuilder};
pub use finalized::{FinalityCheckError, FinalizedTransaction, NotaryReceipt};
pub use signing::{
    OriginAttestation, SignatureSet, SignatureSetError, SignedTransaction, TransactionSignature,
};
pub use types::{
    Command, CommandKind, NotaryRef, ResolvedInput, StateRef, TransitionRecord, UniquenessKey,
};
pub use verification::{AcceptAll, LegalityVerifier, RejectAll, StructuralVerifier, VerificationError};
