//! Session messages between nodes.
//!
//! Every exchange is a request and exactly one reply. The initiator side
//! owns the session; the responder never opens one.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::crypto::keys::ConcordPublicKey;
use crate::identity::{NodeName, PseudonymousIdentity};
use crate::transaction::{FinalizedTransaction, SignedTransaction, TransactionSignature};

pub type SessionId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionMessage {
    /// Mint a fresh pseudonym for an account the receiver hosts.
    RequestKey { account_id: Uuid },

    /// Re-verify `transaction` and sign it with `keys`.
    CollectSignatures {
        session: SessionId,
        transaction: SignedTransaction,
        keys: Vec<ConcordPublicKey>,
    },

    /// A finalized transaction the receiver participates in.
    Finality {
        session: SessionId,
        finalized: FinalizedTransaction,
    },

    /// A compliance copy for a non-participant observer.
    Report { finalized: FinalizedTransaction },
}

impl SessionMessage {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestKey { .. } => "request_key",
            Self::CollectSignatures { .. } => "collect_signatures",
            Self::Finality { .. } => "finality",
            Self::Report { .. } => "report",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionReply {
    Key(PseudonymousIdentity),
    Signatures(Vec<TransactionSignature>),
    Ack,
    /// The receiver declined on the merits.
    Rejected { reason: String },
    /// The receiver could not process the message.
    Error { message: String },
}

/// A message in flight, with the channel its reply goes back on.
#[derive(Debug)]
pub struct Envelope {
    pub from: NodeName,
    /// Sender's protocol version.
    pub version: String,
    pub message: SessionMessage,
    pub reply: oneshot::Sender<SessionReply>,
}

impl Envelope {
    /// Send the reply. A dropped requester is not an error for the
    /// responder.
    pub fn respond(self, reply: SessionReply) {
        let _ = self.reply.send(reply);
    }
}
