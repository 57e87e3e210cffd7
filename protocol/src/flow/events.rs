//! Flow progress events.
//!
//! Each node owns a tokio `broadcast` channel. Flows publish every step and
//! every co-signing state change on it; nothing in the protocol depends on
//! anyone listening.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Co-signing state of one proposed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoSigningState {
    Built,
    SelfSigned,
    AwaitingRemote,
    FullySigned,
    Failed,
}

impl CoSigningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FullySigned | Self::Failed)
    }
}

impl fmt::Display for CoSigningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Built => write!(f, "BUILT"),
            Self::SelfSigned => write!(f, "SELF_SIGNED"),
            Self::AwaitingRemote => write!(f, "AWAITING_REMOTE"),
            Self::FullySigned => write!(f, "FULLY_SIGNED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum FlowStep {
    ResolvingAccounts,
    CheckingUniqueness,
    ProvisioningKeys,
    Building,
    CoSigning { state: CoSigningState },
    Notarising,
    Distributing,
    Reporting,
    Finished { tx_id: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEvent {
    pub flow_id: Uuid,
    #[serde(flatten)]
    pub step: FlowStep,
}
