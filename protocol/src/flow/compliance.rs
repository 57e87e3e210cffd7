//! One-way compliance delivery to a non-participant observer.
//!
//! No signature is requested from the observer and the notary is not
//! involved. A failed delivery is returned as [`FlowError::Delivery`]; the
//! initiator turns it into a compliance exception on the outcome.

use tracing::info;

use super::error::FlowError;
use super::{within, NodeServices};
use crate::identity::NodeName;
use crate::network::{SessionMessage, SessionReply};
use crate::transaction::FinalizedTransaction;

pub struct ComplianceReporter<'a> {
    services: &'a NodeServices,
}

impl<'a> ComplianceReporter<'a> {
    pub fn new(services: &'a NodeServices) -> Self {
        Self { services }
    }

    pub async fn report(&self, finalized: &FinalizedTransaction, observer: &NodeName) -> Result<(), FlowError> {
        let delivery_error = |reason: String| FlowError::Delivery {
            node: observer.to_string(),
            reason,
        };

        let message = SessionMessage::Report {
            finalized: finalized.clone(),
        };
        let after = self.services.config.delivery_timeout();
        let reply = within("compliance report", after, self.services.transport.send(observer, message))
            .await
            .map_err(|e| delivery_error(e.to_string()))?
            .map_err(|e| delivery_error(e.to_string()))?;

        match reply {
            SessionReply::Ack => {
                info!(tx_id = %finalized.id(), %observer, "compliance copy delivered");
                Ok(())
            }
            SessionReply::Rejected { reason } => Err(delivery_error(format!("rejected: {reason}"))),
            SessionReply::Error { message } => Err(delivery_error(message)),
            other => Err(delivery_error(format!("unexpected reply {other:?}"))),
        }
    }
}
