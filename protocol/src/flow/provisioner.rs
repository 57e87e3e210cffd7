//! Account resolution and pseudonym provisioning.

use tracing::debug;

use super::error::FlowError;
use super::{within, NodeServices};
use crate::crypto::keys::ConcordPublicKey;
use crate::identity::{Account, PseudonymousIdentity};
use crate::network::{SessionMessage, SessionReply};

pub struct KeyProvisioner<'a> {
    services: &'a NodeServices,
}

impl<'a> KeyProvisioner<'a> {
    pub fn new(services: &'a NodeServices) -> Self {
        Self { services }
    }

    pub fn resolve_account(&self, name: &str) -> Result<Account, FlowError> {
        self.services
            .directory
            .by_name(name)
            .ok_or_else(|| FlowError::NotFound(format!("account '{}'", name)))
    }

    /// A fresh key for an account hosted here.
    pub fn provision_key(&self, account: &Account) -> Result<ConcordPublicKey, FlowError> {
        if &account.host != self.services.name() {
            return Err(FlowError::NotFound(format!(
                "account '{}' is hosted on {}, not here",
                account.name, account.host
            )));
        }
        Ok(self.services.kms.fresh_key(account.id))
    }

    pub fn local_pseudonym(&self, account: &Account) -> Result<PseudonymousIdentity, FlowError> {
        Ok(PseudonymousIdentity {
            account_id: account.id,
            owning_key: self.provision_key(account)?,
            host: account.host.clone(),
        })
    }

    /// A fresh pseudonym minted by the account's host. Local accounts are
    /// served without a round trip.
    pub async fn request_remote_key(&self, account: &Account) -> Result<PseudonymousIdentity, FlowError> {
        if &account.host == self.services.name() {
            return self.local_pseudonym(account);
        }

        let message = SessionMessage::RequestKey {
            account_id: account.id,
        };
        let after = self.services.config.key_request_timeout();
        let reply = within(
            "key request",
            after,
            self.services.transport.send(&account.host, message),
        )
        .await??;

        let identity = match reply {
            SessionReply::Key(identity) => identity,
            SessionReply::Rejected { reason } => return Err(FlowError::Rejected { reason }),
            SessionReply::Error { message } => {
                return Err(FlowError::NotFound(format!(
                    "account '{}' on {}: {}",
                    account.name, account.host, message
                )))
            }
            other => return Err(FlowError::Protocol(format!("unexpected reply to key request: {other:?}"))),
        };

        if identity.account_id != account.id || identity.host != account.host {
            return Err(FlowError::Protocol(format!(
                "{} returned a key for another account",
                account.host
            )));
        }

        self.services
            .kms
            .register_external(identity.owning_key.clone(), account.id);
        debug!(
            account = %account.name,
            host = %account.host,
            key = %identity.owning_key.to_base58(),
            "remote pseudonym provisioned"
        );
        Ok(identity)
    }
}
