//! Advisory "one active transition per account" check.
//!
//! Runs against the local vault before any network I/O. It cannot see
//! proposals still in flight elsewhere; the notary is the authoritative
//! check.

use tracing::debug;
use uuid::Uuid;

use super::error::FlowError;
use crate::identity::Account;
use crate::storage::RecordStore;

pub struct UniquenessGuard<'a> {
    vault: &'a dyn RecordStore,
}

impl<'a> UniquenessGuard<'a> {
    pub fn new(vault: &'a dyn RecordStore) -> Self {
        Self { vault }
    }

    pub fn has_active_transition(&self, account: &Uuid) -> Result<bool, FlowError> {
        let records = self.vault.query_by_account(account)?;
        Ok(records.iter().any(|stored| stored.is_active()))
    }

    /// `Conflict` if `account` already has an active record.
    pub fn ensure_available(&self, account: &Account) -> Result<(), FlowError> {
        if self.has_active_transition(&account.id)? {
            debug!(account = %account.name, "account already has an active transition");
            return Err(FlowError::Conflict {
                account: account.name.clone(),
            });
        }
        Ok(())
    }
}
