//! A uniqueness notary on sled.
//!
//! All claim bookkeeping lives in one tree so every commit is a single
//! atomic batch:
//!
//! | Prefix | Key                      | Value                         |
//! |--------|--------------------------|-------------------------------|
//! | `0x01` | consumed `StateRef`      | committing tx id              |
//! | `0x02` | active account id        | committing tx id              |
//! | `0x10` | tx id                    | `bincode(Vec<UniquenessKey>)` |
//! | `0x11` | tx id                    | `committed_at` (8B LE)        |
//! | `0x12` | tx id                    | `bincode(Vec<TransitionRecord>)` |
//!
//! `0x01`/`0x02` keys come from [`UniquenessKey::to_key_bytes`]. The `0x10`
//! entries remember which claims a transaction took, so consuming one of its
//! outputs can release them. The `0x12` entries hold the outputs themselves:
//! an input is only accepted if it names a committed transaction and carries
//! exactly the record that transaction created.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sled::{Batch, Tree};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{NotarisationRequest, NotaryError, OrderingService};
use crate::crypto::keys::ConcordKeypair;
use crate::identity::NodeName;
use crate::storage::DbError;
use crate::transaction::{NotaryReceipt, NotaryRef, ResolvedInput, TransitionRecord, UniquenessKey};

const TX_CLAIMS_PREFIX: u8 = 0x10;
const COMMITTED_PREFIX: u8 = 0x11;
const OUTPUTS_PREFIX: u8 = 0x12;

pub struct UniquenessNotary {
    identity: NotaryRef,
    keypair: ConcordKeypair,
    claims: Tree,
    /// Serialises check-then-write. sled batches are atomic but the checks
    /// before them are reads.
    commit_lock: Mutex<()>,
}

impl UniquenessNotary {
    pub fn open<P: AsRef<Path>>(name: NodeName, keypair: ConcordKeypair, path: P) -> Result<Self, DbError> {
        let db = sled::open(path)?;
        Self::from_db(name, keypair, db)
    }

    pub fn open_temporary(name: NodeName, keypair: ConcordKeypair) -> Result<Self, DbError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(name, keypair, db)
    }

    fn from_db(name: NodeName, keypair: ConcordKeypair, db: sled::Db) -> Result<Self, DbError> {
        let claims = db.open_tree("notary_claims")?;
        Ok(Self {
            identity: NotaryRef {
                name,
                key: keypair.public_key(),
            },
            keypair,
            claims,
            commit_lock: Mutex::new(()),
        })
    }

    fn prefixed(prefix: u8, tx_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + tx_id.len());
        key.push(prefix);
        key.extend_from_slice(tx_id.as_bytes());
        key
    }

    /// The transaction currently holding `key`, if any.
    pub fn holder_of(&self, key: &UniquenessKey) -> Result<Option<String>, DbError> {
        Ok(self
            .claims
            .get(key.to_key_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    fn claims_of(&self, tx_id: &str) -> Result<Vec<UniquenessKey>, DbError> {
        match self.claims.get(Self::prefixed(TX_CLAIMS_PREFIX, tx_id))? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| DbError::Serialization(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    fn committed_at(&self, tx_id: &str) -> Result<Option<i64>, DbError> {
        Ok(self
            .claims
            .get(Self::prefixed(COMMITTED_PREFIX, tx_id))?
            .and_then(|v| <[u8; 8]>::try_from(v.as_ref()).ok())
            .map(i64::from_le_bytes))
    }

    fn outputs_of(&self, tx_id: &str) -> Result<Vec<TransitionRecord>, DbError> {
        match self.claims.get(Self::prefixed(OUTPUTS_PREFIX, tx_id))? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| DbError::Serialization(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// An input must point at a committed output and carry that output
    /// unchanged.
    fn check_input(&self, input: &ResolvedInput) -> Result<(), NotaryError> {
        let state_ref = &input.state_ref;
        if self.committed_at(&state_ref.tx_id)?.is_none() {
            return Err(NotaryError::Malformed(format!(
                "input {state_ref} names a transaction this notary never committed"
            )));
        }
        let outputs = self.outputs_of(&state_ref.tx_id)?;
        if outputs.get(state_ref.index as usize) != Some(&input.record) {
            return Err(NotaryError::Malformed(format!(
                "input {state_ref} does not match the committed output"
            )));
        }
        Ok(())
    }

    /// Number of transactions committed so far.
    pub fn committed_count(&self) -> usize {
        self.claims.scan_prefix([COMMITTED_PREFIX]).count()
    }

    fn check_request(&self, request: &NotarisationRequest) -> Result<(), NotaryError> {
        let signed = &request.transaction;
        let proposal = &signed.proposal;

        if proposal.notary != self.identity {
            return Err(NotaryError::WrongNotary {
                requested: proposal.notary.name.to_string(),
                actual: self.identity.name.to_string(),
            });
        }
        if proposal.compute_id() != proposal.id {
            return Err(NotaryError::Malformed("transaction id does not match contents".into()));
        }

        let missing = signed.missing_signers();
        if !missing.is_empty() {
            return Err(NotaryError::IncompleteSignatures(missing.len()));
        }
        signed.signatures.verify_all(proposal)?;

        if !signed.attestation.is_valid_for(&proposal.id) {
            return Err(NotaryError::Malformed("origin attestation does not verify".into()));
        }
        Ok(())
    }

    /// Check and commit. Runs entirely under the commit lock; the caller
    /// flushes once the lock is released.
    fn commit_sync(&self, request: &NotarisationRequest) -> Result<NotaryReceipt, NotaryError> {
        let proposal = &request.transaction.proposal;
        let tx_id = proposal.id.as_str();

        let _guard = self.commit_lock.lock();

        // Re-notarising the same transaction returns the original receipt.
        if let Some(committed_at) = self.committed_at(tx_id)? {
            debug!(tx_id, "transaction already notarised");
            return Ok(NotaryReceipt::issue(tx_id, self.identity.clone(), committed_at, &self.keypair));
        }

        let mut released: Vec<UniquenessKey> = Vec::new();
        for input in &proposal.inputs {
            self.check_input(input)?;
            let key = UniquenessKey::State(input.state_ref.clone());
            if let Some(holder) = self.holder_of(&key)? {
                return Err(NotaryError::Conflict {
                    key: key.to_string(),
                    conflicting_tx: holder,
                });
            }
            for claim in self.claims_of(&input.state_ref.tx_id)? {
                if matches!(claim, UniquenessKey::ActiveAccount(_))
                    && self.holder_of(&claim)?.as_deref() == Some(input.state_ref.tx_id.as_str())
                {
                    released.push(claim);
                }
            }
        }

        for claim in &proposal.claims {
            if released.contains(claim) {
                continue;
            }
            if let Some(holder) = self.holder_of(claim)? {
                if holder != tx_id {
                    return Err(NotaryError::Conflict {
                        key: claim.to_string(),
                        conflicting_tx: holder,
                    });
                }
            }
        }

        let committed_at = Utc::now().timestamp_millis();
        let claim_list =
            bincode::serialize(&proposal.claims).map_err(|e| DbError::Serialization(e.to_string()))?;
        let output_list =
            bincode::serialize(&proposal.outputs).map_err(|e| DbError::Serialization(e.to_string()))?;

        let mut batch = Batch::default();
        for claim in &released {
            batch.remove(claim.to_key_bytes());
        }
        for key in proposal.uniqueness_keys() {
            batch.insert(key.to_key_bytes(), tx_id.as_bytes());
        }
        batch.insert(Self::prefixed(TX_CLAIMS_PREFIX, tx_id), claim_list);
        batch.insert(Self::prefixed(OUTPUTS_PREFIX, tx_id), output_list);
        batch.insert(
            Self::prefixed(COMMITTED_PREFIX, tx_id),
            committed_at.to_le_bytes().to_vec(),
        );
        self.claims.apply_batch(batch).map_err(DbError::from)?;

        info!(
            tx_id,
            requested_by = %request.requested_by,
            inputs = proposal.inputs.len(),
            claims = proposal.claims.len(),
            released = released.len(),
            "transaction notarised"
        );

        Ok(NotaryReceipt::issue(tx_id, self.identity.clone(), committed_at, &self.keypair))
    }
}

#[async_trait]
impl OrderingService for UniquenessNotary {
    fn identity(&self) -> NotaryRef {
        self.identity.clone()
    }

    async fn commit(&self, request: NotarisationRequest) -> Result<NotaryReceipt, NotaryError> {
        if let Err(e) = self.check_request(&request) {
            warn!(tx_id = %request.transaction.id(), error = %e, "notarisation refused");
            return Err(e);
        }
        let receipt = match self.commit_sync(&request) {
            Ok(receipt) => receipt,
            Err(e) => {
                match &e {
                    NotaryError::Conflict { key, conflicting_tx } => warn!(
                        tx_id = %request.transaction.id(),
                        %key,
                        %conflicting_tx,
                        "uniqueness conflict"
                    ),
                    other => warn!(tx_id = %request.transaction.id(), error = %other, "notarisation refused"),
                }
                return Err(e);
            }
        };
        self.claims.flush_async().await.map_err(DbError::from)?;
        Ok(receipt)
    }
}
