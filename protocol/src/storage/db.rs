//! # LedgerDB, the node vault
//!
//! Every node's durable view of the transitions it has taken part in or
//! observed, built on sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree            | Key                                   | Value                           |
//! |-----------------|---------------------------------------|---------------------------------|
//! | `records`       | `linear_id` (16B)                     | `bincode(StoredRecord)`         |
//! | `transactions`  | `tx_id` (hex bytes)                   | `bincode(FinalizedTransaction)` |
//! | `account_index` | `account_id` (16B) ++ `linear_id` (16B) | empty                         |
//!
//! The account index is a prefix scan: all keys starting with an account id
//! name the records that account appears in, on either side.
//!
//! ## Atomicity and Idempotence
//!
//! A finalized transaction is written in one sled transaction spanning all
//! three trees.
//!
//! Recording the same finalized transaction twice changes nothing. A record
//! already present keeps its status, so a conclusion delivered before its
//! start does not resurrect the record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, TransactionalTree,
};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use uuid::Uuid;

use crate::transaction::{CommandKind, FinalizedTransaction, StateRef, TransitionRecord};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// StoredRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    /// Unconsumed. Counts against "one active transition per account".
    Active,
    /// A later transaction consumed it.
    Consumed,
}

/// Why this node holds the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordRole {
    /// One of our accounts is a side of the record.
    Participant,
    /// We received a compliance copy.
    Observer,
}

/// A record as the vault stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record: TransitionRecord,
    /// The transaction that created the record.
    pub state_ref: StateRef,
    pub status: RecordStatus,
    pub role: RecordRole,
    /// The transaction that consumed the record, once consumed.
    pub consumed_by: Option<String>,
    /// Unix timestamp in milliseconds.
    pub recorded_at: i64,
}

impl StoredRecord {
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// Query and persistence surface the flows use.
pub trait RecordStore: Send + Sync {
    /// Records involving `account`, oldest first.
    fn query_by_account(&self, account: &Uuid) -> DbResult<Vec<StoredRecord>>;

    /// Persist a finalized transaction and apply it: new outputs become
    /// active records, consumed inputs are marked consumed.
    fn record_finalized(&self, tx: &FinalizedTransaction, role: RecordRole) -> DbResult<()>;

    fn get_record(&self, linear_id: &Uuid) -> DbResult<Option<StoredRecord>>;

    fn get_transaction(&self, tx_id: &str) -> DbResult<Option<FinalizedTransaction>>;

    fn mark_consumed(&self, linear_id: &Uuid, by_tx: &str) -> DbResult<()>;

    /// Every record, oldest first.
    fn all_records(&self) -> DbResult<Vec<StoredRecord>>;

    fn transaction_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// LedgerDB
// ---------------------------------------------------------------------------

/// sled-backed [`RecordStore`].
///
/// sled trees are thread-safe, so a `LedgerDB` can be shared behind an
/// `Arc` without extra locking.
#[derive(Debug, Clone)]
pub struct LedgerDB {
    db: Db,
    records: Tree,
    transactions: Tree,
    account_index: Tree,
}

impl LedgerDB {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop. For tests and the in-process
    /// network.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let records = db.open_tree("records")?;
        let transactions = db.open_tree("transactions")?;
        let account_index = db.open_tree("account_index")?;

        Ok(Self {
            db,
            records,
            transactions,
            account_index,
        })
    }

    fn index_key(account: &Uuid, linear_id: &Uuid) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[..16].copy_from_slice(account.as_bytes());
        key[16..].copy_from_slice(linear_id.as_bytes());
        key
    }

    fn decode_record(bytes: &[u8]) -> DbResult<StoredRecord> {
        bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
    }

    fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
        bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
    }

    /// Write `stored` and its account index entries inside a transaction.
    fn put_record(
        records: &TransactionalTree,
        index: &TransactionalTree,
        stored: &StoredRecord,
    ) -> ConflictableTransactionResult<(), DbError> {
        let linear_id = stored.record.linear_id;
        let bytes = Self::encode(stored).map_err(ConflictableTransactionError::Abort)?;
        records.insert(linear_id.as_bytes().to_vec(), bytes)?;
        for account in stored.record.accounts() {
            index.insert(Self::index_key(&account, &linear_id).to_vec(), Vec::<u8>::new())?;
        }
        Ok(())
    }

    fn sorted(mut records: Vec<StoredRecord>) -> Vec<StoredRecord> {
        records.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.record.linear_id.cmp(&b.record.linear_id))
        });
        records
    }

    /// Flush dirty buffers to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl RecordStore for LedgerDB {
    fn query_by_account(&self, account: &Uuid) -> DbResult<Vec<StoredRecord>> {
        let mut found = Vec::new();
        for entry in self.account_index.scan_prefix(account.as_bytes()) {
            let (key, _) = entry?;
            let linear_id = &key[16..];
            if let Some(bytes) = self.records.get(linear_id)? {
                found.push(Self::decode_record(&bytes)?);
            }
        }
        Ok(Self::sorted(found))
    }

    fn record_finalized(&self, tx: &FinalizedTransaction, role: RecordRole) -> DbResult<()> {
        let proposal = &tx.signed.proposal;
        let encoded = Self::encode(tx)?;
        let now = Utc::now().timestamp_millis();

        // One transaction across all three trees: a transaction row never
        // exists without its records.
        (&self.transactions, &self.records, &self.account_index)
            .transaction(|(transactions, records, index)| {
                for (i, output) in proposal.outputs.iter().enumerate() {
                    if records.get(output.linear_id.as_bytes())?.is_some() {
                        continue;
                    }
                    Self::put_record(
                        records,
                        index,
                        &StoredRecord {
                            record: output.clone(),
                            state_ref: proposal.output_ref(i as u32),
                            status: RecordStatus::Active,
                            role,
                            consumed_by: None,
                            recorded_at: now,
                        },
                    )?;
                }

                if proposal.command.kind == CommandKind::Conclude {
                    for input in &proposal.inputs {
                        let linear_id = input.record.linear_id;
                        match records.get(linear_id.as_bytes())? {
                            Some(bytes) => {
                                let mut stored = Self::decode_record(&bytes)
                                    .map_err(ConflictableTransactionError::Abort)?;
                                stored.status = RecordStatus::Consumed;
                                stored.consumed_by = Some(proposal.id.clone());
                                let bytes =
                                    Self::encode(&stored).map_err(ConflictableTransactionError::Abort)?;
                                records.insert(linear_id.as_bytes().to_vec(), bytes)?;
                            }
                            // Conclusion arrived before (or without) its start.
                            None => Self::put_record(
                                records,
                                index,
                                &StoredRecord {
                                    record: input.record.clone(),
                                    state_ref: input.state_ref.clone(),
                                    status: RecordStatus::Consumed,
                                    role,
                                    consumed_by: Some(proposal.id.clone()),
                                    recorded_at: now,
                                },
                            )?,
                        }
                    }
                }

                transactions.insert(proposal.id.as_bytes(), encoded.clone())?;
                Ok(())
            })
            .map_err(|e: TransactionError<DbError>| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => DbError::Sled(e),
            })?;

        self.db.flush()?;
        Ok(())
    }

    fn get_record(&self, linear_id: &Uuid) -> DbResult<Option<StoredRecord>> {
        match self.records.get(linear_id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_transaction(&self, tx_id: &str) -> DbResult<Option<FinalizedTransaction>> {
        match self.transactions.get(tx_id.as_bytes())? {
            Some(bytes) => {
                let tx = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(tx))
            }
            None => Ok(None),
        }
    }

    fn mark_consumed(&self, linear_id: &Uuid, by_tx: &str) -> DbResult<()> {
        let mut stored = self
            .get_record(linear_id)?
            .ok_or_else(|| DbError::NotFound(linear_id.to_string()))?;
        stored.status = RecordStatus::Consumed;
        stored.consumed_by = Some(by_tx.to_string());
        self.records
            .insert(linear_id.as_bytes(), Self::encode(&stored)?)?;
        Ok(())
    }

    fn all_records(&self) -> DbResult<Vec<StoredRecord>> {
        let mut records = Vec::new();
        for entry in self.records.iter() {
            let (_, bytes) = entry?;
            records.push(Self::decode_record(&bytes)?);
        }
        Ok(Self::sorted(records))
    }

    fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
