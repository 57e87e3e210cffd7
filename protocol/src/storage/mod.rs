//! # Storage Module
//!
//! The node vault: finalized transactions and the records they created,
//! indexed by account so the uniqueness guard can ask "does this account
//! already have an active record?" cheaply.
//!
//! Flows talk to the [`RecordStore`] trait; [`LedgerDB`] is the sled-backed
//! implementation. bincode on disk, JSON only at the API edge.

pub mod db;

pub use db::{DbError, DbResult, LedgerDB, RecordRole, RecordStatus, RecordStore, StoredRecord};
