// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Vault Storage
//!
//! Each node keeps its own vault: the live custody records it participates
//! in, every certified transition it has applied, and the checkpoints of its
//! in-flight flows. Storage is node-local and never shared.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   nodes/{party}/
//!     vault.redb      # records, transitions, checkpoints
//!     node.pem        # signing key
//!   authority/
//!     authority.pem   # uniqueness authority signing key
//!     ledger.redb     # references the authority has spent
//! ```
//!
//! ## Commit Semantics
//!
//! [`RecordStore::record_transition`] is atomic: consumed records disappear
//! and produced records appear in the same write transaction, or neither
//! happens. Applying a transition twice is a no-op, and a terminated lineage
//! never gets a live record back.

pub mod paths;
pub mod vault_db;

use crate::custody::{CertifiedTransition, CustodyId, LiveRecord};
use crate::protocol::checkpoint::{FlowCheckpoint, FlowId};

pub use paths::StoragePaths;
pub use vault_db::VaultDatabase;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of applying a certified transition to a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    AlreadyApplied,
}

/// A node's view of the custody records it participates in.
pub trait RecordStore: Send + Sync {
    /// The live record of a lineage, if this node has one.
    fn find_live_record_by_id(&self, id: &CustodyId) -> StoreResult<Option<LiveRecord>>;

    fn list_live_records(&self) -> StoreResult<Vec<LiveRecord>>;

    /// Atomically remove the consumed records and add the produced ones.
    fn record_transition(&self, transition: &CertifiedTransition) -> StoreResult<CommitOutcome>;

    /// Every applied transition of a lineage, oldest first. Terminated
    /// lineages keep their history.
    fn lineage_history(&self, id: &CustodyId) -> StoreResult<Vec<CertifiedTransition>>;
}

/// Durable flow checkpoints.
pub trait CheckpointStore: Send + Sync {
    fn save_checkpoint(&self, checkpoint: &FlowCheckpoint) -> StoreResult<()>;

    fn list_checkpoints(&self) -> StoreResult<Vec<FlowCheckpoint>>;

    fn remove_checkpoint(&self, flow_id: &FlowId) -> StoreResult<()>;
}

/// Everything a node persists.
pub trait Vault: RecordStore + CheckpointStore {}

impl<T: RecordStore + CheckpointStore> Vault for T {}
