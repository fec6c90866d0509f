// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Node vault backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `live_records`: custody id → serialized LiveRecord
//! - `transitions`: proposal id → serialized CertifiedTransition
//! - `consumed_refs`: record ref (`proposal:index`) → consuming proposal id
//! - `terminated`: custody id → terminating proposal id
//! - `flow_checkpoints`: flow id → serialized FlowCheckpoint
//!
//! Transitions of one lineage can arrive out of order when a node was
//! offline. Application is order-independent:
//!
//! - a produced record whose ref is already consumed is never inserted
//! - a transfer only removes the live record whose exact ref it consumes
//! - a late record never displaces one further along the route
//! - once a lineage is terminated it has no live record, whatever arrives later

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{CheckpointStore, CommitOutcome, RecordStore, StoreResult};
use crate::custody::{CertifiedTransition, CustodyId, CustodyRecord, LiveRecord, TransitionAction};
use crate::protocol::checkpoint::{FlowCheckpoint, FlowId};

// =============================================================================
// Table Definitions
// =============================================================================

const LIVE_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("live_records");

const TRANSITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("transitions");

const CONSUMED_REFS: TableDefinition<&str, &str> = TableDefinition::new("consumed_refs");

const TERMINATED: TableDefinition<&str, &str> = TableDefinition::new("terminated");

const FLOW_CHECKPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("flow_checkpoints");

// =============================================================================
// VaultDatabase
// =============================================================================

pub struct VaultDatabase {
    db: Database,
}

impl VaultDatabase {
    /// Open (or create) the vault at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(LIVE_RECORDS)?;
            let _ = write_txn.open_table(TRANSITIONS)?;
            let _ = write_txn.open_table(CONSUMED_REFS)?;
            let _ = write_txn.open_table(TERMINATED)?;
            let _ = write_txn.open_table(FLOW_CHECKPOINTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }
}

/// Holders only move forward along the route, so the record whose holder
/// sits further along is the later state of the lineage.
fn supersedes(current: &CustodyRecord, candidate: &CustodyRecord) -> bool {
    current.route.position(&current.holder) > candidate.route.position(&candidate.holder)
}

impl RecordStore for VaultDatabase {
    fn find_live_record_by_id(&self, id: &CustodyId) -> StoreResult<Option<LiveRecord>> {
        let key = id.to_string();
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LIVE_RECORDS)?;
        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn list_live_records(&self) -> StoreResult<Vec<LiveRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LIVE_RECORDS)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    fn record_transition(&self, transition: &CertifiedTransition) -> StoreResult<CommitOutcome> {
        let proposal_id = transition.id();
        let json = serde_json::to_vec(transition)?;
        let proposal = transition.proposal();

        let write_txn = self.db.begin_write()?;
        {
            let mut transitions = write_txn.open_table(TRANSITIONS)?;
            if transitions.get(proposal_id.as_str())?.is_some() {
                return Ok(CommitOutcome::AlreadyApplied);
            }
            transitions.insert(proposal_id.as_str(), json.as_slice())?;

            let mut consumed = write_txn.open_table(CONSUMED_REFS)?;
            let mut terminated = write_txn.open_table(TERMINATED)?;
            let mut live = write_txn.open_table(LIVE_RECORDS)?;

            for input in &proposal.consumed {
                let reference = input.reference.to_string();
                consumed.insert(reference.as_str(), proposal_id.as_str())?;

                let key = input.record.id.to_string();
                if proposal.action == TransitionAction::Terminate {
                    // The lineage ends here, even if this vault never saw the
                    // transfers in between.
                    terminated.insert(key.as_str(), proposal_id.as_str())?;
                    live.remove(key.as_str())?;
                    continue;
                }

                // Only drop the live record if it is the exact one consumed.
                let current = match live.get(key.as_str())? {
                    Some(value) => Some(serde_json::from_slice::<LiveRecord>(value.value())?),
                    None => None,
                };
                if current.is_some_and(|current| current.reference == input.reference) {
                    live.remove(key.as_str())?;
                }
            }

            for (record, reference) in proposal.produced.iter().zip(proposal.produced_refs()) {
                if consumed.get(reference.to_string().as_str())?.is_some() {
                    // A later transition of this lineage was applied first.
                    continue;
                }
                let key = record.id.to_string();
                if terminated.get(key.as_str())?.is_some() {
                    continue;
                }
                let current = match live.get(key.as_str())? {
                    Some(value) => Some(serde_json::from_slice::<LiveRecord>(value.value())?),
                    None => None,
                };
                if current.is_some_and(|current| supersedes(&current.record, record)) {
                    continue;
                }
                let entry = LiveRecord {
                    record: record.clone(),
                    reference,
                };
                live.insert(key.as_str(), serde_json::to_vec(&entry)?.as_slice())?;
            }
        }
        write_txn.commit()?;

        tracing::debug!(
            proposal = %proposal_id,
            action = %proposal.action,
            "Applied certified transition"
        );
        Ok(CommitOutcome::Applied)
    }

    fn lineage_history(&self, id: &CustodyId) -> StoreResult<Vec<CertifiedTransition>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRANSITIONS)?;

        let mut history = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let transition: CertifiedTransition = serde_json::from_slice(value.value())?;
            if transition.proposal().lineage() == Some(*id) {
                history.push(transition);
            }
        }
        history.sort_by_key(|t| t.certification.certified_at);
        Ok(history)
    }
}

impl CheckpointStore for VaultDatabase {
    fn save_checkpoint(&self, checkpoint: &FlowCheckpoint) -> StoreResult<()> {
        let key = checkpoint.flow_id.to_string();
        let json = serde_json::to_vec(checkpoint)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FLOW_CHECKPOINTS)?;
            table.insert(key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn list_checkpoints(&self) -> StoreResult<Vec<FlowCheckpoint>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FLOW_CHECKPOINTS)?;

        let mut checkpoints = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            checkpoints.push(serde_json::from_slice(value.value())?);
        }
        Ok(checkpoints)
    }

    fn remove_checkpoint(&self, flow_id: &FlowId) -> StoreResult<()> {
        let key = flow_id.to_string();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FLOW_CHECKPOINTS)?;
            table.remove(key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
