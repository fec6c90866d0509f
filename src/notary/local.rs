// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Single-process uniqueness authority with a mutex-guarded ledger.
//!
//! Opened with [`LocalUniquenessAuthority::open`], every spend is journaled
//! to redb before it is certified and the ledger is reloaded on restart, so
//! a reference spent before a restart stays spent.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};

use super::{AuthorityError, CertificationRequest, UniquenessAuthority};
use crate::custody::{
    Certification, NodeIdentity, Party, PartySignature, ProposalId, RecordRef,
};
use crate::storage::StoreResult;

/// Record ref (`proposal:index`) → serialized `(RecordRef, ProposalId)`.
const SPENT_REFS: TableDefinition<&str, &[u8]> = TableDefinition::new("spent_refs");

#[derive(Clone)]
pub struct LocalUniquenessAuthority {
    identity: NodeIdentity,
    /// Consumed reference → proposal that spent it.
    ledger: Arc<Mutex<HashMap<RecordRef, ProposalId>>>,
    journal: Option<Arc<Database>>,
}

impl LocalUniquenessAuthority {
    /// Ledger held in memory only. Forgets every spend when dropped.
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            ledger: Arc::new(Mutex::new(HashMap::new())),
            journal: None,
        }
    }

    /// Ledger journaled to the redb file at `path`, reloading earlier spends.
    pub fn open(identity: NodeIdentity, path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        let mut ledger = HashMap::new();
        {
            let table = write_txn.open_table(SPENT_REFS)?;
            for entry in table.iter()? {
                let (_, value) = entry?;
                let (reference, spent_by): (RecordRef, ProposalId) =
                    serde_json::from_slice(value.value())?;
                ledger.insert(reference, spent_by);
            }
        }
        write_txn.commit()?;

        tracing::info!(
            party = %identity.party(),
            spent = ledger.len(),
            "Uniqueness ledger loaded"
        );
        Ok(Self {
            identity,
            ledger: Arc::new(Mutex::new(ledger)),
            journal: Some(Arc::new(db)),
        })
    }

    fn write_journal(db: &Database, spent: &[RecordRef], id: &ProposalId) -> StoreResult<()> {
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SPENT_REFS)?;
            for reference in spent {
                let key = reference.to_string();
                let value = serde_json::to_vec(&(reference, id))?;
                table.insert(key.as_str(), value.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn consumed_count(&self) -> usize {
        self.ledger.lock().map(|ledger| ledger.len()).unwrap_or(0)
    }

    fn check_request(&self, request: &CertificationRequest) -> Result<ProposalId, AuthorityError> {
        let proposal = &request.proposal.proposal;
        if proposal.authority.key != *self.identity.key() {
            return Err(AuthorityError::InvalidRequest(format!(
                "proposal names authority {}",
                proposal.authority
            )));
        }
        if request.consumed != proposal.consumed_refs() || request.produced != proposal.produced_refs() {
            return Err(AuthorityError::InvalidRequest(
                "references do not match the proposal".to_string(),
            ));
        }
        request.proposal.verify_signatures(&[])?;
        Ok(request.proposal.id())
    }
}

#[async_trait]
impl UniquenessAuthority for LocalUniquenessAuthority {
    fn identity(&self) -> &Party {
        self.identity.party()
    }

    async fn certify(&self, request: CertificationRequest) -> Result<Certification, AuthorityError> {
        let id = self.check_request(&request)?;

        {
            let mut ledger = self
                .ledger
                .lock()
                .map_err(|_| AuthorityError::Unavailable("ledger lock poisoned".to_string()))?;

            // Check every reference before spending any of them.
            for reference in &request.consumed {
                if let Some(spent_by) = ledger.get(reference) {
                    if *spent_by != id {
                        tracing::info!(
                            reference = %reference,
                            spent_by = %spent_by,
                            proposal = %id,
                            "Certification refused: reference already consumed"
                        );
                        return Err(AuthorityError::Conflict {
                            reference: reference.to_string(),
                            spent_by: spent_by.to_string(),
                        });
                    }
                }
            }
            if let Some(db) = &self.journal {
                Self::write_journal(db, &request.consumed, &id).map_err(|e| {
                    tracing::error!(proposal = %id, error = %e, "Failed to journal spent references");
                    AuthorityError::Unavailable(format!("ledger journal: {e}"))
                })?;
            }
            for reference in &request.consumed {
                ledger.insert(reference.clone(), id.clone());
            }
        }

        tracing::info!(
            proposal = %id,
            action = %request.proposal.proposal.action,
            consumed = request.consumed.len(),
            "Proposal certified"
        );
        Ok(Certification {
            signature: PartySignature::sign(&self.identity, &id),
            certified_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for LocalUniquenessAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalUniquenessAuthority")
            .field("identity", self.identity.party())
            .field("journaled", &self.journal.is_some())
            .finish_non_exhaustive()
    }
}
