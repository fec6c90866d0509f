// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Custody Records
//!
//! A [`CustodyRecord`] says who currently holds a cargo and which distributors
//! it must pass through. Records are never edited in place: a transition
//! consumes the live record and produces its successor, so every record is
//! addressed by the [`RecordRef`] of the proposal that produced it.
//!
//! ## Invariants
//!
//! - `route` has more than one custodian and never changes within a lineage
//! - `holder` is always on the route
//! - `id` never changes within a lineage

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::Party;
use super::proposal::ProposalId;

// =============================================================================
// Lineage Id
// =============================================================================

/// Immutable identifier shared by every record of one cargo's lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustodyId(Uuid);

impl CustodyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CustodyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CustodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CustodyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for CustodyId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

// =============================================================================
// Route
// =============================================================================

/// Ordered, immutable sequence of custodians a cargo travels through.
///
/// The order is the delivery path. All succession logic goes through
/// [`Route::next_after`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(Vec<Party>);

impl Route {
    pub fn new(parties: Vec<Party>) -> Self {
        Self(parties)
    }

    pub fn parties(&self) -> &[Party] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, party: &Party) -> bool {
        self.0.contains(party)
    }

    pub fn position(&self, party: &Party) -> Option<usize> {
        self.0.iter().position(|p| p == party)
    }

    /// The custodian immediately after `party`, if `party` is on the route
    /// and not last.
    pub fn next_after(&self, party: &Party) -> Option<&Party> {
        let index = self.position(party)?;
        self.0.get(index + 1)
    }

    /// True when `party` is the final custodian.
    pub fn is_last(&self, party: &Party) -> bool {
        self.0.last() == Some(party)
    }

    pub fn has_duplicates(&self) -> bool {
        self.0
            .iter()
            .enumerate()
            .any(|(i, party)| self.0[i + 1..].contains(party))
    }
}

// =============================================================================
// Records
// =============================================================================

/// The custody state of one cargo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyRecord {
    pub id: CustodyId,
    pub route: Route,
    pub holder: Party,
}

impl CustodyRecord {
    /// Successor record with a new holder. `id` and `route` carry over.
    pub fn with_holder(&self, holder: Party) -> Self {
        Self {
            id: self.id,
            route: self.route.clone(),
            holder,
        }
    }
}

/// Pointer to a record produced by a certified proposal: `(proposal, index)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub proposal: ProposalId,
    pub index: u32,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.proposal, self.index)
    }
}

/// A record together with the reference that addresses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRecord {
    pub record: CustodyRecord,
    pub reference: RecordRef,
}
