// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the node's REST API. All types derive
//! `Serialize` and `ToSchema` for JSON handling and OpenAPI documentation.
//! Domain types stay behind these views; keys are rendered as base64 SPKI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::custody::{CertifiedTransition, LiveRecord, Party};
use crate::error::CommandOutcome;
use crate::node::CustodyAction;

// =============================================================================
// Parties
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct PartyView {
    /// Human-readable distributor name.
    pub name: String,
    /// Base64 public key.
    pub key: String,
}

impl From<&Party> for PartyView {
    fn from(party: &Party) -> Self {
        Self {
            name: party.name.clone(),
            key: party.key.to_string(),
        }
    }
}

/// Who this node is and which authority it trusts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NodeInfo {
    pub party: PartyView,
    pub authority: PartyView,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PartyListResponse {
    pub parties: Vec<PartyView>,
    pub total: usize,
}

// =============================================================================
// Cargo
// =============================================================================

/// Request to enter new cargo into the chain.
///
/// The calling node must appear in `route` and becomes the first holder.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateScheduleRequest {
    /// Distributor names in delivery order.
    pub route: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateScheduleResponse {
    /// Lineage id of the new cargo.
    pub id: String,
    pub outcome: CommandOutcome,
}

/// One live custody record as seen by this node.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CargoView {
    pub id: String,
    /// Distributor names in delivery order.
    pub route: Vec<String>,
    pub holder: String,
    /// Zero-based position of the holder on the route.
    pub position: usize,
    /// Reference of the record in the form `proposal:index`.
    pub reference: String,
    /// Commands this node may invoke on the record right now.
    pub actions: Vec<CustodyAction>,
}

impl CargoView {
    pub fn new(live: &LiveRecord, actions: Vec<CustodyAction>) -> Self {
        let record = &live.record;
        Self {
            id: record.id.to_string(),
            route: record
                .route
                .parties()
                .iter()
                .map(|party| party.name.clone())
                .collect(),
            holder: record.holder.name.clone(),
            position: record.route.position(&record.holder).unwrap_or_default(),
            reference: live.reference.to_string(),
            actions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CargoListResponse {
    pub cargo: Vec<CargoView>,
    pub total: usize,
}

/// One certified step of a cargo's custody.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionView {
    pub proposal: String,
    /// `create`, `transfer` or `terminate`.
    pub action: String,
    /// Holder after this step. Absent once delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    pub certified_at: DateTime<Utc>,
}

impl From<&CertifiedTransition> for TransitionView {
    fn from(transition: &CertifiedTransition) -> Self {
        let proposal = transition.proposal();
        Self {
            proposal: transition.id().to_string(),
            action: proposal.action.to_string(),
            holder: proposal.single_produced().map(|record| record.holder.name.clone()),
            certified_at: transition.certification.certified_at,
        }
    }
}

/// Custody history of one cargo as applied by this node.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CargoHistoryResponse {
    pub id: String,
    /// Oldest first.
    pub transitions: Vec<TransitionView>,
    pub total: usize,
}

/// Result of a successful arrival or delivery.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandResponse {
    pub id: String,
    pub outcome: CommandOutcome,
    /// New holder after an arrival. Absent after delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
}
