// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable flow state.
//!
//! A checkpoint is written every time a flow is about to suspend (waiting on
//! a counterparty or on the uniqueness authority) so a restarted node resumes
//! the flow instead of running it again from the start.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::custody::{CertifiedTransition, CustodyId, Party, Route, SignedProposal, TransitionAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FlowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What an initiator was asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CustodyCommand {
    /// Enter a new cargo with the given route; the initiator holds it first.
    Create { id: CustodyId, route: Route },
    /// The cargo arrived at the initiator, who takes custody from the holder.
    Arrival { id: CustodyId },
    /// The holder delivered the cargo and removes it from the chain.
    Delivery { id: CustodyId },
}

impl CustodyCommand {
    pub fn action(&self) -> TransitionAction {
        match self {
            CustodyCommand::Create { .. } => TransitionAction::Create,
            CustodyCommand::Arrival { .. } => TransitionAction::Transfer,
            CustodyCommand::Delivery { .. } => TransitionAction::Terminate,
        }
    }

    pub fn lineage(&self) -> CustodyId {
        match self {
            CustodyCommand::Create { id, .. }
            | CustodyCommand::Arrival { id }
            | CustodyCommand::Delivery { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiatorState {
    Build,
    LocalVerify,
    LocalSign,
    OpenSessions,
    AssignRoles,
    AwaitCounterSignature,
    SubmitForUniqueness,
    BroadcastOutcome,
    Done,
    Aborted,
}

impl InitiatorState {
    /// A certified checkpoint in this state belongs to the finality
    /// retrier. Before that, the live flow delivers its own outcome.
    pub fn is_handed_over(self) -> bool {
        self == InitiatorState::Done
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderState {
    AwaitRole,
    LocalVerify,
    SignOrReject,
    AwaitOutcome,
    CommitOrDiscard,
    Done,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatorCheckpoint {
    pub command: CustodyCommand,
    pub state: InitiatorState,
    pub proposal: Option<SignedProposal>,
    pub outcome: Option<CertifiedTransition>,
    /// Recipients that have not acknowledged the outcome yet.
    pub pending: Vec<Party>,
    pub delivery_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderCheckpoint {
    pub kind: TransitionAction,
    pub counterparty: Party,
    pub state: ResponderState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "side", rename_all = "snake_case")]
pub enum FlowProgress {
    Initiator(InitiatorCheckpoint),
    Responder(ResponderCheckpoint),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCheckpoint {
    pub flow_id: FlowId,
    pub progress: FlowProgress,
    pub updated_at: DateTime<Utc>,
}

impl FlowCheckpoint {
    pub fn initiator(flow_id: FlowId, checkpoint: InitiatorCheckpoint) -> Self {
        Self {
            flow_id,
            progress: FlowProgress::Initiator(checkpoint),
            updated_at: Utc::now(),
        }
    }

    pub fn responder(flow_id: FlowId, checkpoint: ResponderCheckpoint) -> Self {
        Self {
            flow_id,
            progress: FlowProgress::Responder(checkpoint),
            updated_at: Utc::now(),
        }
    }

    pub fn as_initiator(&self) -> Option<&InitiatorCheckpoint> {
        match &self.progress {
            FlowProgress::Initiator(checkpoint) => Some(checkpoint),
            FlowProgress::Responder(_) => None,
        }
    }
}
