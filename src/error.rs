// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Command failures and their HTTP mapping.
//!
//! Every custody command resolves to one of three user-visible outcomes:
//! success with the new state, rejection with a reason, or an authority
//! conflict the caller may retry against fresh state.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::custody::{CustodyId, RuleViolation, SequenceViolation};
use crate::messaging::SessionError;
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    /// The proposal violates a custody rule.
    #[error("malformed proposal: {0}")]
    MalformedProposal(#[from] RuleViolation),

    /// The proposed holder is not the holder's successor on the route.
    #[error("sequence violation: {0}")]
    SequenceViolation(#[from] SequenceViolation),

    #[error("unauthorized initiator: {0}")]
    UnauthorizedInitiator(String),

    /// The uniqueness authority refused: the record was already consumed.
    #[error("uniqueness conflict: {0}")]
    UniquenessConflict(String),

    #[error("session failure: {0}")]
    SessionFailure(String),

    #[error("custody record {0} not found")]
    NotFound(CustodyId),

    #[error("unknown party: {0}")]
    UnknownParty(String),

    /// A counterparty deviated from the protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("another flow is already running for {0}")]
    LineageBusy(CustodyId),

    #[error("storage error: {0}")]
    Storage(String),

    /// The request itself could not be understood.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Coarse classification shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Succeeded,
    /// Refused for a reason that retrying will not fix.
    Rejected,
    /// Lost a race; refresh and retry.
    Conflict,
    /// Infrastructure failure; retrying may help.
    Failed,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: String,
    pub outcome: CommandOutcome,
}

impl CustodyError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CustodyError::MalformedProposal(_) => "malformed_proposal",
            CustodyError::SequenceViolation(_) => "sequence_violation",
            CustodyError::UnauthorizedInitiator(_) => "unauthorized_initiator",
            CustodyError::UniquenessConflict(_) => "uniqueness_conflict",
            CustodyError::SessionFailure(_) => "session_failure",
            CustodyError::NotFound(_) => "not_found",
            CustodyError::UnknownParty(_) => "unknown_party",
            CustodyError::ProtocolViolation(_) => "protocol_violation",
            CustodyError::LineageBusy(_) => "lineage_busy",
            CustodyError::Storage(_) => "storage_error",
            CustodyError::InvalidRequest(_) => "invalid_request",
        }
    }

    pub fn outcome(&self) -> CommandOutcome {
        match self {
            CustodyError::UniquenessConflict(_) | CustodyError::LineageBusy(_) => {
                CommandOutcome::Conflict
            }
            CustodyError::SessionFailure(_) | CustodyError::Storage(_) => CommandOutcome::Failed,
            _ => CommandOutcome::Rejected,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CustodyError::MalformedProposal(_)
            | CustodyError::SequenceViolation(_)
            | CustodyError::ProtocolViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CustodyError::UnauthorizedInitiator(_) => StatusCode::FORBIDDEN,
            CustodyError::UniquenessConflict(_) | CustodyError::LineageBusy(_) => {
                StatusCode::CONFLICT
            }
            CustodyError::NotFound(_) | CustodyError::UnknownParty(_) => StatusCode::NOT_FOUND,
            CustodyError::SessionFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            CustodyError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CustodyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<SessionError> for CustodyError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::UnexpectedMessage { .. } | SessionError::Codec(_) => {
                CustodyError::ProtocolViolation(err.to_string())
            }
            other => CustodyError::SessionFailure(other.to_string()),
        }
    }
}

impl From<StoreError> for CustodyError {
    fn from(err: StoreError) -> Self {
        CustodyError::Storage(err.to_string())
    }
}

impl IntoResponse for CustodyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, error_code = self.error_code(), "Command failed");
        }
        let body = Json(ErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
            outcome: self.outcome(),
        });
        (status, body).into_response()
    }
}
