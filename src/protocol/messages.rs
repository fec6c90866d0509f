// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wire messages exchanged within a flow session.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::checkpoint::FlowId;
use crate::custody::{
    CertifiedTransition, PartySignature, RuleViolation, SequenceViolation, SignedProposal,
    TransitionAction,
};
use crate::error::CustodyError;

/// Which half of a flow a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    /// Role assignment and signature collection.
    Negotiate,
    /// Delivery of a certified outcome only.
    Finality,
}

/// First frame of every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInit {
    pub flow_id: FlowId,
    pub kind: TransitionAction,
    pub stage: SessionStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferRole {
    /// Holder of the consumed record. Must sign.
    Signer,
    /// Every other route member. Only informed.
    Participant,
}

impl fmt::Display for TransferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferRole::Signer => write!(f, "signer"),
            TransferRole::Participant => write!(f, "participant"),
        }
    }
}

/// Why a Signer refused to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Rejection {
    Rule(RuleViolation),
    Sequence(SequenceViolation),
    /// The consumed record is no longer the Signer's live record.
    Stale(String),
    Protocol(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Rule(violation) => write!(f, "rule violation: {violation}"),
            Rejection::Sequence(violation) => write!(f, "sequence violation: {violation}"),
            Rejection::Stale(reference) => write!(f, "stale record {reference}"),
            Rejection::Protocol(detail) => write!(f, "protocol violation: {detail}"),
        }
    }
}

impl From<Rejection> for CustodyError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Rule(violation) => CustodyError::MalformedProposal(violation),
            Rejection::Sequence(violation) => CustodyError::SequenceViolation(violation),
            Rejection::Stale(reference) => CustodyError::UniquenessConflict(format!(
                "{reference} is no longer the holder's live record"
            )),
            Rejection::Protocol(detail) => CustodyError::ProtocolViolation(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum FlowMessage {
    Role(TransferRole),
    SignatureRequest(SignedProposal),
    Signature(PartySignature),
    Rejection(Rejection),
    Outcome(CertifiedTransition),
    Ack,
}

impl FlowMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowMessage::Role(_) => "role",
            FlowMessage::SignatureRequest(_) => "signature_request",
            FlowMessage::Signature(_) => "signature",
            FlowMessage::Rejection(_) => "rejection",
            FlowMessage::Outcome(_) => "outcome",
            FlowMessage::Ack => "ack",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_tagged_by_reason() {
        let rejection = Rejection::Sequence(SequenceViolation {
            expected: Some("B".to_string()),
            proposed: "C".to_string(),
        });
        let json = serde_json::to_value(FlowMessage::Rejection(rejection.clone())).unwrap();

        assert_eq!(json["type"], "rejection");
        assert_eq!(json["body"]["reason"], "sequence");
        assert_eq!(json["body"]["detail"]["expected"], "B");

        let decoded: FlowMessage = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, FlowMessage::Rejection(rejection));
    }

    #[test]
    fn stale_rejection_is_a_conflict() {
        let err = CustodyError::from(Rejection::Stale("abc:0".to_string()));
        assert_eq!(err.error_code(), "uniqueness_conflict");
    }

    #[test]
    fn ack_has_no_body() {
        let json = serde_json::to_value(FlowMessage::Ack).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ack"}));
        assert_eq!(FlowMessage::Ack.kind(), "ack");
    }
}
