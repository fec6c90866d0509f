// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Custody Rules
//!
//! Pure validation of a [`TransitionProposal`]. Every party that signs or
//! receives a transition runs [`verify`] itself; nobody relies on another
//! party's verification.
//!
//! | Action    | Consumed | Produced | Required signers          |
//! |-----------|----------|----------|---------------------------|
//! | Create    | 0        | 1        | produced holder           |
//! | Transfer  | 1        | 1        | consumed and new holder   |
//! | Terminate | 1        | 0        | consumed holder           |
//!
//! [`verify_succession`] is the sequential-route rule checked by the
//! initiator before building a transfer and by the outgoing holder before
//! signing one.

use serde::{Deserialize, Serialize};

use super::identity::Party;
use super::proposal::{TransitionAction, TransitionProposal};
use super::record::CustodyRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RuleViolation {
    #[error("{action} expects {expected_consumed} consumed and {expected_produced} produced records, found {consumed} and {produced}")]
    Cardinality {
        action: TransitionAction,
        expected_consumed: usize,
        expected_produced: usize,
        consumed: usize,
        produced: usize,
    },

    #[error("route must list more than one distributor, found {0}")]
    RouteTooShort(usize),

    #[error("route lists a distributor more than once")]
    DuplicateCustodian,

    #[error("scheduled route changed during transfer")]
    RouteChanged,

    #[error("consumed and produced records belong to different cargo")]
    LineageChanged,

    #[error("holder {0} is not on the route")]
    HolderNotOnRoute(String),

    #[error("{0} must sign the transition")]
    MissingRequiredSigner(String),
}

/// The proposed holder is not the distributor immediately after the current
/// holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("expected next holder {}, proposed {proposed}", .expected.as_deref().unwrap_or("<none: route complete>"))]
pub struct SequenceViolation {
    pub expected: Option<String>,
    pub proposed: String,
}

/// Validate the shape, lineage and signer requirements of a proposal.
pub fn verify(proposal: &TransitionProposal) -> Result<(), RuleViolation> {
    match proposal.action {
        TransitionAction::Create => verify_create(proposal),
        TransitionAction::Transfer => verify_transfer(proposal),
        TransitionAction::Terminate => verify_terminate(proposal),
    }
}

/// The produced holder must directly follow the consumed holder on the route.
pub fn verify_succession(
    consumed: &CustodyRecord,
    produced: &CustodyRecord,
) -> Result<(), SequenceViolation> {
    let expected = consumed.route.next_after(&consumed.holder);
    if expected == Some(&produced.holder) {
        Ok(())
    } else {
        Err(SequenceViolation {
            expected: expected.map(|party| party.name.clone()),
            proposed: produced.holder.name.clone(),
        })
    }
}

fn verify_create(proposal: &TransitionProposal) -> Result<(), RuleViolation> {
    check_cardinality(proposal, 0, 1)?;
    let produced = &proposal.produced[0];

    if produced.route.len() <= 1 {
        return Err(RuleViolation::RouteTooShort(produced.route.len()));
    }
    if produced.route.has_duplicates() {
        return Err(RuleViolation::DuplicateCustodian);
    }
    check_on_route(produced)?;
    require_signer(proposal, &produced.holder)
}

fn verify_transfer(proposal: &TransitionProposal) -> Result<(), RuleViolation> {
    check_cardinality(proposal, 1, 1)?;
    let consumed = &proposal.consumed[0].record;
    let produced = &proposal.produced[0];

    if consumed.route != produced.route {
        return Err(RuleViolation::RouteChanged);
    }
    check_on_route(produced)?;
    if consumed.id != produced.id {
        return Err(RuleViolation::LineageChanged);
    }

    require_signer(proposal, &produced.holder)?;
    require_signer(proposal, &consumed.holder)
}

fn verify_terminate(proposal: &TransitionProposal) -> Result<(), RuleViolation> {
    check_cardinality(proposal, 1, 0)?;
    require_signer(proposal, &proposal.consumed[0].record.holder)
}

fn check_cardinality(
    proposal: &TransitionProposal,
    expected_consumed: usize,
    expected_produced: usize,
) -> Result<(), RuleViolation> {
    if proposal.consumed.len() == expected_consumed && proposal.produced.len() == expected_produced {
        Ok(())
    } else {
        Err(RuleViolation::Cardinality {
            action: proposal.action,
            expected_consumed,
            expected_produced,
            consumed: proposal.consumed.len(),
            produced: proposal.produced.len(),
        })
    }
}

fn check_on_route(record: &CustodyRecord) -> Result<(), RuleViolation> {
    if record.route.contains(&record.holder) {
        Ok(())
    } else {
        Err(RuleViolation::HolderNotOnRoute(record.holder.name.clone()))
    }
}

fn require_signer(proposal: &TransitionProposal, party: &Party) -> Result<(), RuleViolation> {
    if proposal.required_signers.contains(&party.key) {
        Ok(())
    } else {
        Err(RuleViolation::MissingRequiredSigner(party.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::identity::NodeIdentity;
    use crate::custody::proposal::ProposalId;
    use crate::custody::record::tests::parties;
    use crate::custody::record::{CustodyId, LiveRecord, RecordRef, Route};

    fn authority() -> Party {
        NodeIdentity::generate("Authority").party().clone()
    }

    fn live(record: CustodyRecord) -> LiveRecord {
        LiveRecord {
            record,
            reference: RecordRef {
                proposal: ProposalId::from("previous"),
                index: 0,
            },
        }
    }

    fn record(route: &[Party], holder: usize) -> CustodyRecord {
        CustodyRecord {
            id: CustodyId::new(),
            route: Route::new(route.to_vec()),
            holder: route[holder].clone(),
        }
    }

    #[test]
    fn valid_create_is_verified() {
        let p = parties(&["A", "B"]);
        let proposal = TransitionProposal::create(record(&p, 0), authority());
        assert_eq!(verify(&proposal), Ok(()));
    }

    #[test]
    fn create_without_output_fails() {
        let p = parties(&["A", "B"]);
        let mut proposal = TransitionProposal::create(record(&p, 0), authority());
        proposal.produced.clear();
        assert!(matches!(verify(&proposal), Err(RuleViolation::Cardinality { .. })));
    }

    #[test]
    fn create_with_input_fails() {
        let p = parties(&["A", "B"]);
        let existing = record(&p, 0);
        let mut proposal = TransitionProposal::create(existing.clone(), authority());
        proposal.consumed.push(live(existing));
        assert!(matches!(verify(&proposal), Err(RuleViolation::Cardinality { .. })));
    }

    #[test]
    fn create_with_single_distributor_fails() {
        let p = parties(&["A"]);
        let proposal = TransitionProposal::create(record(&p, 0), authority());
        assert_eq!(verify(&proposal), Err(RuleViolation::RouteTooShort(1)));
    }

    #[test]
    fn create_not_signed_by_holder_fails() {
        let p = parties(&["A", "B"]);
        let mut proposal = TransitionProposal::create(record(&p, 0), authority());
        proposal.required_signers = [p[1].key.clone()].into();
        assert_eq!(
            verify(&proposal),
            Err(RuleViolation::MissingRequiredSigner("A".to_string()))
        );
    }

    #[test]
    fn create_with_repeated_distributor_fails() {
        let p = parties(&["A", "B"]);
        let route = vec![p[0].clone(), p[1].clone(), p[0].clone()];
        let proposal = TransitionProposal::create(record(&route, 0), authority());
        assert_eq!(verify(&proposal), Err(RuleViolation::DuplicateCustodian));
    }

    #[test]
    fn valid_transfer_is_verified() {
        let p = parties(&["A", "B", "C"]);
        let proposal = TransitionProposal::transfer(live(record(&p, 0)), p[1].clone(), authority());
        assert_eq!(verify(&proposal), Ok(()));
    }

    #[test]
    fn transfer_changing_route_fails() {
        let p = parties(&["A", "B", "C"]);
        let mut proposal = TransitionProposal::transfer(live(record(&p, 0)), p[1].clone(), authority());
        proposal.produced[0].route = Route::new(vec![p[1].clone(), p[0].clone(), p[2].clone()]);
        assert_eq!(verify(&proposal), Err(RuleViolation::RouteChanged));
    }

    #[test]
    fn transfer_changing_id_fails() {
        let p = parties(&["A", "B", "C"]);
        let mut proposal = TransitionProposal::transfer(live(record(&p, 0)), p[1].clone(), authority());
        proposal.produced[0].id = CustodyId::new();
        assert_eq!(verify(&proposal), Err(RuleViolation::LineageChanged));
    }

    #[test]
    fn transfer_to_outsider_fails() {
        let p = parties(&["A", "B", "Z"]);
        let proposal =
            TransitionProposal::transfer(live(record(&p[..2], 0)), p[2].clone(), authority());
        assert_eq!(
            verify(&proposal),
            Err(RuleViolation::HolderNotOnRoute("Z".to_string()))
        );
    }

    #[test]
    fn transfer_without_sender_signature_fails() {
        let p = parties(&["A", "B"]);
        let mut proposal = TransitionProposal::transfer(live(record(&p, 0)), p[1].clone(), authority());
        proposal.required_signers.remove(&p[0].key);
        assert_eq!(
            verify(&proposal),
            Err(RuleViolation::MissingRequiredSigner("A".to_string()))
        );
    }

    #[test]
    fn terminate_with_output_fails() {
        let p = parties(&["A", "B"]);
        let current = record(&p, 1);
        let mut proposal = TransitionProposal::terminate(live(current.clone()), authority());
        proposal.produced.push(current);
        assert!(matches!(verify(&proposal), Err(RuleViolation::Cardinality { .. })));
    }

    #[test]
    fn valid_terminate_is_verified() {
        let p = parties(&["A", "B"]);
        let proposal = TransitionProposal::terminate(live(record(&p, 1)), authority());
        assert_eq!(verify(&proposal), Ok(()));
    }

    #[test]
    fn succession_accepts_only_the_next_distributor() {
        let p = parties(&["A", "B", "C"]);
        let current = record(&p, 0);

        assert!(verify_succession(&current, &current.with_holder(p[1].clone())).is_ok());

        let skipped = verify_succession(&current, &current.with_holder(p[2].clone())).unwrap_err();
        assert_eq!(skipped.expected.as_deref(), Some("B"));
        assert_eq!(skipped.proposed, "C");

        let at_b = current.with_holder(p[1].clone());
        assert!(verify_succession(&at_b, &at_b.with_holder(p[0].clone())).is_err());
    }

    #[test]
    fn succession_past_final_distributor_fails() {
        let p = parties(&["A", "B"]);
        let at_end = record(&p, 1);
        let err = verify_succession(&at_end, &at_end.with_holder(p[0].clone())).unwrap_err();
        assert_eq!(err.expected, None);
    }
}
