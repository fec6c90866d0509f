// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custody domain: identities, records, proposals and the rules that govern
//! them. Nothing in here performs I/O.

pub mod contract;
pub mod identity;
pub mod proposal;
pub mod record;

pub use contract::{verify, verify_succession, RuleViolation, SequenceViolation};
pub use identity::{IdentityDirectory, IdentityError, NodeIdentity, Party, PartyKey};
pub use proposal::{
    Certification, CertifiedTransition, PartySignature, ProposalId, SignatureFault,
    SignedProposal, TransitionAction, TransitionProposal,
};
pub use record::{CustodyId, CustodyRecord, LiveRecord, RecordRef, Route};
