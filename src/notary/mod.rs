// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Uniqueness Authority
//!
//! The only ordering point in the system. A record reference may be spent by
//! at most one certified proposal, ever; concurrent requests spending the
//! same reference yield exactly one certification.

pub mod local;

use async_trait::async_trait;

use crate::custody::{Certification, Party, RecordRef, SignatureFault, SignedProposal};

pub use local::LocalUniquenessAuthority;

/// A fully signed proposal submitted for certification.
#[derive(Debug, Clone)]
pub struct CertificationRequest {
    pub consumed: Vec<RecordRef>,
    pub produced: Vec<RecordRef>,
    pub proposal: SignedProposal,
}

impl CertificationRequest {
    pub fn new(proposal: SignedProposal) -> Self {
        Self {
            consumed: proposal.proposal.consumed_refs(),
            produced: proposal.proposal.produced_refs(),
            proposal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// The reference was already spent by another proposal.
    #[error("{reference} already consumed by {spent_by}")]
    Conflict { reference: String, spent_by: String },

    #[error("invalid certification request: {0}")]
    InvalidRequest(String),

    #[error("signature check failed: {0}")]
    Signature(#[from] SignatureFault),

    #[error("authority unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UniquenessAuthority: Send + Sync {
    fn identity(&self) -> &Party;

    /// Spend the request's consumed references atomically.
    async fn certify(&self, request: CertificationRequest) -> Result<Certification, AuthorityError>;
}
