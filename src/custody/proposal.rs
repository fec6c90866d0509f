// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transition proposals, signatures and certifications.
//!
//! A proposal is identified by the SHA-256 of a canonical binary encoding of
//! its contents, so two parties building the same proposal agree on its id
//! and signing it again yields the same signature.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::identity::{NodeIdentity, Party, PartyKey};
use super::record::{CustodyId, CustodyRecord, LiveRecord, RecordRef};

/// Hex SHA-256 of a proposal's canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(String);

impl ProposalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProposalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    /// Enter a cargo into the chain. No predecessor.
    Create,
    /// Hand the cargo from the holder to the next distributor.
    Transfer,
    /// Remove the cargo from the chain once delivered.
    Terminate,
}

impl TransitionAction {
    fn tag(self) -> u8 {
        match self {
            TransitionAction::Create => 0,
            TransitionAction::Transfer => 1,
            TransitionAction::Terminate => 2,
        }
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionAction::Create => write!(f, "create"),
            TransitionAction::Transfer => write!(f, "transfer"),
            TransitionAction::Terminate => write!(f, "terminate"),
        }
    }
}

// =============================================================================
// Proposal
// =============================================================================

/// A proposed custody transition. Never persisted on its own: only certified
/// transitions reach a vault.
///
/// `consumed` and `produced` are sequences so that malformed shapes can be
/// expressed and refused by the rule verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionProposal {
    pub action: TransitionAction,
    pub consumed: Vec<LiveRecord>,
    pub produced: Vec<CustodyRecord>,
    pub required_signers: BTreeSet<PartyKey>,
    pub authority: Party,
}

impl TransitionProposal {
    pub fn create(record: CustodyRecord, authority: Party) -> Self {
        let required_signers = BTreeSet::from([record.holder.key.clone()]);
        Self {
            action: TransitionAction::Create,
            consumed: Vec::new(),
            produced: vec![record],
            required_signers,
            authority,
        }
    }

    pub fn transfer(consumed: LiveRecord, new_holder: Party, authority: Party) -> Self {
        let required_signers = BTreeSet::from([
            consumed.record.holder.key.clone(),
            new_holder.key.clone(),
        ]);
        let produced = consumed.record.with_holder(new_holder);
        Self {
            action: TransitionAction::Transfer,
            consumed: vec![consumed],
            produced: vec![produced],
            required_signers,
            authority,
        }
    }

    pub fn terminate(consumed: LiveRecord, authority: Party) -> Self {
        let required_signers = BTreeSet::from([consumed.record.holder.key.clone()]);
        Self {
            action: TransitionAction::Terminate,
            consumed: vec![consumed],
            produced: Vec::new(),
            required_signers,
            authority,
        }
    }

    pub fn id(&self) -> ProposalId {
        let mut hasher = Sha256::new();
        hasher.update([self.action.tag()]);

        hash_len(&mut hasher, self.consumed.len());
        for live in &self.consumed {
            hash_str(&mut hasher, live.reference.proposal.as_str());
            hasher.update(live.reference.index.to_be_bytes());
            hash_record(&mut hasher, &live.record);
        }

        hash_len(&mut hasher, self.produced.len());
        for record in &self.produced {
            hash_record(&mut hasher, record);
        }

        hash_len(&mut hasher, self.required_signers.len());
        for key in &self.required_signers {
            hash_bytes(&mut hasher, key.as_bytes());
        }

        hash_party(&mut hasher, &self.authority);
        ProposalId(format!("{:x}", hasher.finalize()))
    }

    pub fn single_consumed(&self) -> Option<&LiveRecord> {
        match self.consumed.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn single_produced(&self) -> Option<&CustodyRecord> {
        match self.produced.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Lineage this proposal acts on.
    pub fn lineage(&self) -> Option<CustodyId> {
        self.produced
            .first()
            .map(|record| record.id)
            .or_else(|| self.consumed.first().map(|live| live.record.id))
    }

    /// The route every interested party is taken from.
    pub fn route_parties(&self) -> Vec<Party> {
        self.produced
            .first()
            .map(|record| record.route.parties().to_vec())
            .or_else(|| {
                self.consumed
                    .first()
                    .map(|live| live.record.route.parties().to_vec())
            })
            .unwrap_or_default()
    }

    pub fn consumed_refs(&self) -> Vec<RecordRef> {
        self.consumed.iter().map(|live| live.reference.clone()).collect()
    }

    pub fn produced_refs(&self) -> Vec<RecordRef> {
        let id = self.id();
        (0..self.produced.len() as u32)
            .map(|index| RecordRef {
                proposal: id.clone(),
                index,
            })
            .collect()
    }
}

fn hash_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_be_bytes());
}

fn hash_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hash_len(hasher, bytes.len());
    hasher.update(bytes);
}

fn hash_str(hasher: &mut Sha256, value: &str) {
    hash_bytes(hasher, value.as_bytes());
}

fn hash_party(hasher: &mut Sha256, party: &Party) {
    hash_str(hasher, &party.name);
    hash_bytes(hasher, party.key.as_bytes());
}

fn hash_record(hasher: &mut Sha256, record: &CustodyRecord) {
    hasher.update(record.id.as_uuid().as_bytes());
    hash_len(hasher, record.route.len());
    for party in record.route.parties() {
        hash_party(hasher, party);
    }
    hash_party(hasher, &record.holder);
}

// =============================================================================
// Signatures
// =============================================================================

mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}

/// One party's ECDSA signature over a proposal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySignature {
    pub by: PartyKey,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl PartySignature {
    pub fn sign(identity: &NodeIdentity, id: &ProposalId) -> Self {
        Self {
            by: identity.key().clone(),
            bytes: identity.sign(id.as_str().as_bytes()),
        }
    }

    pub fn is_valid_for(&self, id: &ProposalId) -> bool {
        self.by
            .verify(id.as_str().as_bytes(), &self.bytes)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureFault {
    #[error("signature by {0} does not verify")]
    Invalid(PartyKey),

    #[error("signature by {0} was not requested")]
    Unrequested(PartyKey),

    #[error("missing signature from {0}")]
    Missing(PartyKey),

    #[error("certified by {actual}, expected {expected}")]
    WrongAuthority { expected: PartyKey, actual: PartyKey },

    #[error("certification signature does not verify")]
    InvalidCertification,
}

/// A proposal plus the signatures collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal: TransitionProposal,
    pub signatures: Vec<PartySignature>,
}

impl SignedProposal {
    /// Sign a freshly built proposal as its initiator.
    pub fn sign_initial(proposal: TransitionProposal, identity: &NodeIdentity) -> Self {
        let signature = PartySignature::sign(identity, &proposal.id());
        Self {
            proposal,
            signatures: vec![signature],
        }
    }

    pub fn id(&self) -> ProposalId {
        self.proposal.id()
    }

    pub fn signature_by(&self, key: &PartyKey) -> Option<&PartySignature> {
        self.signatures.iter().find(|sig| &sig.by == key)
    }

    /// Add a counterparty signature, replacing any earlier one by the same key.
    pub fn add_signature(&mut self, signature: PartySignature) {
        self.signatures.retain(|sig| sig.by != signature.by);
        self.signatures.push(signature);
    }

    /// Every attached signature verifies and was requested; every required
    /// signer not listed in `allowed_missing` has signed.
    pub fn verify_signatures(&self, allowed_missing: &[PartyKey]) -> Result<(), SignatureFault> {
        let id = self.id();
        for signature in &self.signatures {
            if !self.proposal.required_signers.contains(&signature.by) {
                return Err(SignatureFault::Unrequested(signature.by.clone()));
            }
            if !signature.is_valid_for(&id) {
                return Err(SignatureFault::Invalid(signature.by.clone()));
            }
        }

        for key in &self.proposal.required_signers {
            if self.signature_by(key).is_none() && !allowed_missing.contains(key) {
                return Err(SignatureFault::Missing(key.clone()));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Certification
// =============================================================================

/// The uniqueness authority's statement that a proposal's consumed references
/// are now spent by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certification {
    pub signature: PartySignature,
    pub certified_at: DateTime<Utc>,
}

/// A fully signed and certified transition: the unit every vault commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertifiedTransition {
    pub signed: SignedProposal,
    pub certification: Certification,
}

impl CertifiedTransition {
    pub fn id(&self) -> ProposalId {
        self.signed.id()
    }

    pub fn proposal(&self) -> &TransitionProposal {
        &self.signed.proposal
    }

    /// Check the certification came from `trusted_authority` and that the
    /// transition carries every required signature.
    pub fn verify(&self, trusted_authority: &PartyKey) -> Result<(), SignatureFault> {
        let named = &self.signed.proposal.authority.key;
        if named != trusted_authority {
            return Err(SignatureFault::WrongAuthority {
                expected: trusted_authority.clone(),
                actual: named.clone(),
            });
        }
        let signer = &self.certification.signature.by;
        if signer != trusted_authority {
            return Err(SignatureFault::WrongAuthority {
                expected: trusted_authority.clone(),
                actual: signer.clone(),
            });
        }
        if !self.certification.signature.is_valid_for(&self.id()) {
            return Err(SignatureFault::InvalidCertification);
        }
        self.signed.verify_signatures(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::record::Route;

    fn setup() -> (NodeIdentity, NodeIdentity, NodeIdentity, LiveRecord) {
        let a = NodeIdentity::generate("A");
        let b = NodeIdentity::generate("B");
        let authority = NodeIdentity::generate("Authority");
        let record = CustodyRecord {
            id: CustodyId::new(),
            route: Route::new(vec![a.party().clone(), b.party().clone()]),
            holder: a.party().clone(),
        };
        let live = LiveRecord {
            record,
            reference: RecordRef {
                proposal: ProposalId::from("genesis"),
                index: 0,
            },
        };
        (a, b, authority, live)
    }

    #[test]
    fn id_is_stable_and_content_derived() {
        let (_, b, authority, live) = setup();
        let first = TransitionProposal::transfer(live.clone(), b.party().clone(), authority.party().clone());
        let second = TransitionProposal::transfer(live.clone(), b.party().clone(), authority.party().clone());
        assert_eq!(first.id(), second.id());
        assert_eq!(first.id().as_str().len(), 64);

        let terminate = TransitionProposal::terminate(live, authority.party().clone());
        assert_ne!(first.id(), terminate.id());
    }

    #[test]
    fn transfer_requires_both_holders() {
        let (a, b, authority, live) = setup();
        let proposal = TransitionProposal::transfer(live, b.party().clone(), authority.party().clone());
        assert!(proposal.required_signers.contains(a.key()));
        assert!(proposal.required_signers.contains(b.key()));
        assert_eq!(proposal.produced[0].holder, *b.party());
    }

    #[test]
    fn partial_signatures_verify_when_missing_is_allowed() {
        let (a, b, authority, live) = setup();
        let proposal = TransitionProposal::transfer(live, b.party().clone(), authority.party().clone());
        let mut signed = SignedProposal::sign_initial(proposal, &b);

        assert_eq!(
            signed.verify_signatures(&[]),
            Err(SignatureFault::Missing(a.key().clone()))
        );
        assert!(signed.verify_signatures(&[a.key().clone()]).is_ok());

        signed.add_signature(PartySignature::sign(&a, &signed.id()));
        assert!(signed.verify_signatures(&[]).is_ok());
    }

    #[test]
    fn signature_over_another_proposal_is_invalid() {
        let (a, b, authority, live) = setup();
        let proposal = TransitionProposal::transfer(live.clone(), b.party().clone(), authority.party().clone());
        let other = TransitionProposal::terminate(live, authority.party().clone());
        let mut signed = SignedProposal::sign_initial(proposal, &b);
        signed.add_signature(PartySignature::sign(&a, &other.id()));

        assert_eq!(
            signed.verify_signatures(&[]),
            Err(SignatureFault::Invalid(a.key().clone()))
        );
    }

    #[test]
    fn unrequested_signature_is_refused() {
        let (a, _, authority, live) = setup();
        let stranger = NodeIdentity::generate("Stranger");
        let proposal = TransitionProposal::terminate(live, authority.party().clone());
        let mut signed = SignedProposal::sign_initial(proposal, &a);
        signed.add_signature(PartySignature::sign(&stranger, &signed.id()));

        assert_eq!(
            signed.verify_signatures(&[]),
            Err(SignatureFault::Unrequested(stranger.key().clone()))
        );
    }

    #[test]
    fn certification_must_come_from_trusted_authority() {
        let (a, _, authority, live) = setup();
        let proposal = TransitionProposal::terminate(live, authority.party().clone());
        let signed = SignedProposal::sign_initial(proposal, &a);
        let certified = CertifiedTransition {
            certification: Certification {
                signature: PartySignature::sign(&authority, &signed.id()),
                certified_at: Utc::now(),
            },
            signed,
        };

        assert!(certified.verify(authority.key()).is_ok());

        let impostor = NodeIdentity::generate("Impostor");
        assert!(matches!(
            certified.verify(impostor.key()),
            Err(SignatureFault::WrongAuthority { .. })
        ));
    }

    #[test]
    fn forged_certification_is_rejected() {
        let (a, _, authority, live) = setup();
        let proposal = TransitionProposal::terminate(live, authority.party().clone());
        let signed = SignedProposal::sign_initial(proposal, &a);
        let forged = CertifiedTransition {
            certification: Certification {
                signature: PartySignature {
                    by: authority.key().clone(),
                    bytes: a.sign(signed.id().as_str().as_bytes()),
                },
                certified_at: Utc::now(),
            },
            signed,
        };

        assert_eq!(
            forged.verify(authority.key()),
            Err(SignatureFault::InvalidCertification)
        );
    }
}
