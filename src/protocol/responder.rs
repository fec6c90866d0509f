// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Receiving side of a custody flow.
//!
//! A Signer checks the proposal against its own vault before signing. Every
//! receiver commits only an outcome certified by the trusted authority.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::checkpoint::{FlowCheckpoint, ResponderCheckpoint, ResponderState};
use super::messages::{FlowMessage, Rejection, SessionInit, SessionStage, TransferRole};
use super::{verify_outcome, FlowContext};
use crate::custody::{
    contract, CertifiedTransition, Party, PartySignature, ProposalId, SignedProposal,
    TransitionAction,
};
use crate::error::CustodyError;
use crate::messaging::{expect_message, IncomingSession, Session};

pub struct ResponderFlow {
    ctx: Arc<FlowContext>,
    init: SessionInit,
    session: Box<dyn Session>,
    counterparty: Party,
    state: ResponderState,
    role: Option<TransferRole>,
    request: Option<SignedProposal>,
    rejection: Option<Rejection>,
    signed: Option<ProposalId>,
    outcome: Option<CertifiedTransition>,
}

impl ResponderFlow {
    pub fn new(ctx: Arc<FlowContext>, incoming: IncomingSession) -> Self {
        let IncomingSession { init, session } = incoming;
        let state = match (init.kind, init.stage) {
            (TransitionAction::Transfer, SessionStage::Negotiate) => ResponderState::AwaitRole,
            _ => ResponderState::AwaitOutcome,
        };
        let counterparty = session.counterparty().clone();
        Self {
            ctx,
            init,
            session,
            counterparty,
            state,
            role: None,
            request: None,
            rejection: None,
            signed: None,
            outcome: None,
        }
    }

    /// Drive the flow until the outcome is committed. Returns the id of the
    /// committed transition.
    pub async fn run(mut self) -> Result<ProposalId, CustodyError> {
        info!(
            flow_id = %self.init.flow_id,
            counterparty = %self.counterparty,
            action = %self.init.kind,
            stage = ?self.init.stage,
            "Responder flow starting"
        );

        loop {
            let step = match self.state {
                ResponderState::AwaitRole => self.await_role().await,
                ResponderState::LocalVerify => self.local_verify(),
                ResponderState::SignOrReject => self.sign_or_reject().await,
                ResponderState::AwaitOutcome => self.await_outcome().await,
                ResponderState::CommitOrDiscard => self.commit().await,
                ResponderState::Done => {
                    self.ctx.remove_checkpoint(&self.init.flow_id);
                    return self.outcome.as_ref().map(CertifiedTransition::id).ok_or_else(|| {
                        CustodyError::ProtocolViolation("flow finished without an outcome".into())
                    });
                }
                ResponderState::Aborted => {
                    return Err(CustodyError::ProtocolViolation("flow already aborted".into()))
                }
            };

            if let Err(err) = step.and_then(|next| self.advance(next)) {
                return Err(self.abort(err));
            }
        }
    }

    fn advance(&mut self, next: ResponderState) -> Result<(), CustodyError> {
        debug!(flow_id = %self.init.flow_id, from = ?self.state, to = ?next, "Responder step");
        self.state = next;
        if next == ResponderState::Done {
            return Ok(());
        }
        self.ctx.save_checkpoint(&FlowCheckpoint::responder(
            self.init.flow_id,
            ResponderCheckpoint {
                kind: self.init.kind,
                counterparty: self.counterparty.clone(),
                state: next,
            },
        ))
    }

    fn abort(&mut self, err: CustodyError) -> CustodyError {
        self.state = ResponderState::Aborted;
        self.ctx.remove_checkpoint(&self.init.flow_id);
        warn!(
            flow_id = %self.init.flow_id,
            counterparty = %self.counterparty,
            role = ?self.role,
            error_code = err.error_code(),
            error = %err,
            "Responder flow aborted"
        );
        err
    }

    // =========================================================================
    // Steps
    // =========================================================================

    async fn await_role(&mut self) -> Result<ResponderState, CustodyError> {
        let timeout = self.ctx.config.receive_timeout;
        let role = expect_message(self.session.as_mut(), timeout, "role", |message| match message {
            FlowMessage::Role(role) => Ok(role),
            other => Err(other),
        })
        .await?;
        self.role = Some(role);
        debug!(flow_id = %self.init.flow_id, role = %role, "Role received");

        match role {
            TransferRole::Participant => Ok(ResponderState::AwaitOutcome),
            TransferRole::Signer => {
                let request = expect_message(
                    self.session.as_mut(),
                    timeout,
                    "signature_request",
                    |message| match message {
                        FlowMessage::SignatureRequest(signed) => Ok(signed),
                        other => Err(other),
                    },
                )
                .await?;
                self.request = Some(request);
                Ok(ResponderState::LocalVerify)
            }
        }
    }

    fn local_verify(&mut self) -> Result<ResponderState, CustodyError> {
        let request = self
            .request
            .as_ref()
            .ok_or_else(|| CustodyError::ProtocolViolation("no signature request".into()))?;
        self.rejection = self.review(request)?;
        Ok(ResponderState::SignOrReject)
    }

    /// Decide whether this node, as holder of the consumed record, agrees to
    /// hand it over. Storage failures abort; everything else is a rejection
    /// sent back to the initiator.
    fn review(&self, request: &SignedProposal) -> Result<Option<Rejection>, CustodyError> {
        let proposal = &request.proposal;
        let me = self.ctx.me();

        if proposal.action != TransitionAction::Transfer || self.init.kind != proposal.action {
            return Ok(Some(Rejection::Protocol(format!(
                "only transfers are counter-signed, received {}",
                proposal.action
            ))));
        }
        if let Err(violation) = contract::verify(proposal) {
            return Ok(Some(Rejection::Rule(violation)));
        }
        let (Some(consumed), Some(produced)) = (proposal.single_consumed(), proposal.single_produced())
        else {
            return Ok(Some(Rejection::Protocol("transfer without records".into())));
        };

        if consumed.record.holder != *me {
            return Ok(Some(Rejection::Protocol(format!(
                "wrong role: {me} does not hold {}",
                consumed.record.id
            ))));
        }

        let live = self.ctx.vault.find_live_record_by_id(&consumed.record.id)?;
        match live {
            Some(live) if live.reference == consumed.reference && live.record == consumed.record => {}
            _ => return Ok(Some(Rejection::Stale(consumed.reference.to_string()))),
        }

        if produced.holder != self.counterparty {
            return Ok(Some(Rejection::Protocol(format!(
                "{} proposed {} as the next holder",
                self.counterparty, produced.holder
            ))));
        }
        if let Err(violation) = contract::verify_succession(&consumed.record, produced) {
            return Ok(Some(Rejection::Sequence(violation)));
        }

        let id = request.id();
        let initiator_signed = request
            .signature_by(&self.counterparty.key)
            .is_some_and(|signature| signature.is_valid_for(&id));
        if !initiator_signed {
            return Ok(Some(Rejection::Protocol(format!(
                "proposal is not signed by {}",
                self.counterparty
            ))));
        }
        if let Err(fault) = request.verify_signatures(std::slice::from_ref(&me.key)) {
            return Ok(Some(Rejection::Protocol(fault.to_string())));
        }

        if proposal.authority != *self.ctx.trusted_authority() {
            return Ok(Some(Rejection::Protocol(format!(
                "untrusted authority {}",
                proposal.authority
            ))));
        }
        Ok(None)
    }

    async fn sign_or_reject(&mut self) -> Result<ResponderState, CustodyError> {
        if let Some(rejection) = self.rejection.take() {
            warn!(
                flow_id = %self.init.flow_id,
                counterparty = %self.counterparty,
                rejection = %rejection,
                "Refusing to sign"
            );
            // The refusal is final whether or not it reaches the initiator.
            if let Err(e) = self.session.send(&FlowMessage::Rejection(rejection.clone())).await {
                debug!(flow_id = %self.init.flow_id, error = %e, "Rejection not delivered");
            }
            return Err(rejection.into());
        }

        let id = self
            .request
            .as_ref()
            .map(SignedProposal::id)
            .ok_or_else(|| CustodyError::ProtocolViolation("no signature request".into()))?;
        let signature = PartySignature::sign(&self.ctx.identity, &id);
        self.session.send(&FlowMessage::Signature(signature)).await?;
        info!(flow_id = %self.init.flow_id, proposal = %id, "Counter-signed transfer");
        self.signed = Some(id);
        Ok(ResponderState::AwaitOutcome)
    }

    async fn await_outcome(&mut self) -> Result<ResponderState, CustodyError> {
        let outcome = expect_message(
            self.session.as_mut(),
            self.ctx.config.receive_timeout,
            "outcome",
            |message| match message {
                FlowMessage::Outcome(outcome) => Ok(outcome),
                other => Err(other),
            },
        )
        .await?;
        self.outcome = Some(outcome);
        Ok(ResponderState::CommitOrDiscard)
    }

    async fn commit(&mut self) -> Result<ResponderState, CustodyError> {
        let outcome = self
            .outcome
            .as_ref()
            .ok_or_else(|| CustodyError::ProtocolViolation("no outcome received".into()))?;
        verify_outcome(&self.ctx, outcome)?;

        if let Some(signed) = &self.signed {
            if outcome.id() != *signed {
                return Err(CustodyError::ProtocolViolation(format!(
                    "certified {} differs from signed {signed}",
                    outcome.id()
                )));
            }
        }

        let committed = self.ctx.vault.record_transition(outcome)?;
        info!(
            flow_id = %self.init.flow_id,
            proposal = %outcome.id(),
            commit = ?committed,
            "Transition committed"
        );

        // Committed either way; an unacknowledged outcome is simply resent.
        if let Err(e) = self.session.send(&FlowMessage::Ack).await {
            warn!(flow_id = %self.init.flow_id, error = %e, "Failed to acknowledge outcome");
        }
        Ok(ResponderState::Done)
    }
}
