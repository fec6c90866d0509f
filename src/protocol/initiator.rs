// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Initiator side of a custody flow.
//!
//! The flow checkpoints itself before every suspension point once it has
//! signed. Sessions are not durable: a resumed flow reopens them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::checkpoint::{
    CustodyCommand, FlowCheckpoint, FlowId, InitiatorCheckpoint, InitiatorState,
};
use super::finality::deliver_all;
use super::messages::{FlowMessage, SessionInit, SessionStage, TransferRole};
use super::{verify_outcome, FlowContext};
use crate::custody::{
    contract, CertifiedTransition, CustodyRecord, LiveRecord, Party, PartyKey, SignedProposal,
    TransitionAction, TransitionProposal,
};
use crate::error::CustodyError;
use crate::messaging::{Session, SessionError};
use crate::notary::{AuthorityError, CertificationRequest};

pub struct InitiatorFlow {
    ctx: Arc<FlowContext>,
    flow_id: FlowId,
    command: CustodyCommand,
    state: InitiatorState,
    draft: Option<TransitionProposal>,
    signed: Option<SignedProposal>,
    outcome: Option<CertifiedTransition>,
    /// Every route member other than this node.
    recipients: Vec<Party>,
    /// Holder of the consumed record. Transfer only.
    signer: Option<Party>,
    sessions: HashMap<PartyKey, Box<dyn Session>>,
    roles_sent: HashSet<PartyKey>,
    /// Recipients left to the finality stage after their session failed.
    deferred: Vec<Party>,
    failed_attempts: u32,
}

impl InitiatorFlow {
    pub fn new(ctx: Arc<FlowContext>, command: CustodyCommand) -> Self {
        Self::with_state(ctx, FlowId::new(), command, InitiatorState::Build)
    }

    /// Continue a flow whose proposal was signed before a restart. The
    /// checkpointed proposal is reused as is, never rebuilt.
    pub fn resume(
        ctx: Arc<FlowContext>,
        flow_id: FlowId,
        command: CustodyCommand,
        signed: SignedProposal,
    ) -> Self {
        let mut flow = Self::with_state(ctx, flow_id, command, InitiatorState::OpenSessions);
        flow.set_signed(signed);
        flow
    }

    fn with_state(
        ctx: Arc<FlowContext>,
        flow_id: FlowId,
        command: CustodyCommand,
        state: InitiatorState,
    ) -> Self {
        Self {
            ctx,
            flow_id,
            command,
            state,
            draft: None,
            signed: None,
            outcome: None,
            recipients: Vec::new(),
            signer: None,
            sessions: HashMap::new(),
            roles_sent: HashSet::new(),
            deferred: Vec::new(),
            failed_attempts: 0,
        }
    }

    /// Drive the flow to completion. Returns the certified transition, which
    /// this node has already committed.
    pub async fn run(mut self) -> Result<CertifiedTransition, CustodyError> {
        info!(
            flow_id = %self.flow_id,
            cargo_id = %self.command.lineage(),
            action = %self.command.action(),
            state = ?self.state,
            "Initiator flow starting"
        );

        loop {
            let step = match self.state {
                InitiatorState::Build => self.build(),
                InitiatorState::LocalVerify => self.local_verify(),
                InitiatorState::LocalSign => self.local_sign(),
                InitiatorState::OpenSessions => self.open_sessions().await,
                InitiatorState::AssignRoles => self.assign_roles().await,
                InitiatorState::AwaitCounterSignature => self.await_counter_signature().await,
                InitiatorState::SubmitForUniqueness => self.submit().await,
                InitiatorState::BroadcastOutcome => self.broadcast().await,
                InitiatorState::Done => {
                    return self.outcome.take().ok_or_else(|| {
                        CustodyError::ProtocolViolation("flow finished without an outcome".into())
                    })
                }
                InitiatorState::Aborted => {
                    return Err(CustodyError::ProtocolViolation("flow already aborted".into()))
                }
            };

            if let Err(err) = step.and_then(|next| self.advance(next)) {
                return Err(self.abort(err));
            }
        }
    }

    fn advance(&mut self, next: InitiatorState) -> Result<(), CustodyError> {
        debug!(flow_id = %self.flow_id, from = ?self.state, to = ?next, "Initiator step");
        self.state = next;

        let suspends = matches!(
            next,
            InitiatorState::OpenSessions
                | InitiatorState::AwaitCounterSignature
                | InitiatorState::SubmitForUniqueness
                | InitiatorState::BroadcastOutcome
        );
        if suspends {
            let pending = if next == InitiatorState::BroadcastOutcome {
                self.recipients.clone()
            } else {
                Vec::new()
            };
            self.ctx.save_checkpoint(&self.checkpoint(next, pending))?;
        }
        Ok(())
    }

    fn abort(&mut self, err: CustodyError) -> CustodyError {
        if self.outcome.is_some() {
            // Certified: the checkpoint stays so finality can still complete.
            warn!(flow_id = %self.flow_id, error = %err, "Initiator flow failed after certification");
            return err;
        }
        self.state = InitiatorState::Aborted;
        self.sessions.clear();
        self.ctx.remove_checkpoint(&self.flow_id);
        warn!(
            flow_id = %self.flow_id,
            cargo_id = %self.command.lineage(),
            error_code = err.error_code(),
            error = %err,
            "Initiator flow aborted"
        );
        err
    }

    fn checkpoint(&self, state: InitiatorState, pending: Vec<Party>) -> FlowCheckpoint {
        FlowCheckpoint::initiator(
            self.flow_id,
            InitiatorCheckpoint {
                command: self.command.clone(),
                state,
                proposal: self.signed.clone(),
                outcome: self.outcome.clone(),
                pending,
                delivery_attempts: 0,
                next_attempt_at: None,
            },
        )
    }

    fn set_signed(&mut self, signed: SignedProposal) {
        let me = self.ctx.me().clone();
        self.recipients = signed
            .proposal
            .route_parties()
            .into_iter()
            .filter(|party| *party != me)
            .collect();
        self.signer = match signed.proposal.action {
            TransitionAction::Transfer => signed
                .proposal
                .single_consumed()
                .map(|live| live.record.holder.clone()),
            _ => None,
        };
        self.signed = Some(signed);
    }

    fn signed(&self) -> Result<&SignedProposal, CustodyError> {
        self.signed
            .as_ref()
            .ok_or_else(|| CustodyError::ProtocolViolation("proposal not signed yet".into()))
    }

    fn find_live(&self, id: &crate::custody::CustodyId) -> Result<LiveRecord, CustodyError> {
        self.ctx
            .vault
            .find_live_record_by_id(id)?
            .ok_or(CustodyError::NotFound(*id))
    }

    // =========================================================================
    // Steps
    // =========================================================================

    fn build(&mut self) -> Result<InitiatorState, CustodyError> {
        let me = self.ctx.me().clone();
        let authority = self.ctx.trusted_authority().clone();

        let proposal = match &self.command {
            CustodyCommand::Create { id, route } => {
                if !route.contains(&me) {
                    return Err(CustodyError::UnauthorizedInitiator(format!(
                        "{me} is not on the route"
                    )));
                }
                let record = CustodyRecord {
                    id: *id,
                    route: route.clone(),
                    holder: me,
                };
                TransitionProposal::create(record, authority)
            }
            CustodyCommand::Arrival { id } => {
                let live = self.find_live(id)?;
                if !live.record.route.contains(&me) {
                    return Err(CustodyError::UnauthorizedInitiator(format!(
                        "{me} is not on the route of {id}"
                    )));
                }
                if live.record.holder == me {
                    return Err(CustodyError::UnauthorizedInitiator(format!(
                        "{me} already holds {id}"
                    )));
                }
                contract::verify_succession(&live.record, &live.record.with_holder(me.clone()))?;
                TransitionProposal::transfer(live, me, authority)
            }
            CustodyCommand::Delivery { id } => {
                let live = self.find_live(id)?;
                if live.record.holder != me {
                    return Err(CustodyError::UnauthorizedInitiator(format!(
                        "{me} does not hold {id}; {} does",
                        live.record.holder
                    )));
                }
                TransitionProposal::terminate(live, authority)
            }
        };

        self.draft = Some(proposal);
        Ok(InitiatorState::LocalVerify)
    }

    fn local_verify(&mut self) -> Result<InitiatorState, CustodyError> {
        let draft = self
            .draft
            .as_ref()
            .ok_or_else(|| CustodyError::ProtocolViolation("no proposal built".into()))?;
        contract::verify(draft)?;
        Ok(InitiatorState::LocalSign)
    }

    fn local_sign(&mut self) -> Result<InitiatorState, CustodyError> {
        let draft = self
            .draft
            .take()
            .ok_or_else(|| CustodyError::ProtocolViolation("no proposal built".into()))?;
        let signed = SignedProposal::sign_initial(draft, &self.ctx.identity);
        info!(flow_id = %self.flow_id, proposal = %signed.id(), "Proposal signed");
        self.set_signed(signed);
        Ok(InitiatorState::OpenSessions)
    }

    async fn open_sessions(&mut self) -> Result<InitiatorState, CustodyError> {
        let init = SessionInit {
            flow_id: self.flow_id,
            kind: self.signed()?.proposal.action,
            stage: SessionStage::Negotiate,
        };

        for party in self.recipients.clone() {
            if self.sessions.contains_key(&party.key) || self.deferred.contains(&party) {
                continue;
            }
            match self.ctx.messaging.open_session(&party, init.clone()).await {
                Ok(session) => {
                    self.sessions.insert(party.key.clone(), session);
                }
                Err(err) if self.signer.as_ref() == Some(&party) => {
                    return self.retry_or_fail(err).await;
                }
                Err(err) => {
                    info!(
                        flow_id = %self.flow_id,
                        counterparty = %party,
                        error = %err,
                        "Counterparty unavailable, deferring to finality"
                    );
                    self.deferred.push(party);
                }
            }
        }
        Ok(InitiatorState::AssignRoles)
    }

    async fn assign_roles(&mut self) -> Result<InitiatorState, CustodyError> {
        let Some(signer) = self.signer.clone() else {
            return Ok(InitiatorState::SubmitForUniqueness);
        };
        let request = FlowMessage::SignatureRequest(self.signed()?.clone());

        let keys: Vec<PartyKey> = self.sessions.keys().cloned().collect();
        for key in keys {
            if self.roles_sent.contains(&key) {
                continue;
            }
            let is_signer = key == signer.key;
            let role = if is_signer {
                TransferRole::Signer
            } else {
                TransferRole::Participant
            };

            let sent = match self.sessions.get_mut(&key) {
                Some(session) => {
                    let mut sent = session.send(&FlowMessage::Role(role)).await;
                    if sent.is_ok() && is_signer {
                        sent = session.send(&request).await;
                    }
                    sent
                }
                None => continue,
            };

            match sent {
                Ok(()) => {
                    debug!(flow_id = %self.flow_id, role = %role, "Role assigned");
                    self.roles_sent.insert(key);
                }
                Err(err) if is_signer => return self.retry_or_fail(err).await,
                Err(err) => {
                    if let Some(session) = self.sessions.remove(&key) {
                        info!(
                            flow_id = %self.flow_id,
                            counterparty = %session.counterparty(),
                            error = %err,
                            "Participant unavailable, deferring to finality"
                        );
                        self.deferred.push(session.counterparty().clone());
                    }
                }
            }
        }
        Ok(InitiatorState::AwaitCounterSignature)
    }

    async fn await_counter_signature(&mut self) -> Result<InitiatorState, CustodyError> {
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| CustodyError::ProtocolViolation("transfer without a signer".into()))?;
        let timeout = self.ctx.config.receive_timeout;

        let received = match self.sessions.get_mut(&signer.key) {
            Some(session) => session.receive(timeout).await,
            None => Err(SessionError::Closed(signer.name.clone())),
        };

        match received {
            Ok(FlowMessage::Signature(signature)) => {
                let signed = self
                    .signed
                    .as_mut()
                    .ok_or_else(|| CustodyError::ProtocolViolation("proposal not signed yet".into()))?;
                if signature.by != signer.key || !signature.is_valid_for(&signed.id()) {
                    return Err(CustodyError::ProtocolViolation(format!(
                        "{signer} returned an invalid signature"
                    )));
                }
                signed.add_signature(signature);
                signed
                    .verify_signatures(&[])
                    .map_err(|fault| CustodyError::ProtocolViolation(fault.to_string()))?;
                info!(flow_id = %self.flow_id, signer = %signer, "Counter-signature received");
                Ok(InitiatorState::SubmitForUniqueness)
            }
            Ok(FlowMessage::Rejection(rejection)) => {
                warn!(
                    flow_id = %self.flow_id,
                    signer = %signer,
                    rejection = %rejection,
                    "Signer refused the proposal"
                );
                Err(rejection.into())
            }
            Ok(other) => Err(CustodyError::ProtocolViolation(format!(
                "expected signature from {signer}, received {}",
                other.kind()
            ))),
            Err(err) => self.retry_or_fail(err).await,
        }
    }

    async fn submit(&mut self) -> Result<InitiatorState, CustodyError> {
        let signed = self.signed()?.clone();
        let request = CertificationRequest::new(signed.clone());

        let certification = match self.ctx.authority.certify(request).await {
            Ok(certification) => certification,
            Err(err @ AuthorityError::Conflict { .. }) => {
                return Err(CustodyError::UniquenessConflict(err.to_string()))
            }
            Err(AuthorityError::Unavailable(detail)) => {
                return Err(CustodyError::SessionFailure(format!(
                    "uniqueness authority unavailable: {detail}"
                )))
            }
            Err(err) => return Err(CustodyError::ProtocolViolation(err.to_string())),
        };

        let outcome = CertifiedTransition {
            signed,
            certification,
        };
        verify_outcome(&self.ctx, &outcome)?;
        self.outcome = Some(outcome.clone());

        let committed = self.ctx.vault.record_transition(&outcome)?;
        info!(
            flow_id = %self.flow_id,
            proposal = %outcome.id(),
            commit = ?committed,
            "Transition certified and committed"
        );
        Ok(InitiatorState::BroadcastOutcome)
    }

    async fn broadcast(&mut self) -> Result<InitiatorState, CustodyError> {
        let outcome = self
            .outcome
            .clone()
            .ok_or_else(|| CustodyError::ProtocolViolation("broadcast without outcome".into()))?;

        let recipients = self
            .recipients
            .iter()
            .map(|party| (party.clone(), self.sessions.remove(&party.key)))
            .collect();
        let pending = deliver_all(&self.ctx, self.flow_id, &outcome, recipients).await;

        if pending.is_empty() {
            self.ctx.remove_checkpoint(&self.flow_id);
            info!(flow_id = %self.flow_id, proposal = %outcome.id(), "Finality complete");
        } else {
            info!(
                flow_id = %self.flow_id,
                pending = pending.len(),
                "Outcome delivery incomplete, handing over to finality retrier"
            );
            // Saved in Done: the retrier may take it from here.
            self.ctx
                .save_checkpoint(&self.checkpoint(InitiatorState::Done, pending))?;
        }
        Ok(InitiatorState::Done)
    }

    async fn retry_or_fail(&mut self, err: SessionError) -> Result<InitiatorState, CustodyError> {
        if !err.is_retryable() {
            return Err(err.into());
        }

        self.failed_attempts += 1;
        if self.failed_attempts >= self.ctx.config.session_attempts {
            return Err(CustodyError::SessionFailure(format!(
                "{err} (after {} attempts)",
                self.failed_attempts
            )));
        }

        if let Some(signer) = &self.signer {
            self.sessions.remove(&signer.key);
            self.roles_sent.remove(&signer.key);
        }
        warn!(
            flow_id = %self.flow_id,
            attempt = self.failed_attempts,
            error = %err,
            "Session failed, retrying"
        );
        tokio::time::sleep(self.ctx.config.retry_backoff).await;
        Ok(InitiatorState::OpenSessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::{CustodyId, NodeIdentity, Route};
    use crate::messaging::ChannelNetwork;
    use crate::notary::LocalUniquenessAuthority;
    use crate::protocol::testing::context;

    #[tokio::test]
    async fn create_commits_locally_while_a_member_is_offline() {
        let dir = tempfile::tempdir().unwrap();
        let network = ChannelNetwork::new();
        let authority = LocalUniquenessAuthority::new(NodeIdentity::generate("Authority"));
        let (a, _a_rx) = context("A", &network, &authority, &dir).await;
        let (b, _b_rx) = context("B", &network, &authority, &dir).await;
        network.set_online(&b.me().key, false).await;

        let id = CustodyId::new();
        let command = CustodyCommand::Create {
            id,
            route: Route::new(vec![a.me().clone(), b.me().clone()]),
        };
        let outcome = InitiatorFlow::new(a.clone(), command).run().await.unwrap();

        assert_eq!(outcome.proposal().action, TransitionAction::Create);
        let live = a.vault.find_live_record_by_id(&id).unwrap().unwrap();
        assert_eq!(live.record.holder, *a.me());

        // B is still owed the outcome.
        let checkpoints = a.vault.list_checkpoints().unwrap();
        assert_eq!(checkpoints.len(), 1);
        let progress = checkpoints[0].as_initiator().unwrap();
        assert_eq!(progress.pending, vec![b.me().clone()]);
        assert!(progress.outcome.is_some());
        assert_eq!(progress.state, InitiatorState::Done);
    }

    #[tokio::test]
    async fn create_off_route_is_refused_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let network = ChannelNetwork::new();
        let authority = LocalUniquenessAuthority::new(NodeIdentity::generate("Authority"));
        let (a, _a_rx) = context("A", &network, &authority, &dir).await;
        let (b, _b_rx) = context("B", &network, &authority, &dir).await;
        let (c, _c_rx) = context("C", &network, &authority, &dir).await;

        let command = CustodyCommand::Create {
            id: CustodyId::new(),
            route: Route::new(vec![b.me().clone(), c.me().clone()]),
        };
        let err = InitiatorFlow::new(a.clone(), command).run().await.unwrap_err();

        assert!(matches!(err, CustodyError::UnauthorizedInitiator(_)));
        assert!(a.vault.list_checkpoints().unwrap().is_empty());
        assert_eq!(authority.consumed_count(), 0);
    }

    #[tokio::test]
    async fn single_custodian_route_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let network = ChannelNetwork::new();
        let authority = LocalUniquenessAuthority::new(NodeIdentity::generate("Authority"));
        let (a, _a_rx) = context("A", &network, &authority, &dir).await;

        let command = CustodyCommand::Create {
            id: CustodyId::new(),
            route: Route::new(vec![a.me().clone()]),
        };
        let err = InitiatorFlow::new(a.clone(), command).run().await.unwrap_err();
        assert!(matches!(err, CustodyError::MalformedProposal(_)));
        assert!(a.vault.list_live_records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_signer_aborts_after_bounded_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let network = ChannelNetwork::new();
        let authority = LocalUniquenessAuthority::new(NodeIdentity::generate("Authority"));
        let (a, _a_rx) = context("A", &network, &authority, &dir).await;
        let (b, _b_rx) = context("B", &network, &authority, &dir).await;

        // Seed both vaults with a record held by A.
        let id = CustodyId::new();
        let create = CustodyCommand::Create {
            id,
            route: Route::new(vec![a.me().clone(), b.me().clone()]),
        };
        network.set_online(&b.me().key, false).await;
        let created = InitiatorFlow::new(a.clone(), create).run().await.unwrap();
        b.vault.record_transition(&created).unwrap();

        // B takes custody, but A (the signer) is offline.
        network.set_online(&b.me().key, true).await;
        network.set_online(&a.me().key, false).await;
        let err = InitiatorFlow::new(b.clone(), CustodyCommand::Arrival { id })
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, CustodyError::SessionFailure(_)));
        assert!(b.vault.list_checkpoints().unwrap().is_empty());
        let live = b.vault.find_live_record_by_id(&id).unwrap().unwrap();
        assert_eq!(live.record.holder, *a.me());
    }
}
