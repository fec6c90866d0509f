// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Finality Delivery
//!
//! Once certified, an outcome must reach every route member. A recipient
//! counts as delivered only after it acknowledges the commit. Recipients
//! that could not be reached stay in the flow's checkpoint and are retried
//! by the [`FinalityRetrier`] with exponential backoff until they answer or
//! the messaging layer reports them unknown.
//!
//! A checkpoint has one writer at a time. The initiator flow owns it until
//! it saves it in `Done`; from then on only the retrier touches it.
//!
//! ## Shutdown
//!
//! The retrier runs until its `CancellationToken` is triggered.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::checkpoint::{FlowCheckpoint, FlowId, FlowProgress};
use super::messages::{FlowMessage, SessionInit, SessionStage};
use super::FlowContext;
use crate::custody::{CertifiedTransition, Party};
use crate::messaging::{Session, SessionError};

/// Result of one delivery attempt.
#[derive(Debug)]
pub enum Delivery {
    Delivered,
    /// Try again later.
    Retry(SessionError),
    /// Give up on this recipient for good.
    Dropped(SessionError),
}

impl Delivery {
    fn from_error(err: SessionError) -> Self {
        match err {
            SessionError::UnknownPeer(_) | SessionError::UnexpectedMessage { .. } => {
                Delivery::Dropped(err)
            }
            other if other.is_retryable() => Delivery::Retry(other),
            other => Delivery::Dropped(other),
        }
    }
}

/// Send `outcome` to `recipient` and wait for its acknowledgement, reusing
/// `session` when the recipient already has one open for this flow.
pub async fn deliver(
    ctx: &FlowContext,
    flow_id: FlowId,
    outcome: &CertifiedTransition,
    recipient: &Party,
    session: Option<Box<dyn Session>>,
) -> Delivery {
    let mut session = match session {
        Some(session) => session,
        None => {
            let init = SessionInit {
                flow_id,
                kind: outcome.proposal().action,
                stage: SessionStage::Finality,
            };
            match ctx.messaging.open_session(recipient, init).await {
                Ok(session) => session,
                Err(err) => return Delivery::from_error(err),
            }
        }
    };

    if let Err(err) = session.send(&FlowMessage::Outcome(outcome.clone())).await {
        return Delivery::from_error(err);
    }
    match session.receive(ctx.config.receive_timeout).await {
        Ok(FlowMessage::Ack) => Delivery::Delivered,
        Ok(other) => Delivery::from_error(SessionError::UnexpectedMessage {
            expected: "ack",
            received: other.kind(),
        }),
        Err(err) => Delivery::from_error(err),
    }
}

/// Deliver to each recipient in turn and return those still pending.
pub(crate) async fn deliver_all(
    ctx: &FlowContext,
    flow_id: FlowId,
    outcome: &CertifiedTransition,
    recipients: Vec<(Party, Option<Box<dyn Session>>)>,
) -> Vec<Party> {
    let mut pending = Vec::new();
    for (recipient, session) in recipients {
        match deliver(ctx, flow_id, outcome, &recipient, session).await {
            Delivery::Delivered => {
                tracing::debug!(flow_id = %flow_id, recipient = %recipient, "Outcome acknowledged");
            }
            Delivery::Retry(err) => {
                info!(
                    flow_id = %flow_id,
                    recipient = %recipient,
                    error = %err,
                    "Outcome not delivered, will retry"
                );
                pending.push(recipient);
            }
            Delivery::Dropped(err) => {
                warn!(
                    flow_id = %flow_id,
                    recipient = %recipient,
                    error = %err,
                    "Recipient permanently unreachable, dropping"
                );
            }
        }
    }
    pending
}

/// Background task re-delivering certified outcomes.
pub struct FinalityRetrier {
    ctx: Arc<FlowContext>,
}

impl FinalityRetrier {
    pub fn new(ctx: Arc<FlowContext>) -> Self {
        Self { ctx }
    }

    /// Run sweeps until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(node.finality_retrier().run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        let interval = self.ctx.config.finality_retry.max(std::time::Duration::from_millis(100));
        info!(
            party = %self.ctx.me(),
            interval_ms = interval.as_millis() as u64,
            "Finality retrier starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!(party = %self.ctx.me(), "Finality retrier shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => {
                    info!(party = %self.ctx.me(), "Finality retrier shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over every handed-over checkpoint whose retry time has come.
    /// Returns the number of flows that completed.
    pub async fn sweep(&self) -> usize {
        let checkpoints = match self.ctx.vault.list_checkpoints() {
            Ok(checkpoints) => checkpoints,
            Err(e) => {
                warn!(error = %e, "Finality retrier: failed to list checkpoints");
                return 0;
            }
        };

        let mut completed = 0;
        for checkpoint in checkpoints {
            let flow_id = checkpoint.flow_id;
            let FlowProgress::Initiator(mut progress) = checkpoint.progress else {
                continue;
            };
            if !progress.state.is_handed_over() {
                continue;
            }
            let Some(outcome) = progress.outcome.clone() else {
                continue;
            };
            if progress.next_attempt_at.is_some_and(|at| at > Utc::now()) {
                continue;
            }

            let recipients = progress.pending.drain(..).map(|party| (party, None)).collect();
            let pending = deliver_all(&self.ctx, flow_id, &outcome, recipients).await;

            if pending.is_empty() {
                info!(flow_id = %flow_id, proposal = %outcome.id(), "Finality complete");
                self.ctx.remove_checkpoint(&flow_id);
                completed += 1;
                continue;
            }

            progress.delivery_attempts += 1;
            let delay = self.ctx.config.finality_backoff(progress.delivery_attempts);
            progress.next_attempt_at =
                Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()));
            progress.pending = pending;
            if let Err(e) = self
                .ctx
                .save_checkpoint(&FlowCheckpoint::initiator(flow_id, progress))
            {
                warn!(flow_id = %flow_id, error = %e, "Finality retrier: failed to save checkpoint");
            }
        }
        completed
    }
}
