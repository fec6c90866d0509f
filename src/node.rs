// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Custody Node
//!
//! The command and query surface of one distributor. Commands run an
//! [`InitiatorFlow`] under the lineage lock; [`CustodyNode::serve`] answers
//! flows other nodes start.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::custody::{
    CertifiedTransition, CustodyId, CustodyRecord, IdentityDirectory, LiveRecord, Party, Route,
};
use crate::error::CustodyError;
use crate::messaging::IncomingSession;
use crate::protocol::checkpoint::{
    FlowCheckpoint, FlowProgress, InitiatorCheckpoint, InitiatorState,
};
use crate::protocol::{
    CustodyCommand, FinalityRetrier, FlowContext, InitiatorFlow, LineageLocks, ResponderFlow,
};

/// What the local node may legally do with a record right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum CustodyAction {
    /// Take custody from the current holder.
    Arrive,
    /// Hand the cargo over at the end of the route.
    Deliver,
}

/// What [`CustodyNode::resume_flows`] did with each checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub resumed: usize,
    pub failed: usize,
    pub discarded: usize,
    pub awaiting_finality: usize,
}

pub struct CustodyNode {
    ctx: Arc<FlowContext>,
    directory: IdentityDirectory,
    locks: LineageLocks,
}

impl CustodyNode {
    pub fn new(ctx: Arc<FlowContext>, directory: IdentityDirectory) -> Self {
        directory.register(ctx.me().clone());
        Self {
            ctx,
            directory,
            locks: LineageLocks::new(),
        }
    }

    pub fn party(&self) -> &Party {
        self.ctx.me()
    }

    pub fn authority(&self) -> &Party {
        self.ctx.trusted_authority()
    }

    pub fn directory(&self) -> &IdentityDirectory {
        &self.directory
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Enter a new cargo on `route`. The calling node becomes its first holder.
    pub async fn create_custody_chain(&self, route: Vec<Party>) -> Result<CustodyId, CustodyError> {
        let id = CustodyId::new();
        let _guard = self.locks.try_acquire(id)?;
        let command = CustodyCommand::Create {
            id,
            route: Route::new(route),
        };
        InitiatorFlow::new(self.ctx.clone(), command).run().await?;
        info!(cargo_id = %id, holder = %self.party(), "Custody chain created");
        Ok(id)
    }

    /// Like [`Self::create_custody_chain`], resolving each name through the
    /// identity directory first.
    pub async fn create_custody_chain_by_names(
        &self,
        names: &[String],
    ) -> Result<CustodyId, CustodyError> {
        let route = names
            .iter()
            .map(|name| {
                self.directory
                    .resolve(name)
                    .ok_or_else(|| CustodyError::UnknownParty(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.create_custody_chain(route).await
    }

    /// The cargo reached this node: take custody from the current holder.
    pub async fn signal_arrival(&self, id: CustodyId) -> Result<CustodyRecord, CustodyError> {
        let _guard = self.locks.try_acquire(id)?;
        let outcome = InitiatorFlow::new(self.ctx.clone(), CustodyCommand::Arrival { id })
            .run()
            .await?;
        outcome.proposal().single_produced().cloned().ok_or_else(|| {
            CustodyError::ProtocolViolation(format!("transfer of {id} produced no record"))
        })
    }

    /// The cargo was delivered: remove it from the chain.
    pub async fn signal_delivery(&self, id: CustodyId) -> Result<(), CustodyError> {
        let _guard = self.locks.try_acquire(id)?;
        InitiatorFlow::new(self.ctx.clone(), CustodyCommand::Delivery { id })
            .run()
            .await?;
        info!(cargo_id = %id, "Cargo delivered");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn list_live_records(&self) -> Result<Vec<LiveRecord>, CustodyError> {
        Ok(self.ctx.vault.list_live_records()?)
    }

    pub fn find_live_record(&self, id: &CustodyId) -> Result<LiveRecord, CustodyError> {
        self.ctx
            .vault
            .find_live_record_by_id(id)?
            .ok_or(CustodyError::NotFound(*id))
    }

    /// Certified transitions of a lineage this node has applied, oldest
    /// first. Still available after delivery.
    pub fn cargo_history(&self, id: &CustodyId) -> Result<Vec<CertifiedTransition>, CustodyError> {
        let history = self.ctx.vault.lineage_history(id)?;
        if history.is_empty() {
            return Err(CustodyError::NotFound(*id));
        }
        Ok(history)
    }

    pub fn available_actions(&self, record: &CustodyRecord) -> Vec<CustodyAction> {
        let me = self.party();
        let mut actions = Vec::new();
        if record.route.next_after(&record.holder) == Some(me) {
            actions.push(CustodyAction::Arrive);
        }
        if record.holder == *me && record.route.is_last(me) {
            actions.push(CustodyAction::Deliver);
        }
        actions
    }

    // =========================================================================
    // Background work
    // =========================================================================

    /// Accept sessions opened by other nodes until `shutdown` fires, running
    /// one responder flow per session.
    pub async fn serve(
        &self,
        mut incoming: mpsc::Receiver<IncomingSession>,
        shutdown: CancellationToken,
    ) {
        info!(party = %self.party(), "Responder loop starting");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(party = %self.party(), "Responder loop shutting down");
                    return;
                }
                next = incoming.recv() => {
                    let Some(session) = next else {
                        info!(party = %self.party(), "Session queue closed");
                        return;
                    };
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = ResponderFlow::new(ctx, session).run().await {
                            debug!(error = %e, "Responder flow ended without commit");
                        }
                    });
                }
            }
        }
    }

    /// Recover from the checkpoints left by a previous run.
    pub async fn resume_flows(&self) -> Result<ResumeReport, CustodyError> {
        let mut report = ResumeReport::default();

        for checkpoint in self.ctx.vault.list_checkpoints()? {
            let flow_id = checkpoint.flow_id;
            match checkpoint.progress {
                FlowProgress::Initiator(mut progress) if progress.outcome.is_some() => {
                    if !progress.state.is_handed_over() {
                        // Interrupted while broadcasting. Every recipient is
                        // still listed as pending, so the retrier can finish.
                        let _guard = match self.locks.try_acquire(progress.command.lineage()) {
                            Ok(guard) => guard,
                            Err(_) => {
                                debug!(flow_id = %flow_id, "Flow still broadcasting, leaving it");
                                continue;
                            }
                        };
                        progress.state = InitiatorState::Done;
                        self.ctx
                            .save_checkpoint(&FlowCheckpoint::initiator(flow_id, progress))?;
                        info!(flow_id = %flow_id, "Interrupted broadcast handed to finality retrier");
                    }
                    report.awaiting_finality += 1;
                }
                FlowProgress::Initiator(InitiatorCheckpoint {
                    command,
                    proposal: Some(signed),
                    ..
                }) => {
                    let _guard = match self.locks.try_acquire(command.lineage()) {
                        Ok(guard) => guard,
                        Err(e) => {
                            warn!(flow_id = %flow_id, error = %e, "Cannot resume flow");
                            report.failed += 1;
                            continue;
                        }
                    };
                    info!(flow_id = %flow_id, cargo_id = %command.lineage(), "Resuming flow");
                    match InitiatorFlow::resume(self.ctx.clone(), flow_id, command, signed)
                        .run()
                        .await
                    {
                        Ok(_) => report.resumed += 1,
                        Err(_) => report.failed += 1,
                    }
                }
                _ => {
                    debug!(flow_id = %flow_id, "Discarding checkpoint with no durable effect");
                    self.ctx.vault.remove_checkpoint(&flow_id)?;
                    report.discarded += 1;
                }
            }
        }

        info!(
            party = %self.party(),
            resumed = report.resumed,
            failed = report.failed,
            discarded = report.discarded,
            awaiting_finality = report.awaiting_finality,
            "Flow recovery complete"
        );
        Ok(report)
    }

    pub fn finality_retrier(&self) -> FinalityRetrier {
        FinalityRetrier::new(self.ctx.clone())
    }
}
