// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Custody Transfer Protocol
//!
//! Each flow is an explicit state machine driven by a step loop. The
//! initiator walks
//!
//! ```text
//! BUILD → LOCAL_VERIFY → LOCAL_SIGN → OPEN_SESSIONS → ASSIGN_ROLES
//!       → AWAIT_COUNTER_SIGNATURE (transfer only) → SUBMIT_FOR_UNIQUENESS
//!       → BROADCAST_OUTCOME → DONE
//! ```
//!
//! and every receiver walks
//!
//! ```text
//! AWAIT_ROLE → [signer: LOCAL_VERIFY → SIGN_OR_REJECT] → AWAIT_OUTCOME
//!            → COMMIT_OR_DISCARD → DONE
//! ```
//!
//! A failure before certification aborts the flow with no durable effect.
//! After certification the outcome is delivered until every recipient has
//! acknowledged it or is known to be permanently unreachable.

pub mod checkpoint;
pub mod finality;
pub mod initiator;
pub mod lock;
pub mod messages;
pub mod responder;

use std::sync::Arc;

use crate::config::ProtocolConfig;
use crate::custody::{contract, CertifiedTransition, NodeIdentity, Party};
use crate::error::CustodyError;
use crate::messaging::Messaging;
use crate::notary::UniquenessAuthority;
use crate::storage::Vault;

pub use checkpoint::{CustodyCommand, FlowCheckpoint, FlowId};
pub use finality::FinalityRetrier;
pub use initiator::InitiatorFlow;
pub use lock::{LineageGuard, LineageLocks};
pub use responder::ResponderFlow;

/// Collaborators shared by every flow a node runs.
pub struct FlowContext {
    pub identity: NodeIdentity,
    pub vault: Arc<dyn Vault>,
    pub messaging: Arc<dyn Messaging>,
    pub authority: Arc<dyn UniquenessAuthority>,
    pub config: ProtocolConfig,
}

impl FlowContext {
    pub fn me(&self) -> &Party {
        self.identity.party()
    }

    /// The only authority whose certifications this node accepts.
    pub fn trusted_authority(&self) -> &Party {
        self.authority.identity()
    }

    pub(crate) fn save_checkpoint(&self, checkpoint: &FlowCheckpoint) -> Result<(), CustodyError> {
        Ok(self.vault.save_checkpoint(checkpoint)?)
    }

    pub(crate) fn remove_checkpoint(&self, flow_id: &FlowId) {
        if let Err(e) = self.vault.remove_checkpoint(flow_id) {
            tracing::warn!(flow_id = %flow_id, error = %e, "Failed to remove flow checkpoint");
        }
    }
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("me", self.me())
            .field("authority", self.trusted_authority())
            .finish_non_exhaustive()
    }
}

/// Checks every receiver runs on a certified outcome before committing it.
pub fn verify_outcome(ctx: &FlowContext, outcome: &CertifiedTransition) -> Result<(), CustodyError> {
    outcome
        .verify(&ctx.trusted_authority().key)
        .map_err(|fault| CustodyError::ProtocolViolation(fault.to_string()))?;
    contract::verify(outcome.proposal())?;
    if !outcome.proposal().route_parties().contains(ctx.me()) {
        return Err(CustodyError::ProtocolViolation(format!(
            "{} is not on the route of {}",
            ctx.me(),
            outcome.id()
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by protocol and node tests.

    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use super::*;
    use crate::messaging::{ChannelNetwork, IncomingSession};
    use crate::notary::LocalUniquenessAuthority;
    use crate::storage::VaultDatabase;

    pub(crate) fn test_config() -> ProtocolConfig {
        ProtocolConfig {
            session_attempts: 2,
            retry_backoff: Duration::from_millis(10),
            receive_timeout: Duration::from_secs(2),
            finality_retry: Duration::ZERO,
            finality_retry_max: Duration::ZERO,
        }
    }

    /// A flow context on a temporary vault, joined to `network`.
    pub(crate) async fn context(
        name: &str,
        network: &ChannelNetwork,
        authority: &LocalUniquenessAuthority,
        dir: &TempDir,
    ) -> (Arc<FlowContext>, mpsc::Receiver<IncomingSession>) {
        let identity = NodeIdentity::generate(name);
        let vault = VaultDatabase::open(&dir.path().join(name).join("vault.redb")).unwrap();
        let (messenger, incoming) = network.join(identity.party().clone()).await;
        let ctx = FlowContext {
            identity,
            vault: Arc::new(vault),
            messaging: Arc::new(messenger),
            authority: Arc::new(authority.clone()),
            config: test_config(),
        };
        (Arc::new(ctx), incoming)
    }
}
