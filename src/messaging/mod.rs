// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Messaging
//!
//! Ordered, reliable, point-to-point sessions between parties. A session is
//! opened by identity and carries [`FlowMessage`]s in both directions. The
//! first frame of every session is a [`SessionInit`] that tells the receiver
//! which flow and stage it is joining.
//!
//! A session failure aborts the flow that owns it. Whether the failure is
//! worth retrying is decided by [`SessionError::is_retryable`].

pub mod channel;

use std::time::Duration;

use async_trait::async_trait;

use crate::custody::Party;
use crate::protocol::messages::{FlowMessage, SessionInit};

pub use channel::{ChannelMessenger, ChannelNetwork};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The peer is not known to the network at all.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The peer is known but cannot be reached right now.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("session closed by {0}")]
    Closed(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("expected {expected}, received {received}")]
    UnexpectedMessage {
        expected: &'static str,
        received: &'static str,
    },

    #[error("message encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Unreachable(_) | SessionError::Closed(_) | SessionError::Timeout(_)
        )
    }
}

/// One side of an open session.
#[async_trait]
pub trait Session: Send {
    fn counterparty(&self) -> &Party;

    async fn send(&mut self, message: &FlowMessage) -> Result<(), SessionError>;

    /// Wait for the next message, failing after `timeout`.
    async fn receive(&mut self, timeout: Duration) -> Result<FlowMessage, SessionError>;
}

/// Opens sessions to other parties.
#[async_trait]
pub trait Messaging: Send + Sync {
    async fn open_session(
        &self,
        peer: &Party,
        init: SessionInit,
    ) -> Result<Box<dyn Session>, SessionError>;
}

/// A session opened by a remote initiator.
pub struct IncomingSession {
    pub init: SessionInit,
    pub session: Box<dyn Session>,
}

impl std::fmt::Debug for IncomingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingSession")
            .field("init", &self.init)
            .field("counterparty", self.session.counterparty())
            .finish()
    }
}

/// Receive a message and insist on its kind.
pub async fn expect_message<T>(
    session: &mut dyn Session,
    timeout: Duration,
    expected: &'static str,
    extract: impl FnOnce(FlowMessage) -> Result<T, FlowMessage> + Send,
) -> Result<T, SessionError> {
    let message = session.receive(timeout).await?;
    extract(message).map_err(|other| SessionError::UnexpectedMessage {
        expected,
        received: other.kind(),
    })
}
