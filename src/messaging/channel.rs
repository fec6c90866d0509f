// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process messaging over tokio channels.
//!
//! A shared [`ChannelNetwork`] broker routes new sessions to each party's
//! accept queue. Frames are JSON-encoded so every message crosses the same
//! serialization boundary it would on a real transport. A party can be taken
//! offline to simulate an unreachable node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use super::{IncomingSession, Messaging, Session, SessionError};
use crate::custody::{Party, PartyKey};
use crate::protocol::messages::{FlowMessage, SessionInit};

const ACCEPT_QUEUE_SIZE: usize = 64;
const FRAME_BUFFER_SIZE: usize = 16;

struct PeerEntry {
    accept_tx: mpsc::Sender<IncomingSession>,
    online: bool,
}

/// Shared network broker.
#[derive(Clone, Default)]
pub struct ChannelNetwork {
    peers: Arc<Mutex<HashMap<PartyKey, PeerEntry>>>,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `party` and return its messenger plus the queue of sessions
    /// other parties open to it. Joining again replaces the previous queue,
    /// which is how a restarted node reattaches.
    pub async fn join(&self, party: Party) -> (ChannelMessenger, mpsc::Receiver<IncomingSession>) {
        let (accept_tx, accept_rx) = mpsc::channel(ACCEPT_QUEUE_SIZE);
        self.peers.lock().await.insert(
            party.key.clone(),
            PeerEntry {
                accept_tx,
                online: true,
            },
        );
        tracing::debug!(party = %party, "Joined channel network");

        let messenger = ChannelMessenger {
            local: party,
            network: self.clone(),
        };
        (messenger, accept_rx)
    }

    /// Take a party offline or bring it back. Offline parties can neither
    /// open sessions nor be reached.
    pub async fn set_online(&self, key: &PartyKey, online: bool) {
        if let Some(entry) = self.peers.lock().await.get_mut(key) {
            entry.online = online;
        }
    }

    async fn is_online(&self, key: &PartyKey) -> bool {
        self.peers
            .lock()
            .await
            .get(key)
            .is_some_and(|entry| entry.online)
    }
}

impl std::fmt::Debug for ChannelNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelNetwork").finish_non_exhaustive()
    }
}

/// A party's handle on the [`ChannelNetwork`].
#[derive(Clone, Debug)]
pub struct ChannelMessenger {
    local: Party,
    network: ChannelNetwork,
}

#[async_trait]
impl Messaging for ChannelMessenger {
    async fn open_session(
        &self,
        peer: &Party,
        init: SessionInit,
    ) -> Result<Box<dyn Session>, SessionError> {
        let accept_tx = {
            let peers = self.network.peers.lock().await;
            let local_online = peers.get(&self.local.key).is_some_and(|entry| entry.online);
            match peers.get(&peer.key) {
                None => return Err(SessionError::UnknownPeer(peer.name.clone())),
                Some(entry) if !entry.online || !local_online => {
                    return Err(SessionError::Unreachable(peer.name.clone()))
                }
                Some(entry) => entry.accept_tx.clone(),
            }
        };

        let (to_peer_tx, to_peer_rx) = mpsc::channel(FRAME_BUFFER_SIZE);
        let (to_local_tx, to_local_rx) = mpsc::channel(FRAME_BUFFER_SIZE);

        // The responder end goes to the peer's accept queue.
        let remote = ChannelSession {
            local: peer.clone(),
            counterparty: self.local.clone(),
            outbound: to_local_tx,
            inbound: to_peer_rx,
            network: self.network.clone(),
        };
        accept_tx
            .send(IncomingSession {
                init,
                session: Box::new(remote),
            })
            .await
            .map_err(|_| SessionError::Unreachable(peer.name.clone()))?;

        Ok(Box::new(ChannelSession {
            local: self.local.clone(),
            counterparty: peer.clone(),
            outbound: to_peer_tx,
            inbound: to_local_rx,
            network: self.network.clone(),
        }))
    }
}

struct ChannelSession {
    local: Party,
    counterparty: Party,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Receiver<Vec<u8>>,
    network: ChannelNetwork,
}

#[async_trait]
impl Session for ChannelSession {
    fn counterparty(&self) -> &Party {
        &self.counterparty
    }

    async fn send(&mut self, message: &FlowMessage) -> Result<(), SessionError> {
        if !self.network.is_online(&self.local.key).await
            || !self.network.is_online(&self.counterparty.key).await
        {
            return Err(SessionError::Unreachable(self.counterparty.name.clone()));
        }
        let frame = serde_json::to_vec(message)?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| SessionError::Closed(self.counterparty.name.clone()))
    }

    async fn receive(&mut self, timeout: Duration) -> Result<FlowMessage, SessionError> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Err(_) => Err(SessionError::Timeout(self.counterparty.name.clone())),
            Ok(None) => Err(SessionError::Closed(self.counterparty.name.clone())),
            Ok(Some(frame)) => Ok(serde_json::from_slice(&frame)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custody::record::tests::parties;
    use crate::custody::TransitionAction;
    use crate::protocol::checkpoint::FlowId;
    use crate::protocol::messages::{SessionStage, TransferRole};

    const WAIT: Duration = Duration::from_millis(200);

    fn init() -> SessionInit {
        SessionInit {
            flow_id: FlowId::new(),
            kind: TransitionAction::Transfer,
            stage: SessionStage::Negotiate,
        }
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let p = parties(&["A", "B"]);
        let network = ChannelNetwork::new();
        let (a, _a_rx) = network.join(p[0].clone()).await;
        let (_b, mut b_rx) = network.join(p[1].clone()).await;

        let opened = init();
        let mut outbound = a.open_session(&p[1], opened.clone()).await.unwrap();
        let mut incoming = b_rx.recv().await.unwrap();
        assert_eq!(incoming.init, opened);
        assert_eq!(incoming.session.counterparty(), &p[0]);

        outbound
            .send(&FlowMessage::Role(TransferRole::Signer))
            .await
            .unwrap();
        assert_eq!(
            incoming.session.receive(WAIT).await.unwrap(),
            FlowMessage::Role(TransferRole::Signer)
        );

        incoming.session.send(&FlowMessage::Ack).await.unwrap();
        assert_eq!(outbound.receive(WAIT).await.unwrap(), FlowMessage::Ack);
    }

    #[tokio::test]
    async fn unknown_peer_is_not_retryable() {
        let p = parties(&["A", "Z"]);
        let network = ChannelNetwork::new();
        let (a, _a_rx) = network.join(p[0].clone()).await;

        let err = a.open_session(&p[1], init()).await.err().unwrap();
        assert!(matches!(err, SessionError::UnknownPeer(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn offline_peer_is_unreachable_until_back() {
        let p = parties(&["A", "B"]);
        let network = ChannelNetwork::new();
        let (a, _a_rx) = network.join(p[0].clone()).await;
        let (_b, _b_rx) = network.join(p[1].clone()).await;

        network.set_online(&p[1].key, false).await;
        let err = a.open_session(&p[1], init()).await.err().unwrap();
        assert!(matches!(err, SessionError::Unreachable(_)));
        assert!(err.is_retryable());

        network.set_online(&p[1].key, true).await;
        assert!(a.open_session(&p[1], init()).await.is_ok());
    }

    #[tokio::test]
    async fn receive_times_out() {
        let p = parties(&["A", "B"]);
        let network = ChannelNetwork::new();
        let (a, _a_rx) = network.join(p[0].clone()).await;
        let (_b, _b_rx) = network.join(p[1].clone()).await;

        let mut session = a.open_session(&p[1], init()).await.unwrap();
        let err = session.receive(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
    }

    #[tokio::test]
    async fn dropping_one_end_closes_the_other() {
        let p = parties(&["A", "B"]);
        let network = ChannelNetwork::new();
        let (a, _a_rx) = network.join(p[0].clone()).await;
        let (_b, mut b_rx) = network.join(p[1].clone()).await;

        let session = a.open_session(&p[1], init()).await.unwrap();
        let mut incoming = b_rx.recv().await.unwrap();
        drop(session);

        let err = incoming.session.receive(WAIT).await.unwrap_err();
        assert!(matches!(err, SessionError::Closed(_)));
    }
}
