//! In-process stand-ins for the external collaborators.
//!
//! - [`RendezvousHub`]: a rendezvous service that routes signaling messages
//!   between registered peers
//! - [`LoopbackNetwork`]: sessions whose channels are in-memory pipes
//! - [`ScriptedTransport`]: a channel transport with canned replies
//!
//! Used by the test suites and handy for local experiments.

use crate::error::{SyncError, SyncResult};
use crate::protocol::PeerMessage;
use crate::session::{ChannelLink, PeerSession, SessionEvents, SessionFactory};
use crate::signaling::{IceCandidate, SignalMessage, SignalingSink};
use crate::transport::ChannelTransport;
use async_trait::async_trait;
use meshlite_types::PeerId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Rendezvous ───────────────────────────────────────────────────

/// In-memory rendezvous service.
///
/// `register` is broadcast to every other connected client. Offers,
/// answers and candidates are delivered to the peer named in `id`, with
/// `id` rewritten to the sender.
#[derive(Debug, Clone, Default)]
pub struct RendezvousHub {
    clients: Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<SignalMessage>>>>,
}

impl RendezvousHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a client connection for `id`.
    ///
    /// Returns the outbound sink and the inbox of messages addressed to it.
    pub fn connect(
        &self,
        id: PeerId,
    ) -> (Arc<dyn SignalingSink>, mpsc::UnboundedReceiver<SignalMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.clients).insert(id.clone(), tx);
        let sink = HubSink {
            hub: self.clone(),
            from: id,
        };
        (Arc::new(sink), rx)
    }

    /// Drops a client and announces its departure to the others.
    ///
    /// The client's inbox ends, which closes its signaling transport.
    pub fn disconnect(&self, id: &PeerId) {
        let mut clients = lock(&self.clients);
        if clients.remove(id).is_none() {
            return;
        }
        for tx in clients.values() {
            let _ = tx.send(SignalMessage::PeerDisconnected { id: id.clone() });
        }
    }

    /// Identities currently connected.
    pub fn clients(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = lock(&self.clients).keys().cloned().collect();
        ids.sort();
        ids
    }

    fn route(&self, from: &PeerId, message: SignalMessage) -> SyncResult<()> {
        let clients = lock(&self.clients);
        if !clients.contains_key(from) {
            return Err(SyncError::TransportClosed);
        }

        let (target, delivered) = match message {
            SignalMessage::Register { id } => {
                for (peer, tx) in clients.iter() {
                    if peer != from {
                        let _ = tx.send(SignalMessage::Register { id: id.clone() });
                    }
                }
                return Ok(());
            }
            SignalMessage::PeerDisconnected { .. } => return Ok(()),
            SignalMessage::Offer { id, sdp } => (id, SignalMessage::Offer { id: from.clone(), sdp }),
            SignalMessage::Answer { id, sdp } => {
                (id, SignalMessage::Answer { id: from.clone(), sdp })
            }
            SignalMessage::Candidate { id, candidate } => (
                id,
                SignalMessage::Candidate {
                    id: from.clone(),
                    candidate,
                },
            ),
        };

        match clients.get(&target) {
            Some(tx) => {
                let _ = tx.send(delivered);
            }
            None => debug!("hub: {} for unknown peer {target}", delivered.kind()),
        }
        Ok(())
    }
}

struct HubSink {
    hub: RendezvousHub,
    from: PeerId,
}

#[async_trait]
impl SignalingSink for HubSink {
    async fn send(&self, message: SignalMessage) -> SyncResult<()> {
        self.hub.route(&self.from, message)
    }
}

// ── Loopback sessions ────────────────────────────────────────────

#[derive(Debug, Default)]
struct LoopbackState {
    /// Live session event handles keyed by (local, remote).
    sessions: HashMap<(PeerId, PeerId), SessionEvents>,
    /// Peers whose connectivity never completes.
    stalled: HashSet<PeerId>,
    /// Remote candidates applied, keyed by (local, remote).
    candidates: HashMap<(PeerId, PeerId), usize>,
}

/// A network where every channel is an in-memory pipe.
///
/// The channel opens on both ends when the offering side applies the
/// answer, unless either end has been marked as stalled.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session factory for the replica `local`.
    pub fn factory(&self, local: PeerId) -> Arc<dyn SessionFactory> {
        Arc::new(LoopbackFactory {
            network: self.clone(),
            local,
        })
    }

    /// Connectivity involving `peer` will never complete.
    pub fn stall(&self, peer: &PeerId) {
        lock(&self.state).stalled.insert(peer.clone());
    }

    /// Remote candidates `local` has applied for its session with `remote`.
    pub fn candidates_applied(&self, local: &PeerId, remote: &PeerId) -> usize {
        lock(&self.state)
            .candidates
            .get(&(local.clone(), remote.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Whether `local` holds a live session towards `remote`.
    pub fn has_session(&self, local: &PeerId, remote: &PeerId) -> bool {
        lock(&self.state)
            .sessions
            .contains_key(&(local.clone(), remote.clone()))
    }
}

struct LoopbackFactory {
    network: LoopbackNetwork,
    local: PeerId,
}

impl SessionFactory for LoopbackFactory {
    fn create_session(
        &self,
        peer: &PeerId,
        events: SessionEvents,
    ) -> SyncResult<Arc<dyn PeerSession>> {
        lock(&self.network.state)
            .sessions
            .insert((self.local.clone(), peer.clone()), events.clone());
        Ok(Arc::new(LoopbackSession {
            network: self.network.clone(),
            local: self.local.clone(),
            remote: peer.clone(),
            events,
        }))
    }
}

struct LoopbackSession {
    network: LoopbackNetwork,
    local: PeerId,
    remote: PeerId,
    events: SessionEvents,
}

impl LoopbackSession {
    fn host_candidate(&self) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:loopback {} -> {}", self.local, self.remote),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

#[async_trait]
impl PeerSession for LoopbackSession {
    async fn create_offer(&self) -> SyncResult<String> {
        self.events.local_candidate(self.host_candidate());
        Ok(format!("offer:{}", self.local))
    }

    async fn accept_offer(&self, sdp: &str) -> SyncResult<String> {
        if !sdp.starts_with("offer:") {
            return Err(SyncError::Negotiation(format!("not an offer: {sdp}")));
        }
        self.events.local_candidate(self.host_candidate());
        Ok(format!("answer:{}", self.local))
    }

    async fn apply_answer(&self, sdp: &str) -> SyncResult<()> {
        if !sdp.starts_with("answer:") {
            return Err(SyncError::Negotiation(format!("not an answer: {sdp}")));
        }

        let counterpart = {
            let state = lock(&self.network.state);
            if state.stalled.contains(&self.local) || state.stalled.contains(&self.remote) {
                debug!("loopback: {} <-> {} stalled", self.local, self.remote);
                return Ok(());
            }
            state
                .sessions
                .get(&(self.remote.clone(), self.local.clone()))
                .cloned()
        };
        let Some(counterpart) = counterpart else {
            return Err(SyncError::Negotiation(format!(
                "{} has no session for {}",
                self.remote, self.local
            )));
        };

        let (ours, theirs) = ChannelLink::pair();
        self.events.channel_open(ours);
        counterpart.channel_open(theirs);
        Ok(())
    }

    async fn add_candidate(&self, _candidate: &IceCandidate) -> SyncResult<()> {
        *lock(&self.network.state)
            .candidates
            .entry((self.local.clone(), self.remote.clone()))
            .or_default() += 1;
        Ok(())
    }

    fn close(&self) {
        let mut state = lock(&self.network.state);
        let key = (self.local.clone(), self.remote.clone());
        if state
            .sessions
            .get(&key)
            .is_some_and(|e| e.generation() == self.events.generation())
        {
            state.sessions.remove(&key);
        }
    }
}

// ── Scripted transport ───────────────────────────────────────────

/// How a scripted peer answers.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Reply with this message.
    Reply(PeerMessage),
    /// Fail as if the peer had no channel.
    Unreachable,
    /// Never answer.
    Hang,
}

/// A [`ChannelTransport`] whose peers answer from a script.
///
/// Peers without a script are unreachable.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    replies: Arc<Mutex<HashMap<PeerId, ScriptedReply>>>,
    seen: Arc<Mutex<Vec<(PeerId, PeerMessage)>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how `peer` answers.
    pub fn script(&self, peer: impl Into<PeerId>, reply: ScriptedReply) -> &Self {
        lock(&self.replies).insert(peer.into(), reply);
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<(PeerId, PeerMessage)> {
        lock(&self.seen).clone()
    }
}

#[async_trait]
impl ChannelTransport for ScriptedTransport {
    async fn request(&self, peer: &PeerId, message: PeerMessage) -> SyncResult<PeerMessage> {
        lock(&self.seen).push((peer.clone(), message));
        let reply = lock(&self.replies).get(peer).cloned();
        match reply {
            Some(ScriptedReply::Reply(message)) => Ok(message),
            Some(ScriptedReply::Hang) => futures::future::pending().await,
            Some(ScriptedReply::Unreachable) | None => {
                Err(SyncError::PeerUnreachable(peer.to_string()))
            }
        }
    }
}
