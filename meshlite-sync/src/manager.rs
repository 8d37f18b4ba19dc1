//! Connection manager: per-peer negotiation driven by signaling.
//!
//! The manager owns the peer map. Each entry moves through
//! `Idle → Negotiating → Connected` and is dropped on departure, on
//! transport failure or when its negotiation deadline passes. A handle is
//! cheap to clone; every clone refers to the same peer map.
//!
//! A second `register` for a peer that is already negotiating or connected
//! starts over, as does an offer from a peer that is already connected: the
//! old connection is replaced and its pending requests resolve as "peer
//! gone". An offer for a connection still negotiating reuses its session.

use crate::channel::{Channel, IncomingRequest};
use crate::config::MeshConfig;
use crate::connection::{Connection, NegotiationState, NegotiationStep};
use crate::error::{SyncError, SyncResult};
use crate::protocol::PeerMessage;
use crate::session::{PeerSession, SessionEvent, SessionEvents, SessionFactory};
use crate::signaling::{SignalMessage, SignalingSink};
use crate::transport::ChannelTransport;
use async_trait::async_trait;
use meshlite_types::PeerId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the incoming request queue.
const REQUEST_QUEUE: usize = 64;

type SessionEventTx = mpsc::UnboundedSender<(PeerId, u64, SessionEvent)>;
type SessionEventRx = mpsc::UnboundedReceiver<(PeerId, u64, SessionEvent)>;

/// Something that happened to a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The channel to the peer opened.
    Connected(PeerId),
    /// The connection was torn down, or replaced by a fresh negotiation.
    Closed(PeerId),
    /// Negotiation missed its deadline; the connection was closed.
    NegotiationStalled(PeerId),
    /// A negotiation step failed; the connection was closed.
    NegotiationFailed { peer: PeerId, reason: String },
}

/// Receivers handed out once, at construction.
#[derive(Debug)]
pub struct ManagerStreams {
    /// Requests arriving on any peer channel.
    pub requests: mpsc::Receiver<IncomingRequest>,
    /// Connection lifecycle reports.
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

struct Inner {
    local_id: PeerId,
    config: MeshConfig,
    factory: Arc<dyn SessionFactory>,
    signaling: Arc<dyn SignalingSink>,
    peers: RwLock<HashMap<PeerId, Connection>>,
    registered: AtomicBool,
    next_generation: AtomicU64,
    next_request_id: AtomicU64,
    session_tx: SessionEventTx,
    session_rx: Mutex<Option<SessionEventRx>>,
    requests_tx: mpsc::Sender<IncomingRequest>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Handle to one replica's peer connections.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("local_id", &self.inner.local_id)
            .field("registered", &self.is_registered())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager. Nothing runs until [`ConnectionManager::register`].
    pub fn new(
        local_id: PeerId,
        config: MeshConfig,
        factory: Arc<dyn SessionFactory>,
        signaling: Arc<dyn SignalingSink>,
    ) -> (Self, ManagerStreams) {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests) = mpsc::channel(REQUEST_QUEUE);
        let (events_tx, events) = mpsc::unbounded_channel();

        let inner = Inner {
            local_id,
            config,
            factory,
            signaling,
            peers: RwLock::new(HashMap::new()),
            registered: AtomicBool::new(false),
            next_generation: AtomicU64::new(1),
            next_request_id: AtomicU64::new(1),
            session_tx,
            session_rx: Mutex::new(Some(session_rx)),
            requests_tx,
            events_tx,
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            ManagerStreams { requests, events },
        )
    }

    /// Returns the local identity.
    pub fn local_id(&self) -> &PeerId {
        &self.inner.local_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &MeshConfig {
        &self.inner.config
    }

    /// Whether the local identity has been announced.
    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::SeqCst)
    }

    /// Announces the local identity to the rendezvous service and starts
    /// processing session events. Call when the signaling transport opens.
    pub async fn register(&self) -> SyncResult<()> {
        if let Some(rx) = self.inner.session_rx.lock().await.take() {
            tokio::spawn(pump_session_events(Arc::downgrade(&self.inner), rx));
        }

        self.inner
            .signaling
            .send(SignalMessage::Register {
                id: self.inner.local_id.clone(),
            })
            .await?;
        self.inner.registered.store(true, Ordering::SeqCst);
        info!("registered as {}", self.inner.local_id);
        Ok(())
    }

    /// Dispatches one inbound signaling message.
    pub async fn handle_signal(&self, message: SignalMessage) -> SyncResult<()> {
        self.ensure_registered()?;

        match message {
            SignalMessage::Register { id } => {
                if id == self.inner.local_id {
                    debug!("ignoring our own register");
                    return Ok(());
                }
                self.start_offer(id).await
            }
            SignalMessage::PeerDisconnected { id } => {
                self.remove_peer(&id).await;
                Ok(())
            }
            SignalMessage::Offer { id, sdp } => self.accept_offer(id, &sdp).await,
            SignalMessage::Answer { id, sdp } => self.apply_answer(&id, &sdp).await,
            SignalMessage::Candidate { id, candidate } => {
                let session = self.session_of(&id).await;
                match session {
                    Some((_, session)) => session.add_candidate(&candidate).await,
                    None => {
                        debug!("ignoring candidate for unknown peer {id}");
                        Ok(())
                    }
                }
            }
        }
    }

    /// Releases the peer's channel and connection.
    ///
    /// Pending requests to the peer resolve as "peer gone". Returns whether
    /// a connection existed; calling it again is a no-op.
    pub async fn remove_peer(&self, peer: &PeerId) -> bool {
        let removed = self.inner.peers.write().await.remove(peer);
        match removed {
            Some(conn) => {
                info!("removed peer {peer} (was {})", conn.state);
                drop(conn);
                let _ = self
                    .inner
                    .events_tx
                    .send(ConnectionEvent::Closed(peer.clone()));
                true
            }
            None => {
                debug!("remove_peer: {peer} already gone");
                false
            }
        }
    }

    /// Current state of the connection to `peer`; `Closed` if there is none.
    pub async fn peer_state(&self, peer: &PeerId) -> NegotiationState {
        self.inner
            .peers
            .read()
            .await
            .get(peer)
            .map_or(NegotiationState::Closed, |c| c.state)
    }

    /// Every peer with a live connection record, in any state.
    pub async fn known_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.peers.read().await.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Peers whose channel is open.
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .inner
            .peers
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.state == NegotiationState::Connected)
            .map(|(id, _)| id.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Number of requests to `peer` still waiting for a reply.
    pub async fn pending_requests(&self, peer: &PeerId) -> usize {
        self.inner
            .peers
            .read()
            .await
            .get(peer)
            .and_then(|c| c.channel.as_ref())
            .map_or(0, |ch| ch.pending_len())
    }

    // ── Negotiation steps ────────────────────────────────────────

    async fn start_offer(&self, peer: PeerId) -> SyncResult<()> {
        let (generation, session) = self.install(&peer).await?;

        let sdp = match session.create_offer().await {
            Ok(sdp) => sdp,
            Err(e) => return Err(self.fail(&peer, generation, e).await),
        };
        if !self
            .advance(&peer, generation, NegotiationStep::OfferSent)
            .await
        {
            debug!("offer to {peer} superseded");
            return Ok(());
        }
        self.inner
            .signaling
            .send(SignalMessage::Offer {
                id: peer.clone(),
                sdp,
            })
            .await?;
        info!("sent offer to {peer}");
        Ok(())
    }

    async fn accept_offer(&self, peer: PeerId, sdp: &str) -> SyncResult<()> {
        let (generation, session) = match self.negotiating_session(&peer).await {
            Some(existing) => existing,
            None => self.install(&peer).await?,
        };
        self.advance(&peer, generation, NegotiationStep::OfferReceived)
            .await;

        let answer = match session.accept_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => return Err(self.fail(&peer, generation, e).await),
        };
        if !self
            .advance(&peer, generation, NegotiationStep::AnswerSent)
            .await
            && !self.is_current(&peer, generation).await
        {
            debug!("answer to {peer} superseded");
            return Ok(());
        }
        self.inner
            .signaling
            .send(SignalMessage::Answer {
                id: peer.clone(),
                sdp: answer,
            })
            .await?;
        info!("sent answer to {peer}");
        Ok(())
    }

    async fn apply_answer(&self, peer: &PeerId, sdp: &str) -> SyncResult<()> {
        let Some((generation, session)) = self.session_of(peer).await else {
            return Err(SyncError::UnknownPeer(peer.to_string()));
        };
        if let Err(e) = session.apply_answer(sdp).await {
            return Err(self.fail(peer, generation, e).await);
        }
        debug!("applied answer from {peer}");
        Ok(())
    }

    /// Creates a fresh connection for `peer`, replacing any existing one.
    async fn install(&self, peer: &PeerId) -> SyncResult<(u64, Arc<dyn PeerSession>)> {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let events = SessionEvents::new(peer.clone(), generation, self.inner.session_tx.clone());
        let session = self.inner.factory.create_session(peer, events)?;

        let mut conn = Connection::new(generation, session.clone());
        conn.watchdog = Some(self.spawn_watchdog(peer.clone(), generation));

        let replaced = self.inner.peers.write().await.insert(peer.clone(), conn);
        if let Some(old) = replaced {
            warn!(
                "restarting negotiation with {peer} (was {}, generation {})",
                old.state, old.generation
            );
            drop(old);
            let _ = self
                .inner
                .events_tx
                .send(ConnectionEvent::Closed(peer.clone()));
        }
        Ok((generation, session))
    }

    /// Moves a pending connection to `step`. Returns false if the connection
    /// was replaced, removed or already connected.
    async fn advance(&self, peer: &PeerId, generation: u64, step: NegotiationStep) -> bool {
        let mut peers = self.inner.peers.write().await;
        match peers.get_mut(peer) {
            Some(conn) if conn.generation == generation && conn.state.is_pending() => {
                conn.state = NegotiationState::Negotiating(step);
                true
            }
            _ => false,
        }
    }

    async fn is_current(&self, peer: &PeerId, generation: u64) -> bool {
        self.inner
            .peers
            .read()
            .await
            .get(peer)
            .is_some_and(|c| c.generation == generation)
    }

    async fn session_of(&self, peer: &PeerId) -> Option<(u64, Arc<dyn PeerSession>)> {
        self.inner
            .peers
            .read()
            .await
            .get(peer)
            .map(|c| (c.generation, c.session.clone()))
    }

    /// The session of a connection that has not reached `Connected`. An
    /// offer for a connected peer starts a fresh negotiation instead.
    async fn negotiating_session(&self, peer: &PeerId) -> Option<(u64, Arc<dyn PeerSession>)> {
        self.inner
            .peers
            .read()
            .await
            .get(peer)
            .filter(|c| c.state.is_pending())
            .map(|c| (c.generation, c.session.clone()))
    }

    /// Closes a connection whose negotiation step failed and reports it.
    async fn fail(&self, peer: &PeerId, generation: u64, error: SyncError) -> SyncError {
        let removed = {
            let mut peers = self.inner.peers.write().await;
            if peers.get(peer).is_some_and(|c| c.generation == generation) {
                peers.remove(peer)
            } else {
                None
            }
        };
        if removed.is_some() {
            warn!("negotiation with {peer} failed: {error}");
            drop(removed);
            let _ = self.inner.events_tx.send(ConnectionEvent::NegotiationFailed {
                peer: peer.clone(),
                reason: error.to_string(),
            });
        }
        error
    }

    fn spawn_watchdog(&self, peer: PeerId, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.config.negotiation_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };

            let mut peers = inner.peers.write().await;
            let stalled = peers
                .get(&peer)
                .is_some_and(|c| c.generation == generation && c.state.is_pending());
            if !stalled {
                return;
            }
            if let Some(mut conn) = peers.remove(&peer) {
                warn!(
                    "negotiation with {peer} stalled in {} after {timeout:?}",
                    conn.state
                );
                conn.detach_tasks();
            }
            drop(peers);
            let _ = inner
                .events_tx
                .send(ConnectionEvent::NegotiationStalled(peer));
        })
    }

    fn ensure_registered(&self) -> SyncResult<()> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(SyncError::NotInitialized(
                "local identity not registered".to_string(),
            ))
        }
    }

    // ── Session events ───────────────────────────────────────────

    async fn on_session_event(&self, peer: PeerId, generation: u64, event: SessionEvent) {
        match event {
            SessionEvent::LocalCandidate(candidate) => {
                if !self.is_current(&peer, generation).await {
                    return;
                }
                let message = SignalMessage::Candidate {
                    id: peer.clone(),
                    candidate,
                };
                if let Err(e) = self.inner.signaling.send(message).await {
                    warn!("failed to send candidate to {peer}: {e}");
                }
            }
            SessionEvent::ChannelOpen(link) => {
                let mut peers = self.inner.peers.write().await;
                let Some(conn) = peers
                    .get_mut(&peer)
                    .filter(|c| c.generation == generation)
                else {
                    debug!("discarding channel from superseded negotiation with {peer}");
                    return;
                };

                let events = SessionEvents::new(
                    peer.clone(),
                    generation,
                    self.inner.session_tx.clone(),
                );
                conn.channel = Some(Channel::open(
                    peer.clone(),
                    link,
                    self.inner.requests_tx.clone(),
                    move || events.channel_closed(),
                ));
                conn.state = NegotiationState::Connected;
                if let Some(watchdog) = conn.watchdog.take() {
                    watchdog.abort();
                }
                drop(peers);

                info!("channel open with {peer}");
                let _ = self.inner.events_tx.send(ConnectionEvent::Connected(peer));
            }
            SessionEvent::ChannelClosed => {
                if self.is_current(&peer, generation).await {
                    info!("channel with {peer} closed");
                    self.remove_peer(&peer).await;
                }
            }
        }
    }
}

async fn pump_session_events(weak: Weak<Inner>, mut rx: SessionEventRx) {
    while let Some((peer, generation, event)) = rx.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        ConnectionManager { inner }
            .on_session_event(peer, generation, event)
            .await;
    }
    debug!("session event pump stopped");
}

#[async_trait]
impl ChannelTransport for ConnectionManager {
    async fn request(&self, peer: &PeerId, message: PeerMessage) -> SyncResult<PeerMessage> {
        self.ensure_registered()?;

        let pending = {
            let peers = self.inner.peers.read().await;
            let channel = peers
                .get(peer)
                .and_then(|c| c.channel.as_ref())
                .ok_or_else(|| SyncError::PeerUnreachable(peer.to_string()))?;
            let id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
            debug!("request {id} ({}) to {peer}", message.kind());
            channel.send_request(id, message)?
        };
        pending.wait().await
    }
}
