//! The seam between the manager and whatever builds peer channels.
//!
//! A [`PeerSession`] plays the role of a WebRTC peer connection: it produces
//! and consumes session descriptions, takes connectivity candidates and,
//! once connectivity is established, hands over an ordered bidirectional
//! [`ChannelLink`]. Sessions report back asynchronously through the
//! [`SessionEvents`] handle they were created with.

use crate::error::SyncResult;
use crate::signaling::IceCandidate;
use async_trait::async_trait;
use meshlite_types::PeerId;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One negotiation with one remote peer.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Generates a local offer.
    async fn create_offer(&self) -> SyncResult<String>;

    /// Accepts a remote offer and generates the answer.
    async fn accept_offer(&self, sdp: &str) -> SyncResult<String>;

    /// Applies the remote answer to our earlier offer.
    async fn apply_answer(&self, sdp: &str) -> SyncResult<()>;

    /// Applies a remote connectivity candidate.
    async fn add_candidate(&self, candidate: &IceCandidate) -> SyncResult<()>;

    /// Releases the session. Must be idempotent.
    fn close(&self);
}

/// Creates sessions on behalf of the manager.
pub trait SessionFactory: Send + Sync {
    fn create_session(
        &self,
        peer: &PeerId,
        events: SessionEvents,
    ) -> SyncResult<Arc<dyn PeerSession>>;
}

/// Raw message pipe of an established channel.
///
/// Frames are complete JSON texts. Dropping the link closes it; the remote
/// side observes the close as the end of its inbound stream.
#[derive(Debug)]
pub struct ChannelLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl ChannelLink {
    /// Creates two cross-connected links.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: a_tx,
                inbound: b_rx,
            },
            Self {
                outbound: b_tx,
                inbound: a_rx,
            },
        )
    }
}

/// Something a session observed.
#[derive(Debug)]
pub enum SessionEvent {
    /// A local candidate that must reach the remote peer.
    LocalCandidate(IceCandidate),
    /// Connectivity completed and the channel is usable.
    ChannelOpen(ChannelLink),
    /// The underlying transport failed or closed.
    ChannelClosed,
}

/// Routes session events back to the manager, tagged with the negotiation
/// they belong to.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    peer: PeerId,
    generation: u64,
    tx: mpsc::UnboundedSender<(PeerId, u64, SessionEvent)>,
}

impl SessionEvents {
    pub(crate) fn new(
        peer: PeerId,
        generation: u64,
        tx: mpsc::UnboundedSender<(PeerId, u64, SessionEvent)>,
    ) -> Self {
        Self {
            peer,
            generation,
            tx,
        }
    }

    /// The remote peer of the owning session.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Negotiation generation of the owning session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(SessionEvent::LocalCandidate(candidate));
    }

    pub fn channel_open(&self, link: ChannelLink) {
        self.emit(SessionEvent::ChannelOpen(link));
    }

    pub fn channel_closed(&self) {
        self.emit(SessionEvent::ChannelClosed);
    }

    fn emit(&self, event: SessionEvent) {
        // The manager may already be gone; nothing to report to then.
        let _ = self.tx.send((self.peer.clone(), self.generation, event));
    }
}
