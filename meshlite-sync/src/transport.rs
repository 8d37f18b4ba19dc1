//! Channel transport abstraction.
//!
//! The quorum gate and the replica talk to peers only through this trait,
//! so they work the same over live channels and over test doubles.

use crate::error::{SyncError, SyncResult};
use crate::protocol::PeerMessage;
use async_trait::async_trait;
use meshlite_types::PeerId;
use std::time::Duration;

/// Request/response delivery to a named peer.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Sends a request and resolves with the reply correlated to it.
    ///
    /// Fails with [`SyncError::PeerUnreachable`] when no channel exists and
    /// with [`SyncError::PeerGone`] when the peer departs before replying.
    async fn request(&self, peer: &PeerId, message: PeerMessage) -> SyncResult<PeerMessage>;

    /// [`ChannelTransport::request`] bounded by a deadline.
    async fn request_with_timeout(
        &self,
        peer: &PeerId,
        message: PeerMessage,
        timeout: Duration,
    ) -> SyncResult<PeerMessage> {
        match tokio::time::timeout(timeout, self.request(peer, message)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }
}
