//! Signaling contract with the rendezvous service.
//!
//! Messages are line-delimited JSON objects discriminated by `type`:
//!
//! | type | fields | meaning |
//! |---|---|---|
//! | `register` | `id` | announce identity |
//! | `peer-disconnected` | `id` | peer departed |
//! | `offer` | `id`, `sdp` | negotiation offer |
//! | `answer` | `id`, `sdp` | negotiation answer |
//! | `candidate` | `id`, `candidate` | connectivity hint |
//!
//! Outbound `offer`/`answer`/`candidate` name the target peer in `id`. The
//! service delivers them with `id` rewritten to the sender, so on receipt
//! `id` is always the remote peer.

use crate::codec;
use crate::error::{SyncError, SyncResult};
use crate::manager::ConnectionManager;
use async_trait::async_trait;
use futures::{AsyncBufRead, AsyncWrite};
use meshlite_types::PeerId;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// A signaling wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    Register { id: PeerId },
    PeerDisconnected { id: PeerId },
    Offer { id: PeerId, sdp: String },
    Answer { id: PeerId, sdp: String },
    Candidate { id: PeerId, candidate: IceCandidate },
}

impl SignalMessage {
    /// The peer this message names.
    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::Register { id }
            | Self::PeerDisconnected { id }
            | Self::Offer { id, .. }
            | Self::Answer { id, .. }
            | Self::Candidate { id, .. } => id,
        }
    }

    /// The wire discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::PeerDisconnected { .. } => "peer-disconnected",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
        }
    }
}

/// Connectivity-establishment data for one candidate path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// A candidate with only the candidate line set.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Outbound half of the signaling transport.
#[async_trait]
pub trait SignalingSink: Send + Sync {
    /// Sends one message to the rendezvous service.
    async fn send(&self, message: SignalMessage) -> SyncResult<()>;
}

/// A sink that forwards messages into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SignalMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SignalMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SignalingSink for ChannelSink {
    async fn send(&self, message: SignalMessage) -> SyncResult<()> {
        self.tx
            .send(message)
            .map_err(|_| SyncError::TransportClosed)
    }
}

/// A sink that writes line-delimited JSON to an async writer.
pub struct LineSink<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> SignalingSink for LineSink<W> {
    async fn send(&self, message: SignalMessage) -> SyncResult<()> {
        let mut writer = self.writer.lock().await;
        codec::write_signal(&mut *writer, &message)
            .await
            .map_err(|e| {
                warn!("signaling write failed: {e}");
                SyncError::TransportClosed
            })
    }
}

/// Drives a manager from a line-delimited signaling stream.
///
/// Announces the local identity first, then dispatches every message.
/// Malformed lines and failed negotiation steps are logged and skipped.
/// Returns [`SyncError::TransportClosed`] when the stream ends or fails;
/// there is no reconnection.
pub async fn run_signaling<R>(manager: &ConnectionManager, mut reader: R) -> SyncResult<()>
where
    R: AsyncBufRead + Unpin,
{
    manager.register().await?;

    loop {
        match codec::read_signal(&mut reader).await {
            Ok(Some(message)) => dispatch(manager, message).await,
            Ok(None) => {
                info!("signaling stream ended");
                return Err(SyncError::TransportClosed);
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!("skipping malformed signaling line: {e}");
            }
            Err(e) => {
                warn!("signaling read failed: {e}");
                return Err(SyncError::TransportClosed);
            }
        }
    }
}

/// Drives a manager from an in-process message channel.
pub async fn run_signaling_channel(
    manager: &ConnectionManager,
    mut inbox: mpsc::UnboundedReceiver<SignalMessage>,
) -> SyncResult<()> {
    manager.register().await?;

    while let Some(message) = inbox.recv().await {
        dispatch(manager, message).await;
    }
    info!("signaling channel closed");
    Err(SyncError::TransportClosed)
}

async fn dispatch(manager: &ConnectionManager, message: SignalMessage) {
    let kind = message.kind();
    let peer = message.peer_id().clone();
    match manager.handle_signal(message).await {
        Ok(()) => debug!("handled {kind} for {peer}"),
        Err(e) => warn!("{kind} from {peer} failed: {e}"),
    }
}
