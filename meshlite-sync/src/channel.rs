//! Request/response correlation over one peer channel.
//!
//! Requests and replies share the channel with other in-flight traffic, so
//! each request carries a correlation id and each reply echoes it. Pending
//! requests live in a table keyed by id; a reply resolves exactly the entry
//! it names. Tearing the channel down drops the table, which resolves every
//! waiter with "peer gone".

use crate::error::{SyncError, SyncResult};
use crate::protocol::PeerMessage;
use meshlite_types::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Frame on a peer channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChannelEnvelope {
    /// A request expecting a reply with the same id.
    Data { id: u64, data: PeerMessage },
    /// The reply to request `id`.
    Reply { id: u64, data: PeerMessage },
}

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<PeerMessage>>>>;

/// An incoming request received on a peer channel.
#[derive(Debug)]
pub struct IncomingRequest {
    /// The peer that sent the request.
    pub peer_id: PeerId,
    /// The request message.
    pub message: PeerMessage,
    /// Sends the reply back on the same channel.
    pub responder: Responder,
}

impl IncomingRequest {
    /// Whether the channel the request arrived on has been torn down.
    pub fn is_stale(&self) -> bool {
        self.responder.is_closed()
    }
}

type Outbound = mpsc::UnboundedSender<String>;

/// Reply handle for one incoming request.
///
/// Holds the channel's outbound side weakly: once the channel is dropped
/// the reply cannot be delivered, and queued requests do not keep the link
/// open.
#[derive(Debug)]
pub struct Responder {
    peer_id: PeerId,
    request_id: u64,
    outbound: Weak<Outbound>,
}

impl Responder {
    /// Correlation id of the request being answered.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Whether the channel is gone.
    pub fn is_closed(&self) -> bool {
        self.outbound.strong_count() == 0
    }

    /// Sends the reply. Fails with [`SyncError::PeerGone`] once the
    /// channel has been removed.
    pub fn respond(self, message: PeerMessage) -> SyncResult<()> {
        let gone = || SyncError::PeerGone(self.peer_id.to_string());
        let outbound = self.outbound.upgrade().ok_or_else(gone)?;
        let frame = serde_json::to_string(&ChannelEnvelope::Reply {
            id: self.request_id,
            data: message,
        })?;
        outbound.send(frame).map_err(|_| gone())
    }
}

/// The usable side of an established channel.
pub(crate) struct Channel {
    peer: PeerId,
    outbound: Arc<Outbound>,
    pending: PendingTable,
    reader: Option<JoinHandle<()>>,
}

impl Channel {
    /// Wraps a link and spawns its reader.
    ///
    /// `on_close` runs once when the remote end closes the link.
    pub(crate) fn open<F>(
        peer: PeerId,
        link: crate::session::ChannelLink,
        requests: mpsc::Sender<IncomingRequest>,
        on_close: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let outbound = Arc::new(link.outbound);
        let reader = tokio::spawn(read_loop(
            peer.clone(),
            link.inbound,
            Arc::downgrade(&outbound),
            pending.clone(),
            requests,
            on_close,
        ));

        Self {
            peer,
            outbound,
            pending,
            reader: Some(reader),
        }
    }

    /// Registers a pending entry under `id` and writes the request.
    pub(crate) fn send_request(&self, id: u64, message: PeerMessage) -> SyncResult<PendingReply> {
        let frame = serde_json::to_string(&ChannelEnvelope::Data { id, data: message })?;
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        if self.outbound.send(frame).is_err() {
            lock(&self.pending).remove(&id);
            return Err(SyncError::PeerGone(self.peer.to_string()));
        }
        Ok(PendingReply {
            id,
            peer: self.peer.clone(),
            rx,
            table: Arc::downgrade(&self.pending),
        })
    }

    pub(crate) fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub(crate) fn detach_reader(&mut self) {
        self.reader.take();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let dropped = {
            let mut pending = lock(&self.pending);
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            debug!("channel to {} closed with {dropped} pending requests", self.peer);
        }
    }
}

/// A registered request waiting for its reply.
///
/// Dropping it unanswered (for example on a timeout) removes the entry
/// from the pending table.
pub(crate) struct PendingReply {
    id: u64,
    peer: PeerId,
    rx: oneshot::Receiver<PeerMessage>,
    table: Weak<Mutex<HashMap<u64, oneshot::Sender<PeerMessage>>>>,
}

impl PendingReply {
    pub(crate) async fn wait(mut self) -> SyncResult<PeerMessage> {
        (&mut self.rx)
            .await
            .map_err(|_| SyncError::PeerGone(self.peer.to_string()))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            lock(&table).remove(&self.id);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_loop<F>(
    peer: PeerId,
    mut inbound: mpsc::UnboundedReceiver<String>,
    outbound: Weak<Outbound>,
    pending: PendingTable,
    requests: mpsc::Sender<IncomingRequest>,
    on_close: F,
) where
    F: FnOnce() + Send + 'static,
{
    while let Some(frame) = inbound.recv().await {
        match serde_json::from_str::<ChannelEnvelope>(&frame) {
            Ok(ChannelEnvelope::Data { id, data }) => {
                let request = IncomingRequest {
                    peer_id: peer.clone(),
                    message: data,
                    responder: Responder {
                        peer_id: peer.clone(),
                        request_id: id,
                        outbound: outbound.clone(),
                    },
                };
                if requests.send(request).await.is_err() {
                    warn!("no request handler; dropping request {id} from {peer}");
                }
            }
            Ok(ChannelEnvelope::Reply { id, data }) => {
                let waiter = lock(&pending).remove(&id);
                match waiter {
                    Some(tx) => {
                        // The requester may have timed out and gone away.
                        let _ = tx.send(data);
                    }
                    None => debug!("reply {id} from {peer} matches no pending request"),
                }
            }
            Err(e) => warn!("dropping malformed frame from {peer}: {e}"),
        }
    }

    debug!("channel to {peer} closed by remote");
    on_close();
}
