//! Error types for the sync layer.

use meshlite_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Operation invoked before setup completed.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// No live channel to the peer.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// The peer departed while a request was in flight.
    #[error("peer gone: {0}")]
    PeerGone(String),

    /// A negotiation message named a peer we hold no connection for.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// A proposal failed to reach a strict majority.
    #[error("no quorum: {acks} of {total} acknowledged, {required} required")]
    NoQuorum {
        acks: usize,
        required: usize,
        total: usize,
    },

    /// Negotiation did not complete before the deadline.
    #[error("negotiation stalled: {0}")]
    NegotiationStalled(String),

    /// A negotiation step failed.
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// The signaling transport closed. Fatal to the session.
    #[error("signaling transport closed")]
    TransportClosed,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Protocol error (unexpected or invalid message).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
