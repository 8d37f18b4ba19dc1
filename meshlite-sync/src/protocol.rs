//! Messages exchanged between replicas over peer channels.
//!
//! Every message travels inside a [`crate::ChannelEnvelope`] that carries
//! the correlation id; the variants here are only the application payload.

use meshlite_types::LogEntry;
use serde::{Deserialize, Serialize};

/// An application payload on a peer channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerMessage {
    /// A write awaiting quorum approval.
    Propose { statement: String },

    /// Vote in favour of a proposal.
    Accept,

    /// Vote against a proposal.
    Reject { reason: String },

    /// Ask for the peer's full operation log.
    LogRequest,

    /// The peer's full operation log, in order.
    Log { entries: Vec<LogEntry> },

    /// Ask for the peer's engine snapshot.
    SnapshotRequest,

    /// An opaque engine snapshot.
    Snapshot { data: Vec<u8> },

    /// Error reply.
    Error(ErrorMessage),
}

impl PeerMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Propose { .. } => "propose",
            Self::Accept => "accept",
            Self::Reject { .. } => "reject",
            Self::LogRequest => "log_request",
            Self::Log { .. } => "log",
            Self::SnapshotRequest => "snapshot_request",
            Self::Snapshot { .. } => "snapshot",
            Self::Error(_) => "error",
        }
    }
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorMessage {
    /// Creates a new error message.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The request kind is not served by this replica.
    pub fn unsupported(kind: &str) -> Self {
        Self::new(1, format!("unsupported request: {kind}"))
    }

    /// The local store failed while serving the request.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(2, msg)
    }

    /// Internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(99, msg)
    }
}
