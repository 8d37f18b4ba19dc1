//! Core type definitions for meshlite.
//!
//! This crate defines the small set of types shared by every replica:
//! - Peer identifiers assigned by the rendezvous service
//! - Operation log entries and their kinds
//!
//! The relational engine and the network layers live in their own crates.

mod ids;
mod log_entry;

pub use ids::PeerId;
pub use log_entry::{LogEntry, OperationKind};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
}
