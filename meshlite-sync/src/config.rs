//! Replica configuration.

use std::time::Duration;

/// Deadlines and intervals for one replica.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// How long a connection may stay in negotiation before it is closed
    /// and reported as stalled.
    pub negotiation_timeout: Duration,
    /// Deadline for collecting quorum votes.
    pub quorum_timeout: Duration,
    /// Deadline for a single log or snapshot request.
    pub request_timeout: Duration,
    /// Interval for background log sync with every connected peer.
    /// `None` disables it.
    pub sync_interval: Option<Duration>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(30),
            quorum_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            sync_interval: None,
        }
    }
}
