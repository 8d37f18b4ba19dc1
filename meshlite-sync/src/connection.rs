//! Per-peer connection record.
//!
//! Connections are owned exclusively by the manager's peer map. Dropping a
//! connection closes its session, cancels its negotiation deadline and
//! tears down its channel.

use crate::channel::Channel;
use crate::session::PeerSession;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Where a negotiation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationStep {
    OfferSent,
    OfferReceived,
    AnswerSent,
}

/// Connection lifecycle: `Idle → Negotiating → Connected → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// Created, nothing sent yet.
    Idle,
    Negotiating(NegotiationStep),
    /// Channel open.
    Connected,
    /// No live connection.
    Closed,
}

impl NegotiationState {
    /// Whether the connection has not reached `Connected` yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Idle | Self::Negotiating(_))
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Negotiating(NegotiationStep::OfferSent) => f.write_str("negotiating (offer sent)"),
            Self::Negotiating(NegotiationStep::OfferReceived) => {
                f.write_str("negotiating (offer received)")
            }
            Self::Negotiating(NegotiationStep::AnswerSent) => {
                f.write_str("negotiating (answer sent)")
            }
            Self::Connected => f.write_str("connected"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

pub(crate) struct Connection {
    pub(crate) generation: u64,
    pub(crate) state: NegotiationState,
    pub(crate) session: Arc<dyn PeerSession>,
    pub(crate) channel: Option<Channel>,
    pub(crate) watchdog: Option<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn new(generation: u64, session: Arc<dyn PeerSession>) -> Self {
        Self {
            generation,
            state: NegotiationState::Idle,
            session,
            channel: None,
            watchdog: None,
        }
    }

    /// Detaches the background tasks so that dropping the connection from
    /// inside one of them does not cancel the caller.
    pub(crate) fn detach_tasks(&mut self) {
        self.watchdog.take();
        if let Some(channel) = self.channel.as_mut() {
            channel.detach_reader();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("has_channel", &self.channel.is_some())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.state = NegotiationState::Closed;
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.session.close();
    }
}
