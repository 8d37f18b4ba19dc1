//! Advisory quorum gate.
//!
//! A proposal is sent to every given peer at once and counts as committed
//! when strictly more than half accept before the deadline. Peers that fail,
//! reject or stay silent count against it; none of them can hold the
//! decision past the deadline.
//!
//! This is a majority check, not consensus. There is no term, no log index
//! and nothing is persisted. Two sides of a partition that each see a
//! majority of the peers they know about can both commit. Use it to admit
//! writes, never to order them safely.

use crate::error::{SyncError, SyncResult};
use crate::protocol::PeerMessage;
use crate::transport::ChannelTransport;
use futures::future::join_all;
use meshlite_types::PeerId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One peer's answer to a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    Accepted,
    Rejected(String),
    /// The request failed: no channel, peer gone, transport error.
    Unreachable(String),
    /// No reply before the deadline.
    TimedOut,
}

impl Vote {
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Per-peer outcome of one proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub votes: Vec<(PeerId, Vote)>,
}

impl Tally {
    /// Number of acknowledgements.
    pub fn acks(&self) -> usize {
        self.votes.iter().filter(|(_, v)| v.is_ack()).count()
    }

    /// Number of peers asked.
    pub fn total(&self) -> usize {
        self.votes.len()
    }

    /// Acknowledgements needed for a strict majority.
    pub fn required(&self) -> usize {
        self.total() / 2 + 1
    }

    /// `acks > total / 2`. An empty peer set never has a quorum.
    pub fn has_quorum(&self) -> bool {
        self.acks() * 2 > self.total()
    }

    /// The vote of `peer`, if it was asked.
    pub fn vote_of(&self, peer: &PeerId) -> Option<&Vote> {
        self.votes.iter().find(|(p, _)| p == peer).map(|(_, v)| v)
    }
}

/// A committed proposal.
#[derive(Debug)]
pub struct Commit<T> {
    /// What the commit callback produced.
    pub value: T,
    /// How the peers voted.
    pub tally: Tally,
}

/// Majority gate over a channel transport.
#[derive(Clone)]
pub struct QuorumGate {
    transport: Arc<dyn ChannelTransport>,
    timeout: Duration,
}

impl QuorumGate {
    pub fn new(transport: Arc<dyn ChannelTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// The deadline for collecting votes.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `proposal` to every peer concurrently and records each outcome.
    ///
    /// Returns once every peer has answered or the deadline has passed.
    pub async fn collect(&self, peers: &[PeerId], proposal: &PeerMessage) -> Tally {
        let requests = peers.iter().map(|peer| {
            let transport = self.transport.clone();
            let message = proposal.clone();
            async move {
                let vote = match tokio::time::timeout(
                    self.timeout,
                    transport.request(peer, message),
                )
                .await
                {
                    Ok(Ok(PeerMessage::Accept)) => Vote::Accepted,
                    Ok(Ok(PeerMessage::Reject { reason })) => Vote::Rejected(reason),
                    Ok(Ok(other)) => Vote::Rejected(format!("unexpected reply: {}", other.kind())),
                    Ok(Err(e)) => Vote::Unreachable(e.to_string()),
                    Err(_) => Vote::TimedOut,
                };
                debug!("vote from {peer}: {vote:?}");
                (peer.clone(), vote)
            }
        });

        Tally {
            votes: join_all(requests).await,
        }
    }

    /// Proposes `proposal` and runs `on_commit` only if a strict majority of
    /// `peers` accepts.
    ///
    /// Fails with [`SyncError::NoQuorum`] otherwise; `on_commit` is not
    /// called in that case.
    pub async fn propose_and_commit<F, Fut, T>(
        &self,
        peers: &[PeerId],
        proposal: PeerMessage,
        on_commit: F,
    ) -> SyncResult<Commit<T>>
    where
        F: FnOnce(PeerMessage) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let tally = self.collect(peers, &proposal).await;

        if !tally.has_quorum() {
            warn!(
                "no quorum for {}: {} of {} acknowledged",
                proposal.kind(),
                tally.acks(),
                tally.total()
            );
            return Err(SyncError::NoQuorum {
                acks: tally.acks(),
                required: tally.required(),
                total: tally.total(),
            });
        }

        info!(
            "quorum reached for {}: {} of {}",
            proposal.kind(),
            tally.acks(),
            tally.total()
        );
        let value = on_commit(proposal).await?;
        Ok(Commit { value, tally })
    }
}
