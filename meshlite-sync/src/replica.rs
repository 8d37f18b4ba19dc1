//! Replica orchestration.
//!
//! A replica owns one connection manager, one log store and a quorum gate
//! over the manager's channels. Writes go through the gate first and are
//! applied locally only once a majority has accepted them; peers pick them
//! up later by pulling our log.

use crate::channel::IncomingRequest;
use crate::config::MeshConfig;
use crate::error::{SyncError, SyncResult};
use crate::manager::ConnectionManager;
use crate::protocol::{ErrorMessage, PeerMessage};
use crate::quorum::{QuorumGate, Tally};
use crate::transport::ChannelTransport;
use meshlite_storage::{ExecutionEngine, LogStore, SqliteEngine, SyncReport, Value};
use meshlite_types::{LogEntry, PeerId};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of syncing with every connected peer.
#[derive(Debug, Default)]
pub struct SyncRound {
    pub synced: Vec<(PeerId, SyncReport)>,
    pub failed: Vec<(PeerId, String)>,
}

impl SyncRound {
    /// Total entries replayed this round.
    pub fn replayed(&self) -> usize {
        self.synced.iter().map(|(_, r)| r.replayed).sum()
    }
}

/// One running instance of the shared dataset.
pub struct Replica<E: ExecutionEngine + Send + 'static = SqliteEngine> {
    manager: ConnectionManager,
    store: Arc<Mutex<LogStore<E>>>,
    gate: QuorumGate,
    config: MeshConfig,
}

impl<E: ExecutionEngine + Send + 'static> Clone for Replica<E> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            store: self.store.clone(),
            gate: self.gate.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: ExecutionEngine + Send + 'static> Replica<E> {
    /// Builds a replica over a manager and a store. The gate uses the
    /// manager's configured quorum timeout.
    pub fn new(manager: ConnectionManager, store: LogStore<E>) -> Self {
        let config = manager.config().clone();
        let gate = QuorumGate::new(Arc::new(manager.clone()), config.quorum_timeout);
        Self {
            manager,
            store: Arc::new(Mutex::new(store)),
            gate,
            config,
        }
    }

    /// Replaces the quorum gate (for example to route votes elsewhere).
    pub fn with_gate(mut self, gate: QuorumGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn id(&self) -> &PeerId {
        self.manager.local_id()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Shared handle to the log store.
    pub fn store(&self) -> Arc<Mutex<LogStore<E>>> {
        self.store.clone()
    }

    /// Proposes `statement` to every known peer and applies it locally
    /// only on a strict majority.
    ///
    /// Fails with [`SyncError::NoQuorum`] without touching the store when
    /// the majority is not reached. Peers still negotiating count as
    /// non-acknowledgements.
    pub async fn write(&self, statement: &str) -> SyncResult<Vec<Vec<Value>>> {
        let peers = self.manager.known_peers().await;
        let proposal = PeerMessage::Propose {
            statement: statement.to_string(),
        };
        let store = self.store.clone();

        let commit = self
            .gate
            .propose_and_commit(&peers, proposal, move |_| async move {
                let mut store = store.lock().await;
                store.exec(statement).map_err(SyncError::from)
            })
            .await?;
        debug!("write committed with {} acks", commit.tally.acks());
        Ok(commit.value)
    }

    /// Collects votes for `statement` without applying it.
    pub async fn poll(&self, statement: &str) -> Tally {
        let peers = self.manager.known_peers().await;
        let proposal = PeerMessage::Propose {
            statement: statement.to_string(),
        };
        self.gate.collect(&peers, &proposal).await
    }

    /// Runs a read locally, bypassing the gate. Writes are refused with
    /// [`meshlite_storage::StorageError::NotReadOnly`]; they must go through
    /// [`Replica::write`].
    pub async fn query(&self, statement: &str) -> SyncResult<Vec<Vec<Value>>> {
        Ok(self.store.lock().await.query(statement)?)
    }

    /// Copy of the local log.
    pub async fn export_log(&self) -> Vec<LogEntry> {
        self.store.lock().await.export_log()
    }

    /// Pulls `peer`'s log and replays the suffix we have not seen.
    pub async fn sync_with_peer(&self, peer: &PeerId) -> SyncResult<SyncReport> {
        let reply = self
            .manager
            .request_with_timeout(peer, PeerMessage::LogRequest, self.config.request_timeout)
            .await?;

        let entries = match reply {
            PeerMessage::Log { entries } => entries,
            PeerMessage::Error(e) => {
                return Err(SyncError::Protocol(format!(
                    "{peer} refused log request: {}",
                    e.message
                )));
            }
            other => {
                return Err(SyncError::Protocol(format!(
                    "expected log from {peer}, got {}",
                    other.kind()
                )));
            }
        };

        let report = self.store.lock().await.sync_with(&entries)?;
        if report.replayed > 0 {
            info!("synced {} entries from {peer}", report.replayed);
        }
        Ok(report)
    }

    /// Syncs with every connected peer in turn. A failing peer is recorded
    /// and skipped.
    pub async fn sync_with_all(&self) -> SyncRound {
        let mut round = SyncRound::default();
        for peer in self.manager.connected_peers().await {
            match self.sync_with_peer(&peer).await {
                Ok(report) => round.synced.push((peer, report)),
                Err(e) => {
                    warn!("sync with {peer} failed: {e}");
                    round.failed.push((peer, e.to_string()));
                }
            }
        }
        round
    }

    /// Replaces the local dataset with `peer`'s snapshot. The local log is
    /// left as it is.
    pub async fn restore_from_peer(&self, peer: &PeerId) -> SyncResult<()> {
        let reply = self
            .manager
            .request_with_timeout(
                peer,
                PeerMessage::SnapshotRequest,
                self.config.request_timeout,
            )
            .await?;

        match reply {
            PeerMessage::Snapshot { data } => {
                self.store.lock().await.snapshot_import(&data)?;
                info!("restored {} byte snapshot from {peer}", data.len());
                Ok(())
            }
            other => Err(SyncError::Protocol(format!(
                "expected snapshot from {peer}, got {}",
                other.kind()
            ))),
        }
    }

    /// Answers one request from a peer. Requests still queued when their
    /// peer was removed are dropped unanswered.
    pub async fn handle_request(&self, request: IncomingRequest) {
        if request.is_stale() {
            debug!(
                "dropping {} from removed peer {}",
                request.message.kind(),
                request.peer_id
            );
            return;
        }
        let IncomingRequest {
            peer_id,
            message,
            responder,
        } = request;
        let kind = message.kind();

        let reply = match message {
            PeerMessage::Propose { statement } => {
                if statement.trim().is_empty() {
                    PeerMessage::Reject {
                        reason: "empty statement".to_string(),
                    }
                } else {
                    PeerMessage::Accept
                }
            }
            PeerMessage::LogRequest => PeerMessage::Log {
                entries: self.export_log().await,
            },
            PeerMessage::SnapshotRequest => match self.store.lock().await.snapshot_export() {
                Ok(data) => PeerMessage::Snapshot { data },
                Err(e) => PeerMessage::Error(ErrorMessage::storage(e.to_string())),
            },
            other => PeerMessage::Error(ErrorMessage::unsupported(other.kind())),
        };

        debug!("answering {kind} from {peer_id} with {}", reply.kind());
        if let Err(e) = responder.respond(reply) {
            warn!("could not answer {kind} from {peer_id}: {e}");
        }
    }

    /// Answers requests until the queue closes.
    pub async fn serve(&self, mut requests: mpsc::Receiver<IncomingRequest>) {
        while let Some(request) = requests.recv().await {
            self.handle_request(request).await;
        }
        debug!("request queue closed");
    }

    /// Spawns [`Replica::serve`] on the runtime.
    pub fn spawn_serve(&self, requests: mpsc::Receiver<IncomingRequest>) -> JoinHandle<()> {
        let replica = self.clone();
        tokio::spawn(async move { replica.serve(requests).await })
    }

    /// Spawns periodic [`Replica::sync_with_all`] when a sync interval is
    /// configured.
    pub fn spawn_anti_entropy(&self) -> Option<JoinHandle<()>> {
        let period = self.config.sync_interval?;
        let replica = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let round = replica.sync_with_all().await;
                if round.replayed() > 0 || !round.failed.is_empty() {
                    debug!(
                        "anti-entropy round: {} replayed, {} failed",
                        round.replayed(),
                        round.failed.len()
                    );
                }
            }
        }))
    }
}
