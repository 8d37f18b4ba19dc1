//! Shared harness: replicas wired through an in-memory rendezvous hub and
//! loopback sessions.

#![allow(dead_code)]

use meshlite_sync::mock::{LoopbackNetwork, RendezvousHub};
use meshlite_sync::signaling::run_signaling_channel;
use meshlite_sync::{
    ConnectionEvent, ConnectionManager, IncomingRequest, MeshConfig, SyncResult,
};
use meshlite_types::PeerId;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Mesh {
    pub hub: RendezvousHub,
    pub network: LoopbackNetwork,
}

pub struct Node {
    pub id: PeerId,
    pub manager: ConnectionManager,
    pub requests: Option<mpsc::Receiver<IncomingRequest>>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    pub signaling: JoinHandle<SyncResult<()>>,
}

impl Mesh {
    pub fn new() -> Self {
        init_tracing();
        Self {
            hub: RendezvousHub::new(),
            network: LoopbackNetwork::new(),
        }
    }

    /// Connects a replica to the hub and waits until it has registered.
    ///
    /// Joining one at a time means only the earlier replica offers.
    pub async fn join(&self, id: &str, config: MeshConfig) -> Node {
        let id = PeerId::new(id);
        let (sink, inbox) = self.hub.connect(id.clone());
        let (manager, streams) =
            ConnectionManager::new(id.clone(), config, self.network.factory(id.clone()), sink);

        let runner = manager.clone();
        let signaling =
            tokio::spawn(async move { run_signaling_channel(&runner, inbox).await });

        eventually(|| {
            let manager = manager.clone();
            async move { manager.is_registered() }
        })
        .await;

        Node {
            id,
            manager,
            requests: Some(streams.requests),
            events: streams.events,
            signaling,
        }
    }
}

impl Node {
    /// Waits for the next event matching `pred`, skipping others.
    pub async fn wait_for(&mut self, pred: impl Fn(&ConnectionEvent) -> bool) -> ConnectionEvent {
        let events = &mut self.events;
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                match events.recv().await {
                    Some(event) if pred(&event) => return event,
                    Some(_) => continue,
                    None => panic!("event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for connection event")
    }

    /// Waits until `count` peers are connected.
    pub async fn wait_connected(&self, count: usize) {
        let manager = self.manager.clone();
        eventually(move || {
            let manager = manager.clone();
            async move { manager.connected_peers().await.len() == count }
        })
        .await;
    }
}

/// Polls `check` until it returns true, failing after a few seconds.
pub async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
