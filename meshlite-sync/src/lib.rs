//! Peer mesh, quorum gate and log synchronization for meshlite.
//!
//! Replicas find each other through a rendezvous service, negotiate a
//! direct channel per peer, gate writes behind a majority acknowledgement
//! and reconcile by replaying each other's operation logs.
//!
//! ## Components
//!
//! - **Signaling**: wire messages exchanged with the rendezvous service
//! - **Session**: the seam to whatever actually builds peer channels
//! - **Manager**: per-peer negotiation state machine and channel ownership
//! - **Channel**: request/response correlation over one peer channel
//! - **Quorum**: advisory majority gate for write admission
//! - **Replica**: ties the above to a [`meshlite_storage::LogStore`]
//!
//! ## Write path
//!
//! 1. `Replica::write` proposes the statement to every known peer
//! 2. Strictly more than half must accept before the deadline
//! 3. Only then is the statement executed and appended locally
//! 4. Peers catch up later through `sync_with_peer`
//!
//! # Example
//!
//! ```
//! use meshlite_sync::mock::{LoopbackNetwork, RendezvousHub};
//! use meshlite_sync::{ConnectionManager, MeshConfig};
//! use meshlite_types::PeerId;
//!
//! let hub = RendezvousHub::new();
//! let network = LoopbackNetwork::new();
//! let id = PeerId::new("alice");
//! let (sink, _inbox) = hub.connect(id.clone());
//! let (manager, _streams) =
//!     ConnectionManager::new(id.clone(), MeshConfig::default(), network.factory(id), sink);
//! assert!(!manager.is_registered());
//! ```

mod channel;
pub mod codec;
mod config;
mod connection;
mod error;
mod manager;
pub mod mock;
pub mod protocol;
mod quorum;
mod replica;
pub mod session;
pub mod signaling;
pub mod transport;

pub use channel::{ChannelEnvelope, IncomingRequest, Responder};
pub use config::MeshConfig;
pub use connection::{NegotiationState, NegotiationStep};
pub use error::{SyncError, SyncResult};
pub use manager::{ConnectionEvent, ConnectionManager, ManagerStreams};
pub use protocol::{ErrorMessage, PeerMessage};
pub use quorum::{Commit, QuorumGate, Tally, Vote};
pub use replica::{Replica, SyncRound};
pub use session::{ChannelLink, PeerSession, SessionEvent, SessionEvents, SessionFactory};
pub use signaling::{IceCandidate, SignalMessage, SignalingSink};
pub use transport::ChannelTransport;
