//! Event fan-out for external consumers.
//!
//! Downstream collaborators (forging monitors, notification adapters)
//! subscribe to broadcast channels instead of holding references into the
//! registry or resolver. One channel per event family.

use tokio::sync::broadcast;

use argus_client::types::{NodeStatus, PeerInfo};
pub use argus_observer::ChainEvent;

use crate::constants::EVENT_CHANNEL_CAPACITY;

/// Per-peer observations emitted by the registry.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A peer delivered a fresh status sample.
    StatusUpdated {
        ip: String,
        nonce: String,
        status: NodeStatus,
    },
    /// A peer refreshed the peer list it gossips.
    PeersUpdated {
        ip: String,
        nonce: String,
        peers: Vec<PeerInfo>,
    },
    /// A peer's height stopped advancing past the liveness threshold.
    NodeStuck { ip: String, nonce: String, height: u64 },
}

/// Owns the broadcast channels the monitor publishes on.
pub struct EventHub {
    peer_tx: broadcast::Sender<PeerEvent>,
    chain_tx: broadcast::Sender<ChainEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (peer_tx, _) = broadcast::channel(capacity);
        let (chain_tx, _) = broadcast::channel(capacity);
        Self { peer_tx, chain_tx }
    }

    pub fn peer_sender(&self) -> broadcast::Sender<PeerEvent> {
        self.peer_tx.clone()
    }

    pub fn chain_sender(&self) -> broadcast::Sender<ChainEvent> {
        self.chain_tx.clone()
    }

    pub fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.peer_tx.subscribe()
    }

    pub fn subscribe_chain_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.chain_tx.subscribe()
    }

    /// Publish a chain event, ignoring the absence of subscribers.
    pub fn publish_chain(&self, event: ChainEvent) {
        let _ = self.chain_tx.send(event);
    }
}
