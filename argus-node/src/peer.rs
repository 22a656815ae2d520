//! One tracked remote peer: transport, latest status, liveness diagnosis.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use argus_client::client::NodeClient;
use argus_client::types::{NodeStatus, PeerInfo};

use crate::events::PeerEvent;

/// Outbound transport state towards the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Online,
    Offline,
}

/// What the monitor knows about a peer's address and identity.
///
/// The nonce is the stable key: a node reporting a different nonce is a
/// different peer, even on the same address.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    pub ip: String,
    pub ws_port: u16,
    pub http_port: Option<u16>,
    pub nonce: String,
    pub version: String,
}

/// Wraps one remote node: keeps its latest status sample fresh and decides
/// whether the node is sane (not stuck).
pub struct PeerConnection {
    identity: PeerIdentity,
    client: Arc<dyn NodeClient>,
    state: PeerState,
    status: Option<NodeStatus>,
    stuck: bool,
    last_height_update: Instant,
    stuck_threshold: Duration,
    http_capable: bool,
    http_probed: bool,
    known_by: u32,
    inbound_connected: bool,
    provisional_key: bool,
    peer_list: Vec<PeerInfo>,
    events: broadcast::Sender<PeerEvent>,
}

impl PeerConnection {
    pub fn new(
        identity: PeerIdentity,
        client: Arc<dyn NodeClient>,
        stuck_threshold: Duration,
        events: broadcast::Sender<PeerEvent>,
    ) -> Self {
        let provisional_key = identity.nonce.is_empty();
        Self {
            identity,
            client,
            state: PeerState::Offline,
            status: None,
            stuck: false,
            last_height_update: Instant::now(),
            stuck_threshold,
            http_capable: false,
            http_probed: false,
            known_by: 0,
            inbound_connected: false,
            provisional_key,
            peer_list: Vec::new(),
            events,
        }
    }

    /// Handle a new status sample received from the peer.
    ///
    /// A strict height increase resets the liveness timer and clears the
    /// stuck flag. Once the timer exceeds the threshold without an increase
    /// the peer is flagged stuck exactly once. The sample is always merged
    /// into the stored status so partial updates never erase known fields.
    pub fn update_status(&mut self, sample: NodeStatus) {
        let advanced = self
            .status
            .as_ref()
            .map_or(true, |prev| sample.height > prev.height);

        let mut became_stuck = false;
        if advanced {
            self.last_height_update = Instant::now();
            self.stuck = false;
        } else if !self.stuck && self.last_height_update.elapsed() >= self.stuck_threshold {
            self.stuck = true;
            became_stuck = true;
        }

        if let Some(stored) = self.status.as_mut() {
            stored.merge_from(&sample);
        } else {
            self.status = Some(sample.clone());
        }
        // The nonce a node reports about itself is authoritative.
        if !sample.nonce.is_empty() {
            self.identity.nonce = sample.nonce;
        }

        if became_stuck {
            log::warn!(
                "peer {} ({}) stuck at height {}",
                self.identity.nonce,
                self.identity.ip,
                self.status.as_ref().map_or(0, |s| s.height)
            );
            let _ = self.events.send(PeerEvent::NodeStuck {
                ip: self.identity.ip.clone(),
                nonce: self.identity.nonce.clone(),
                height: self.status.as_ref().map_or(0, |s| s.height),
            });
        }

        if let Some(status) = &self.status {
            let _ = self.events.send(PeerEvent::StatusUpdated {
                ip: self.identity.ip.clone(),
                nonce: self.identity.nonce.clone(),
                status: status.clone(),
            });
        }
    }

    /// Store the peer list this peer most recently gossiped.
    pub fn set_peer_list(&mut self, peers: Vec<PeerInfo>) {
        self.peer_list = peers;
        let _ = self.events.send(PeerEvent::PeersUpdated {
            ip: self.identity.ip.clone(),
            nonce: self.identity.nonce.clone(),
            peers: self.peer_list.clone(),
        });
    }

    /// Record whether the peer currently holds an inbound connection to us.
    /// Independent of our outbound transport state; the two can disagree
    /// transiently.
    pub fn set_inbound_connected(&mut self, connected: bool) {
        self.inbound_connected = connected;
    }

    pub fn set_state(&mut self, state: PeerState) {
        if state != self.state {
            match state {
                PeerState::Online => log::debug!(
                    "connected to {}:{}",
                    self.identity.ip,
                    self.identity.ws_port
                ),
                PeerState::Offline => log::debug!(
                    "disconnected from {}:{}",
                    self.identity.ip,
                    self.identity.ws_port
                ),
            }
        }
        self.state = state;
    }

    pub fn set_http_capable(&mut self, capable: bool) {
        self.http_capable = capable;
        self.http_probed = true;
    }

    pub fn set_known_by(&mut self, count: u32) {
        self.known_by = count;
    }

    pub(crate) fn clear_provisional_key(&mut self) {
        self.provisional_key = false;
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn client(&self) -> Arc<dyn NodeClient> {
        self.client.clone()
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn status(&self) -> Option<&NodeStatus> {
        self.status.as_ref()
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }

    pub fn http_capable(&self) -> bool {
        self.http_capable
    }

    pub fn http_probed(&self) -> bool {
        self.http_probed
    }

    pub fn known_by(&self) -> u32 {
        self.known_by
    }

    pub fn inbound_connected(&self) -> bool {
        self.inbound_connected
    }

    pub fn has_provisional_key(&self) -> bool {
        self.provisional_key
    }

    pub fn peer_list(&self) -> &[PeerInfo] {
        &self.peer_list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use argus_client::types::Block;

    struct NullClient;

    #[async_trait]
    impl NodeClient for NullClient {
        async fn get_status(&self) -> anyhow::Result<NodeStatus> {
            Err(anyhow!("unused"))
        }

        async fn get_peer_list(&self) -> anyhow::Result<Vec<PeerInfo>> {
            Err(anyhow!("unused"))
        }

        async fn get_recent_blocks(&self, _limit: u32) -> anyhow::Result<Vec<Block>> {
            Err(anyhow!("unused"))
        }

        async fn probe_http(&self) -> bool {
            false
        }
    }

    fn connection(events: broadcast::Sender<PeerEvent>) -> PeerConnection {
        PeerConnection::new(
            PeerIdentity {
                ip: "10.0.0.1".to_string(),
                ws_port: 7001,
                http_port: Some(7000),
                nonce: "peer-1".to_string(),
                version: "1.0.0".to_string(),
            },
            Arc::new(NullClient),
            Duration::from_secs(20),
            events,
        )
    }

    fn status(height: u64) -> NodeStatus {
        NodeStatus {
            success: true,
            height,
            broadhash: "aa".to_string(),
            nonce: "peer-1".to_string(),
            http_port: Some(7000),
            version: "1.0.0".to_string(),
            os: "linux".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_after_threshold_without_height_increase() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut peer = connection(tx);

        peer.update_status(status(100));
        assert!(!peer.is_stuck());

        // Below the threshold: same height is tolerated.
        tokio::time::advance(Duration::from_secs(10)).await;
        peer.update_status(status(100));
        assert!(!peer.is_stuck());

        // Past the threshold the peer is flagged exactly once.
        tokio::time::advance(Duration::from_secs(11)).await;
        peer.update_status(status(100));
        assert!(peer.is_stuck());

        let mut stuck_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PeerEvent::NodeStuck { .. }) {
                stuck_events += 1;
            }
        }
        assert_eq!(stuck_events, 1);

        // Still stuck, but no second notification.
        tokio::time::advance(Duration::from_secs(30)).await;
        peer.update_status(status(100));
        assert!(peer.is_stuck());
        assert!(rx
            .try_recv()
            .map_or(true, |e| !matches!(e, PeerEvent::NodeStuck { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn height_increase_clears_stuck() {
        let (tx, _rx) = broadcast::channel(16);
        let mut peer = connection(tx);

        peer.update_status(status(100));
        tokio::time::advance(Duration::from_secs(25)).await;
        peer.update_status(status(100));
        assert!(peer.is_stuck());

        peer.update_status(status(101));
        assert!(!peer.is_stuck());

        // The timer restarted with the increase.
        tokio::time::advance(Duration::from_secs(10)).await;
        peer.update_status(status(101));
        assert!(!peer.is_stuck());
    }

    #[tokio::test(start_paused = true)]
    async fn lower_height_does_not_reset_the_timer() {
        let (tx, _rx) = broadcast::channel(16);
        let mut peer = connection(tx);

        peer.update_status(status(100));
        tokio::time::advance(Duration::from_secs(15)).await;
        peer.update_status(status(99));
        assert!(!peer.is_stuck());

        tokio::time::advance(Duration::from_secs(6)).await;
        peer.update_status(status(99));
        assert!(peer.is_stuck());
    }

    #[tokio::test]
    async fn partial_sample_keeps_known_fields() {
        let (tx, _rx) = broadcast::channel(16);
        let mut peer = connection(tx);

        peer.update_status(status(100));
        peer.update_status(NodeStatus {
            success: true,
            height: 101,
            broadhash: String::new(),
            nonce: "peer-1".to_string(),
            http_port: None,
            version: String::new(),
            os: String::new(),
        });

        let stored = peer.status().unwrap();
        assert_eq!(stored.height, 101);
        assert_eq!(stored.broadhash, "aa");
        assert_eq!(stored.http_port, Some(7000));
    }

    #[tokio::test]
    async fn inbound_flag_is_independent_of_transport_state() {
        let (tx, _rx) = broadcast::channel(16);
        let mut peer = connection(tx);

        assert_eq!(peer.state(), PeerState::Offline);
        peer.set_inbound_connected(true);
        assert!(peer.inbound_connected());
        assert_eq!(peer.state(), PeerState::Offline);

        peer.set_state(PeerState::Online);
        peer.set_inbound_connected(false);
        assert!(!peer.inbound_connected());
        assert_eq!(peer.state(), PeerState::Online);
    }

    #[tokio::test]
    async fn status_update_emits_event() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut peer = connection(tx);

        peer.update_status(status(100));

        match rx.try_recv().unwrap() {
            PeerEvent::StatusUpdated { nonce, status, .. } => {
                assert_eq!(nonce, "peer-1");
                assert_eq!(status.height, 100);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
