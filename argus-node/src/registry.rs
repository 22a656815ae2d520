//! The peer registry: owns the peer set, discovers new peers and computes
//! network-wide aggregates.
//!
//! The registry is the single writer of the peer map. Poll results arrive
//! through [`PeerRegistry::apply_poll`]; results for peers that were removed
//! in the meantime are dropped on the floor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use semver::{Version, VersionReq};
use tokio::sync::broadcast;

use argus_client::client::{ClientFactory, NodeClient};
use argus_client::types::{NodeStatus, PeerInfo};
use argus_observer::PeerSample;

use crate::constants::MONITORING_NONCE_MARKER;
use crate::events::PeerEvent;
use crate::peer::{PeerConnection, PeerIdentity, PeerState};

/// Result of one poll round-trip against a peer, applied by the registry.
pub struct PollOutcome {
    pub status: anyhow::Result<NodeStatus>,
    pub peer_list: Option<Vec<PeerInfo>>,
    pub http_ok: Option<bool>,
}

/// A unit of polling work handed to the scheduler: which peer, over which
/// client, and whether the HTTP capability still needs probing.
pub struct PollTarget {
    pub key: String,
    pub client: Arc<dyn NodeClient>,
    pub probe_http: bool,
}

pub struct PeerRegistry {
    own_nonce: String,
    min_version: Option<VersionReq>,
    peers: HashMap<String, PeerConnection>,
    best_height: u64,
    best_broadhash: String,
    stuck_threshold: Duration,
    factory: Arc<dyn ClientFactory>,
    events: broadcast::Sender<PeerEvent>,
}

impl PeerRegistry {
    pub fn new(
        own_nonce: String,
        min_version: Option<VersionReq>,
        stuck_threshold: Duration,
        factory: Arc<dyn ClientFactory>,
        events: broadcast::Sender<PeerEvent>,
    ) -> Self {
        Self {
            own_nonce,
            min_version,
            peers: HashMap::new(),
            best_height: 0,
            best_broadhash: String::new(),
            stuck_threshold,
            factory,
            events,
        }
    }

    /// Start tracking a peer, unless it is us, a sibling monitor, already
    /// tracked, or running a version below the configured minimum.
    ///
    /// Seed peers may come without a nonce; they are tracked under a
    /// provisional `ip:port` key until their first status reveals one.
    pub fn add_peer(&mut self, candidate: &PeerInfo) -> bool {
        if !candidate.nonce.is_empty()
            && (candidate.nonce == self.own_nonce
                || candidate.nonce.contains(MONITORING_NONCE_MARKER))
        {
            return false;
        }

        let key = if candidate.nonce.is_empty() {
            format!("{}:{}", candidate.ip, candidate.ws_port)
        } else {
            candidate.nonce.clone()
        };
        if self.peers.contains_key(&key) {
            log::debug!("peer not added: already tracking {}", key);
            return false;
        }

        if let Some(req) = &self.min_version {
            let satisfied = Version::parse(&candidate.version)
                .map(|v| req.matches(&v))
                .unwrap_or(false);
            if !satisfied {
                log::debug!(
                    "peer not added: version {:?} of {}:{} does not satisfy {}",
                    candidate.version,
                    candidate.ip,
                    candidate.ws_port,
                    req
                );
                return false;
            }
        }

        let identity = PeerIdentity {
            ip: candidate.ip.clone(),
            ws_port: candidate.ws_port,
            http_port: candidate.http_port,
            nonce: candidate.nonce.clone(),
            version: candidate.version.clone(),
        };
        let client = self.factory.client_for(&identity.ip, identity.http_port);
        let connection =
            PeerConnection::new(identity, client, self.stuck_threshold, self.events.clone());

        log::debug!("tracking new peer {} ({})", key, candidate.ip);
        self.peers.insert(key, connection);
        true
    }

    /// Stop tracking a peer. Outstanding poll results for it will be dropped
    /// when they arrive.
    pub fn remove_peer(&mut self, key: &str) -> bool {
        self.peers.remove(key).is_some()
    }

    /// Collect the polling work for the current tick, one target per peer.
    pub fn poll_targets(&self) -> Vec<PollTarget> {
        self.peers
            .iter()
            .map(|(key, peer)| PollTarget {
                key: key.clone(),
                client: peer.client(),
                probe_http: !peer.http_probed(),
            })
            .collect()
    }

    /// Apply the outcome of one peer's poll.
    ///
    /// A successful status flips the peer Online and feeds the status and
    /// peer list into the connection; a failure flips it Offline and skips
    /// the cycle. Either way no other peer is affected.
    pub fn apply_poll(&mut self, key: &str, outcome: PollOutcome) {
        let Some(peer) = self.peers.get_mut(key) else {
            // Peer was removed while the poll was in flight.
            return;
        };

        match outcome.status {
            Ok(status) => {
                peer.set_state(PeerState::Online);
                peer.update_status(status);
                if let Some(list) = outcome.peer_list {
                    peer.set_peer_list(list);
                }
                if let Some(ok) = outcome.http_ok {
                    peer.set_http_capable(ok);
                }
                self.settle_provisional_key(key);
            }
            Err(e) => {
                log::warn!(
                    "could not update status of {}:{}: {}",
                    peer.identity().ip,
                    peer.identity().ws_port,
                    e
                );
                peer.set_state(PeerState::Offline);
            }
        }
    }

    /// Move a bootstrap peer from its provisional `ip:port` key to its real
    /// nonce once the first status revealed it.
    fn settle_provisional_key(&mut self, key: &str) {
        let needs_rekey = self
            .peers
            .get(key)
            .map_or(false, |p| p.has_provisional_key() && !p.identity().nonce.is_empty());
        if !needs_rekey {
            return;
        }

        if let Some(mut connection) = self.peers.remove(key) {
            connection.clear_provisional_key();
            let nonce = connection.identity().nonce.clone();
            if nonce == self.own_nonce || nonce.contains(MONITORING_NONCE_MARKER) {
                log::debug!("dropping bootstrap peer {}: it is a monitor", key);
            } else if self.peers.contains_key(&nonce) {
                log::debug!("dropping bootstrap peer {}: nonce {} already tracked", key, nonce);
            } else {
                log::debug!("bootstrap peer {} identified as {}", key, nonce);
                self.peers.insert(nonce, connection);
            }
        }
    }

    /// Run one discovery/aggregation cycle.
    ///
    /// Flattens the peer lists reported by all tracked peers, recomputes
    /// each peer's popularity, refreshes the network-wide best height and
    /// starts tracking genuinely new candidates.
    pub fn update_peers_cycle(&mut self) {
        let pool: Vec<PeerInfo> = self
            .peers
            .values()
            .flat_map(|p| p.peer_list().iter().cloned())
            .collect();

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for info in &pool {
            *counts.entry(info.nonce.as_str()).or_insert(0) += 1;
        }
        for peer in self.peers.values_mut() {
            let count = counts
                .get(peer.identity().nonce.as_str())
                .copied()
                .unwrap_or(0);
            peer.set_known_by(count);
        }

        // Best known height only ever grows; a peer reporting lower than a
        // previous best does not lower it.
        for peer in self.peers.values() {
            if peer.state() != PeerState::Online {
                continue;
            }
            if let Some(status) = peer.status() {
                if status.height > self.best_height {
                    self.best_height = status.height;
                    self.best_broadhash = status.broadhash.clone();
                }
            }
        }

        let mut fresh: Vec<PeerInfo> = Vec::new();
        for info in pool {
            if info.nonce.is_empty() || info.nonce == self.own_nonce {
                continue;
            }
            if self.peers.contains_key(&info.nonce) {
                continue;
            }
            // First occurrence wins within the candidate pool itself.
            if fresh.iter().any(|f| f.nonce == info.nonce) {
                continue;
            }
            fresh.push(info);
        }
        for info in fresh {
            self.add_peer(&info);
        }

        let online = self
            .peers
            .values()
            .filter(|p| p.state() == PeerState::Online)
            .count();
        log::debug!(
            "peer cycle: {} online, {} offline, best height {}",
            online,
            self.peers.len() - online,
            self.best_height
        );
    }

    /// Pick an HTTP-capable peer at the best height, uniformly at random
    /// among ties so external read load spreads across the network.
    pub fn get_best_http_peer(&self) -> Option<&PeerConnection> {
        let mut candidates: Vec<&PeerConnection> =
            self.peers.values().filter(|p| p.http_capable()).collect();
        candidates.shuffle(&mut rand::thread_rng());

        let mut best: Option<&PeerConnection> = None;
        let mut best_height = 0u64;
        for peer in candidates {
            let height = peer.status().map_or(0, |s| s.height);
            if best.is_none() || height >= best_height {
                best = Some(peer);
                best_height = height;
            }
        }
        best
    }

    /// The best blockchain height seen across all peers so far.
    pub fn get_best_height(&self) -> u64 {
        self.best_height
    }

    pub fn get_best_broadhash(&self) -> &str {
        &self.best_broadhash
    }

    /// Route a status delivered over our own listening side to the matching
    /// peer. Unknown nonces are ignored.
    pub fn handle_inbound_status(&mut self, nonce: &str, status: NodeStatus) {
        if nonce.is_empty() {
            return;
        }
        if let Some(peer) = self.peers.get_mut(nonce) {
            peer.update_status(status);
        }
    }

    /// Route an inbound connect/disconnect to the matching peer. Unknown
    /// nonces are ignored.
    pub fn handle_inbound_connection_change(&mut self, nonce: &str, connected: bool) {
        if let Some(peer) = self.peers.get_mut(nonce) {
            peer.set_inbound_connected(connected);
        }
    }

    /// A consistent copy of all known peer statuses for the resolver. Peers
    /// that have never delivered a status are not part of the snapshot.
    pub fn snapshot(&self) -> Vec<PeerSample> {
        self.peers
            .values()
            .filter_map(|p| {
                p.status().map(|status| PeerSample {
                    ip: p.identity().ip.clone(),
                    status: status.clone(),
                })
            })
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerConnection> {
        self.peers.values()
    }

    pub fn get_peer(&self, key: &str) -> Option<&PeerConnection> {
        self.peers.get(key)
    }
}
