//! Per-cycle classification of peers against known chains.
//!
//! The resolver consumes a snapshot of peer statuses, assigns every peer to
//! a chain, grows the chain set when histories diverge, and elects the chain
//! the majority of peers agree on.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use argus_client::client::NodeClient;
use argus_client::types::NodeStatus;

use crate::chain::{BlockStamp, Chain};
use crate::error::{ObserverError, Result};

/// Number of recent blocks requested when seeding the block cache.
pub const CACHE_SEED_BLOCKS: u32 = 100;

/// One peer's status as captured at the start of a resolver cycle.
#[derive(Debug, Clone)]
pub struct PeerSample {
    pub ip: String,
    pub status: NodeStatus,
}

/// Chain membership changes observed during a resolver cycle.
///
/// Serializable so notification adapters can forward payloads as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainEvent {
    /// A previously classified peer diverged from its chain.
    Fork {
        ip: String,
        nonce: String,
        height: u64,
        broadhash: String,
        old_chain: u64,
        new_chain: u64,
    },
    /// A peer matches no known chain and has no history with us.
    ForkUnknownChain {
        ip: String,
        nonce: String,
        height: u64,
        broadhash: String,
        new_chain: u64,
    },
    /// A peer was classified for the first time.
    ChainJoined {
        ip: String,
        nonce: String,
        height: u64,
        broadhash: String,
        chain: u64,
    },
    /// A peer moved from one known chain to another.
    ChainChanged {
        ip: String,
        nonce: String,
        height: u64,
        broadhash: String,
        old_chain: u64,
        new_chain: u64,
    },
}

/// Tracks all candidate chains and the peer → chain assignment.
pub struct ChainResolver {
    chains: Vec<Chain>,
    membership: HashMap<String, u64>,
    mainchain: Option<u64>,
    next_chain_id: u64,
}

impl Default for ChainResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainResolver {
    pub fn new() -> Self {
        Self {
            chains: Vec::new(),
            membership: HashMap::new(),
            mainchain: None,
            next_chain_id: 0,
        }
    }

    /// Seed the initial chain from a trusted block source, usually the
    /// best-height HTTP-capable peer. Failure means the monitor has no
    /// baseline at all and must be surfaced to startup.
    pub async fn initialize_cache(&mut self, client: &dyn NodeClient) -> Result<u64> {
        let blocks = client
            .get_recent_blocks(CACHE_SEED_BLOCKS)
            .await
            .map_err(|e| ObserverError::CacheInit(e.to_string()))?;

        let id = self.alloc_chain_id();
        let mut chain = Chain::new(id);
        if !chain.update_from_blocks(&blocks) {
            return Err(ObserverError::InconsistentSource(id));
        }

        if chain.is_empty() {
            log::warn!(
                "cache seeded with {} blocks but produced no stamps",
                blocks.len()
            );
        } else {
            log::info!(
                "block cache initialized: chain {} with {} stamps up to height {:?}",
                id,
                chain.len(),
                chain.best_height()
            );
        }

        self.chains.push(chain);
        Ok(id)
    }

    /// Run one classification cycle over a peer snapshot.
    ///
    /// Peers are processed in ascending height order so lower forks exist as
    /// candidate parents before higher peers that might share their history.
    /// Returns the membership changes for event fan-out.
    pub fn run_cycle(&mut self, peers: &[PeerSample]) -> Vec<ChainEvent> {
        // Stale-peer GC: forget assignments of peers that disappeared.
        let live: HashSet<&str> = peers.iter().map(|p| p.status.nonce.as_str()).collect();
        self.membership.retain(|nonce, _| live.contains(nonce.as_str()));

        let mut ordered: Vec<&PeerSample> = peers.iter().collect();
        ordered.sort_by_key(|p| p.status.height);

        let mut events = Vec::new();
        for peer in ordered {
            if peer.status.broadhash.is_empty() {
                continue;
            }
            if let Some(event) = self.classify_peer(peer) {
                events.push(event);
            }
        }

        self.determine_mainchain();
        events
    }

    fn classify_peer(&mut self, peer: &PeerSample) -> Option<ChainEvent> {
        let status = &peer.status;
        let nonce = status.nonce.clone();

        // First registered chain that matches wins.
        let mut matched: Option<u64> = None;
        for chain in self.chains.iter_mut() {
            if chain.check_and_maybe_adopt(status, false) {
                matched = Some(chain.id());
                break;
            }
        }

        let previous = self.membership.get(&nonce).copied();
        match (matched, previous) {
            (None, Some(old_id)) => {
                // Diverged from a chain we know the peer was on.
                let Some(old_idx) = self.chains.iter().position(|c| c.id() == old_id) else {
                    log::error!(
                        "membership of peer {} points at unknown chain {}, skipping this cycle",
                        nonce,
                        old_id
                    );
                    return None;
                };

                let new_id = self.alloc_chain_id();
                let mut fork = self.chains[old_idx].fork_from(new_id);
                fork.check_and_maybe_adopt(status, true);
                self.chains.push(fork);
                self.membership.insert(nonce.clone(), new_id);

                log::debug!(
                    "FORK peer={} height={} old_chain={} new_chain={}",
                    nonce,
                    status.height,
                    old_id,
                    new_id
                );
                Some(ChainEvent::Fork {
                    ip: peer.ip.clone(),
                    nonce,
                    height: status.height,
                    broadhash: status.broadhash.clone(),
                    old_chain: old_id,
                    new_chain: new_id,
                })
            }
            (None, None) => {
                // No match and no history: a chain we have never seen.
                let new_id = self.alloc_chain_id();
                let chain = Chain::with_stamps(
                    new_id,
                    [BlockStamp {
                        block_id: None,
                        height: status.height,
                        broadhash: status.broadhash.clone(),
                    }],
                );
                self.chains.push(chain);
                self.membership.insert(nonce.clone(), new_id);

                log::debug!("FORK_UNKNOWN_CHAIN peer={} chain={}", nonce, new_id);
                Some(ChainEvent::ForkUnknownChain {
                    ip: peer.ip.clone(),
                    nonce,
                    height: status.height,
                    broadhash: status.broadhash.clone(),
                    new_chain: new_id,
                })
            }
            (Some(chain_id), None) => {
                self.membership.insert(nonce.clone(), chain_id);

                log::debug!("CHAIN_JOINED peer={} chain={}", nonce, chain_id);
                Some(ChainEvent::ChainJoined {
                    ip: peer.ip.clone(),
                    nonce,
                    height: status.height,
                    broadhash: status.broadhash.clone(),
                    chain: chain_id,
                })
            }
            (Some(chain_id), Some(old_id)) if chain_id != old_id => {
                self.membership.insert(nonce.clone(), chain_id);

                log::debug!(
                    "CHAIN_CHANGED peer={} old_chain={} new_chain={}",
                    nonce,
                    old_id,
                    chain_id
                );
                Some(ChainEvent::ChainChanged {
                    ip: peer.ip.clone(),
                    nonce,
                    height: status.height,
                    broadhash: status.broadhash.clone(),
                    old_chain: old_id,
                    new_chain: chain_id,
                })
            }
            // Healthy: same chain as before, nothing to report.
            (Some(_), Some(_)) => None,
        }
    }

    /// Elect the chain with the most member peers. Ties go to the smallest
    /// chain id so repeated runs on identical input agree.
    fn determine_mainchain(&mut self) {
        let mut votes: BTreeMap<u64, usize> = BTreeMap::new();
        for chain_id in self.membership.values() {
            *votes.entry(*chain_id).or_insert(0) += 1;
        }

        self.mainchain = votes
            .into_iter()
            .max_by_key(|&(id, count)| (count, std::cmp::Reverse(id)))
            .map(|(id, _)| id);
    }

    pub fn mainchain(&self) -> Option<u64> {
        self.mainchain
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn membership(&self) -> &HashMap<String, u64> {
        &self.membership
    }

    fn alloc_chain_id(&mut self) -> u64 {
        let id = self.next_chain_id;
        self.next_chain_id += 1;
        id
    }
}
