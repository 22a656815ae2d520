//! A candidate chain history, represented as sparse height → fingerprint stamps.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use argus_client::types::{Block, NodeStatus};

/// Number of consecutive block ids hashed into one fingerprint. Matches the
/// rolling window the monitored nodes use for their own broadhash.
pub const FINGERPRINT_WINDOW: usize = 5;

/// A status whose height is further than this from the chain's best height
/// cannot be meaningfully fingerprinted against it and is not adopted.
pub const HEIGHT_GAP_LIMIT: u64 = 50;

/// Marks the block id (when known) and broadhash at a given height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStamp {
    pub block_id: Option<String>,
    pub height: u64,
    pub broadhash: String,
}

/// One candidate history on the monitored network.
///
/// A chain never rewrites a stamp: a later sample carrying a different hash
/// at a known height means the sample belongs to some other history.
#[derive(Debug, Clone)]
pub struct Chain {
    id: u64,
    stamps: BTreeMap<u64, BlockStamp>,
}

impl Chain {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            stamps: BTreeMap::new(),
        }
    }

    /// Create a chain pre-seeded with the given stamps.
    pub fn with_stamps(id: u64, stamps: impl IntoIterator<Item = BlockStamp>) -> Self {
        let mut chain = Self::new(id);
        for stamp in stamps {
            chain.stamps.insert(stamp.height, stamp);
        }
        chain
    }

    /// Clone this chain's history minus its single highest stamp, under a new
    /// id. The copy shares no state with the parent; the dropped tip is where
    /// the histories diverge.
    pub fn fork_from(&self, new_id: u64) -> Chain {
        let mut stamps = self.stamps.clone();
        if let Some(best) = self.best_height() {
            stamps.remove(&best);
        }
        Chain { id: new_id, stamps }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Height of the best stamped block, if any stamp exists.
    pub fn best_height(&self) -> Option<u64> {
        self.stamps.keys().next_back().copied()
    }

    pub fn stamp_at(&self, height: u64) -> Option<&BlockStamp> {
        self.stamps.get(&height)
    }

    pub fn stamps(&self) -> impl Iterator<Item = &BlockStamp> {
        self.stamps.values()
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Update the chain from a window of recent blocks, ordered oldest first.
    ///
    /// Every block except the trailing window gets a fingerprint computed
    /// from its own id and the ids of the four blocks above it. The trailing
    /// blocks are skipped: they are not settled enough to compare against
    /// peer-reported hashes, which are themselves computed over a trailing
    /// window.
    ///
    /// Returns `false` as soon as a computed fingerprint conflicts with an
    /// existing stamp, which means this block source follows a different
    /// history than the chain.
    pub fn update_from_blocks(&mut self, blocks: &[Block]) -> bool {
        for i in 0..blocks.len().saturating_sub(FINGERPRINT_WINDOW) {
            let block = &blocks[i];
            let broadhash = window_fingerprint(&blocks[i..i + FINGERPRINT_WINDOW]);

            match self.stamps.get(&block.height) {
                Some(existing) if existing.broadhash != broadhash => return false,
                _ => {
                    self.stamps.insert(
                        block.height,
                        BlockStamp {
                            block_id: Some(block.id.clone()),
                            height: block.height,
                            broadhash,
                        },
                    );
                }
            }
        }
        true
    }

    /// Test whether a node status belongs to this chain, adopting the status
    /// as a new stamp when the height is unknown.
    ///
    /// Without `force`, a status too far from the chain's best height is
    /// rejected outright. An empty chain adopts any status. The result is the
    /// single membership test: does the stamp now at `status.height` carry
    /// the peer's broadhash?
    pub fn check_and_maybe_adopt(&mut self, status: &NodeStatus, force: bool) -> bool {
        if !self.stamps.contains_key(&status.height) {
            if !force {
                if let Some(best) = self.best_height() {
                    if best.abs_diff(status.height) > HEIGHT_GAP_LIMIT {
                        return false;
                    }
                }
            }

            self.stamps.insert(
                status.height,
                BlockStamp {
                    block_id: None,
                    height: status.height,
                    broadhash: status.broadhash.clone(),
                },
            );
        }

        self.stamps
            .get(&status.height)
            .map_or(false, |stamp| stamp.broadhash == status.broadhash)
    }
}

/// Fingerprint of a window of blocks: hex-encoded SHA-256 over the
/// concatenated block ids.
fn window_fingerprint(window: &[Block]) -> String {
    let mut hasher = Sha256::new();
    for block in window {
        hasher.update(block.id.as_bytes());
    }
    hex::encode(hasher.finalize())
}
