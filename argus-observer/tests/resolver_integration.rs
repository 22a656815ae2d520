use anyhow::anyhow;
use async_trait::async_trait;

use argus_client::client::NodeClient;
use argus_client::types::{Block, NodeStatus, PeerInfo};
use argus_observer::{ChainEvent, ChainResolver, PeerSample};

// Test helper functions
fn test_block(height: u64) -> Block {
    Block {
        id: format!("block_{}", height),
        height,
        previous_block: if height == 0 {
            None
        } else {
            Some(format!("block_{}", height - 1))
        },
        generator_public_key: format!("delegate_{}", height % 101),
        timestamp: Some(1640000000 + height as i64 * 10),
    }
}

fn test_blocks(from: u64, to: u64) -> Vec<Block> {
    (from..=to).map(test_block).collect()
}

fn peer(nonce: &str, height: u64, broadhash: &str) -> PeerSample {
    PeerSample {
        ip: format!("198.51.100.{}", nonce.as_bytes()[0]),
        status: NodeStatus {
            success: true,
            height,
            broadhash: broadhash.to_string(),
            nonce: nonce.to_string(),
            http_port: Some(7000),
            version: "1.1.0".to_string(),
            os: "linux".to_string(),
        },
    }
}

struct BlockSource {
    blocks: Vec<Block>,
}

#[async_trait]
impl NodeClient for BlockSource {
    async fn get_status(&self) -> anyhow::Result<NodeStatus> {
        Err(anyhow!("not used"))
    }

    async fn get_peer_list(&self) -> anyhow::Result<Vec<PeerInfo>> {
        Ok(Vec::new())
    }

    async fn get_recent_blocks(&self, _limit: u32) -> anyhow::Result<Vec<Block>> {
        Ok(self.blocks.clone())
    }

    async fn probe_http(&self) -> bool {
        true
    }
}

async fn seeded_resolver(from: u64, to: u64) -> ChainResolver {
    let mut resolver = ChainResolver::new();
    let source = BlockSource {
        blocks: test_blocks(from, to),
    };
    resolver.initialize_cache(&source).await.unwrap();
    resolver
}

fn stamp_hash(resolver: &ChainResolver, chain_idx: usize, height: u64) -> String {
    resolver.chains()[chain_idx]
        .stamp_at(height)
        .expect("stamp must exist")
        .broadhash
        .clone()
}

#[tokio::test]
async fn full_network_lifecycle_with_fork_and_recovery() {
    // Cache covers heights 100..=125 (blocks up to 130, trailing 5 skipped).
    let mut resolver = seeded_resolver(100, 130).await;
    let cache_chain = resolver.chains()[0].id();
    assert_eq!(resolver.chains()[0].best_height(), Some(125));

    let h120 = stamp_hash(&resolver, 0, 120);
    let h125 = stamp_hash(&resolver, 0, 125);

    // Cycle 1: four peers agree with the cached history.
    let events = resolver.run_cycle(&[
        peer("a", 120, &h120),
        peer("b", 120, &h120),
        peer("c", 120, &h120),
        peer("d", 120, &h120),
    ]);
    assert_eq!(events.len(), 4);
    assert!(events
        .iter()
        .all(|e| matches!(e, ChainEvent::ChainJoined { .. })));
    assert_eq!(resolver.mainchain(), Some(cache_chain));

    // Cycle 2: d diverges at the cached tip height.
    let events = resolver.run_cycle(&[
        peer("a", 125, &h125),
        peer("b", 125, &h125),
        peer("c", 125, &h125),
        peer("d", 125, "deadbeef"),
    ]);

    let fork = events
        .iter()
        .find_map(|e| match e {
            ChainEvent::Fork {
                nonce,
                old_chain,
                new_chain,
                ..
            } => Some((nonce.clone(), *old_chain, *new_chain)),
            _ => None,
        })
        .expect("d must fork");
    assert_eq!(fork.0, "d");
    assert_eq!(fork.1, cache_chain);

    let fork_chain = fork.2;
    assert_eq!(resolver.chains().len(), 2);
    assert_eq!(resolver.membership()["d"], fork_chain);
    assert_eq!(resolver.mainchain(), Some(cache_chain));

    // The fork copied the parent's history below the divergence point and
    // the parent kept its own tip stamp.
    let forked = resolver
        .chains()
        .iter()
        .find(|c| c.id() == fork_chain)
        .unwrap();
    assert_eq!(forked.stamp_at(125).unwrap().broadhash, "deadbeef");
    assert_eq!(forked.stamp_at(120).unwrap().broadhash, h120);
    let parent = resolver
        .chains()
        .iter()
        .find(|c| c.id() == cache_chain)
        .unwrap();
    assert_eq!(parent.stamp_at(125).unwrap().broadhash, h125);

    // Cycle 3: d rejoins the majority at the next height.
    let events = resolver.run_cycle(&[
        peer("a", 126, "h126"),
        peer("b", 126, "h126"),
        peer("c", 126, "h126"),
        peer("d", 126, "h126"),
    ]);
    assert!(events.iter().any(|e| matches!(
        e,
        ChainEvent::ChainChanged { nonce, old_chain, new_chain, .. }
            if nonce == "d" && *old_chain == fork_chain && *new_chain == cache_chain
    )));
    assert_eq!(resolver.membership()["d"], cache_chain);
    assert_eq!(resolver.mainchain(), Some(cache_chain));

    // The abandoned fork stays registered; nothing prunes it.
    assert_eq!(resolver.chains().len(), 2);
}

#[tokio::test]
async fn far_behind_peer_founds_its_own_chain() {
    let mut resolver = seeded_resolver(100, 130).await;
    let h120 = stamp_hash(&resolver, 0, 120);

    let events = resolver.run_cycle(&[
        peer("a", 120, &h120),
        peer("lagging", 40, "ancient"),
    ]);

    // 40 is more than 50 below the cache tip, so no chain adopts it and the
    // peer ends up alone on a fresh chain.
    assert!(events.iter().any(|e| matches!(
        e,
        ChainEvent::ForkUnknownChain { nonce, .. } if nonce == "lagging"
    )));
    assert_eq!(resolver.chains().len(), 2);
    assert_ne!(resolver.membership()["lagging"], resolver.membership()["a"]);
}

#[tokio::test]
async fn first_reporter_at_a_new_height_claims_the_stamp() {
    let mut resolver = seeded_resolver(100, 130).await;
    let cache_chain = resolver.chains()[0].id();
    let h125 = stamp_hash(&resolver, 0, 125);

    resolver.run_cycle(&[
        peer("a", 125, &h125),
        peer("b", 125, &h125),
        peer("c", 125, &h125),
    ]);
    assert_eq!(resolver.mainchain(), Some(cache_chain));

    // b and c advance past the cached tip first: their hash becomes the
    // stamp at 126, so they stay healthy on the same chain.
    let events = resolver.run_cycle(&[
        peer("a", 125, &h125),
        peer("b", 126, "competing"),
        peer("c", 126, "competing"),
    ]);
    assert!(events.is_empty());
    assert_eq!(resolver.chains().len(), 1);

    // When a catches up with a conflicting hash it is the one forking off,
    // and the earlier reporters keep the majority.
    resolver.run_cycle(&[
        peer("a", 126, "h126"),
        peer("b", 126, "competing"),
        peer("c", 126, "competing"),
    ]);

    let fork_chain = resolver.membership()["a"];
    assert_ne!(fork_chain, cache_chain);
    assert_eq!(resolver.membership()["b"], cache_chain);
    assert_eq!(resolver.mainchain(), Some(cache_chain));
}

#[tokio::test]
async fn stale_memberships_are_dropped_across_cycles() {
    let mut resolver = seeded_resolver(100, 130).await;
    let h120 = stamp_hash(&resolver, 0, 120);

    resolver.run_cycle(&[peer("a", 120, &h120), peer("b", 120, &h120)]);
    assert_eq!(resolver.membership().len(), 2);

    // b vanished from the peer list; its vote must not linger.
    resolver.run_cycle(&[peer("a", 120, &h120)]);
    assert_eq!(resolver.membership().len(), 1);
    assert_eq!(resolver.mainchain(), Some(resolver.membership()["a"]));
}
