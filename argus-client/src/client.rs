//! RPC client for monitored nodes.
//!
//! The monitor only ever acts as a client of the nodes it watches. All
//! network access goes through the [`NodeClient`] trait so the registry and
//! resolver never care about the underlying transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{Block, NodeStatus, PeerInfo};

/// Default port for the request/response API when a peer does not advertise one.
pub const DEFAULT_HTTP_PORT: u16 = 7000;

/// Operations the monitor performs against a single remote node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch the node's self-reported chain head status.
    async fn get_status(&self) -> Result<NodeStatus>;

    /// Fetch the list of peers the node currently knows about.
    async fn get_peer_list(&self) -> Result<Vec<PeerInfo>>;

    /// Fetch up to `limit` recent blocks, ordered oldest first.
    async fn get_recent_blocks(&self, limit: u32) -> Result<Vec<Block>>;

    /// Check whether the node's request/response API answers at all.
    async fn probe_http(&self) -> bool;
}

/// Creates clients for newly discovered peers.
///
/// The registry knows peers by address; it asks the factory for a transport
/// whenever it starts tracking one. Tests inject a factory producing mocks.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, ip: &str, http_port: Option<u16>) -> Arc<dyn NodeClient>;
}

#[derive(Debug, Deserialize)]
struct PeerListResponse {
    #[serde(default)]
    peers: Vec<PeerInfo>,
}

#[derive(Debug, Deserialize)]
struct BlocksResponse {
    #[serde(default)]
    blocks: Vec<Block>,
}

/// HTTP implementation of [`NodeClient`].
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(ip: &str, http_port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("http://{}:{}", ip, http_port),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let res = self.client.get(&url).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP {} from {}", status, url));
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl NodeClient for HttpClient {
    async fn get_status(&self) -> Result<NodeStatus> {
        self.get_json("/api/node/status").await
    }

    async fn get_peer_list(&self) -> Result<Vec<PeerInfo>> {
        let res: PeerListResponse = self.get_json("/api/peers").await?;
        Ok(res.peers)
    }

    async fn get_recent_blocks(&self, limit: u32) -> Result<Vec<Block>> {
        let path = format!("/api/blocks?limit={}", limit);
        let res: BlocksResponse = self.get_json(&path).await?;
        let mut blocks = res.blocks;
        // The fingerprinting code relies on ascending height order.
        blocks.sort_by_key(|b| b.height);
        Ok(blocks)
    }

    async fn probe_http(&self) -> bool {
        self.get_json::<serde_json::Value>("/api/node/status")
            .await
            .is_ok()
    }
}

/// Factory producing [`HttpClient`] transports for discovered peers.
pub struct HttpClientFactory {
    timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ClientFactory for HttpClientFactory {
    fn client_for(&self, ip: &str, http_port: Option<u16>) -> Arc<dyn NodeClient> {
        let port = http_port.unwrap_or(DEFAULT_HTTP_PORT);
        match HttpClient::new(ip, port, self.timeout) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                // reqwest only fails to build on broken TLS setups; fall back
                // to a client that reports the failure on every call.
                log::error!("could not build HTTP client for {}:{}: {}", ip, port, e);
                Arc::new(BrokenClient)
            }
        }
    }
}

/// Stand-in returned when a real client could not be constructed.
struct BrokenClient;

#[async_trait]
impl NodeClient for BrokenClient {
    async fn get_status(&self) -> Result<NodeStatus> {
        Err(anyhow!("client unavailable"))
    }

    async fn get_peer_list(&self) -> Result<Vec<PeerInfo>> {
        Err(anyhow!("client unavailable"))
    }

    async fn get_recent_blocks(&self, _limit: u32) -> Result<Vec<Block>> {
        Err(anyhow!("client unavailable"))
    }

    async fn probe_http(&self) -> bool {
        false
    }
}
