//! Wire types reported by monitored nodes.

use serde::{Deserialize, Serialize};

/// Status sample a node reports about its own chain head.
///
/// Nodes answer with whatever subset of fields their version supports, so
/// everything except `height` and `nonce` tolerates being absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default)]
    pub success: bool,
    pub height: u64,
    #[serde(default)]
    pub broadhash: String,
    pub nonce: String,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub os: String,
}

impl NodeStatus {
    /// Merge a fresh sample into this stored status.
    ///
    /// A partial sample must not erase fields learned earlier: empty or
    /// absent fields in `sample` leave the stored value untouched.
    pub fn merge_from(&mut self, sample: &NodeStatus) {
        self.success = sample.success;
        self.height = sample.height;
        if !sample.broadhash.is_empty() {
            self.broadhash = sample.broadhash.clone();
        }
        if !sample.nonce.is_empty() {
            self.nonce = sample.nonce.clone();
        }
        if sample.http_port.is_some() {
            self.http_port = sample.http_port;
        }
        if !sample.version.is_empty() {
            self.version = sample.version.clone();
        }
        if !sample.os.is_empty() {
            self.os = sample.os.clone();
        }
    }
}

/// An entry of the peer list a node gossips about the peers it knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub ip: String,
    pub ws_port: u16,
    #[serde(default)]
    pub http_port: Option<u16>,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub broadhash: Option<String>,
    #[serde(default)]
    pub height: Option<u64>,
}

/// A block header as returned by the recent-blocks endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    pub height: u64,
    #[serde(default)]
    pub previous_block: Option<String>,
    #[serde(default)]
    pub generator_public_key: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}
