pub mod client;
pub mod types;

pub use client::{ClientFactory, HttpClient, HttpClientFactory, NodeClient};
pub use types::{Block, NodeStatus, PeerInfo};
