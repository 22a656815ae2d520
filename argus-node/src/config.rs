use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DISCOVERY_INTERVAL_SECS, REQUEST_TIMEOUT_SECS, RESOLVE_INTERVAL_SECS,
    STATUS_POLL_INTERVAL_SECS, STUCK_THRESHOLD_SECS, WARMUP_SECS,
};

/// A node to contact at startup, before any gossip has been heard.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SeedPeer {
    pub ip: String,
    pub ws_port: u16,
    pub http_port: Option<u16>,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    pub network_id: Option<String>,
    pub seed_peers: Option<Vec<SeedPeer>>,
    pub minimum_peer_version: Option<String>,
    pub own_ws_port: Option<u16>,
    pub own_http_port: Option<u16>,
    pub chain_monitor_enabled: Option<bool>,
    pub status_poll_interval_secs: Option<u64>,
    pub discovery_interval_secs: Option<u64>,
    pub resolve_interval_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub stuck_threshold_secs: Option<u64>,
    pub warmup_secs: Option<u64>,
    pub logs_path: Option<PathBuf>,
    pub logs_enabled: Option<bool>,
    pub log_level: Option<String>,
}

impl Config {
    pub fn from_filepath(path: &Path) -> Result<Config> {
        let file = fs::File::open(path).context("Failed to open config file")?;
        let config: Config = serde_json::from_reader(file).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn seed_peers(&self) -> Vec<SeedPeer> {
        self.seed_peers.clone().unwrap_or_default()
    }

    /// Parsed minimum-version requirement, if one is configured.
    pub fn min_version_req(&self) -> Result<Option<VersionReq>> {
        match &self.minimum_peer_version {
            Some(raw) => {
                let req = VersionReq::parse(raw)
                    .with_context(|| format!("Invalid minimum_peer_version '{}'", raw))?;
                Ok(Some(req))
            }
            None => Ok(None),
        }
    }

    pub fn chain_monitor_enabled(&self) -> bool {
        self.chain_monitor_enabled.unwrap_or(true)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(
            self.status_poll_interval_secs
                .unwrap_or(STATUS_POLL_INTERVAL_SECS),
        )
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(
            self.discovery_interval_secs
                .unwrap_or(DISCOVERY_INTERVAL_SECS),
        )
    }

    pub fn resolve_interval(&self) -> Duration {
        Duration::from_secs(self.resolve_interval_secs.unwrap_or(RESOLVE_INTERVAL_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS))
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs.unwrap_or(STUCK_THRESHOLD_SECS))
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs.unwrap_or(WARMUP_SECS))
    }
}
