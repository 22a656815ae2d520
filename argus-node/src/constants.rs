//! Centralized constants for the argus-node crate.
//!
//! Timing defaults and thresholds live here; the config file can override
//! the scheduling values.

/// A peer whose height has not advanced for this long is considered stuck
pub const STUCK_THRESHOLD_SECS: u64 = 20;

/// Interval between status/peer-list polls of each tracked peer in seconds
pub const STATUS_POLL_INTERVAL_SECS: u64 = 2;

/// Interval between peer discovery/aggregation cycles in seconds
pub const DISCOVERY_INTERVAL_SECS: u64 = 1;

/// Interval between chain resolution cycles in seconds
pub const RESOLVE_INTERVAL_SECS: u64 = 5;

/// Per-request timeout for any call against a remote node in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 2;

/// Time given to the first peers to connect before the block cache is seeded
pub const WARMUP_SECS: u64 = 5;

/// Capacity of the broadcast channels carrying monitor events
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Nonce marker reserved for monitor instances; peers carrying it are never
/// tracked (we would be watching ourselves or a sibling monitor)
pub const MONITORING_NONCE_MARKER: &str = "monitoring";
