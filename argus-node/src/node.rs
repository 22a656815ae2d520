//! Monitor wiring: owns the registry and the resolver, drives the two
//! fixed-rate schedules and hands events to subscribers.
//!
//! Two independent ticks run the system: peer polling/discovery and chain
//! resolution. The resolver never races the registry: each resolution cycle
//! works on an owned snapshot taken at tick start.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rand::Rng;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use argus_client::client::{ClientFactory, NodeClient};
use argus_client::types::{NodeStatus, PeerInfo};
use argus_observer::{ChainEvent, ChainResolver, ObserverError};

use crate::config::Config;
use crate::constants::MONITORING_NONCE_MARKER;
use crate::events::{EventHub, PeerEvent};
use crate::registry::{PeerRegistry, PollOutcome};

/// Generate the monitor's own nonce. The reserved marker keeps other
/// monitors (and ourselves, echoed back through gossip) out of the registry.
pub fn generate_monitor_nonce() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100000);
    format!("{}_{:05x}", MONITORING_NONCE_MARKER, suffix)
}

#[derive(Clone)]
struct Schedule {
    status_poll_interval: Duration,
    discovery_interval: Duration,
    resolve_interval: Duration,
    request_timeout: Duration,
    warmup: Duration,
    chain_monitor_enabled: bool,
}

/// The assembled monitor service.
pub struct Monitor {
    registry: Arc<Mutex<PeerRegistry>>,
    resolver: Arc<Mutex<ChainResolver>>,
    events: EventHub,
    schedule: Schedule,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    pub fn new(config: &Config, own_nonce: String, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        let events = EventHub::default();
        let mut registry = PeerRegistry::new(
            own_nonce,
            config.min_version_req()?,
            config.stuck_threshold(),
            factory,
            events.peer_sender(),
        );

        for seed in config.seed_peers() {
            let candidate = PeerInfo {
                ip: seed.ip,
                ws_port: seed.ws_port,
                http_port: seed.http_port,
                nonce: String::new(),
                version: seed.version.unwrap_or_default(),
                broadhash: None,
                height: None,
            };
            if !registry.add_peer(&candidate) {
                log::warn!(
                    "seed peer {}:{} was not accepted",
                    candidate.ip,
                    candidate.ws_port
                );
            }
        }

        Ok(Self {
            registry: Arc::new(Mutex::new(registry)),
            resolver: Arc::new(Mutex::new(ChainResolver::new())),
            events,
            schedule: Schedule {
                status_poll_interval: config.status_poll_interval(),
                discovery_interval: config.discovery_interval(),
                resolve_interval: config.resolve_interval(),
                request_timeout: config.request_timeout(),
                warmup: config.warmup(),
                chain_monitor_enabled: config.chain_monitor_enabled(),
            },
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Bring the monitor up: start polling and discovery, give the first
    /// peers time to answer, then seed the block cache and start resolving.
    ///
    /// A failed cache initialization aborts startup: without a baseline
    /// chain the resolver would misclassify every peer.
    pub async fn start(&mut self) -> Result<()> {
        self.spawn_poll_loop();
        self.spawn_discovery_loop();

        if !self.schedule.chain_monitor_enabled {
            log::info!("chain monitoring disabled, running peer tracking only");
            return Ok(());
        }

        log::info!(
            "warming up for {:?} before seeding the block cache",
            self.schedule.warmup
        );
        tokio::time::sleep(self.schedule.warmup).await;

        let chain_id = self.initialize_cache().await?;
        log::info!("chain resolution starting on chain {}", chain_id);
        self.spawn_resolve_loop();
        Ok(())
    }

    /// Seed the resolver's first chain from the best HTTP-capable peer.
    pub async fn initialize_cache(&self) -> Result<u64> {
        let client: Arc<dyn NodeClient> = {
            let registry = self.registry.lock().await;
            registry
                .get_best_http_peer()
                .map(|peer| peer.client())
                .ok_or(ObserverError::NoHttpPeer)?
        };

        let id = self.resolver.lock().await.initialize_cache(client.as_ref()).await?;
        Ok(id)
    }

    /// Stop all schedules. Outstanding per-peer polls notice the cancelled
    /// token and drop their results instead of feeding the registry.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }

    pub fn subscribe_peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe_peer_events()
    }

    pub fn subscribe_chain_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe_chain_events()
    }

    /// Inbound feed from our own listening transport: a node pushed its
    /// status to us.
    pub async fn handle_inbound_status(&self, nonce: &str, status: NodeStatus) {
        self.registry.lock().await.handle_inbound_status(nonce, status);
    }

    /// Inbound feed from our own listening transport: a node connected to or
    /// disconnected from us.
    pub async fn handle_inbound_connection_change(&self, nonce: &str, connected: bool) {
        self.registry
            .lock()
            .await
            .handle_inbound_connection_change(nonce, connected);
    }

    pub fn registry(&self) -> Arc<Mutex<PeerRegistry>> {
        self.registry.clone()
    }

    pub fn resolver(&self) -> Arc<Mutex<ChainResolver>> {
        self.resolver.clone()
    }

    fn spawn_poll_loop(&mut self) {
        let registry = self.registry.clone();
        let token = self.shutdown.clone();
        let interval = self.schedule.status_poll_interval;
        let timeout = self.schedule.request_timeout;

        self.tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {}
                }

                let targets = { registry.lock().await.poll_targets() };
                for target in targets {
                    let registry = registry.clone();
                    let token = token.clone();
                    tokio::spawn(async move {
                        let outcome = poll_peer(target.client, target.probe_http, timeout).await;
                        if token.is_cancelled() {
                            return;
                        }
                        registry.lock().await.apply_poll(&target.key, outcome);
                    });
                }
            }
        }));
    }

    fn spawn_discovery_loop(&mut self) {
        let registry = self.registry.clone();
        let token = self.shutdown.clone();
        let interval = self.schedule.discovery_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {}
                }
                registry.lock().await.update_peers_cycle();
            }
        }));
    }

    fn spawn_resolve_loop(&mut self) {
        let registry = self.registry.clone();
        let resolver = self.resolver.clone();
        let chain_tx = self.events.chain_sender();
        let token = self.shutdown.clone();
        let interval = self.schedule.resolve_interval;

        self.tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {}
                }
                resolve_once(&registry, &resolver, &chain_tx).await;
            }
        }));
    }
}

/// One resolution cycle: snapshot the registry, classify, fan events out.
async fn resolve_once(
    registry: &Mutex<PeerRegistry>,
    resolver: &Mutex<ChainResolver>,
    chain_tx: &broadcast::Sender<ChainEvent>,
) {
    let snapshot = { registry.lock().await.snapshot() };
    let events = { resolver.lock().await.run_cycle(&snapshot) };
    for event in events {
        let _ = chain_tx.send(event);
    }
}

/// Poll one peer with a bounded per-call timeout. Failures are reported in
/// the outcome, never raised; a slow peer costs itself the cycle, not the
/// scheduler.
async fn poll_peer(
    client: Arc<dyn NodeClient>,
    probe_http: bool,
    timeout: Duration,
) -> PollOutcome {
    let status = match tokio::time::timeout(timeout, client.get_status()).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("status request timed out")),
    };

    let peer_list = if status.is_ok() {
        match tokio::time::timeout(timeout, client.get_peer_list()).await {
            Ok(Ok(list)) => Some(list),
            Ok(Err(e)) => {
                log::debug!("peer list fetch failed: {}", e);
                None
            }
            Err(_) => {
                log::debug!("peer list fetch timed out");
                None
            }
        }
    } else {
        None
    };

    let http_ok = if probe_http {
        match tokio::time::timeout(timeout, client.probe_http()).await {
            Ok(ok) => Some(ok),
            Err(_) => Some(false),
        }
    } else {
        None
    };

    PollOutcome {
        status,
        peer_list,
        http_ok,
    }
}
