// Copyright (c) 2024 The dep2p Authors

//! LAN peer discovery over DNS-SD.
//!
//! The discoverer runs two roles at once. The *server* role registers
//! `<short-id>.<service-tag>.<domain>` with TXT records carrying the node id
//! and its dialable LAN addresses. The *client* role browses for the same
//! service tag on a fixed cadence and reports every other node it resolves.
//!
//! The server role needs a port. When none is configured and none can be
//! inferred from the local addresses yet, the discoverer runs client-only
//! (`Waiting` state) and the server starts automatically on the first
//! address update that yields a port.
//!
//! The `mdns-sd` daemon does its multicast I/O on its own thread; browse
//! results are drained on a blocking thread and handed back to the async
//! side, so callbacks never run under the peers lock or inside the reader
//! loop.

use crate::{
    backend::{Discovery, DiscoveryOptions},
    error::{DiscoveryError, DiscoveryResult},
};
use async_trait::async_trait;
use dep2p_common::{classifier, interfaces, NodeId, PeerInfo};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Single DNS TXT string limit, key included.
pub const TXT_RECORD_MAX: usize = 255;

/// TXT key carrying the node id.
const TXT_KEY_ID: &str = "id";

/// TXT key carrying a CSV address segment. May repeat.
const TXT_KEY_ADDRS: &str = "addrs";

/// Cadence of the stale-peer cleanup tick.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Grace period for browse tasks to drain on shutdown.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Configuration for the mDNS discoverer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// DNS-SD service tag.
    pub service_tag: String,

    /// mDNS domain; always `local.` in practice.
    pub domain: String,

    /// Browse cadence (seconds).
    pub query_interval_secs: u64,

    /// How long one browse tick collects answers (seconds).
    pub browse_window_secs: u64,

    /// Peer entry lifetime (seconds).
    pub ttl_secs: u64,

    /// Restrict mDNS to one interface by name.
    pub interface: Option<String>,

    /// Skip IPv4 announcements and answers.
    pub disable_ipv4: bool,

    /// Skip IPv6 announcements and answers.
    pub disable_ipv6: bool,

    /// Announced port; zero means infer from the local addresses.
    pub port: u16,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            service_tag: "_dep2p._udp".to_string(),
            domain: "local.".to_string(),
            query_interval_secs: 60,
            browse_window_secs: 10,
            ttl_secs: 10 * 60,
            interface: None,
            disable_ipv4: false,
            disable_ipv6: false,
            port: 0,
        }
    }
}

impl MdnsConfig {
    /// Validate constructor-time invariants.
    pub fn validate(&self) -> DiscoveryResult<()> {
        if self.service_tag.is_empty() || !self.service_tag.starts_with('_') {
            return Err(DiscoveryError::InvalidConfig(format!(
                "service tag must start with '_': {:?}",
                self.service_tag
            )));
        }
        if self.domain.is_empty() {
            return Err(DiscoveryError::InvalidConfig("empty domain".to_string()));
        }
        if self.query_interval_secs == 0 || self.ttl_secs == 0 || self.browse_window_secs == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The full DNS-SD service type, e.g. `_dep2p._udp.local.`.
    pub fn service_type(&self) -> String {
        format!("{}.{}", self.service_tag, self.domain)
    }

    /// Browse cadence.
    pub fn query_interval(&self) -> Duration {
        Duration::from_secs(self.query_interval_secs)
    }

    /// Answer-collection window per browse tick.
    pub fn browse_window(&self) -> Duration {
        Duration::from_secs(self.browse_window_secs)
    }

    /// Peer entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Build the TXT record strings for an announcement: one `id=` record plus
/// as many `addrs=` records as needed to keep every string within
/// [`TXT_RECORD_MAX`] bytes. The split is deterministic; an address that
/// cannot fit in a fresh record by itself is dropped.
pub fn build_txt_records(id: &NodeId, addrs: &[String]) -> Vec<String> {
    let mut records = vec![format!("{TXT_KEY_ID}={}", id.to_base58())];
    let prefix_len = TXT_KEY_ADDRS.len() + 1;

    let mut current = String::new();
    for addr in addrs {
        if prefix_len + addr.len() > TXT_RECORD_MAX {
            warn!(len = addr.len(), "address too long for a TXT record, dropped");
            continue;
        }
        let extra = if current.is_empty() { 0 } else { 1 } + addr.len();
        if prefix_len + current.len() + extra > TXT_RECORD_MAX {
            records.push(format!("{TXT_KEY_ADDRS}={current}"));
            current = addr.clone();
        } else {
            if !current.is_empty() {
                current.push(',');
            }
            current.push_str(addr);
        }
    }
    if !current.is_empty() {
        records.push(format!("{TXT_KEY_ADDRS}={current}"));
    }
    records
}

/// Parse TXT key/value pairs back into `(id, addrs)`, aggregating every
/// `addrs=` segment in order.
pub fn parse_txt_records(pairs: &[(String, String)]) -> (Option<NodeId>, Vec<String>) {
    let mut id = None;
    let mut addrs = Vec::new();
    for (key, value) in pairs {
        if key == TXT_KEY_ID {
            id = NodeId::from_base58(value).ok();
        } else if key == TXT_KEY_ADDRS {
            for addr in value.split(',').filter(|s| !s.is_empty()) {
                if !addrs.contains(&addr.to_string()) {
                    addrs.push(addr.to_string());
                }
            }
        }
    }
    (id, addrs)
}

/// Turn one resolved service entry into a peer, applying the TXT and
/// fallback rules: a valid foreign `id=` is required; TXT addresses win;
/// otherwise `ip:port` forms are accepted only for LAN IPs.
fn peer_from_entry(
    local_id: &NodeId,
    entry_ips: &[IpAddr],
    entry_port: u16,
    txt: &[(String, String)],
) -> Option<PeerInfo> {
    let (id, mut addrs) = parse_txt_records(txt);
    let id = id?;
    if id == *local_id {
        return None;
    }

    if addrs.is_empty() {
        for ip in entry_ips {
            if !classifier::is_lan_ip(ip) {
                // VPN and tunnel addresses would be unreachable.
                continue;
            }
            let addr = match ip {
                IpAddr::V4(v4) => format!("{v4}:{entry_port}"),
                IpAddr::V6(v6) => format!("[{v6}]:{entry_port}"),
            };
            if !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
    }
    if addrs.is_empty() {
        return None;
    }

    let sorted = classifier::sort_addrs_by_reachability(&addrs);
    Some(PeerInfo::new(id, sorted))
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum ServerState {
    Stopped,
    /// Client-only: no port known yet.
    Waiting,
    /// Announcing under the registered fullname.
    Running(String),
}

struct DiscoveredPeer {
    info: PeerInfo,
    last_seen: Instant,
}

/// New-peer callback type.
pub type PeerDiscoveredCallback = Arc<dyn Fn(PeerInfo) + Send + Sync>;

struct MdnsInner {
    config: MdnsConfig,
    local_id: NodeId,
    daemon: Mutex<Option<ServiceDaemon>>,
    server_state: RwLock<ServerState>,
    local_addrs: RwLock<Vec<String>>,
    peers: RwLock<HashMap<NodeId, DiscoveredPeer>>,
    subscribers: Mutex<Vec<mpsc::Sender<PeerInfo>>>,
    on_peer: RwLock<Option<PeerDiscoveredCallback>>,
    browse_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Worker cancellation, separate from all state locks.
    ctx: RwLock<Option<CancellationToken>>,
}

/// LAN discoverer implementing [`Discovery`] over DNS-SD.
pub struct MdnsDiscoverer {
    inner: Arc<MdnsInner>,
}

impl MdnsDiscoverer {
    /// Create a discoverer for the local node. Fails only on invalid
    /// configuration.
    pub fn new(local_id: NodeId, config: MdnsConfig) -> DiscoveryResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(MdnsInner {
                config,
                local_id,
                daemon: Mutex::new(None),
                server_state: RwLock::new(ServerState::Stopped),
                local_addrs: RwLock::new(Vec::new()),
                peers: RwLock::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
                on_peer: RwLock::new(None),
                browse_task: Mutex::new(None),
                ctx: RwLock::new(None),
            }),
        })
    }

    /// Install the new-peer callback. Invoked once per newly seen peer, on
    /// its own task, never under the peers lock.
    pub fn set_on_peer_discovered(&self, callback: PeerDiscoveredCallback) {
        *self.inner.on_peer.write().unwrap() = Some(callback);
    }

    /// Peers currently known.
    pub fn known_peers(&self) -> Vec<PeerInfo> {
        self.inner.known_peers()
    }

    /// Whether the server role is currently announcing.
    pub fn is_announcing(&self) -> bool {
        matches!(
            *self.inner.server_state.read().unwrap(),
            ServerState::Running(_)
        )
    }

    /// Feed the current local addresses. Starts the server role when the
    /// port becomes inferable; re-registers when the announced set changes.
    pub fn update_local_addrs(&self, addrs: Vec<String>) {
        self.inner.update_local_addrs(addrs)
    }
}

impl MdnsInner {
    fn known_peers(&self) -> Vec<PeerInfo> {
        self.peers
            .read()
            .unwrap()
            .values()
            .map(|p| p.info.clone())
            .collect()
    }

    fn update_local_addrs(&self, addrs: Vec<String>) {
        let changed = {
            let mut guard = self.local_addrs.write().unwrap();
            if *guard == addrs {
                false
            } else {
                *guard = addrs;
                true
            }
        };
        if !changed {
            return;
        }

        let state = self.server_state.read().unwrap().clone();
        match state {
            ServerState::Waiting => {
                if let Err(error) = self.start_server() {
                    debug!(%error, "server role still waiting");
                }
            }
            ServerState::Running(_) => {
                self.stop_server();
                if let Err(error) = self.start_server() {
                    warn!(%error, "server role lost after address change");
                }
            }
            ServerState::Stopped => {}
        }
    }

    fn announce_port(&self) -> u16 {
        if self.config.port != 0 {
            return self.config.port;
        }
        classifier::infer_port(&self.local_addrs.read().unwrap())
    }

    /// IPs the server role announces: LAN-scored interface addresses,
    /// honoring the family switches.
    fn announce_ips(&self) -> Vec<IpAddr> {
        interfaces::lan_ips(self.config.interface.as_deref())
            .into_iter()
            .filter(|ip| match ip {
                IpAddr::V4(_) => !self.config.disable_ipv4,
                IpAddr::V6(_) => !self.config.disable_ipv6,
            })
            .collect()
    }

    /// Addresses published in TXT records: the local set filtered down to
    /// dialable LAN addresses.
    fn publish_addrs(&self) -> Vec<String> {
        classifier::filter_dialable_addrs(&self.local_addrs.read().unwrap())
    }

    /// Register the announcement. `PortUnknown` flips the role to waiting
    /// instead of failing the discoverer.
    fn start_server(&self) -> DiscoveryResult<()> {
        let daemon = self
            .daemon
            .lock()
            .unwrap()
            .clone()
            .ok_or(DiscoveryError::NotStarted)?;

        let port = self.announce_port();
        if port == 0 {
            *self.server_state.write().unwrap() = ServerState::Waiting;
            info!("no local port known yet, mDNS running client-only");
            return Err(DiscoveryError::PortUnknown);
        }

        let instance = self.local_id.short();
        let host = format!(
            "{}.local.",
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "dep2p".to_string())
        );
        let properties: Vec<(String, String)> = build_txt_records(&self.local_id, &self.publish_addrs())
            .iter()
            .filter_map(|record| {
                record
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();
        let property_refs: Vec<(&str, &str)> = properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let ips = self.announce_ips();
        let service_info = if ips.is_empty() {
            ServiceInfo::new(
                &self.config.service_type(),
                &instance,
                &host,
                "",
                port,
                &property_refs[..],
            )
            .map(|info| info.enable_addr_auto())
        } else {
            ServiceInfo::new(
                &self.config.service_type(),
                &instance,
                &host,
                &ips[..],
                port,
                &property_refs[..],
            )
        }
        .map_err(|e| DiscoveryError::Mdns(e.to_string()))?;

        let fullname = service_info.get_fullname().to_string();
        daemon
            .register(service_info)
            .map_err(|e| DiscoveryError::Mdns(e.to_string()))?;

        info!(instance = %instance, port, "mDNS service registered");
        *self.server_state.write().unwrap() = ServerState::Running(fullname);
        Ok(())
    }

    /// Withdraw the announcement; the client role keeps running.
    fn stop_server(&self) {
        let previous = {
            let mut state = self.server_state.write().unwrap();
            std::mem::replace(&mut *state, ServerState::Waiting)
        };
        if let ServerState::Running(fullname) = previous {
            if let Some(daemon) = self.daemon.lock().unwrap().clone() {
                match daemon.unregister(&fullname) {
                    Ok(receiver) => {
                        // Wait for the confirmation so the goodbye packet
                        // actually goes out.
                        let _ = receiver.recv_timeout(STOP_GRACE);
                    }
                    Err(error) => debug!(%error, "mDNS unregister failed"),
                }
            }
        }
    }

    /// One browse tick: collect resolved entries for the browse window,
    /// then fold them into the peers map.
    async fn browse_once(&self) -> DiscoveryResult<()> {
        let daemon = self
            .daemon
            .lock()
            .unwrap()
            .clone()
            .ok_or(DiscoveryError::NotStarted)?;
        let service_type = self.config.service_type();
        let window = self.config.browse_window();

        let receiver = daemon
            .browse(&service_type)
            .map_err(|e| DiscoveryError::Mdns(e.to_string()))?;

        let resolved = tokio::task::spawn_blocking(move || {
            let mut entries = Vec::new();
            let deadline = Instant::now() + window;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match receiver.recv_timeout(remaining) {
                    Ok(ServiceEvent::ServiceResolved(info)) => entries.push(info),
                    Ok(ServiceEvent::SearchStopped(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            entries
        })
        .await
        .unwrap_or_default();

        if let Err(error) = daemon.stop_browse(&service_type) {
            trace!(%error, "stop_browse failed");
        }

        for info in resolved {
            self.handle_resolved(&info);
        }
        Ok(())
    }

    fn handle_resolved(&self, info: &ServiceInfo) {
        let pairs: Vec<(String, String)> = info
            .get_properties()
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect();
        let ips: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        if let Some(peer) = peer_from_entry(&self.local_id, &ips, info.get_port(), &pairs) {
            self.upsert_peer(peer);
        }
    }

    fn upsert_peer(&self, peer: PeerInfo) {
        let is_new = {
            let mut peers = self.peers.write().unwrap();
            let now = Instant::now();
            match peers.entry(peer.node_id) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(DiscoveredPeer {
                        info: peer.clone(),
                        last_seen: now,
                    });
                    true
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let entry = slot.get_mut();
                    entry.info = peer.clone();
                    entry.last_seen = now;
                    false
                }
            }
        };

        if is_new {
            debug!(
                peer = %peer.node_id.short(),
                addrs = peer.addresses.len(),
                "mDNS peer discovered"
            );
            self.dispatch_discovered(peer.clone());
            self.notify_subscribers(peer);
        }
    }

    /// Run the callback on a fresh task so a slow or panicking callback
    /// never stalls the browse path.
    fn dispatch_discovered(&self, peer: PeerInfo) {
        let callback = self.on_peer.read().unwrap().clone();
        if let Some(callback) = callback {
            let handle = tokio::spawn(async move { callback(peer) });
            tokio::spawn(async move {
                if let Err(error) = handle.await {
                    warn!(%error, "peer-discovered callback panicked");
                }
            });
        }
    }

    fn notify_subscribers(&self, peer: PeerInfo) {
        let senders: Vec<mpsc::Sender<PeerInfo>> = {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.retain(|tx| !tx.is_closed());
            subscribers.clone()
        };
        for tx in senders {
            let peer = peer.clone();
            tokio::spawn(async move {
                let _ = tx.send(peer).await;
            });
        }
    }

    /// Drop peers not seen within the TTL.
    fn cleanup_stale(&self) {
        let ttl = self.config.ttl();
        let now = Instant::now();
        let mut peers = self.peers.write().unwrap();
        let before = peers.len();
        peers.retain(|_, peer| peer.last_seen + ttl > now);
        let removed = before - peers.len();
        if removed > 0 {
            debug!(removed, "mDNS peers expired");
        }
    }
}

#[async_trait]
impl Discovery for MdnsDiscoverer {
    fn name(&self) -> &str {
        "mdns"
    }

    async fn start(&self, ctx: CancellationToken) -> DiscoveryResult<()> {
        {
            let mut ctx_guard = self.inner.ctx.write().unwrap();
            if ctx_guard.is_some() {
                return Ok(());
            }
            *ctx_guard = Some(ctx.clone());
        }

        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Mdns(e.to_string()))?;
        *self.inner.daemon.lock().unwrap() = Some(daemon);

        match self.inner.start_server() {
            Ok(()) => {}
            Err(DiscoveryError::PortUnknown) => {
                // Client-only until an address update brings a port.
            }
            Err(error) => {
                warn!(%error, "mDNS server role failed, running client-only");
                *self.inner.server_state.write().unwrap() = ServerState::Waiting;
            }
        }

        let inner = Arc::clone(&self.inner);
        let query_interval = self.inner.config.query_interval();
        let handle = tokio::spawn(async move {
            let mut query_ticker = tokio::time::interval(query_interval);
            query_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut cleanup_ticker = tokio::time::interval(CLEANUP_INTERVAL);
            cleanup_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = query_ticker.tick() => {
                        if let Err(error) = inner.browse_once().await {
                            debug!(%error, "mDNS browse tick failed");
                        }
                    }
                    _ = cleanup_ticker.tick() => inner.cleanup_stale(),
                }
            }
        });
        *self.inner.browse_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> DiscoveryResult<()> {
        let token = self.inner.ctx.write().unwrap().take();
        let Some(token) = token else {
            return Ok(());
        };
        token.cancel();

        // Give in-flight browse tasks a bounded drain period, then abandon.
        let handle = self.inner.browse_task.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(STOP_GRACE, handle).await.is_err() {
                debug!("browse task abandoned after stop grace period");
            }
        }

        self.inner.stop_server();
        *self.inner.server_state.write().unwrap() = ServerState::Stopped;

        let daemon = self.inner.daemon.lock().unwrap().take();
        if let Some(daemon) = daemon {
            match daemon.shutdown() {
                Ok(receiver) => {
                    let _ = receiver.recv_timeout(STOP_GRACE);
                }
                Err(error) => debug!(%error, "mDNS daemon shutdown failed"),
            }
        }
        Ok(())
    }

    async fn find_peers(
        &self,
        ctx: CancellationToken,
        _namespace: &str,
        opts: DiscoveryOptions,
    ) -> DiscoveryResult<mpsc::Receiver<PeerInfo>> {
        // Subscribe before snapshotting so nothing resolved in between is
        // lost; the seen-set below covers the overlap.
        let (live_tx, mut live_rx) = mpsc::channel(16);
        self.inner.subscribers.lock().unwrap().push(live_tx);
        let snapshot = self.inner.known_peers();

        let (tx, rx) = mpsc::channel(16);
        let limit = opts.limit;
        tokio::spawn(async move {
            let mut seen: std::collections::HashSet<NodeId> = std::collections::HashSet::new();
            for peer in snapshot {
                seen.insert(peer.node_id);
                if tx.send(peer).await.is_err() {
                    return;
                }
                if limit.is_some_and(|l| seen.len() >= l) {
                    return;
                }
            }
            // Dropping `live_rx` on any exit path closes our subscriber
            // slot, and dropping `tx` closes the caller's channel.
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => return,
                    peer = live_rx.recv() => {
                        let Some(peer) = peer else { return };
                        if seen.insert(peer.node_id) {
                            if tx.send(peer).await.is_err() {
                                return;
                            }
                            if limit.is_some_and(|l| seen.len() >= l) {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn advertise(
        &self,
        _ctx: CancellationToken,
        _namespace: &str,
        opts: DiscoveryOptions,
    ) -> DiscoveryResult<Duration> {
        let state = self.inner.server_state.read().unwrap().clone();
        match state {
            ServerState::Running(_) => Ok(opts.ttl.unwrap_or_else(|| self.inner.config.ttl())),
            ServerState::Waiting => match self.inner.start_server() {
                Ok(()) => Ok(opts.ttl.unwrap_or_else(|| self.inner.config.ttl())),
                Err(error) => Err(error),
            },
            ServerState::Stopped => Err(DiscoveryError::NotStarted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(seed: u8) -> NodeId {
        NodeId::from_bytes([seed; 32])
    }

    fn pairs_of(records: &[String]) -> Vec<(String, String)> {
        records
            .iter()
            .map(|r| {
                let (k, v) = r.split_once('=').unwrap();
                (k.to_string(), v.to_string())
            })
            .collect()
    }

    #[test]
    fn txt_records_round_trip() {
        let id = node(1);
        let addrs: Vec<String> = vec!["192.168.1.2:4001".into(), "10.0.0.3:4001".into()];
        let records = build_txt_records(&id, &addrs);

        assert_eq!(records[0], format!("id={}", id.to_base58()));
        let (parsed_id, parsed_addrs) = parse_txt_records(&pairs_of(&records));
        assert_eq!(parsed_id, Some(id));
        assert_eq!(parsed_addrs, addrs);
    }

    #[test]
    fn txt_records_stay_within_limit() {
        let id = node(2);
        let addrs: Vec<String> = (0..40)
            .map(|i| format!("192.168.1.{i}:40{i:02}"))
            .collect();
        let records = build_txt_records(&id, &addrs);

        assert!(records.len() > 2, "expected multiple addrs segments");
        for record in &records {
            assert!(record.len() <= TXT_RECORD_MAX, "{} bytes", record.len());
        }
        let (_, parsed) = parse_txt_records(&pairs_of(&records));
        assert_eq!(parsed, addrs);
    }

    #[test]
    fn oversized_address_is_dropped() {
        let id = node(3);
        let oversized = format!("{}:4001", "a".repeat(300));
        let addrs: Vec<String> = vec!["192.168.1.2:4001".into(), oversized];
        let records = build_txt_records(&id, &addrs);

        let (_, parsed) = parse_txt_records(&pairs_of(&records));
        assert_eq!(parsed, vec!["192.168.1.2:4001".to_string()]);
    }

    #[test]
    fn entry_with_txt_addrs() {
        let local = node(1);
        let remote = node(2);
        let txt = vec![
            ("id".to_string(), remote.to_base58()),
            (
                "addrs".to_string(),
                "10.0.0.9:4001,192.168.1.9:4001".to_string(),
            ),
        ];
        let peer = peer_from_entry(&local, &[], 0, &txt).unwrap();
        assert_eq!(peer.node_id, remote);
        // Sorted best-LAN-first: 192.168/16 outranks 10/8.
        assert_eq!(
            peer.addresses,
            vec!["192.168.1.9:4001".to_string(), "10.0.0.9:4001".to_string()]
        );
    }

    #[test]
    fn entry_fallback_gated_by_lan_check() {
        let local = node(1);
        let remote = node(2);
        let txt = vec![("id".to_string(), remote.to_base58())];
        let ips: Vec<IpAddr> = vec![
            "192.168.1.7".parse().unwrap(),
            "100.64.0.7".parse().unwrap(), // CGNAT, skipped
            "8.8.8.8".parse().unwrap(),    // public, skipped
        ];
        let peer = peer_from_entry(&local, &ips, 4001, &txt).unwrap();
        assert_eq!(peer.addresses, vec!["192.168.1.7:4001".to_string()]);
    }

    #[test]
    fn entry_without_id_or_from_self_is_ignored() {
        let local = node(1);
        let no_id = vec![("addrs".to_string(), "192.168.1.9:4001".to_string())];
        assert!(peer_from_entry(&local, &[], 0, &no_id).is_none());

        let self_entry = vec![("id".to_string(), local.to_base58())];
        let ips: Vec<IpAddr> = vec!["192.168.1.7".parse().unwrap()];
        assert!(peer_from_entry(&local, &ips, 4001, &self_entry).is_none());
    }

    #[test]
    fn entry_with_no_usable_addrs_is_ignored() {
        let local = node(1);
        let remote = node(2);
        let txt = vec![("id".to_string(), remote.to_base58())];
        let ips: Vec<IpAddr> = vec!["8.8.8.8".parse().unwrap()];
        assert!(peer_from_entry(&local, &ips, 4001, &txt).is_none());
    }

    #[test]
    fn multiple_addrs_segments_are_aggregated() {
        let remote = node(2);
        let pairs = vec![
            ("id".to_string(), remote.to_base58()),
            ("addrs".to_string(), "192.168.1.9:4001".to_string()),
            ("addrs".to_string(), "10.0.0.9:4001".to_string()),
        ];
        let (id, addrs) = parse_txt_records(&pairs);
        assert_eq!(id, Some(remote));
        assert_eq!(
            addrs,
            vec!["192.168.1.9:4001".to_string(), "10.0.0.9:4001".to_string()]
        );
    }

    #[test]
    fn config_validation() {
        assert!(MdnsConfig::default().validate().is_ok());

        let bad_tag = MdnsConfig {
            service_tag: "dep2p".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            bad_tag.validate(),
            Err(DiscoveryError::InvalidConfig(_))
        ));

        let zero_interval = MdnsConfig {
            query_interval_secs: 0,
            ..Default::default()
        };
        assert!(zero_interval.validate().is_err());
    }

    #[test]
    fn service_type_combines_tag_and_domain() {
        let config = MdnsConfig::default();
        assert_eq!(config.service_type(), "_dep2p._udp.local.");
    }

    #[test]
    fn constructor_rejects_bad_config() {
        let bad = MdnsConfig {
            service_tag: String::new(),
            ..Default::default()
        };
        assert!(MdnsDiscoverer::new(node(1), bad).is_err());
    }

    #[tokio::test]
    async fn upsert_reports_new_peers_once() {
        let discoverer = MdnsDiscoverer::new(node(1), MdnsConfig::default()).unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            discoverer.set_on_peer_discovered(Arc::new(move |peer| {
                seen.lock().unwrap().push(peer.node_id);
            }));
        }

        let peer = PeerInfo::new(node(2), vec!["192.168.1.9:4001".to_string()]);
        discoverer.inner.upsert_peer(peer.clone());
        discoverer.inner.upsert_peer(peer);

        // Let the dispatch tasks run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(discoverer.known_peers().len(), 1);
    }

    #[tokio::test]
    async fn waiting_state_until_port_known() {
        let discoverer = MdnsDiscoverer::new(node(1), MdnsConfig::default()).unwrap();
        // Without a daemon, start_server cannot run; drive the state machine
        // through update_local_addrs only.
        assert!(!discoverer.is_announcing());
        discoverer.update_local_addrs(vec!["10.0.0.1".to_string()]);
        assert!(!discoverer.is_announcing());
    }

    #[tokio::test]
    async fn stale_peers_are_cleaned_up() {
        let config = MdnsConfig {
            ttl_secs: 1,
            ..Default::default()
        };
        let discoverer = MdnsDiscoverer::new(node(1), config).unwrap();
        discoverer
            .inner
            .upsert_peer(PeerInfo::new(node(2), vec!["192.168.1.9:4001".to_string()]));
        assert_eq!(discoverer.known_peers().len(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        discoverer.inner.cleanup_stale();
        assert!(discoverer.known_peers().is_empty());
    }

    #[tokio::test]
    async fn advertise_before_start_is_not_started() {
        let discoverer = MdnsDiscoverer::new(node(1), MdnsConfig::default()).unwrap();
        let error = discoverer
            .advertise(
                CancellationToken::new(),
                "ns",
                DiscoveryOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, DiscoveryError::NotStarted));
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let discoverer = MdnsDiscoverer::new(node(1), MdnsConfig::default()).unwrap();
        discoverer.stop().await.unwrap();
    }
}
