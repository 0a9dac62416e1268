// Copyright (c) 2024 The dep2p Authors

//! The reachability coordinator.
//!
//! Reconciles candidate addresses reported by many sources (STUN, port
//! mappings, local listeners, relay reservations, witnessed inbound dials)
//! into three prioritized views. The doctrine is reachability-first: a relay
//! that works beats an unverified direct path, so unverified candidates are
//! never advertised.
//!
//! All state lives in one store behind one mutex; the views are recomputed
//! from it on every query rather than cached. The only outward signal is the
//! `on_address_changed` callback, fired (off-lock, serialized) whenever the
//! advertised list actually changes.

use crate::{
    candidate::{source, AddressPriority, CandidateAddress},
    config::ReachabilityConfig,
    error::ReachabilityResult,
};
use dep2p_common::{classifier, NodeId};
use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    net::IpAddr,
    sync::{Arc, Mutex, RwLock},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Callback invoked with the new advertised list when it changes.
pub type AddressChangedCallback = Box<dyn Fn(Vec<String>) + Send + Sync>;

/// Snapshot counters over the candidate store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReachabilityStats {
    /// All tracked entries.
    pub total: usize,
    /// Verified non-relay entries.
    pub verified_direct: usize,
    /// Relay-backed entries.
    pub relay: usize,
    /// Unverified candidates.
    pub candidates: usize,
}

struct Inner {
    candidates: HashMap<String, CandidateAddress>,
    /// Per-address set of remote subnets that witnessed an inbound dial.
    witness_subnets: HashMap<String, HashSet<String>>,
    last_notified: Vec<String>,
}

/// Tracks candidate and verified external addresses from many sources.
pub struct ReachabilityCoordinator {
    config: ReachabilityConfig,
    inner: Mutex<Inner>,
    /// Callback storage and dispatch serialization in one lock.
    callback: Mutex<Option<AddressChangedCallback>>,
    /// Worker cancellation, on its own lock so `stop` never races the
    /// candidate store.
    ctx: RwLock<Option<CancellationToken>>,
}

impl ReachabilityCoordinator {
    /// Create a coordinator with the given configuration. Fails only on
    /// invalid configuration.
    pub fn new(config: ReachabilityConfig) -> ReachabilityResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                candidates: HashMap::new(),
                witness_subnets: HashMap::new(),
                last_notified: Vec::new(),
            }),
            callback: Mutex::new(None),
            ctx: RwLock::new(None),
        }))
    }

    /// Create a coordinator with default configuration.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(ReachabilityConfig::default()).expect("default configuration is valid")
    }

    /// Install the advertised-list change callback.
    pub fn set_on_address_changed(&self, callback: AddressChangedCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    /// Start the periodic expiry sweep. Idempotent; the coordinator is
    /// shared behind an `Arc`, and starting hands the sweep task its own
    /// handle.
    pub fn start(self: Arc<Self>) {
        let mut ctx_guard = self.ctx.write().unwrap();
        if ctx_guard.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *ctx_guard = Some(token.clone());
        drop(ctx_guard);

        let interval = self.config.sweep_interval();
        let this = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => this.sweep_expired(),
                }
            }
        });
    }

    /// Stop the sweep task. Idempotent; safe to call before `start`.
    pub fn stop(&self) {
        if let Some(token) = self.ctx.write().unwrap().take() {
            token.cancel();
        }
    }

    fn addr_is_usable(addr: &str) -> bool {
        !addr.is_empty()
            && (classifier::classify(addr) != classifier::Classification::Unknown
                || classifier::extract_ip(addr).is_some()
                || classifier::split_host_port(addr).is_some())
    }

    /// Record a direct address candidate. Inserts new entries unverified
    /// with the candidate TTL; an existing entry keeps its verified state
    /// and only upgrades priority.
    pub fn on_direct_address_candidate(
        &self,
        addr: &str,
        source: &str,
        priority: AddressPriority,
    ) {
        if !Self::addr_is_usable(addr) {
            trace!(addr, "dropping unusable candidate");
            return;
        }
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            let ttl = self.config.candidate_ttl();
            match inner.candidates.entry(addr.to_string()) {
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if priority > existing.priority {
                        existing.priority = priority;
                    }
                    existing.source = source.to_string();
                    if !existing.verified {
                        existing.expires_at = Some(now + ttl);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(CandidateAddress {
                        addr: addr.to_string(),
                        priority,
                        source: source.to_string(),
                        added_at: now,
                        expires_at: Some(now + ttl),
                        verified: false,
                    });
                }
            }
            self.refresh_notified(&mut inner)
        };
        self.dispatch(changed);
    }

    /// Atomically replace all candidates reported by `source`: entries from
    /// that source absent from the new list are removed.
    pub fn update_direct_candidates(&self, source: &str, entries: &[(String, AddressPriority)]) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            let ttl = self.config.candidate_ttl();

            let keep: HashSet<&str> = entries.iter().map(|(addr, _)| addr.as_str()).collect();
            inner
                .candidates
                .retain(|addr, entry| entry.source != source || keep.contains(addr.as_str()));

            for (addr, priority) in entries {
                if !Self::addr_is_usable(addr) {
                    continue;
                }
                match inner.candidates.entry(addr.clone()) {
                    Entry::Occupied(mut slot) => {
                        let existing = slot.get_mut();
                        if *priority > existing.priority {
                            existing.priority = *priority;
                        }
                        existing.source = source.to_string();
                        if !existing.verified {
                            existing.expires_at = Some(now + ttl);
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(CandidateAddress {
                            addr: addr.clone(),
                            priority: *priority,
                            source: source.to_string(),
                            added_at: now,
                            expires_at: Some(now + ttl),
                            verified: false,
                        });
                    }
                }
            }
            self.refresh_notified(&mut inner)
        };
        self.dispatch(changed);
    }

    /// Mark an address as verified (dial-back or STUN acceptance), extending
    /// its lifetime to the verified TTL.
    pub fn on_direct_address_verified(&self, addr: &str, source: &str, priority: AddressPriority) {
        if !Self::addr_is_usable(addr) {
            return;
        }
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            let ttl = self.config.verified_ttl();
            let entry = inner
                .candidates
                .entry(addr.to_string())
                .or_insert_with(|| CandidateAddress {
                    addr: addr.to_string(),
                    priority,
                    source: source.to_string(),
                    added_at: now,
                    expires_at: None,
                    verified: false,
                });
            entry.verified = true;
            if priority > entry.priority {
                entry.priority = priority;
            }
            entry.source = source.to_string();
            entry.expires_at = Some(now + ttl);
            self.refresh_notified(&mut inner)
        };
        debug!(addr, source, "address verified");
        self.dispatch(changed);
    }

    /// Explicitly expire an address.
    pub fn on_direct_address_expired(&self, addr: &str) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            inner.candidates.remove(addr);
            inner.witness_subnets.remove(addr);
            self.refresh_notified(&mut inner)
        };
        self.dispatch(changed);
    }

    /// Record a user-declared public address: never verified by dial-back,
    /// never expires, always advertised first.
    pub fn on_configured_address(&self, addr: &str) {
        if !Self::addr_is_usable(addr) {
            return;
        }
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            inner.candidates.insert(
                addr.to_string(),
                CandidateAddress {
                    addr: addr.to_string(),
                    priority: AddressPriority::ConfiguredAdvertise,
                    source: source::CONFIGURED.to_string(),
                    added_at: now,
                    expires_at: None,
                    verified: true,
                },
            );
            self.refresh_notified(&mut inner)
        };
        self.dispatch(changed);
    }

    /// Record relay reservation addresses. Relay guarantees count as
    /// verified and live until the reservation is dropped.
    pub fn on_relay_reserved(&self, addrs: &[String]) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            for addr in addrs {
                if !Self::addr_is_usable(addr) {
                    continue;
                }
                inner.candidates.insert(
                    addr.clone(),
                    CandidateAddress {
                        addr: addr.clone(),
                        priority: AddressPriority::RelayGuarantee,
                        source: source::RELAY.to_string(),
                        added_at: now,
                        expires_at: None,
                        verified: true,
                    },
                );
            }
            self.refresh_notified(&mut inner)
        };
        self.dispatch(changed);
    }

    /// Record that a remote peer reached us at `dialed_addr`. Enough
    /// witnesses from distinct subnets promote an unverified candidate.
    pub fn on_inbound_witness(&self, dialed_addr: &str, remote_peer: &NodeId, remote_ip: IpAddr) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let key = subnet_key(remote_ip);
            inner
                .witness_subnets
                .entry(dialed_addr.to_string())
                .or_default()
                .insert(key);

            let subnets = inner
                .witness_subnets
                .get(dialed_addr)
                .map(|s| s.len())
                .unwrap_or(0);
            let min_witnesses = self.config.min_witnesses;
            let verified_ttl = self.config.verified_ttl();
            let now = Instant::now();

            let promoted = match inner.candidates.get_mut(dialed_addr) {
                Some(entry) if !entry.verified && subnets >= min_witnesses => {
                    entry.verified = true;
                    if AddressPriority::VerifiedDirect > entry.priority {
                        entry.priority = AddressPriority::VerifiedDirect;
                    }
                    entry.source = source::WITNESS.to_string();
                    entry.expires_at = Some(now + verified_ttl);
                    true
                }
                _ => false,
            };
            if promoted {
                debug!(
                    addr = dialed_addr,
                    peer = %remote_peer.short(),
                    subnets,
                    "candidate promoted by witness evidence"
                );
            }
            self.refresh_notified(&mut inner)
        };
        self.dispatch(changed);
    }

    /// Drop expired entries. Called from the sweep task and usable directly
    /// in tests.
    pub fn sweep_expired(&self) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            let before = inner.candidates.len();
            inner.candidates.retain(|_, entry| !entry.is_expired(now));
            let removed = before - inner.candidates.len();
            let live: HashSet<String> = inner.candidates.keys().cloned().collect();
            inner
                .witness_subnets
                .retain(|addr, _| live.contains(addr.as_str()));
            if removed > 0 {
                debug!(removed, "swept expired candidates");
            }
            self.refresh_notified(&mut inner)
        };
        self.dispatch(changed);
    }

    /// The prioritized, verified set the node announces to peers.
    pub fn advertised_addrs(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        Self::compute_advertised(&self.config, &inner.candidates)
    }

    /// Verified, publicly routable addresses safe to hand to third parties.
    pub fn shareable_addrs(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<&CandidateAddress> = inner
            .candidates
            .values()
            .filter(|c| c.verified && classifier::is_public(&c.addr))
            .collect();
        entries.sort_by(Self::priority_order);
        entries.iter().map(|c| c.addr.clone()).collect()
    }

    /// Targets for hole punching: STUN candidates plus verified direct,
    /// relay excluded (relay is the fallback path, not a punch target).
    pub fn hole_punch_addrs(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<&CandidateAddress> = inner
            .candidates
            .values()
            .filter(|c| c.priority != AddressPriority::RelayGuarantee)
            .filter(|c| {
                c.verified
                    || c.priority == AddressPriority::StunDiscovered
                    || c.source == source::STUN
            })
            .collect();
        entries.sort_by(Self::priority_order);
        entries.iter().map(|c| c.addr.clone()).collect()
    }

    /// Verified non-relay addresses.
    pub fn verified_direct_addresses(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<&CandidateAddress> = inner
            .candidates
            .values()
            .filter(|c| c.verified && c.priority != AddressPriority::RelayGuarantee)
            .collect();
        entries.sort_by(Self::priority_order);
        entries.iter().map(|c| c.addr.clone()).collect()
    }

    /// Unverified candidates.
    pub fn candidate_direct_addresses(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<&CandidateAddress> =
            inner.candidates.values().filter(|c| !c.verified).collect();
        entries.sort_by(Self::priority_order);
        entries.iter().map(|c| c.addr.clone()).collect()
    }

    /// Relay-backed addresses.
    pub fn relay_addresses(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .candidates
            .values()
            .filter(|c| c.priority == AddressPriority::RelayGuarantee)
            .map(|c| c.addr.clone())
            .collect()
    }

    /// True when at least one relay reservation is live.
    pub fn has_relay_address(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .candidates
            .values()
            .any(|c| c.priority == AddressPriority::RelayGuarantee)
    }

    /// True when at least one direct address is verified.
    pub fn has_verified_direct_address(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .candidates
            .values()
            .any(|c| c.verified && c.priority != AddressPriority::RelayGuarantee)
    }

    /// Snapshot counters.
    pub fn stats(&self) -> ReachabilityStats {
        let inner = self.inner.lock().unwrap();
        let mut stats = ReachabilityStats {
            total: inner.candidates.len(),
            ..Default::default()
        };
        for entry in inner.candidates.values() {
            if entry.priority == AddressPriority::RelayGuarantee {
                stats.relay += 1;
            } else if entry.verified {
                stats.verified_direct += 1;
            } else {
                stats.candidates += 1;
            }
        }
        stats
    }

    fn priority_order(a: &&CandidateAddress, b: &&CandidateAddress) -> core::cmp::Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.added_at.cmp(&b.added_at))
            .then_with(|| a.addr.cmp(&b.addr))
    }

    fn compute_advertised(
        config: &ReachabilityConfig,
        candidates: &HashMap<String, CandidateAddress>,
    ) -> Vec<String> {
        let mut direct: Vec<&CandidateAddress> = candidates
            .values()
            .filter(|c| c.verified && c.priority != AddressPriority::RelayGuarantee)
            .collect();
        direct.sort_by(Self::priority_order);
        direct.truncate(config.max_verified_direct_addrs);

        let mut relay: Vec<&CandidateAddress> = candidates
            .values()
            .filter(|c| c.priority == AddressPriority::RelayGuarantee)
            .collect();
        relay.sort_by(Self::priority_order);

        let mut combined = direct;
        combined.extend(relay);
        combined.sort_by(Self::priority_order);

        if combined.is_empty() {
            // Listen fallback: a LAN-only node still advertises its bound
            // addresses rather than nothing at all.
            let mut listen: Vec<&CandidateAddress> = candidates
                .values()
                .filter(|c| c.priority == AddressPriority::LocalListen)
                .collect();
            listen.sort_by(Self::priority_order);
            return listen.iter().map(|c| c.addr.clone()).collect();
        }
        combined.iter().map(|c| c.addr.clone()).collect()
    }

    /// Recompute the advertised list under the lock; returns the new list
    /// when it differs from the last notified one.
    fn refresh_notified(&self, inner: &mut Inner) -> Option<Vec<String>> {
        let advertised = Self::compute_advertised(&self.config, &inner.candidates);
        if advertised == inner.last_notified {
            return None;
        }
        inner.last_notified = advertised.clone();
        Some(advertised)
    }

    /// Invoke the change callback outside the state lock. Holding the
    /// callback mutex across the call serializes invocations.
    fn dispatch(&self, changed: Option<Vec<String>>) {
        if let Some(addrs) = changed {
            let guard = self.callback.lock().unwrap();
            if let Some(callback) = guard.as_ref() {
                callback(addrs);
            }
        }
    }
}

impl Drop for ReachabilityCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Collapse a remote IP to its witness subnet: IPv4 `/24`, IPv6 `/48`.
/// Witnesses inside one subnet count once.
fn subnet_key(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!("v4:{}.{}.{}", octets[0], octets[1], octets[2])
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            format!("v6:{:x}:{:x}:{:x}", segments[0], segments[1], segments[2])
        }
    }
}
