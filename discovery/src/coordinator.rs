// Copyright (c) 2024 The dep2p Authors

//! The discovery coordinator.
//!
//! A uniform front-end over any number of registered [`Discovery`] backends:
//! `find_peers` fans out to all of them and merges their streams with
//! NodeId-level deduplication; `advertise` runs them in parallel and reports
//! the smallest TTL so the caller re-advertises at the fastest cadence any
//! backend wants. One failing backend never fails the aggregate.

use crate::{
    backend::{Discovery, DiscoveryOptions},
    error::{DiscoveryError, DiscoveryResult},
    namespace::normalize_namespace,
};
use dep2p_common::{NodeId, PeerInfo};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the merged peer channel handed to callers.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Aggregates pluggable discovery backends behind one interface.
pub struct DiscoveryCoordinator {
    backends: RwLock<HashMap<String, Arc<dyn Discovery>>>,
    /// Coordinator lifetime token, on its own lock so registration and
    /// `stop` never contend with the backend map.
    ctx: RwLock<Option<CancellationToken>>,
}

impl DiscoveryCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            backends: RwLock::new(HashMap::new()),
            ctx: RwLock::new(None),
        })
    }

    /// Register a backend under its own name.
    ///
    /// Registration is allowed before or after `start`; after `start` the
    /// backend is started immediately inside the coordinator's context.
    pub async fn register(&self, backend: Arc<dyn Discovery>) {
        let name = backend.name().to_string();
        let running_ctx = self.ctx.read().unwrap().clone();
        self.backends
            .write()
            .unwrap()
            .insert(name.clone(), Arc::clone(&backend));

        if let Some(token) = running_ctx {
            if let Err(error) = backend.start(token.child_token()).await {
                warn!(backend = %name, %error, "late-registered backend failed to start");
            } else {
                info!(backend = %name, "backend registered and started");
            }
        } else {
            debug!(backend = %name, "backend registered");
        }
    }

    /// Remove a backend and stop it.
    pub async fn deregister(&self, name: &str) -> DiscoveryResult<()> {
        let backend = self
            .backends
            .write()
            .unwrap()
            .remove(name)
            .ok_or_else(|| DiscoveryError::UnknownBackend(name.to_string()))?;
        backend.stop().await
    }

    /// Names of the registered backends.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().unwrap().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Start the coordinator and every registered backend. Idempotent.
    pub async fn start(&self) -> DiscoveryResult<()> {
        let token = {
            let mut ctx = self.ctx.write().unwrap();
            if ctx.is_some() {
                return Ok(());
            }
            let token = CancellationToken::new();
            *ctx = Some(token.clone());
            token
        };

        for backend in self.snapshot() {
            if let Err(error) = backend.start(token.child_token()).await {
                warn!(backend = backend.name(), %error, "backend failed to start");
            }
        }
        Ok(())
    }

    /// Cancel the context and stop every backend. Idempotent.
    pub async fn stop(&self) {
        let token = self.ctx.write().unwrap().take();
        if let Some(token) = token {
            token.cancel();
        }
        for backend in self.snapshot() {
            if let Err(error) = backend.stop().await {
                debug!(backend = backend.name(), %error, "backend stop failed");
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Discovery>> {
        self.backends.read().unwrap().values().cloned().collect()
    }

    /// Find peers under a namespace across all backends.
    ///
    /// Peers are delivered in arrival order, deduplicated by NodeId; a
    /// repeat sighting is re-delivered only when it contributes new
    /// addresses (with the merged, order-preserving union). The channel
    /// closes when every backend finishes, the limit is reached, or `ctx`
    /// is cancelled.
    pub async fn find_peers(
        &self,
        ctx: CancellationToken,
        namespace: &str,
        opts: DiscoveryOptions,
    ) -> DiscoveryResult<mpsc::Receiver<PeerInfo>> {
        let namespace = normalize_namespace(namespace);
        let backends = self.snapshot();
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        if backends.is_empty() {
            // No backends: an immediately-closed channel, not an error.
            return Ok(out_rx);
        }

        let call_ctx = ctx.child_token();
        let (merge_tx, mut merge_rx) = mpsc::channel::<PeerInfo>(OUTPUT_CHANNEL_CAPACITY);

        for backend in backends {
            let backend_ctx = call_ctx.child_token();
            let namespace = namespace.clone();
            let merge_tx = merge_tx.clone();
            tokio::spawn(async move {
                match backend.find_peers(backend_ctx, &namespace, opts).await {
                    Ok(mut rx) => {
                        while let Some(peer) = rx.recv().await {
                            if merge_tx.send(peer).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(error) => {
                        debug!(backend = backend.name(), %error, "find_peers backend failed");
                    }
                }
            });
        }
        // The merge loop ends when every drain task has dropped its sender.
        drop(merge_tx);

        tokio::spawn(async move {
            let mut seen: HashMap<NodeId, PeerInfo> = HashMap::new();
            loop {
                let peer = tokio::select! {
                    _ = call_ctx.cancelled() => break,
                    peer = merge_rx.recv() => match peer {
                        Some(peer) => peer,
                        None => break,
                    },
                };

                let delivery = match seen.entry(peer.node_id) {
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        slot.insert(peer.clone());
                        Some(peer)
                    }
                    std::collections::hash_map::Entry::Occupied(mut slot) => {
                        let existing = slot.get_mut();
                        let before = existing.addresses.len();
                        existing.merge(&peer);
                        (existing.addresses.len() > before).then(|| existing.clone())
                    }
                };

                if let Some(peer) = delivery {
                    if out_tx.send(peer).await.is_err() {
                        break;
                    }
                    if let Some(limit) = opts.limit {
                        if seen.len() >= limit {
                            break;
                        }
                    }
                }
            }
            // Cancel remaining backend work for this call on the way out.
            call_ctx.cancel();
        });

        Ok(out_rx)
    }

    /// Advertise under a namespace on every backend in parallel.
    ///
    /// Returns the minimum TTL among the successful backends; the caller
    /// should re-advertise at that cadence. Individual failures are logged;
    /// only all-failing is an error.
    pub async fn advertise(
        &self,
        ctx: CancellationToken,
        namespace: &str,
        opts: DiscoveryOptions,
    ) -> DiscoveryResult<Duration> {
        let namespace = normalize_namespace(namespace);
        let backends = self.snapshot();
        if backends.is_empty() {
            return Err(DiscoveryError::AllBackendsFailed(
                "no backends registered".to_string(),
            ));
        }

        let call_ctx = ctx.child_token();
        let results = futures::future::join_all(backends.iter().map(|backend| {
            let backend_ctx = call_ctx.child_token();
            let namespace = namespace.clone();
            async move {
                let outcome = backend.advertise(backend_ctx, &namespace, opts).await;
                (backend.name().to_string(), outcome)
            }
        }))
        .await;

        let mut min_ttl: Option<Duration> = None;
        let mut failures = Vec::new();
        for (name, outcome) in results {
            match outcome {
                Ok(ttl) => {
                    min_ttl = Some(min_ttl.map_or(ttl, |current| current.min(ttl)));
                }
                Err(error) => {
                    debug!(backend = %name, %error, "advertise backend failed");
                    failures.push(format!("{name}: {error}"));
                }
            }
        }

        min_ttl.ok_or_else(|| DiscoveryError::AllBackendsFailed(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn peer(seed: u8, addrs: &[&str]) -> PeerInfo {
        PeerInfo::new(
            NodeId::from_bytes([seed; 32]),
            addrs.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Test backend yielding a fixed peer list with an optional delay.
    struct FixedBackend {
        name: String,
        peers: Vec<PeerInfo>,
        ttl: Option<Duration>,
        delay: Duration,
        started: AtomicBool,
        seen_namespace: std::sync::Mutex<Option<String>>,
    }

    impl FixedBackend {
        fn new(name: &str, peers: Vec<PeerInfo>, ttl: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                peers,
                ttl,
                delay: Duration::ZERO,
                started: AtomicBool::new(false),
                seen_namespace: std::sync::Mutex::new(None),
            })
        }

        fn with_delay(name: &str, peers: Vec<PeerInfo>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                peers,
                ttl: Some(Duration::from_secs(600)),
                delay,
                started: AtomicBool::new(false),
                seen_namespace: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Discovery for FixedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self, _ctx: CancellationToken) -> DiscoveryResult<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> DiscoveryResult<()> {
            self.started.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn find_peers(
            &self,
            ctx: CancellationToken,
            namespace: &str,
            _opts: DiscoveryOptions,
        ) -> DiscoveryResult<mpsc::Receiver<PeerInfo>> {
            *self.seen_namespace.lock().unwrap() = Some(namespace.to_string());
            let (tx, rx) = mpsc::channel(8);
            let peers = self.peers.clone();
            let delay = self.delay;
            tokio::spawn(async move {
                for peer in peers {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    tokio::select! {
                        _ = ctx.cancelled() => return,
                        sent = tx.send(peer) => {
                            if sent.is_err() {
                                return;
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
            namespace: &str,
            _opts: DiscoveryOptions,
        ) -> DiscoveryResult<Duration> {
            *self.seen_namespace.lock().unwrap() = Some(namespace.to_string());
            self.ttl
                .ok_or_else(|| DiscoveryError::Mdns("advertise unavailable".to_string()))
        }
    }

    async fn drain(mut rx: mpsc::Receiver<PeerInfo>) -> Vec<PeerInfo> {
        let mut out = Vec::new();
        while let Some(peer) = rx.recv().await {
            out.push(peer);
        }
        out
    }

    #[tokio::test]
    async fn fan_out_merges_and_dedups() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator
            .register(FixedBackend::new(
                "a",
                vec![peer(1, &["x:1"]), peer(2, &["y:2"])],
                None,
            ))
            .await;
        coordinator
            .register(FixedBackend::new(
                "b",
                vec![peer(2, &["y:2"]), peer(3, &["z:3"])],
                None,
            ))
            .await;
        coordinator.start().await.unwrap();

        let rx = coordinator
            .find_peers(CancellationToken::new(), "ns", DiscoveryOptions::default())
            .await
            .unwrap();
        let peers = drain(rx).await;

        let mut ids: Vec<u8> = peers.iter().map(|p| p.node_id.as_bytes()[0]).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, vec![1, 2, 3]);
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn repeat_sighting_with_new_addresses_is_merged() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator
            .register(FixedBackend::new("a", vec![peer(1, &["x:1"])], None))
            .await;
        coordinator
            .register(FixedBackend::with_delay(
                "b",
                vec![peer(1, &["x:1", "w:9"])],
                Duration::from_millis(30),
            ))
            .await;
        coordinator.start().await.unwrap();

        let rx = coordinator
            .find_peers(CancellationToken::new(), "ns", DiscoveryOptions::default())
            .await
            .unwrap();
        let peers = drain(rx).await;

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].addresses, vec!["x:1"]);
        // Second delivery carries the order-preserving union.
        assert_eq!(peers[1].addresses, vec!["x:1", "w:9"]);
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn limit_stops_after_n_distinct_peers() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator
            .register(FixedBackend::new(
                "a",
                vec![peer(1, &["x:1"]), peer(2, &["y:2"]), peer(3, &["z:3"])],
                None,
            ))
            .await;
        coordinator.start().await.unwrap();

        let rx = coordinator
            .find_peers(
                CancellationToken::new(),
                "ns",
                DiscoveryOptions::with_limit(2),
            )
            .await
            .unwrap();
        let peers = drain(rx).await;
        assert_eq!(peers.len(), 2);
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn cancellation_closes_the_stream() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator
            .register(FixedBackend::with_delay(
                "slow",
                vec![peer(1, &["x:1"]), peer(2, &["y:2"])],
                Duration::from_secs(30),
            ))
            .await;
        coordinator.start().await.unwrap();

        let ctx = CancellationToken::new();
        let rx = coordinator
            .find_peers(ctx.clone(), "ns", DiscoveryOptions::default())
            .await
            .unwrap();
        ctx.cancel();

        let peers = tokio::time::timeout(Duration::from_secs(1), drain(rx))
            .await
            .expect("stream must close promptly on cancellation");
        assert!(peers.is_empty());
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn advertise_returns_minimum_ttl() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator
            .register(FixedBackend::new(
                "a",
                vec![],
                Some(Duration::from_secs(600)),
            ))
            .await;
        coordinator
            .register(FixedBackend::new(
                "b",
                vec![],
                Some(Duration::from_secs(60)),
            ))
            .await;
        // A failing backend does not fail the aggregate.
        coordinator.register(FixedBackend::new("c", vec![], None)).await;
        coordinator.start().await.unwrap();

        let ttl = coordinator
            .advertise(CancellationToken::new(), "ns", DiscoveryOptions::default())
            .await
            .unwrap();
        assert_eq!(ttl, Duration::from_secs(60));
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn advertise_all_failing_is_an_error() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator.register(FixedBackend::new("a", vec![], None)).await;
        coordinator.register(FixedBackend::new("b", vec![], None)).await;
        coordinator.start().await.unwrap();

        let error = coordinator
            .advertise(CancellationToken::new(), "ns", DiscoveryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, DiscoveryError::AllBackendsFailed(_)));
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn namespaces_are_normalized_before_dispatch() {
        let coordinator = DiscoveryCoordinator::new();
        let backend = FixedBackend::new("a", vec![], Some(Duration::from_secs(600)));
        coordinator.register(Arc::clone(&backend) as Arc<dyn Discovery>).await;
        coordinator.start().await.unwrap();

        coordinator
            .advertise(
                CancellationToken::new(),
                "/dep2p/v2/realm/abcd/provider/my/app",
                DiscoveryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            backend.seen_namespace.lock().unwrap().as_deref(),
            Some("my/app")
        );
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn late_registration_starts_the_backend() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator.start().await.unwrap();

        let backend = FixedBackend::new("late", vec![], Some(Duration::from_secs(600)));
        coordinator.register(Arc::clone(&backend) as Arc<dyn Discovery>).await;
        assert!(backend.started.load(Ordering::SeqCst));
        coordinator.stop().await;
        assert!(!backend.started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn find_peers_with_no_backends_closes_immediately() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator.start().await.unwrap();
        let rx = coordinator
            .find_peers(CancellationToken::new(), "ns", DiscoveryOptions::default())
            .await
            .unwrap();
        assert!(drain(rx).await.is_empty());
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn peers_arrive_in_arrival_order() {
        let coordinator = DiscoveryCoordinator::new();
        coordinator
            .register(FixedBackend::new("fast", vec![peer(1, &["x:1"])], None))
            .await;
        coordinator
            .register(FixedBackend::with_delay(
                "slow",
                vec![peer(2, &["y:2"])],
                Duration::from_millis(50),
            ))
            .await;
        coordinator.start().await.unwrap();

        let rx = coordinator
            .find_peers(CancellationToken::new(), "ns", DiscoveryOptions::default())
            .await
            .unwrap();
        let peers = drain(rx).await;
        assert_eq!(peers.len(), 2);
        // The fast backend's peer is delivered first.
        assert_eq!(peers[0].node_id, NodeId::from_bytes([1u8; 32]));
        coordinator.stop().await;
    }
}
