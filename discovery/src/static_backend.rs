// Copyright (c) 2024 The dep2p Authors

//! Static bootstrap backend.
//!
//! The simplest possible [`Discovery`] implementation: a fixed peer list
//! from configuration. `find_peers` streams the list; `advertise` has
//! nothing to do and just reports its configured re-advertise TTL. Useful
//! both as the bootstrap source on fresh nodes and as a deterministic
//! backend in tests.

use crate::{
    backend::{Discovery, DiscoveryOptions},
    error::DiscoveryResult,
};
use async_trait::async_trait;
use dep2p_common::PeerInfo;
use std::{
    sync::RwLock,
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default re-advertise cadence reported by the backend.
pub const DEFAULT_BOOTSTRAP_TTL: Duration = Duration::from_secs(30 * 60);

/// Discovery backend over a fixed bootstrap peer list.
pub struct StaticDiscoverer {
    peers: RwLock<Vec<PeerInfo>>,
    ttl: Duration,
}

impl StaticDiscoverer {
    /// Build from a bootstrap list.
    pub fn new(peers: Vec<PeerInfo>) -> Self {
        Self {
            peers: RwLock::new(peers),
            ttl: DEFAULT_BOOTSTRAP_TTL,
        }
    }

    /// Override the reported re-advertise TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replace the bootstrap list.
    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        *self.peers.write().unwrap() = peers;
    }
}

#[async_trait]
impl Discovery for StaticDiscoverer {
    fn name(&self) -> &str {
        "bootstrap"
    }

    async fn start(&self, _ctx: CancellationToken) -> DiscoveryResult<()> {
        Ok(())
    }

    async fn stop(&self) -> DiscoveryResult<()> {
        Ok(())
    }

    async fn find_peers(
        &self,
        ctx: CancellationToken,
        _namespace: &str,
        opts: DiscoveryOptions,
    ) -> DiscoveryResult<mpsc::Receiver<PeerInfo>> {
        let mut peers = self.peers.read().unwrap().clone();
        if let Some(limit) = opts.limit {
            peers.truncate(limit);
        }
        let (tx, rx) = mpsc::channel(peers.len().max(1));
        tokio::spawn(async move {
            for peer in peers {
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
        _namespace: &str,
        opts: DiscoveryOptions,
    ) -> DiscoveryResult<Duration> {
        Ok(opts.ttl.unwrap_or(self.ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dep2p_common::NodeId;

    fn peer(seed: u8) -> PeerInfo {
        PeerInfo::new(NodeId::from_bytes([seed; 32]), vec![format!("10.0.0.{seed}:4001")])
    }

    #[tokio::test]
    async fn streams_the_configured_list() {
        let backend = StaticDiscoverer::new(vec![peer(1), peer(2)]);
        let mut rx = backend
            .find_peers(
                CancellationToken::new(),
                "ns",
                DiscoveryOptions::default(),
            )
            .await
            .unwrap();

        let mut out = Vec::new();
        while let Some(info) = rx.recv().await {
            out.push(info);
        }
        assert_eq!(out, vec![peer(1), peer(2)]);
    }

    #[tokio::test]
    async fn respects_limit() {
        let backend = StaticDiscoverer::new(vec![peer(1), peer(2), peer(3)]);
        let mut rx = backend
            .find_peers(
                CancellationToken::new(),
                "ns",
                DiscoveryOptions::with_limit(1),
            )
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(peer(1)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn advertise_reports_ttl() {
        let backend =
            StaticDiscoverer::new(vec![]).with_ttl(Duration::from_secs(120));
        let ttl = backend
            .advertise(
                CancellationToken::new(),
                "ns",
                DiscoveryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(ttl, Duration::from_secs(120));

        let forwarded = backend
            .advertise(
                CancellationToken::new(),
                "ns",
                DiscoveryOptions::with_ttl(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(forwarded, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn set_peers_replaces_the_list() {
        let backend = StaticDiscoverer::new(vec![peer(1)]);
        backend.set_peers(vec![peer(9)]);
        let mut rx = backend
            .find_peers(
                CancellationToken::new(),
                "ns",
                DiscoveryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(peer(9)));
    }
}
