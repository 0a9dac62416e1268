// Copyright (c) 2024 The dep2p Authors

//! The `Discovery` backend contract.
//!
//! Every way of finding peers — mDNS on the LAN, a DHT walk, DNS seeds, a
//! rendezvous server, a static bootstrap list — implements this one trait.
//! The coordinator composes backends as a capability set; none of them knows
//! the others exist.

use crate::error::DiscoveryResult;
use async_trait::async_trait;
use dep2p_common::PeerInfo;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Options forwarded to backends on each call.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscoveryOptions {
    /// Stop after this many distinct peers.
    pub limit: Option<usize>,
    /// Requested advertisement lifetime.
    pub ttl: Option<Duration>,
}

impl DiscoveryOptions {
    /// Options with a peer limit.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Options with an advertisement TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }
}

/// A pluggable discovery backend.
///
/// `find_peers` returns a channel that yields peers as the backend finds
/// them and closes when the backend finishes, errors out, or `ctx` is
/// cancelled. `advertise` returns the TTL at which the backend wants to be
/// re-invoked.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Stable backend name used for registration and logs.
    fn name(&self) -> &str;

    /// Start background activity. Idempotent.
    async fn start(&self, ctx: CancellationToken) -> DiscoveryResult<()>;

    /// Stop background activity. Idempotent, safe before `start`.
    async fn stop(&self) -> DiscoveryResult<()>;

    /// Find peers under a (normalized) namespace.
    async fn find_peers(
        &self,
        ctx: CancellationToken,
        namespace: &str,
        opts: DiscoveryOptions,
    ) -> DiscoveryResult<mpsc::Receiver<PeerInfo>>;

    /// Advertise the local node under a (normalized) namespace.
    async fn advertise(
        &self,
        ctx: CancellationToken,
        namespace: &str,
        opts: DiscoveryOptions,
    ) -> DiscoveryResult<Duration>;
}
