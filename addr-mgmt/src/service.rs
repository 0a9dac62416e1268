// Copyright (c) 2024 The dep2p Authors

//! The address manager: scheduler and inbound handler for signed records.
//!
//! Owns the node's own [`AddressRecord`], re-announces it to neighbors on a
//! refresh cadence, answers queries from the cache and expires stale
//! entries. Neighbor enumeration and stream opening are injected through
//! the [`NeighborProvider`] and [`StreamOpener`] boundaries; this crate
//! never touches a transport directly.
//!
//! The cancellation token lives behind its own lock, never the state locks,
//! so `stop` racing a worker loop is well defined: loops snapshot the token
//! once and run outside any lock.

use crate::{
    error::{AddrMgmtError, AddrMgmtResult},
    record::{now_nanos, AddressRecord},
    store::{InsertOutcome, RecordStore, RecordStoreConfig},
    wire,
};
use async_trait::async_trait;
use dep2p_common::{Keypair, NodeId, RealmId, ADDR_MGMT_PROTOCOL};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// A bidirectional stream to a peer, whatever the transport.
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> StreamIo for T {}

/// Boxed stream handed back by the [`StreamOpener`].
pub type BoxedStream = Box<dyn StreamIo>;

/// Supplies the current neighbor set.
pub trait NeighborProvider: Send + Sync {
    /// Node ids of the current neighbors.
    fn neighbors(&self) -> Vec<NodeId>;
}

/// Opens protocol streams to peers.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    /// Open a stream to `peer` for `protocol`.
    async fn open_stream(&self, peer: NodeId, protocol: &str) -> std::io::Result<BoxedStream>;
}

/// Configuration for the address manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddressManagerConfig {
    /// Re-announce cadence (seconds).
    pub refresh_interval_secs: u64,

    /// Expired-record cleanup cadence (seconds).
    pub cleanup_interval_secs: u64,

    /// Cap on neighbors notified per refresh.
    pub max_neighbors: usize,

    /// Per-neighbor notification deadline (seconds).
    pub notify_timeout_secs: u64,

    /// Deadline for one whole notification batch (seconds).
    pub batch_timeout_secs: u64,

    /// Per-query deadline (seconds).
    pub request_timeout_secs: u64,

    /// Freshness bound on inbound records (seconds). Older records are
    /// dropped before they reach the store.
    pub record_expiry_secs: u64,

    /// Lifetime stamped on the node's own record (seconds).
    pub record_ttl_secs: u64,

    /// Neighbors queried concurrently on a cache miss.
    pub query_fanout: usize,

    /// Record store sizing.
    pub store: RecordStoreConfig,
}

impl Default for AddressManagerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30 * 60,
            cleanup_interval_secs: 10 * 60,
            max_neighbors: 50,
            notify_timeout_secs: 10,
            batch_timeout_secs: 30,
            request_timeout_secs: 30,
            record_expiry_secs: 60 * 60,
            record_ttl_secs: 60 * 60,
            query_fanout: 3,
            store: RecordStoreConfig::default(),
        }
    }
}

impl AddressManagerConfig {
    /// Validate constructor-time invariants.
    pub fn validate(&self) -> AddrMgmtResult<()> {
        if self.refresh_interval_secs == 0 || self.cleanup_interval_secs == 0 {
            return Err(AddrMgmtError::InvalidConfig(
                "intervals must be positive".to_string(),
            ));
        }
        if self.max_neighbors == 0 || self.query_fanout == 0 {
            return Err(AddrMgmtError::InvalidConfig(
                "neighbor counts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn record_expiry(&self) -> Duration {
        Duration::from_secs(self.record_expiry_secs)
    }

    fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }
}

struct Inner {
    config: AddressManagerConfig,
    keypair: Keypair,
    local_id: NodeId,
    realm_id: RealmId,
    store: Arc<RecordStore>,
    local_record: RwLock<Option<AddressRecord>>,
    neighbors: Arc<dyn NeighborProvider>,
    opener: Arc<dyn StreamOpener>,
    /// Worker cancellation, on a dedicated lock.
    ctx: RwLock<Option<CancellationToken>>,
}

/// Maintains and gossips the node's signed address record.
pub struct AddressManager {
    inner: Arc<Inner>,
}

impl AddressManager {
    /// Create a manager for the local node.
    pub fn new(
        keypair: Keypair,
        realm_id: RealmId,
        config: AddressManagerConfig,
        neighbors: Arc<dyn NeighborProvider>,
        opener: Arc<dyn StreamOpener>,
    ) -> AddrMgmtResult<Self> {
        config.validate()?;
        let store = Arc::new(RecordStore::new(config.store.clone()));
        store.set_verifier(Arc::new(|record: &AddressRecord| record.verify_signature()));
        let local_id = keypair.node_id();
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                keypair,
                local_id,
                realm_id,
                store,
                local_record: RwLock::new(None),
                neighbors,
                opener,
                ctx: RwLock::new(None),
            }),
        })
    }

    /// The record cache.
    pub fn store(&self) -> Arc<RecordStore> {
        Arc::clone(&self.inner.store)
    }

    /// The local node id.
    pub fn local_id(&self) -> NodeId {
        self.inner.local_id
    }

    /// The node's own current record, if any addresses were set yet.
    pub fn local_record(&self) -> Option<AddressRecord> {
        self.inner.local_record.read().unwrap().clone()
    }

    /// Start the refresh and cleanup loops. Idempotent.
    pub fn start(&self) {
        let token = {
            let mut ctx = self.inner.ctx.write().unwrap();
            if ctx.is_some() {
                return;
            }
            let token = CancellationToken::new();
            *ctx = Some(token.clone());
            token
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut refresh = tokio::time::interval(inner.config.refresh_interval());
            refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            refresh.tick().await; // the first tick is immediate, skip it
            let mut cleanup = tokio::time::interval(inner.config.cleanup_interval());
            cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            cleanup.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = refresh.tick() => inner.refresh().await,
                    _ = cleanup.tick() => {
                        inner.store.cleanup_expired();
                    }
                }
            }
        });
    }

    /// Cancel the worker loops. Idempotent, safe before `start`.
    pub fn stop(&self) {
        if let Some(token) = self.inner.ctx.write().unwrap().take() {
            token.cancel();
        }
    }

    /// Replace the local address set: create or bump the record, sign it,
    /// store it and notify neighbors in the background.
    pub fn update_local_addrs(&self, addrs: Vec<String>) {
        let record = self.inner.bump_local_record(Some(addrs));
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.notify_neighbors(&record).await;
        });
    }

    /// Handle one inbound framed message. Returns the reply frame for
    /// queries; gossip and malformed input yield `None`.
    pub fn handle_message(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        self.inner.handle_message(bytes)
    }

    /// Serve one message on an accepted stream: read a frame, process it,
    /// write the reply when one exists.
    pub async fn serve_stream<S>(&self, stream: &mut S) -> AddrMgmtResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (msg_type, body) = wire::read_frame(stream).await?;
        let frame = wire::encode_frame(msg_type, &body)?;
        if let Some(reply) = self.inner.handle_message(&frame) {
            use tokio::io::AsyncWriteExt;
            stream.write_all(&reply).await?;
            stream.flush().await?;
        }
        Ok(())
    }

    /// Look up a peer's addresses: fresh cache hit first, then a
    /// concurrent query to `min(query_fanout, neighbors)` neighbors. The
    /// first non-empty response wins and is cached.
    pub async fn query_peer_addrs(&self, target: NodeId) -> Option<AddressRecord> {
        self.inner.query_peer_addrs(target).await
    }
}

impl Drop for AddressManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    /// Create or advance the local record. `addrs` of `None` re-announces
    /// the current set.
    fn bump_local_record(&self, addrs: Option<Vec<String>>) -> AddressRecord {
        let record = {
            let mut guard = self.local_record.write().unwrap();
            let created = guard.is_none();
            let initial_addrs = addrs.clone();
            let record = guard.get_or_insert_with(|| {
                AddressRecord::new(
                    self.local_id,
                    self.realm_id.clone(),
                    initial_addrs.unwrap_or_default(),
                )
            });
            if !created {
                let next = addrs.unwrap_or_else(|| record.addresses.clone());
                record.update_addresses(next);
            }
            record.ttl = self.config.record_ttl();
            record.sign(&self.keypair);
            record.clone()
        };

        self.store.insert(record.clone());
        record
    }

    /// Periodic refresh: bump the sequence, re-sign, re-notify.
    async fn refresh(&self) {
        let has_record = self.local_record.read().unwrap().is_some();
        if !has_record {
            return;
        }
        let record = self.bump_local_record(None);
        trace!(sequence = record.sequence, "refreshing local address record");
        self.notify_neighbors(&record).await;
    }

    fn handle_message(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        let (msg_type, body) = match wire::decode_frame(bytes) {
            Ok(parts) => parts,
            Err(error) => {
                warn!(%error, "dropping malformed frame");
                return None;
            }
        };

        match msg_type {
            wire::MessageType::RefreshNotify => {
                self.handle_refresh_notify(body);
                None
            }
            wire::MessageType::QueryRequest => self.handle_query_request(body),
            wire::MessageType::QueryResponse => {
                self.handle_query_response(body);
                None
            }
        }
    }

    fn handle_refresh_notify(&self, body: &[u8]) {
        let record = match wire::decode_record(body) {
            Ok(record) => record,
            Err(error) => {
                warn!(%error, "dropping undecodable record");
                return;
            }
        };
        if record.node_id == self.local_id {
            // Self-reports echoed back by neighbors carry no news.
            return;
        }
        let age_nanos = now_nanos().saturating_sub(record.timestamp_nanos);
        if age_nanos > self.config.record_expiry().as_nanos() as u64 {
            debug!(node = %record.node_id.short(), "dropping stale record");
            return;
        }
        match self.store.insert(record) {
            InsertOutcome::Stored => {}
            InsertOutcome::NotNewer => trace!("record does not advance the cache"),
            InsertOutcome::BadSignature | InsertOutcome::Full => {}
        }
    }

    fn handle_query_request(&self, body: &[u8]) -> Option<Vec<u8>> {
        let target = match wire::decode_query_request(body) {
            Ok(target) => target,
            Err(error) => {
                warn!(%error, "dropping malformed query");
                return None;
            }
        };

        let record = if target == self.local_id {
            self.local_record.read().unwrap().clone()
        } else {
            self.store.get_fresh(&target)
        };

        let response = wire::encode_query_response(record.as_ref()).ok()?;
        wire::encode_frame(wire::MessageType::QueryResponse, &response).ok()
    }

    fn handle_query_response(&self, body: &[u8]) {
        match wire::decode_query_response(body) {
            Ok(Some(record)) => self.store.cache_response(record),
            Ok(None) => {}
            Err(error) => warn!(%error, "dropping malformed query response"),
        }
    }

    /// Push the record to up to `max_neighbors` neighbors, each send under
    /// its own timeout, the whole batch under one deadline.
    async fn notify_neighbors(&self, record: &AddressRecord) {
        let mut neighbors = self.neighbors.neighbors();
        neighbors.retain(|id| *id != self.local_id);
        neighbors.truncate(self.config.max_neighbors);
        if neighbors.is_empty() {
            return;
        }

        let body = match wire::encode_record(record) {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "own record failed to encode");
                return;
            }
        };

        let notify_timeout = self.config.notify_timeout();
        let sends = neighbors.into_iter().map(|peer| {
            let opener = Arc::clone(&self.opener);
            let body = body.clone();
            async move {
                let send = async {
                    let mut stream = opener
                        .open_stream(peer, ADDR_MGMT_PROTOCOL)
                        .await
                        .map_err(AddrMgmtError::Io)?;
                    wire::write_frame(&mut stream, wire::MessageType::RefreshNotify, &body)
                        .await
                        .map_err(AddrMgmtError::Wire)
                };
                let outcome = tokio::time::timeout(notify_timeout, send)
                    .await
                    .map_err(|_| AddrMgmtError::Timeout)
                    .and_then(|r| r);
                (peer, outcome)
            }
        });

        let batch = futures::future::join_all(sends);
        match tokio::time::timeout(self.config.batch_timeout(), batch).await {
            Ok(results) => {
                for (peer, outcome) in results {
                    if let Err(error) = outcome {
                        debug!(peer = %peer.short(), %error, "neighbor notify failed");
                    }
                }
            }
            Err(_) => debug!("neighbor notification batch timed out"),
        }
    }

    async fn query_peer_addrs(&self, target: NodeId) -> Option<AddressRecord> {
        if let Some(record) = self.store.get_fresh(&target) {
            return Some(record);
        }

        let mut neighbors = self.neighbors.neighbors();
        neighbors.retain(|id| *id != self.local_id && *id != target);
        neighbors.truncate(self.config.query_fanout);
        if neighbors.is_empty() {
            return None;
        }

        let body = wire::encode_query_request(&target);
        let request_timeout = self.config.request_timeout();

        let mut queries = tokio::task::JoinSet::new();
        for peer in neighbors {
            let opener = Arc::clone(&self.opener);
            let body = body.clone();
            queries.spawn(async move {
                let query = async {
                    let mut stream = opener
                        .open_stream(peer, ADDR_MGMT_PROTOCOL)
                        .await
                        .map_err(AddrMgmtError::Io)?;
                    wire::write_frame(&mut stream, wire::MessageType::QueryRequest, &body)
                        .await
                        .map_err(AddrMgmtError::Wire)?;
                    let (msg_type, reply) =
                        wire::read_frame(&mut stream).await.map_err(AddrMgmtError::Wire)?;
                    if msg_type != wire::MessageType::QueryResponse {
                        return Ok(None);
                    }
                    wire::decode_query_response(&reply).map_err(AddrMgmtError::Wire)
                };
                tokio::time::timeout(request_timeout, query)
                    .await
                    .map_err(|_| AddrMgmtError::Timeout)
                    .and_then(|r| r)
            });
        }

        // First successful non-empty response wins; the rest are dropped
        // when the set is.
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok(Ok(Some(record))) if !record.addresses.is_empty() => {
                    self.store.cache_response(record.clone());
                    return Some(record);
                }
                Ok(Ok(_)) => {}
                Ok(Err(error)) => debug!(%error, "neighbor query failed"),
                Err(error) => debug!(%error, "neighbor query task failed"),
            }
        }
        None
    }
}
