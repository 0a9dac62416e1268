// Copyright (c) 2024 The dep2p Authors

//! In-memory cache of address records, one per node.
//!
//! Inserts from gossip are strict: the signature must verify (when a
//! verifier is installed) and the sequence must strictly advance the cached
//! record. Query replies bypass the sequence check but still age out by
//! TTL. Capacity is bounded; the oldest record is evicted when full.

use crate::record::{now_nanos, AddressRecord};
use dep2p_common::NodeId;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

/// Signature check hook. Returning `false` rejects the record.
pub type SignatureVerifier = Arc<dyn Fn(&AddressRecord) -> bool + Send + Sync>;

/// Configuration for the record store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    /// Maximum number of cached records.
    pub max_records: usize,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self { max_records: 10_000 }
    }
}

/// Why an insert was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    /// Stored (new or replacing an older record).
    Stored,
    /// Rejected: signature did not verify.
    BadSignature,
    /// Rejected: sequence does not strictly advance the cached record.
    NotNewer,
    /// Rejected: store full and nothing evictable.
    Full,
}

/// Thread-safe record cache.
pub struct RecordStore {
    config: RecordStoreConfig,
    records: RwLock<HashMap<NodeId, AddressRecord>>,
    verifier: RwLock<Option<SignatureVerifier>>,
}

impl RecordStore {
    /// Create a store with the given configuration.
    pub fn new(config: RecordStoreConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            verifier: RwLock::new(None),
        }
    }

    /// Create a store with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RecordStoreConfig::default())
    }

    /// Install a signature verifier applied to every gossip insert.
    pub fn set_verifier(&self, verifier: SignatureVerifier) {
        *self.verifier.write().unwrap() = Some(verifier);
    }

    /// Insert a gossiped record: verify, require a strictly greater
    /// sequence, evict the oldest when full.
    pub fn insert(&self, record: AddressRecord) -> InsertOutcome {
        if let Some(verifier) = self.verifier.read().unwrap().as_ref() {
            if !verifier(&record) {
                warn!(node = %record.node_id.short(), "rejecting record with bad signature");
                return InsertOutcome::BadSignature;
            }
        }

        let mut records = self.records.write().unwrap();
        if let Some(existing) = records.get(&record.node_id) {
            if !record.is_newer_than(existing) {
                return InsertOutcome::NotNewer;
            }
        } else if records.len() >= self.config.max_records && !Self::evict_oldest(&mut records) {
            warn!("record store full, rejecting record");
            return InsertOutcome::Full;
        }
        records.insert(record.node_id, record);
        InsertOutcome::Stored
    }

    /// Cache a query reply. No sequence check; the TTL still applies.
    pub fn cache_response(&self, record: AddressRecord) {
        let mut records = self.records.write().unwrap();
        if !records.contains_key(&record.node_id)
            && records.len() >= self.config.max_records
            && !Self::evict_oldest(&mut records)
        {
            return;
        }
        records.insert(record.node_id, record);
    }

    /// The cached record for a node, expired or not.
    pub fn get(&self, node_id: &NodeId) -> Option<AddressRecord> {
        self.records.read().unwrap().get(node_id).cloned()
    }

    /// The cached record only when still fresh.
    pub fn get_fresh(&self, node_id: &NodeId) -> Option<AddressRecord> {
        let now = now_nanos();
        self.records
            .read()
            .unwrap()
            .get(node_id)
            .filter(|record| !record.is_expired(now))
            .cloned()
    }

    /// Every node with a cached record.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.records.read().unwrap().keys().copied().collect()
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired records. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = now_nanos();
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "expired address records removed");
        }
        removed
    }

    fn evict_oldest(records: &mut HashMap<NodeId, AddressRecord>) -> bool {
        let oldest = records
            .iter()
            .min_by_key(|(_, record)| record.timestamp_nanos)
            .map(|(id, _)| *id);
        match oldest {
            Some(id) => {
                records.remove(&id);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dep2p_common::{Keypair, RealmId};
    use std::time::Duration;

    fn signed_record(seed: u8, sequence: u64) -> AddressRecord {
        let pair = Keypair::from_seed([seed; 32]);
        let mut record = AddressRecord::new(
            pair.node_id(),
            RealmId::empty(),
            vec![format!("/ip4/10.0.0.{seed}/udp/4001/quic-v1")],
        );
        record.sequence = sequence;
        record.sign(&pair);
        record
    }

    #[test]
    fn insert_and_get() {
        let store = RecordStore::with_defaults();
        let record = signed_record(1, 1);
        assert_eq!(store.insert(record.clone()), InsertOutcome::Stored);
        assert_eq!(store.get(&record.node_id), Some(record));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sequence_must_strictly_advance() {
        let store = RecordStore::with_defaults();
        let id = signed_record(1, 5).node_id;
        assert_eq!(store.insert(signed_record(1, 5)), InsertOutcome::Stored);
        assert_eq!(store.insert(signed_record(1, 5)), InsertOutcome::NotNewer);
        assert_eq!(store.insert(signed_record(1, 4)), InsertOutcome::NotNewer);
        assert_eq!(store.insert(signed_record(1, 6)), InsertOutcome::Stored);
        assert_eq!(store.get(&id).unwrap().sequence, 6);
    }

    #[test]
    fn sequence_is_monotone_under_shuffled_inserts() {
        let store = RecordStore::with_defaults();
        let id = signed_record(1, 1).node_id;
        let mut last_seen = 0;
        for sequence in [3u64, 1, 7, 5, 7, 2, 9] {
            store.insert(signed_record(1, sequence));
            let cached = store.get(&id).unwrap().sequence;
            assert!(cached >= last_seen);
            last_seen = cached;
        }
        assert_eq!(last_seen, 9);
    }

    #[test]
    fn verifier_rejects_bad_signatures() {
        let store = RecordStore::with_defaults();
        store.set_verifier(Arc::new(|record| record.verify_signature()));

        let mut tampered = signed_record(1, 1);
        tampered.addresses.push("/ip4/6.6.6.6/udp/6/quic-v1".to_string());
        assert_eq!(store.insert(tampered), InsertOutcome::BadSignature);
        assert!(store.is_empty());

        assert_eq!(store.insert(signed_record(1, 1)), InsertOutcome::Stored);
    }

    #[test]
    fn cache_response_bypasses_sequence_check() {
        let store = RecordStore::with_defaults();
        store.insert(signed_record(1, 9));
        let id = signed_record(1, 1).node_id;

        store.cache_response(signed_record(1, 3));
        assert_eq!(store.get(&id).unwrap().sequence, 3);
    }

    #[test]
    fn cleanup_removes_expired() {
        let store = RecordStore::with_defaults();
        let mut old = signed_record(1, 1);
        old.timestamp_nanos = 1;
        old.ttl = Duration::from_secs(1);
        store.cache_response(old);
        store.insert(signed_record(2, 1));

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let store = RecordStore::new(RecordStoreConfig { max_records: 2 });

        let mut first = signed_record(1, 1);
        first.timestamp_nanos = 100;
        let first_id = first.node_id;
        store.cache_response(first);

        let mut second = signed_record(2, 1);
        second.timestamp_nanos = 200;
        store.cache_response(second);

        let mut third = signed_record(3, 1);
        third.timestamp_nanos = 300;
        assert_eq!(store.insert(third), InsertOutcome::Stored);

        assert_eq!(store.len(), 2);
        assert!(store.get(&first_id).is_none());
    }

    #[test]
    fn get_fresh_filters_expired() {
        let store = RecordStore::with_defaults();
        let mut record = signed_record(1, 1);
        record.timestamp_nanos = 1;
        record.ttl = Duration::from_secs(1);
        let id = record.node_id;
        store.cache_response(record);

        assert!(store.get(&id).is_some());
        assert!(store.get_fresh(&id).is_none());
    }
}
