// Copyright (c) 2024 The dep2p Authors

//! Signed address records.
//!
//! A record is a node's own claim about where it can be reached. Replay
//! protection comes from the strictly increasing sequence number; freshness
//! from the timestamp; authenticity from the Ed25519 signature the node id
//! itself verifies.

use dep2p_common::{keys, Keypair, NodeId, RealmId};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Upper bound on addresses carried by one record.
pub const MAX_RECORD_ADDRS: usize = 100;

/// Default record lifetime.
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(60 * 60);

/// A signed, gossiped set of addresses for one node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressRecord {
    /// The node the record speaks for.
    pub node_id: NodeId,
    /// Realm scope; empty outside any realm.
    pub realm_id: RealmId,
    /// Monotonic replacement counter, saturating at `u64::MAX`.
    pub sequence: u64,
    /// Creation time, nanoseconds since the Unix epoch.
    pub timestamp_nanos: u64,
    /// Addresses, best first.
    pub addresses: Vec<String>,
    /// Lifetime after `timestamp_nanos`.
    pub ttl: Duration,
    /// Detached signature over the fields above.
    pub signature: Vec<u8>,
}

/// Current wall-clock time in epoch nanoseconds.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl AddressRecord {
    /// Create the first record for a node (sequence 1, unsigned).
    pub fn new(node_id: NodeId, realm_id: RealmId, addresses: Vec<String>) -> Self {
        Self {
            node_id,
            realm_id,
            sequence: 1,
            timestamp_nanos: now_nanos(),
            addresses,
            ttl: DEFAULT_RECORD_TTL,
            signature: Vec::new(),
        }
    }

    /// The bytes covered by the signature: identity, realm, sequence,
    /// timestamp and every address, concatenated deterministically.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(self.node_id.as_bytes());
        bytes.extend_from_slice(self.realm_id.as_bytes());
        bytes.extend_from_slice(&self.sequence.to_be_bytes());
        bytes.extend_from_slice(&self.timestamp_nanos.to_be_bytes());
        for addr in &self.addresses {
            bytes.extend_from_slice(addr.as_bytes());
        }
        bytes
    }

    /// Sign the record with the node's keypair.
    pub fn sign(&mut self, keypair: &Keypair) {
        self.signature = keypair.sign(&self.signing_bytes());
    }

    /// Verify the signature against the node id the record claims.
    pub fn verify_signature(&self) -> bool {
        keys::is_valid_signature(&self.node_id, &self.signing_bytes(), &self.signature)
    }

    /// Replace the address set, advancing the sequence.
    ///
    /// The sequence saturates at `u64::MAX`: once there, addresses and
    /// timestamp still update, the counter stays at the maximum. The record
    /// must be re-signed afterwards.
    pub fn update_addresses(&mut self, addresses: Vec<String>) {
        self.sequence = self.sequence.saturating_add(1);
        self.timestamp_nanos = now_nanos();
        self.addresses = addresses;
        self.signature.clear();
    }

    /// True once `now - timestamp > ttl`.
    pub fn is_expired(&self, now_nanos: u64) -> bool {
        let age = now_nanos.saturating_sub(self.timestamp_nanos);
        age > self.ttl.as_nanos() as u64
    }

    /// True when this record replaces `other` (strictly greater sequence).
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.sequence > other.sequence
    }
}
