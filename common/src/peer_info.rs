// Copyright (c) 2024 The dep2p Authors

//! Lightweight peer information exchanged by discovery backends.

use crate::node_id::NodeId;
use serde::{Deserialize, Serialize};

/// A discovered peer: identity plus the addresses it was seen at.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The peer's identity.
    pub node_id: NodeId,
    /// Addresses the peer can be reached at, best first.
    pub addresses: Vec<String>,
}

impl PeerInfo {
    /// Construct from an identity and address list.
    pub fn new(node_id: NodeId, addresses: Vec<String>) -> Self {
        Self { node_id, addresses }
    }

    /// Merge another sighting of the same peer: union of the address lists,
    /// order preserved, duplicates dropped.
    pub fn merge(&mut self, other: &PeerInfo) {
        debug_assert_eq!(self.node_id, other.node_id);
        for addr in &other.addresses {
            if !self.addresses.contains(addr) {
                self.addresses.push(addr.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_addresses_in_order() {
        let id = NodeId::from_bytes([1u8; 32]);
        let mut a = PeerInfo::new(id, vec!["x:1".into(), "y:2".into()]);
        let b = PeerInfo::new(id, vec!["y:2".into(), "z:3".into()]);
        a.merge(&b);
        assert_eq!(a.addresses, vec!["x:1", "y:2", "z:3"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let id = NodeId::from_bytes([1u8; 32]);
        let mut a = PeerInfo::new(id, vec!["x:1".into()]);
        let b = a.clone();
        a.merge(&b);
        assert_eq!(a.addresses, vec!["x:1"]);
    }
}
