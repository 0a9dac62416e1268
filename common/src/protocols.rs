// Copyright (c) 2024 The dep2p Authors

//! Wire protocol identifiers for the core system streams.

use core::fmt::{Display, Formatter, Result as FmtResult};

/// Signed address-record gossip and query.
pub const ADDR_MGMT_PROTOCOL: &str = "/dep2p/sys/addr-mgmt/1.0.0";

/// Liveness echo.
pub const PING_PROTOCOL: &str = "/dep2p/sys/ping/1.0.0";

/// Dial-back reachability verification.
pub const REACHABILITY_PROTOCOL: &str = "/dep2p/sys/reachability/1.0.0";

/// Inbound witness reports.
pub const WITNESS_PROTOCOL: &str = "/dep2p/sys/reachability/witness/1.0.0";

/// A stream protocol identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ProtocolId(
    /// The raw identifier string.
    pub &'static str,
);

impl ProtocolId {
    /// The identifier as a string slice.
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Display for ProtocolId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

/// The core protocols and what they do, in registration order.
pub fn registry() -> &'static [(ProtocolId, &'static str)] {
    &[
        (ProtocolId(ADDR_MGMT_PROTOCOL), "address record gossip"),
        (ProtocolId(PING_PROTOCOL), "liveness echo"),
        (ProtocolId(REACHABILITY_PROTOCOL), "dial-back verification"),
        (ProtocolId(WITNESS_PROTOCOL), "witness reports"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_ids_are_unique_and_versioned() {
        let entries = registry();
        for (id, _) in entries {
            assert!(id.as_str().starts_with("/dep2p/sys/"));
            assert!(id.as_str().ends_with("/1.0.0"));
        }
        let mut ids: Vec<_> = entries.iter().map(|(id, _)| id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), entries.len());
    }
}
