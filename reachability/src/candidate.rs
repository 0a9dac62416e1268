// Copyright (c) 2024 The dep2p Authors

//! Candidate address model.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// How strongly an address is believed to be reachable. Higher is stronger;
/// the numeric weights give the advertised ordering.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum AddressPriority {
    /// Candidate only; never published.
    Unverified,
    /// A locally bound listen address.
    LocalListen,
    /// Backed by a relay reservation.
    RelayGuarantee,
    /// STUN reflexive address; considered externally valid.
    StunDiscovered,
    /// Passed dial-back verification.
    VerifiedDirect,
    /// User-declared public address; never verified, never expires.
    ConfiguredAdvertise,
}

impl AddressPriority {
    /// Numeric weight of the priority.
    pub const fn weight(&self) -> u8 {
        match self {
            AddressPriority::ConfiguredAdvertise => 150,
            AddressPriority::VerifiedDirect => 100,
            AddressPriority::StunDiscovered => 75,
            AddressPriority::RelayGuarantee => 50,
            AddressPriority::LocalListen => 10,
            AddressPriority::Unverified => 0,
        }
    }
}

/// Well-known source labels.
pub mod source {
    /// STUN reflexive discovery.
    pub const STUN: &str = "stun";
    /// UPnP port mapping.
    pub const UPNP: &str = "upnp";
    /// NAT-PMP port mapping.
    pub const NAT_PMP: &str = "nat-pmp";
    /// A locally bound listener.
    pub const LOCAL: &str = "local";
    /// A relay reservation.
    pub const RELAY: &str = "relay";
    /// A witnessed inbound dial.
    pub const WITNESS: &str = "witness";
    /// Operator configuration.
    pub const CONFIGURED: &str = "configured";
}

/// One tracked address with its provenance and lifetime.
#[derive(Clone, Debug)]
pub struct CandidateAddress {
    /// The address string.
    pub addr: String,
    /// Reachability confidence.
    pub priority: AddressPriority,
    /// Which subsystem reported it (see [`source`]).
    pub source: String,
    /// When the entry was first inserted.
    pub added_at: Instant,
    /// When the entry expires; `None` never expires.
    pub expires_at: Option<Instant>,
    /// Whether the address passed verification.
    pub verified: bool,
}

impl CandidateAddress {
    /// True once the entry's lifetime has elapsed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn priority_weights_are_ordered() {
        let ordered = [
            AddressPriority::Unverified,
            AddressPriority::LocalListen,
            AddressPriority::RelayGuarantee,
            AddressPriority::StunDiscovered,
            AddressPriority::VerifiedDirect,
            AddressPriority::ConfiguredAdvertise,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].weight() < pair[1].weight());
        }
        assert_eq!(AddressPriority::ConfiguredAdvertise.weight(), 150);
        assert_eq!(AddressPriority::VerifiedDirect.weight(), 100);
        assert_eq!(AddressPriority::StunDiscovered.weight(), 75);
        assert_eq!(AddressPriority::RelayGuarantee.weight(), 50);
        assert_eq!(AddressPriority::LocalListen.weight(), 10);
        assert_eq!(AddressPriority::Unverified.weight(), 0);
    }

    #[test]
    fn expiry() {
        let now = Instant::now();
        let entry = CandidateAddress {
            addr: "10.0.0.1:4001".into(),
            priority: AddressPriority::LocalListen,
            source: source::LOCAL.into(),
            added_at: now,
            expires_at: Some(now + Duration::from_secs(1)),
            verified: false,
        };
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + Duration::from_secs(2)));

        let eternal = CandidateAddress {
            expires_at: None,
            ..entry
        };
        assert!(!eternal.is_expired(now + Duration::from_secs(1_000_000)));
    }
}
