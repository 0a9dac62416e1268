// Copyright (c) 2024 The dep2p Authors

//! Configuration for the reachability coordinator.

use crate::error::{ReachabilityError, ReachabilityResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for candidate lifetimes and the advertised view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReachabilityConfig {
    /// Lifetime of an unverified candidate (seconds).
    pub candidate_ttl_secs: u64,

    /// Lifetime of a verified address (seconds).
    pub verified_ttl_secs: u64,

    /// Cap on verified direct addresses in the advertised view.
    pub max_verified_direct_addrs: usize,

    /// Distinct remote subnets required to promote a candidate on witness
    /// evidence alone.
    pub min_witnesses: usize,

    /// How often the sweep task expires stale candidates (seconds).
    pub sweep_interval_secs: u64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            candidate_ttl_secs: 2 * 60 * 60,
            verified_ttl_secs: 24 * 60 * 60,
            max_verified_direct_addrs: 3,
            min_witnesses: 2,
            sweep_interval_secs: 60,
        }
    }
}

impl ReachabilityConfig {
    /// Validate constructor-time invariants.
    pub fn validate(&self) -> ReachabilityResult<()> {
        if self.candidate_ttl_secs == 0
            || self.verified_ttl_secs == 0
            || self.sweep_interval_secs == 0
        {
            return Err(ReachabilityError::InvalidConfig(
                "lifetimes and intervals must be positive".to_string(),
            ));
        }
        if self.min_witnesses == 0 || self.max_verified_direct_addrs == 0 {
            return Err(ReachabilityError::InvalidConfig(
                "witness and address counts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Unverified candidate lifetime.
    pub fn candidate_ttl(&self) -> Duration {
        Duration::from_secs(self.candidate_ttl_secs)
    }

    /// Verified address lifetime.
    pub fn verified_ttl(&self) -> Duration {
        Duration::from_secs(self.verified_ttl_secs)
    }

    /// Sweep cadence.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ReachabilityConfig::default();
        assert_eq!(config.candidate_ttl(), Duration::from_secs(7200));
        assert_eq!(config.verified_ttl(), Duration::from_secs(86400));
        assert_eq!(config.max_verified_direct_addrs, 3);
        assert_eq!(config.min_witnesses, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        for broken in [
            ReachabilityConfig {
                candidate_ttl_secs: 0,
                ..Default::default()
            },
            ReachabilityConfig {
                verified_ttl_secs: 0,
                ..Default::default()
            },
            ReachabilityConfig {
                sweep_interval_secs: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                broken.validate(),
                Err(ReachabilityError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn zero_counts_are_rejected() {
        let no_witnesses = ReachabilityConfig {
            min_witnesses: 0,
            ..Default::default()
        };
        assert!(no_witnesses.validate().is_err());

        let no_addrs = ReachabilityConfig {
            max_verified_direct_addrs: 0,
            ..Default::default()
        };
        assert!(no_addrs.validate().is_err());
    }
}
