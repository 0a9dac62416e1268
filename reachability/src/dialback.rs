// Copyright (c) 2024 The dep2p Authors

//! Dial-back verification.
//!
//! A candidate address graduates to verified-direct when a helper node
//! manages to open a connection to it within a short deadline. The actual
//! dialing is transport work and stays behind the [`DialBack`] trait; this
//! module owns the deadline and the promotion into the coordinator.

use crate::{candidate::AddressPriority, coordinator::ReachabilityCoordinator};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// Default deadline for one dial-back attempt.
pub const DEFAULT_DIAL_BACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts a connection to a claimed address, via whatever transport and
/// helper node the host wires in.
#[async_trait]
pub trait DialBack: Send + Sync {
    /// True when the address accepted a connection.
    async fn dial_back(&self, addr: &str) -> bool;
}

/// Drives dial-back attempts and promotes successful candidates.
pub struct DialBackVerifier {
    dialer: Arc<dyn DialBack>,
    coordinator: Arc<ReachabilityCoordinator>,
    timeout: Duration,
}

impl DialBackVerifier {
    /// Create a verifier over a dialer and the coordinator to promote into.
    pub fn new(dialer: Arc<dyn DialBack>, coordinator: Arc<ReachabilityCoordinator>) -> Self {
        Self {
            dialer,
            coordinator,
            timeout: DEFAULT_DIAL_BACK_TIMEOUT,
        }
    }

    /// Override the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attempt to verify one candidate. On success the address is promoted
    /// to verified-direct; on failure or deadline the candidate is left
    /// as-is for its TTL to decide.
    pub async fn verify(&self, addr: &str, source: &str) -> bool {
        let reachable = tokio::time::timeout(self.timeout, self.dialer.dial_back(addr))
            .await
            .unwrap_or(false);
        if reachable {
            self.coordinator
                .on_direct_address_verified(addr, source, AddressPriority::VerifiedDirect);
        } else {
            debug!(addr, source, "dial-back failed");
        }
        reachable
    }

    /// Verify every current unverified candidate once.
    pub async fn verify_candidates(&self) -> usize {
        let mut promoted = 0;
        for addr in self.coordinator.candidate_direct_addresses() {
            if self.verify(&addr, "dial-back").await {
                promoted += 1;
            }
        }
        promoted
    }
}
