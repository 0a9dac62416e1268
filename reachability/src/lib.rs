// Copyright (c) 2024 The dep2p Authors

//! Reachability coordination for dep2p.
//!
//! Candidate addresses flow in from STUN, port mappings, local listeners,
//! relay reservations and witnessed inbound dials; the
//! [`ReachabilityCoordinator`] reconciles them into the advertised, shareable
//! and hole-punch views. Unverified candidates never leave the store.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod candidate;
pub mod config;
pub mod coordinator;
pub mod dialback;
pub mod error;

pub use candidate::{source, AddressPriority, CandidateAddress};
pub use config::ReachabilityConfig;
pub use coordinator::{AddressChangedCallback, ReachabilityCoordinator, ReachabilityStats};
pub use dialback::{DialBack, DialBackVerifier, DEFAULT_DIAL_BACK_TIMEOUT};
pub use error::{ReachabilityError, ReachabilityResult};
