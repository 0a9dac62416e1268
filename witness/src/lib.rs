// Copyright (c) 2024 The dep2p Authors

//! Witness-based membership liveness for dep2p Realms.
//!
//! When a node suspects a Realm member has disconnected, it publishes a
//! signed [`WitnessReport`] on the Realm's broadcast channel. Every other
//! member answers with a signed agree/disagree/abstain
//! [`WitnessConfirmation`] based on its own contact evidence, and the
//! resulting [`VotingSession`] removes the member only on a confirmed
//! majority. Small realms skip the vote entirely for graceful closes.
//!
//! The Realm itself is injected behind [`RealmMembership`] and
//! [`RealmBroadcast`]: a membership predicate and a broadcast sink are all
//! this crate needs.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod error;
pub mod messages;
pub mod rate_limit;
pub mod realm;
pub mod service;
pub mod voting;

pub use error::{WitnessError, WitnessResult};
pub use messages::{
    decode_broadcast, encode_broadcast, ConfirmationType, DetectionMethod, ReportId,
    WitnessConfirmation, WitnessMessage, WitnessReport, CONFIRM_TAG, WITNESS_TAG,
};
pub use rate_limit::{RateLimiterConfig, SlidingWindowLimiter};
pub use realm::{RealmBroadcast, RealmMembership};
pub use service::{WitnessConfig, WitnessService};
pub use voting::{VoteOutcome, VotingSession, SMALL_REALM_THRESHOLD};
