// Copyright (c) 2024 The dep2p Authors

//! Shared primitives for the dep2p core.
//!
//! This crate carries everything the higher-level subsystems agree on:
//!
//! - **Identity**: [`NodeId`] (a node *is* its Ed25519 public key),
//!   [`RealmId`], the [`Keypair`] that signs records.
//! - **Addressing**: [`Multiaddr`] as a tagged component sequence, and the
//!   pure [`classifier`] that turns address strings into routable facts.
//! - **Environment**: LAN [`interfaces`] enumeration and the
//!   [`logging`] boundary driven by `DEP2P_LOG_*`.
//! - **Protocol surface**: the [`protocols`] registry and the [`ping`]
//!   liveness echo.
//!
//! Everything here is either pure or a thin boundary wrapper; the stateful
//! coordinators live in the crates above.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod classifier;
pub mod interfaces;
pub mod keys;
pub mod logging;
pub mod multiaddr;
pub mod node_id;
pub mod peer_info;
pub mod ping;
pub mod protocols;

pub use classifier::Classification;
pub use keys::{verify, KeyError, Keypair, SIGNATURE_LEN};
pub use multiaddr::{Component, Multiaddr, MultiaddrError, Protocol};
pub use node_id::{NodeId, NodeIdError, RealmId, NODE_ID_LEN};
pub use peer_info::PeerInfo;
pub use ping::{ping, serve_ping, PingError, DEFAULT_PING_TIMEOUT, PING_PAYLOAD_LEN};
pub use protocols::{
    ProtocolId, ADDR_MGMT_PROTOCOL, PING_PROTOCOL, REACHABILITY_PROTOCOL, WITNESS_PROTOCOL,
};
