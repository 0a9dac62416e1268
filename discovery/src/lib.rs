// Copyright (c) 2024 The dep2p Authors

//! Pluggable peer discovery for dep2p.
//!
//! Backends (mDNS on the LAN, DHT walks, DNS seeds, rendezvous servers,
//! static bootstrap lists) all implement the small [`Discovery`] trait; the
//! [`DiscoveryCoordinator`] fans `find_peers` and `advertise` out across
//! every registered backend, deduplicates results by node id and degrades
//! gracefully when individual backends fail.
//!
//! Two backends ship in-tree: [`MdnsDiscoverer`], the reference LAN
//! implementation over DNS-SD, and [`StaticDiscoverer`], a fixed bootstrap
//! list.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod backend;
pub mod coordinator;
pub mod error;
pub mod mdns;
pub mod namespace;
pub mod static_backend;

pub use backend::{Discovery, DiscoveryOptions};
pub use coordinator::DiscoveryCoordinator;
pub use error::{DiscoveryError, DiscoveryResult};
pub use mdns::{
    build_txt_records, parse_txt_records, MdnsConfig, MdnsDiscoverer, PeerDiscoveredCallback,
    TXT_RECORD_MAX,
};
pub use namespace::normalize_namespace;
pub use static_backend::{StaticDiscoverer, DEFAULT_BOOTSTRAP_TTL};
