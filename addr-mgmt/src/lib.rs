// Copyright (c) 2024 The dep2p Authors

//! Signed address-record gossip for dep2p.
//!
//! Nodes maintain a signed [`AddressRecord`] naming where they can be
//! reached, push it to neighbors on a refresh cadence, answer queries from
//! a TTL'd cache and discard anything stale, replayed or forged. The wire
//! format is a compact framed binary layout; transports are injected
//! through the [`StreamOpener`] boundary.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod error;
pub mod record;
pub mod service;
pub mod store;
pub mod wire;

pub use error::{AddrMgmtError, AddrMgmtResult};
pub use record::{AddressRecord, DEFAULT_RECORD_TTL, MAX_RECORD_ADDRS};
pub use service::{
    AddressManager, AddressManagerConfig, BoxedStream, NeighborProvider, StreamIo, StreamOpener,
};
pub use store::{InsertOutcome, RecordStore, RecordStoreConfig, SignatureVerifier};
pub use wire::{MessageType, WireError, FRAME_HEADER_LEN, MAX_MESSAGE_SIZE};
