// Copyright (c) 2024 The dep2p Authors

//! Node and realm identifiers.
//!
//! A [`NodeId`] is the 32-byte Ed25519 public key of a node, presented as a
//! Base58 string. Equality, hashing and ordering all go through the raw key
//! bytes, so two nodes are the same node exactly when they hold the same key.

use core::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use displaydoc::Display;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Width of a node identifier in bytes.
pub const NODE_ID_LEN: usize = 32;

/// Errors produced when parsing a [`NodeId`].
#[derive(Clone, Copy, Debug, Display, Error, Eq, PartialEq)]
pub enum NodeIdError {
    /// The input was not valid Base58
    InvalidEncoding,
    /// The decoded input was not exactly 32 bytes
    InvalidLength,
}

/// Opaque fixed-width node identifier.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// The all-zero identifier, used as a placeholder before a key exists.
    pub const EMPTY: NodeId = NodeId([0u8; NODE_ID_LEN]);

    /// Construct from raw key bytes.
    pub const fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub const fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// True for the all-zero placeholder.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Base58 string form, used on the wire and in TXT records.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Parse the Base58 string form.
    pub fn from_base58(s: &str) -> Result<Self, NodeIdError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| NodeIdError::InvalidEncoding)?;
        let arr: [u8; NODE_ID_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| NodeIdError::InvalidLength)?;
        Ok(Self(arr))
    }

    /// Short form for logs and mDNS instance names (first 8 Base58 chars).
    pub fn short(&self) -> String {
        let full = self.to_base58();
        full.chars().take(8).collect()
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.to_base58())
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "NodeId({})", self.short())
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_base58().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a Realm, an isolated sub-network with its own membership.
///
/// Realms are opaque to the core; the identifier only needs equality and a
/// wire form.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RealmId(String);

impl RealmId {
    /// The empty realm identifier, meaning "no realm".
    pub const fn empty() -> Self {
        Self(String::new())
    }

    /// Construct from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// True when no realm is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier as bytes, for signing and wire encoding.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Display for RealmId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RealmId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
