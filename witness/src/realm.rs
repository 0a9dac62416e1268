// Copyright (c) 2024 The dep2p Authors

//! The Realm boundary.
//!
//! The witness protocol only needs two capabilities from a Realm: a
//! membership predicate and a broadcast sink. Everything else about Realms
//! (authentication, join protocol, gossip internals) lives elsewhere and is
//! injected behind these traits.

use crate::error::WitnessResult;
use async_trait::async_trait;
use dep2p_common::{NodeId, RealmId};

/// Membership view and removal hook of one Realm.
pub trait RealmMembership: Send + Sync {
    /// The realm's identifier.
    fn realm_id(&self) -> RealmId;

    /// Whether `node` is currently a member.
    fn is_member(&self, node: &NodeId) -> bool;

    /// Current member count.
    fn member_count(&self) -> usize;

    /// Remove a member after a confirmed disconnect.
    fn remove_member(&self, node: &NodeId);
}

/// The realm's internal broadcast channel.
#[async_trait]
pub trait RealmBroadcast: Send + Sync {
    /// Publish a payload to all members.
    async fn publish(&self, payload: Vec<u8>) -> WitnessResult<()>;
}
