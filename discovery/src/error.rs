// Copyright (c) 2024 The dep2p Authors

//! Error types for the discovery layer.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur in the discovery layer.
#[derive(Debug, Display, Error)]
pub enum DiscoveryError {
    /// Invalid configuration: {0}
    InvalidConfig(String),

    /// The local listen port is not yet known
    PortUnknown,

    /// mDNS error: {0}
    Mdns(String),

    /// All discovery backends failed: {0}
    AllBackendsFailed(String),

    /// No backend registered under name: {0}
    UnknownBackend(String),

    /// The component has not been started
    NotStarted,

    /// Channel closed
    ChannelClosed,
}

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
