// Copyright (c) 2024 The dep2p Authors

//! Error types for address management.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur in address management.
#[derive(Debug, Display, Error)]
pub enum AddrMgmtError {
    /// Invalid configuration: {0}
    InvalidConfig(String),

    /// Wire decoding failed: {0}
    Wire(#[from] crate::wire::WireError),

    /// Signature verification failed
    InvalidSignature,

    /// Record is stale (older than the freshness bound)
    StaleRecord,

    /// Record sequence does not advance the cached record
    SequenceNotNewer,

    /// Stream error: {0}
    Io(#[from] std::io::Error),

    /// The component has not been started
    NotStarted,

    /// Operation timed out
    Timeout,
}

/// Result type for address management operations.
pub type AddrMgmtResult<T> = Result<T, AddrMgmtError>;
