// Copyright (c) 2024 The dep2p Authors

//! Error types for the witness subsystem.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur in the witness subsystem.
#[derive(Debug, Display, Error)]
pub enum WitnessError {
    /// Invalid configuration: {0}
    InvalidConfig(String),

    /// Reporting is rate limited for this target
    RateLimited,

    /// Message decoding failed: {0}
    Decode(String),

    /// Signature verification failed
    InvalidSignature,

    /// Broadcast failed: {0}
    Broadcast(String),

    /// The component has not been started
    NotStarted,
}

/// Result type for witness operations.
pub type WitnessResult<T> = Result<T, WitnessError>;
