// Copyright (c) 2024 The dep2p Authors

//! Error types for the reachability layer.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur in the reachability layer.
#[derive(Debug, Display, Error)]
pub enum ReachabilityError {
    /// Invalid configuration: {0}
    InvalidConfig(String),
}

/// Result type for reachability operations.
pub type ReachabilityResult<T> = Result<T, ReachabilityError>;
