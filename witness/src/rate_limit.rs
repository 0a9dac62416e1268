// Copyright (c) 2024 The dep2p Authors

//! Keyed sliding-window rate limiting for disconnect reports.
//!
//! Each target key gets its own window of recent event timestamps; a global
//! window at a multiple of the per-key limit bounds the aggregate. Expired
//! samples are pruned lazily on access; a periodic sweep drops empty keys
//! so the map stays bounded.

use crate::error::{WitnessError, WitnessResult};
use dep2p_common::NodeId;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Configuration for the sliding-window limiter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Events allowed per key per window.
    pub max_per_key: u32,

    /// Window length (seconds).
    pub window_secs: u64,

    /// Global cap as a multiple of the per-key limit.
    pub global_multiplier: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_key: 10,
            window_secs: 60,
            global_multiplier: 3,
        }
    }
}

impl RateLimiterConfig {
    /// Validate constructor-time invariants.
    pub fn validate(&self) -> WitnessResult<()> {
        if self.max_per_key == 0 || self.window_secs == 0 || self.global_multiplier == 0 {
            return Err(WitnessError::InvalidConfig(
                "rate limits and windows must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn global_limit(&self) -> usize {
        (self.max_per_key as usize).saturating_mul(self.global_multiplier as usize)
    }
}

struct State {
    keys: HashMap<NodeId, Vec<Instant>>,
    global: Vec<Instant>,
}

/// Per-key sliding-window limiter with a global cap.
pub struct SlidingWindowLimiter {
    config: RateLimiterConfig,
    state: Mutex<State>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with the given configuration.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                keys: HashMap::new(),
                global: Vec::new(),
            }),
        }
    }

    /// Create a limiter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RateLimiterConfig::default())
    }

    /// Record one event for `key`. Returns `false` when either the key's
    /// window or the global window is full; rejected events are not
    /// recorded.
    pub fn allow(&self, key: &NodeId) -> bool {
        let now = Instant::now();
        let window = self.config.window();
        let mut state = self.state.lock().unwrap();

        state.global.retain(|t| now.duration_since(*t) < window);
        if state.global.len() >= self.config.global_limit() {
            return false;
        }

        let samples = state.keys.entry(*key).or_default();
        samples.retain(|t| now.duration_since(*t) < window);
        if samples.len() >= self.config.max_per_key as usize {
            return false;
        }

        samples.push(now);
        state.global.push(now);
        true
    }

    /// Drop expired samples and empty keys. Called from the owner's
    /// periodic cleanup tick.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let window = self.config.window();
        let mut state = self.state.lock().unwrap();
        state.global.retain(|t| now.duration_since(*t) < window);
        for samples in state.keys.values_mut() {
            samples.retain(|t| now.duration_since(*t) < window);
        }
        state.keys.retain(|_, samples| !samples.is_empty());
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().unwrap().keys.len()
    }
}
