// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchboard configuration: TOML loading and normalization.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Queue cap drop policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    Oldest,
    Newest,
}

impl Default for DropPolicy {
    fn default() -> Self {
        DropPolicy::Oldest
    }
}

/// Per-session queue bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum queued jobs per session; absent means unbounded.
    pub cap: Option<usize>,
    pub drop: DropPolicy,
}

fn default_max_concurrent_runs() -> i64 {
    2
}

fn default_require_engine_lock() -> bool {
    true
}

fn default_engine_lock_timeout_ms() -> u64 {
    60_000
}

fn default_engine_lock_max_hold_ms() -> u64 {
    300_000
}

fn default_followup_debounce_ms() -> u64 {
    500
}

fn default_default_engine() -> String {
    "lemon".to_string()
}

fn default_chat_state_ttl_ms() -> u64 {
    86_400_000
}

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    /// Global cap on concurrently executing runs.
    pub max_concurrent_runs: i64,
    pub require_engine_lock: bool,
    pub engine_lock_timeout_ms: u64,
    /// Age at which a held engine lock is forcibly reclaimed.
    /// `0` disables age-based reclamation.
    pub engine_lock_max_hold_ms: u64,
    /// Cadence of the stale-lock sweep. Defaults to
    /// `min(engine_lock_max_hold_ms, 30_000)`.
    pub engine_lock_reap_interval_ms: Option<u64>,
    pub followup_debounce_ms: u64,
    pub auto_resume: bool,
    pub default_engine: String,
    pub chat_state_ttl_ms: u64,
    pub queue: QueueConfig,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            require_engine_lock: default_require_engine_lock(),
            engine_lock_timeout_ms: default_engine_lock_timeout_ms(),
            engine_lock_max_hold_ms: default_engine_lock_max_hold_ms(),
            engine_lock_reap_interval_ms: None,
            followup_debounce_ms: default_followup_debounce_ms(),
            auto_resume: false,
            default_engine: default_default_engine(),
            chat_state_ttl_ms: default_chat_state_ttl_ms(),
            queue: QueueConfig::default(),
        }
    }
}

impl SwitchboardConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults; a malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply the normalization rules a loaded config may need.
    ///
    /// Only `max_concurrent_runs` is coerced, and only
    /// `engine_lock_max_hold_ms` treats zero as a sentinel. The other
    /// millisecond fields take zero literally: a zero lock timeout
    /// fails acquisition immediately, a zero debounce never merges.
    pub fn normalized(mut self) -> Self {
        if self.max_concurrent_runs <= 0 {
            tracing::warn!(
                configured = self.max_concurrent_runs,
                "max_concurrent_runs must be positive, using 10"
            );
            self.max_concurrent_runs = 10;
        }
        self
    }

    /// Global run cap as a usize. Call after [`Self::normalized`].
    pub fn max_runs(&self) -> usize {
        self.max_concurrent_runs.max(1) as usize
    }

    /// Effective stale-lock sweep cadence.
    pub fn reap_interval_ms(&self) -> u64 {
        match self.engine_lock_reap_interval_ms {
            Some(ms) => ms,
            None if self.engine_lock_max_hold_ms == 0 => 30_000,
            None => self.engine_lock_max_hold_ms.min(30_000),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
