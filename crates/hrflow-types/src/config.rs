//! Engine configuration types.
//!
//! `EngineConfig` represents `hrflow.toml` in the data directory. Every
//! field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many times a frontier commit is retried after a version conflict
    /// before the caller sees `ConcurrentModification`.
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,

    /// Notification retry policy.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Capacity of the broadcast event bus.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// When set, notifications are POSTed to this URL instead of logged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

fn default_max_commit_attempts() -> u32 {
    5
}

fn default_event_bus_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: default_max_commit_attempts(),
            dispatch: DispatchConfig::default(),
            event_bus_capacity: default_event_bus_capacity(),
            webhook_url: None,
        }
    }
}

/// Retry policy for notification deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Attempts before a delivery is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before retry `n` is `base_backoff_ms * 2^(n-1)`.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Upper bound on a single delivery attempt.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_attempt_timeout_ms() -> u64 {
    10_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}
