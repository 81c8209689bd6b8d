//! Configuration loading for relaychat-client.
//!
//! Configuration is loaded from a TOML file. Every section and field is
//! optional; missing values fall back to the defaults below.

use relaychat_core::{BackoffPolicy, ReconcileConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Reconciliation tunables.
    #[serde(default)]
    pub reconcile: ReconcileSection,
    /// Tiered initial load.
    #[serde(default)]
    pub loader: LoaderConfig,
    /// LRU background refresh.
    #[serde(default)]
    pub background: BackgroundConfig,
    /// Older-history pagination.
    #[serde(default)]
    pub pagination: PaginationConfig,
}

/// Reconciliation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReconcileSection {
    /// Optimistic promotion window in seconds (default: 30).
    #[serde(default = "default_match_window_secs")]
    pub match_window_secs: u64,
    /// "Just arrived" threshold in milliseconds (default: 10000).
    #[serde(default = "default_recent_threshold_ms")]
    pub recent_threshold_ms: u64,
    /// Seconds an optimistic send may wait for confirmation (default: 60).
    #[serde(default = "default_optimistic_timeout_secs")]
    pub optimistic_timeout_secs: u64,
}

/// Tiered initial load configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// Direct messages fetched in tier 1A (default: 100).
    #[serde(default = "default_dm_limit")]
    pub dm_limit: usize,
    /// Communities whose metadata tier 1B keeps (default: 5).
    #[serde(default = "default_top_communities")]
    pub top_communities: usize,
    /// Communities whose channels tier 2 fetches (default: 3).
    #[serde(default = "default_tier2_communities")]
    pub tier2_communities: usize,
    /// Default-channel messages fetched in tier 3 (default: 25).
    #[serde(default = "default_tier3_messages")]
    pub tier3_messages: usize,
    /// Per-operation timeout for tier 1 in ms (default: 1500).
    #[serde(default = "default_tier1_timeout_ms")]
    pub tier1_timeout_ms: u64,
    /// Per-operation timeout for tier 2 in ms (default: 2000).
    #[serde(default = "default_tier2_timeout_ms")]
    pub tier2_timeout_ms: u64,
    /// Per-operation timeout for tier 3 in ms (default: 2500).
    #[serde(default = "default_tier3_timeout_ms")]
    pub tier3_timeout_ms: u64,
}

/// Background refresh configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackgroundConfig {
    /// Run the background refresher (default: true).
    #[serde(default = "default_background_enabled")]
    pub enabled: bool,
    /// Maximum tracked communities (default: 32).
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,
    /// First poll interval in ms (default: 15000).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Maximum poll interval in ms (default: 600000).
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Backoff growth factor (default: 2).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Messages fetched per community poll (default: 25).
    #[serde(default = "default_poll_limit")]
    pub poll_limit: usize,
    /// Per-poll timeout in ms (default: 2500).
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Interval of the optimistic-expiry sweep in ms (default: 5000).
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

/// Pagination configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PaginationConfig {
    /// Events per older-history page (default: 50).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Timeout of a page query in ms (default: 2500).
    #[serde(default = "default_page_timeout_ms")]
    pub timeout_ms: u64,
}

// Default value functions
fn default_match_window_secs() -> u64 {
    30
}

fn default_recent_threshold_ms() -> u64 {
    10_000
}

fn default_optimistic_timeout_secs() -> u64 {
    60
}

fn default_dm_limit() -> usize {
    100
}

fn default_top_communities() -> usize {
    5
}

fn default_tier2_communities() -> usize {
    3
}

fn default_tier3_messages() -> usize {
    25
}

fn default_tier1_timeout_ms() -> u64 {
    1500
}

fn default_tier2_timeout_ms() -> u64 {
    2000
}

fn default_tier3_timeout_ms() -> u64 {
    2500
}

fn default_background_enabled() -> bool {
    true
}

fn default_max_tracked() -> usize {
    32
}

fn default_backoff_base_ms() -> u64 {
    15_000
}

fn default_backoff_max_ms() -> u64 {
    600_000 // 10 minutes
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_poll_limit() -> usize {
    25
}

fn default_poll_timeout_ms() -> u64 {
    2500
}

fn default_sweep_interval_ms() -> u64 {
    5000
}

fn default_page_size() -> usize {
    50
}

fn default_page_timeout_ms() -> u64 {
    2500
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            match_window_secs: default_match_window_secs(),
            recent_threshold_ms: default_recent_threshold_ms(),
            optimistic_timeout_secs: default_optimistic_timeout_secs(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dm_limit: default_dm_limit(),
            top_communities: default_top_communities(),
            tier2_communities: default_tier2_communities(),
            tier3_messages: default_tier3_messages(),
            tier1_timeout_ms: default_tier1_timeout_ms(),
            tier2_timeout_ms: default_tier2_timeout_ms(),
            tier3_timeout_ms: default_tier3_timeout_ms(),
        }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: default_background_enabled(),
            max_tracked: default_max_tracked(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            poll_limit: default_poll_limit(),
            poll_timeout_ms: default_poll_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            timeout_ms: default_page_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Reconciliation tunables for the pure core.
    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            match_window_secs: self.reconcile.match_window_secs,
            recent_threshold_ms: self.reconcile.recent_threshold_ms,
            optimistic_timeout_secs: self.reconcile.optimistic_timeout_secs,
        }
    }

    /// Backoff policy for the LRU scheduler.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_ms: self.background.backoff_base_ms,
            max_ms: self.background.backoff_max_ms,
            multiplier: self.background.backoff_multiplier,
        }
    }
}

impl LoaderConfig {
    /// Tier 1 per-operation timeout.
    pub fn tier1_timeout(&self) -> Duration {
        Duration::from_millis(self.tier1_timeout_ms)
    }

    /// Tier 2 per-operation timeout.
    pub fn tier2_timeout(&self) -> Duration {
        Duration::from_millis(self.tier2_timeout_ms)
    }

    /// Tier 3 per-operation timeout.
    pub fn tier3_timeout(&self) -> Duration {
        Duration::from_millis(self.tier3_timeout_ms)
    }
}

impl BackgroundConfig {
    /// Per-poll timeout.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Longest idle wait between due checks.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl PaginationConfig {
    /// Per-page timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
