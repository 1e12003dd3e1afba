//! Configuration types for accel-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration
///
/// Every field has a default, so an empty JSON object (`{}`) is a valid
/// configuration that reproduces the stock recovery policy.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Delayed-retry policy applied by the recovery reactor
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Disk space remediation settings
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Output monitoring settings
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Parse a configuration from a JSON string and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration from a JSON file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check settings that serde cannot express as types
    pub fn validate(&self) -> Result<()> {
        if self.monitor.event_channel_capacity == 0 {
            return Err(Error::config(
                "event_channel_capacity",
                "event channel capacity must be greater than zero",
            ));
        }
        if self.monitor.error_tail_lines == 0 {
            return Err(Error::config(
                "error_tail_lines",
                "at least one error line must be retained for classification",
            ));
        }
        Ok(())
    }
}

/// Retry delays used by the recovery reactor
///
/// Delays are fixed per failure kind. There is no backoff growth and no
/// attempt cap; whoever consumes the retry signal decides when to stop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Delay before a retryable network failure is re-queued (default: 5 seconds)
    #[serde(default = "default_network_retry_delay", with = "duration_serde")]
    pub network_retry_delay: Duration,

    /// Delay before a retryable server failure is re-queued (default: 10 seconds)
    #[serde(default = "default_server_retry_delay", with = "duration_serde")]
    pub server_retry_delay: Duration,

    /// Delay before an unclassified failure is re-queued (default: 10 seconds)
    #[serde(default = "default_unknown_retry_delay", with = "duration_serde")]
    pub unknown_retry_delay: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            network_retry_delay: default_network_retry_delay(),
            server_retry_delay: default_server_retry_delay(),
            unknown_retry_delay: default_unknown_retry_delay(),
        }
    }
}

/// Disk space check settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Whether the disk space check runs at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free space required on top of the file size (default: 1 GiB)
    #[serde(default = "default_safety_margin")]
    pub safety_margin_bytes: u64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            safety_margin_bytes: default_safety_margin(),
        }
    }
}

/// Output monitor settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Capacity of the broadcast event channel (default: 1000)
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Number of trailing error lines kept for failure classification (default: 50)
    #[serde(default = "default_error_tail_lines")]
    pub error_tail_lines: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            error_tail_lines: default_error_tail_lines(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_network_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_server_retry_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_unknown_retry_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_safety_margin() -> u64 {
    1024 * 1024 * 1024
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_error_tail_lines() -> usize {
    50
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
