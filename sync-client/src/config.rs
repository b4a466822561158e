//! Configuration loading for pairsync.
//!
//! Configuration is loaded from a TOML file (default: `pairsync.toml`).
//! Every section and field is optional; missing values take their defaults.

use pairsync_core::{MergePolicy, RetryPolicy};
use pairsync_types::{DeviceId, EventField};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a pairsync device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local device identity.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Session transport timeouts and limits.
    #[serde(default)]
    pub session: SessionConfig,
    /// Orchestrator retry schedule.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Conflict resolution policy.
    #[serde(default)]
    pub merge: MergeConfig,
}

/// Local device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Human-readable device name sent in `SyncRequest`/`SyncResponse`.
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Stable device id (generated when absent).
    #[serde(default)]
    pub id: Option<String>,
}

/// Session transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Timeout for the radio connect (default: 15).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Timeout for the challenge/response handshake (default: 5).
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
    /// Timeout for any single protocol reply (default: 10).
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,
    /// Gap allowed between chunks of one batch before the transfer is
    /// declared incomplete (default: 10).
    #[serde(default = "default_chunk_idle_timeout_secs")]
    pub chunk_idle_timeout_secs: u64,
    /// Retransmissions allowed per chunk (default: 3).
    #[serde(default = "default_max_retransmits")]
    pub max_retransmits: u32,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per session, first included (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff after the first failure in milliseconds (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Merge policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Separator joining conflicting text values (default: `" | "`).
    #[serde(default = "default_text_separator")]
    pub text_separator: String,
    /// Field names whose conflicts escalate severity (default: `["day"]`).
    #[serde(default = "default_critical_fields")]
    pub critical_fields: Vec<String>,
}

// Default value functions
fn default_device_name() -> String {
    "pairsync device".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_verify_timeout_secs() -> u64 {
    5
}

fn default_receive_timeout_secs() -> u64 {
    10
}

fn default_chunk_idle_timeout_secs() -> u64 {
    10
}

fn default_max_retransmits() -> u32 {
    3
}

fn default_max_attempts() -> u32 {
    pairsync_core::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_text_separator() -> String {
    pairsync_core::conflict::DEFAULT_TEXT_SEPARATOR.to_string()
}

fn default_critical_fields() -> Vec<String> {
    vec![EventField::Day.name().to_string()]
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            id: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            verify_timeout_secs: default_verify_timeout_secs(),
            receive_timeout_secs: default_receive_timeout_secs(),
            chunk_idle_timeout_secs: default_chunk_idle_timeout_secs(),
            max_retransmits: default_max_retransmits(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            text_separator: default_text_separator(),
            critical_fields: default_critical_fields(),
        }
    }
}

impl SessionConfig {
    /// Radio connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Handshake timeout.
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    /// Per-reply timeout.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    /// Inter-chunk idle timeout.
    pub fn chunk_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_idle_timeout_secs)
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        let timeouts = [
            ("session.connect_timeout_secs", self.session.connect_timeout_secs),
            ("session.verify_timeout_secs", self.session.verify_timeout_secs),
            ("session.receive_timeout_secs", self.session.receive_timeout_secs),
            (
                "session.chunk_idle_timeout_secs",
                self.session.chunk_idle_timeout_secs,
            ),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        if self.merge.text_separator.is_empty() {
            return Err(ConfigError::Invalid(
                "merge.text_separator must not be empty".into(),
            ));
        }
        self.critical_fields()?;
        Ok(())
    }

    /// The configured device id, or a fresh random one.
    pub fn device_id(&self) -> DeviceId {
        match &self.device.id {
            Some(id) => DeviceId::new(id.clone()),
            None => DeviceId::random(),
        }
    }

    /// Retry schedule for the orchestrator.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    /// Merge policy for the conflict engine.
    pub fn merge_policy(&self) -> Result<MergePolicy, ConfigError> {
        Ok(MergePolicy {
            text_separator: self.merge.text_separator.clone(),
            critical_fields: self.critical_fields()?,
        })
    }

    fn critical_fields(&self) -> Result<BTreeSet<EventField>, ConfigError> {
        self.merge
            .critical_fields
            .iter()
            .map(|name| {
                EventField::from_name(name).ok_or_else(|| {
                    ConfigError::Invalid(format!("unknown critical field: {name}"))
                })
            })
            .collect()
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
    /// Parsed but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
