//! Configuration for an [`IpGate`](crate::IpGate).
//!
//! The configuration is an ordinary value built by the process entry point and
//! handed to [`IpGateBuilder`](crate::IpGateBuilder). Nothing in the crate reads
//! global state.

use std::fmt;
use std::path::Path;

use chrono::Duration;
use ipgate_core::ReputationPolicy;
use serde::{Deserialize, Serialize};

use crate::IpGateError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpGateConfig {
    pub policy: PolicyConfig,
    pub storage: StorageConfig,
    pub alerts: AlertConfig,
}

impl IpGateConfig {
    pub fn from_json_str(json: &str) -> Result<Self, IpGateError> {
        serde_json::from_str(json).map_err(|e| IpGateError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, IpGateError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| IpGateError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&contents)
    }
}

/// Serializable form of [`ReputationPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub suspicious_after: u32,
    pub block_after: u32,
    pub block_duration_secs: i64,
    pub block_reason: String,
    pub reset_attempts_on_unblock: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let policy = ReputationPolicy::default();
        Self {
            suspicious_after: policy.suspicious_after,
            block_after: policy.block_after,
            block_duration_secs: policy.block_duration.num_seconds(),
            block_reason: policy.block_reason,
            reset_attempts_on_unblock: policy.reset_attempts_on_unblock,
        }
    }
}

impl TryFrom<PolicyConfig> for ReputationPolicy {
    type Error = IpGateError;

    fn try_from(config: PolicyConfig) -> Result<Self, Self::Error> {
        if config.suspicious_after == 0 || config.block_after == 0 {
            return Err(IpGateError::Config(
                "policy thresholds must be at least 1".to_string(),
            ));
        }
        if config.block_after < config.suspicious_after {
            return Err(IpGateError::Config(format!(
                "block_after ({}) must not be below suspicious_after ({})",
                config.block_after, config.suspicious_after
            )));
        }
        if config.block_duration_secs <= 0 {
            return Err(IpGateError::Config(
                "block_duration_secs must be positive".to_string(),
            ));
        }
        if config.block_reason.trim().is_empty() {
            return Err(IpGateError::Config("block_reason must not be empty".to_string()));
        }

        Ok(ReputationPolicy {
            suspicious_after: config.suspicious_after,
            block_after: config.block_after,
            block_duration: Duration::seconds(config.block_duration_secs),
            block_reason: config.block_reason,
            reset_attempts_on_unblock: config.reset_attempts_on_unblock,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    /// Run schema migrations when the gate is built.
    pub apply_migrations: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ipgate.db?mode=rwc".to_string(),
            apply_migrations: true,
        }
    }
}

/// Operator alerting on reputation changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    /// Also alert when an administrator blocks or unblocks an IP.
    pub include_manual_actions: bool,
    /// Destination for an application-provided Telegram sink.
    pub telegram: Option<TelegramConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_manual_actions: false,
            telegram: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}
