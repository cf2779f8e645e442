//! Operator alerts for IP reputation changes.
//!
//! The tracker itself never notifies anyone. [`IpGate`](crate::IpGate) looks at
//! what each call changed and hands an [`Alert`] to the configured sinks.
//! Delivery is the sink's business; a failing sink is logged and never fails
//! the call that produced the alert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AlertConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// An IP crossed the failure threshold.
    IpBlocked {
        ip_address: String,
        failed_attempts: u32,
        reason: Option<String>,
        block_until: Option<DateTime<Utc>>,
        associated_user: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// An administrator blocked an IP.
    IpBlockedManually {
        ip_address: String,
        reason: String,
        block_until: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    /// An administrator lifted a block.
    IpUnblocked {
        ip_address: String,
        timestamp: DateTime<Utc>,
    },
}

impl Alert {
    pub fn ip_address(&self) -> &str {
        match self {
            Alert::IpBlocked { ip_address, .. }
            | Alert::IpBlockedManually { ip_address, .. }
            | Alert::IpUnblocked { ip_address, .. } => ip_address,
        }
    }

    fn is_manual(&self) -> bool {
        matches!(
            self,
            Alert::IpBlockedManually { .. } | Alert::IpUnblocked { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Alert delivery failed: {0}")]
pub struct AlertError(pub String);

#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        match alert {
            Alert::IpBlocked {
                ip_address,
                failed_attempts,
                block_until,
                ..
            } => tracing::warn!(
                ip_address,
                failed_attempts,
                block_until = ?block_until,
                "ALERT: IP blocked"
            ),
            Alert::IpBlockedManually {
                ip_address, reason, ..
            } => tracing::warn!(ip_address, reason, "ALERT: IP blocked by administrator"),
            Alert::IpUnblocked { ip_address, .. } => {
                tracing::info!(ip_address, "ALERT: IP unblocked by administrator")
            }
        }
        Ok(())
    }
}

/// Fans alerts out to every registered sink, filtered by [`AlertConfig`].
#[derive(Clone)]
pub struct AlertDispatcher {
    config: AlertConfig,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub async fn dispatch(&self, alert: Alert) {
        if !self.config.enabled || (alert.is_manual() && !self.config.include_manual_actions) {
            return;
        }
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&alert).await {
                tracing::warn!(
                    error = %e,
                    ip_address = alert.ip_address(),
                    "Failed to deliver alert"
                );
            }
        }
    }
}
