//! IP reputation tracking and login throttling.
//!
//! `ipgate` tracks every source IP that attempts to log in. Failed attempts
//! escalate an IP from allowed to suspicious to blocked. Blocks expire on their
//! own, and a successful login or an administrator lifts them.
//!
//! # Example
//!
//! ```rust,ignore
//! use ipgate::{IpGateBuilder, IpGateConfig};
//!
//! let config = IpGateConfig::from_file("ipgate.json")?;
//! let gate = IpGateBuilder::new(config).build_sqlite().await?;
//!
//! // Before accepting credentials
//! gate.ensure_allowed(client_ip).await?;
//!
//! // After authentication has been decided
//! gate.record_attempt(client_ip, authenticated, &AttemptContext::default()).await?;
//! ```

pub mod alerts;
pub mod builder;
pub mod config;

use chrono::{DateTime, Utc};
use ipgate_core::IpReputationService;

pub use alerts::{Alert, AlertDispatcher, AlertError, AlertSink, TracingAlertSink};
pub use builder::IpGateBuilder;
pub use config::{AlertConfig, IpGateConfig, PolicyConfig, StorageConfig, TelegramConfig};
pub use ipgate_core::{
    AttemptContext, Error as CoreError, InMemoryIpReputationRepository, IpRecord, IpRecordQuery,
    IpReputationRepository, IpStatistics, IpStatus, Location, Page, ReputationPolicy,
    StatusReport,
};

#[cfg(feature = "sqlite")]
pub use ipgate_storage_sqlite::SqliteIpReputationRepository;

#[derive(Debug, thiserror::Error)]
pub enum IpGateError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IP {ip_address} is blocked")]
    Blocked {
        ip_address: String,
        reason: Option<String>,
        block_until: Option<DateTime<Utc>>,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IpGateError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, IpGateError::Blocked { .. })
    }
}

/// The reputation tracker plus the alerting around it.
pub struct IpGate<R: IpReputationRepository> {
    service: IpReputationService<R>,
    alerts: AlertDispatcher,
}

impl<R: IpReputationRepository> IpGate<R> {
    pub fn new(service: IpReputationService<R>, alerts: AlertDispatcher) -> Self {
        Self { service, alerts }
    }

    pub fn service(&self) -> &IpReputationService<R> {
        &self.service
    }

    pub async fn check_status(&self, ip_address: &str) -> Result<StatusReport, IpGateError> {
        Ok(self.service.check_status(ip_address).await?)
    }

    /// Fails with [`IpGateError::Blocked`] if the IP may not attempt a login.
    pub async fn ensure_allowed(&self, ip_address: &str) -> Result<StatusReport, IpGateError> {
        let report = self.check_status(ip_address).await?;
        if report.blocked {
            tracing::debug!(ip_address, "Rejected attempt from blocked IP");
            return Err(IpGateError::Blocked {
                ip_address: ip_address.to_string(),
                reason: report.reason,
                block_until: report.block_until,
            });
        }
        Ok(report)
    }

    /// Record an attempt, alerting if it pushed the IP into a block.
    pub async fn record_attempt(
        &self,
        ip_address: &str,
        succeeded: bool,
        context: &AttemptContext,
    ) -> Result<IpRecord, IpGateError> {
        let transition = self
            .service
            .record_attempt_transition(ip_address, succeeded, context)
            .await?;

        if transition.became_blocked() {
            let record = &transition.record;
            self.alerts
                .dispatch(Alert::IpBlocked {
                    ip_address: record.ip_address.clone(),
                    failed_attempts: record.failed_attempt_count,
                    reason: record.block_reason.clone(),
                    block_until: record.block_until,
                    associated_user: record.associated_user.clone(),
                    timestamp: record.last_activity,
                })
                .await;
        }

        Ok(transition.record)
    }

    pub async fn block(
        &self,
        ip_address: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<IpRecord, IpGateError> {
        let record = self.service.block_manually(ip_address, reason, until).await?;
        self.alerts
            .dispatch(Alert::IpBlockedManually {
                ip_address: record.ip_address.clone(),
                reason: reason.to_string(),
                block_until: record.block_until,
                timestamp: record.last_activity,
            })
            .await;
        Ok(record)
    }

    pub async fn unblock(&self, ip_address: &str) -> Result<IpRecord, IpGateError> {
        let record = self.service.unblock(ip_address).await?;
        self.alerts
            .dispatch(Alert::IpUnblocked {
                ip_address: record.ip_address.clone(),
                timestamp: record.last_activity,
            })
            .await;
        Ok(record)
    }

    pub async fn get(&self, ip_address: &str) -> Result<Option<IpRecord>, IpGateError> {
        Ok(self.service.get(ip_address).await?)
    }

    pub async fn list(&self, query: &IpRecordQuery) -> Result<Page<IpRecord>, IpGateError> {
        Ok(self.service.list(query).await?)
    }

    pub async fn statistics(&self) -> Result<IpStatistics, IpGateError> {
        Ok(self.service.statistics().await?)
    }
}
