//! Builder for [`IpGate`].
//!
//! ```rust,ignore
//! use ipgate::{IpGateBuilder, IpGateConfig};
//!
//! let gate = IpGateBuilder::new(IpGateConfig::default())
//!     .build_sqlite()
//!     .await?;
//! ```

use std::sync::Arc;

use ipgate_core::{
    InMemoryIpReputationRepository, IpReputationRepository, IpReputationService, ReputationPolicy,
};

use crate::{
    IpGate, IpGateError,
    alerts::{AlertDispatcher, AlertSink, TracingAlertSink},
    config::IpGateConfig,
};

#[cfg(feature = "sqlite")]
use ipgate_storage_sqlite::SqliteIpReputationRepository;

pub struct IpGateBuilder {
    config: IpGateConfig,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl IpGateBuilder {
    pub fn new(config: IpGateConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
        }
    }

    pub fn config(&self) -> &IpGateConfig {
        &self.config
    }

    /// Add an alert sink. Without any, alerts go to the log.
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Build over an existing repository.
    pub fn build<R: IpReputationRepository>(
        self,
        repository: Arc<R>,
    ) -> Result<IpGate<R>, IpGateError> {
        let policy = ReputationPolicy::try_from(self.config.policy)?;

        let sinks = if self.sinks.is_empty() {
            vec![Arc::new(TracingAlertSink) as Arc<dyn AlertSink>]
        } else {
            self.sinks
        };
        let alerts = sinks
            .into_iter()
            .fold(AlertDispatcher::new(self.config.alerts), |dispatcher, sink| {
                dispatcher.with_sink(sink)
            });

        Ok(IpGate::new(
            IpReputationService::new(repository, policy),
            alerts,
        ))
    }

    pub fn build_in_memory(self) -> Result<IpGate<InMemoryIpReputationRepository>, IpGateError> {
        self.build(Arc::new(InMemoryIpReputationRepository::new()))
    }

    /// Connect to `storage.database_url` and build over SQLite.
    #[cfg(feature = "sqlite")]
    pub async fn build_sqlite(self) -> Result<IpGate<SqliteIpReputationRepository>, IpGateError> {
        let repository =
            SqliteIpReputationRepository::connect(&self.config.storage.database_url).await?;
        self.build_sqlite_repository(repository).await
    }

    /// Build over an existing pool.
    #[cfg(feature = "sqlite")]
    pub async fn build_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> Result<IpGate<SqliteIpReputationRepository>, IpGateError> {
        self.build_sqlite_repository(SqliteIpReputationRepository::new(pool))
            .await
    }

    #[cfg(feature = "sqlite")]
    async fn build_sqlite_repository(
        self,
        repository: SqliteIpReputationRepository,
    ) -> Result<IpGate<SqliteIpReputationRepository>, IpGateError> {
        if self.config.storage.apply_migrations {
            repository.migrate().await?;
        }
        self.build(Arc::new(repository))
    }
}
