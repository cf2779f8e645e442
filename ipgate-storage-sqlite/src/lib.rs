//! SQLite storage backend for ipgate.
//!
//! ```rust,ignore
//! use ipgate_storage_sqlite::SqliteIpReputationRepository;
//!
//! let pool = sqlx::SqlitePool::connect("sqlite://ipgate.db?mode=rwc").await?;
//! let repository = SqliteIpReputationRepository::new(pool);
//! repository.migrate().await?;
//! ```

mod migrations;
pub mod repositories;

use ipgate_core::{Error, error::StorageError};
use sqlx::SqlitePool;

pub use repositories::SqliteIpReputationRepository;

impl SqliteIpReputationRepository {
    /// Connect to `database_url` without running migrations.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePool::connect(database_url).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            StorageError::Connection(e.to_string())
        })?;
        Ok(Self::new(pool))
    }

    /// Create the `ip_records` table and its indexes if missing.
    pub async fn migrate(&self) -> Result<(), Error> {
        migrations::migrate(self.pool()).await
    }
}
