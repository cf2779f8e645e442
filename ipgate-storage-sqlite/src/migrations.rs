//! Schema for the SQLite backend.

use sqlx::SqlitePool;

use ipgate_core::{Error, error::StorageError};

/// Statements applied in order. Each is idempotent.
const SCHEMA: &[(&str, &str)] = &[
    (
        "create_ip_records",
        r#"
        CREATE TABLE IF NOT EXISTS ip_records (
            ip_address TEXT PRIMARY KEY NOT NULL,
            status TEXT NOT NULL DEFAULT 'allowed',
            failed_attempt_count INTEGER NOT NULL DEFAULT 0,
            block_reason TEXT,
            block_until INTEGER,
            last_activity INTEGER NOT NULL,
            associated_user TEXT,
            country TEXT,
            region TEXT,
            city TEXT,
            created_at INTEGER NOT NULL,
            version INTEGER NOT NULL DEFAULT 0
        )
        "#,
    ),
    (
        "index_ip_records_status",
        "CREATE INDEX IF NOT EXISTS idx_ip_records_status ON ip_records(status)",
    ),
    (
        "index_ip_records_last_activity",
        "CREATE INDEX IF NOT EXISTS idx_ip_records_last_activity ON ip_records(last_activity)",
    ),
];

pub async fn migrate(pool: &SqlitePool) -> Result<(), Error> {
    let mut tx = pool.begin().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to start migration transaction");
        StorageError::Migration(e.to_string())
    })?;

    for (name, statement) in SCHEMA {
        tracing::debug!(migration = name, "Applying migration");
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, migration = name, "Failed to apply migration");
                StorageError::Migration(format!("{name}: {e}"))
            })?;
    }

    tx.commit()
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    Ok(())
}
