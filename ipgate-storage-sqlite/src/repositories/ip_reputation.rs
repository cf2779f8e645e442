//! SQLite implementation of the IP reputation repository.
//!
//! Writes use optimistic concurrency: each row carries a `version`, a mutation
//! is applied to a freshly read copy, and the write only lands if the version
//! is unchanged. A lost race re-reads and re-applies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use ipgate_core::{
    Error, IpRecord, IpRecordQuery, IpStatistics, IpStatus, Location, Page,
    error::StorageError,
    query::recent_activity_window,
    repositories::{IpReputationRepository, RecordMutation},
};

/// Upper bound on conflicting writes before giving up on a single mutation.
const MAX_WRITE_CONFLICTS: usize = 128;

const RECORD_COLUMNS: &str = "ip_address, status, failed_attempt_count, block_reason, \
     block_until, last_activity, associated_user, country, region, city, created_at, version";

/// Status as any reader must see it: an elapsed block counts as allowed.
/// `?1` is the current time in milliseconds.
const EFFECTIVE_STATUS: &str = "CASE WHEN status = 'blocked' AND block_until IS NOT NULL \
     AND block_until <= ?1 THEN 'allowed' ELSE status END";

/// Shared filter for listing. Parameters: `?2` status, `?3` search pattern,
/// `?4` active since, `?5` active until.
const LIST_FILTER: &str = r#"
    (?2 IS NULL OR effective_status = ?2)
    AND (?3 IS NULL
        OR ip_address LIKE ?3 ESCAPE '\'
        OR associated_user LIKE ?3 ESCAPE '\'
        OR country LIKE ?3 ESCAPE '\'
        OR region LIKE ?3 ESCAPE '\'
        OR city LIKE ?3 ESCAPE '\')
    AND (?4 IS NULL OR last_activity >= ?4)
    AND (?5 IS NULL OR last_activity <= ?5)
"#;

/// SQLite repository for IP reputation records.
pub struct SqliteIpReputationRepository {
    pool: SqlitePool,
}

impl SqliteIpReputationRepository {
    /// Create a new SQLite IP reputation repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, ip_address: &str) -> Result<Option<SqliteIpRecord>, Error> {
        sqlx::query_as::<_, SqliteIpRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM ip_records WHERE ip_address = ?"
        ))
        .bind(ip_address)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| database_error("Failed to load IP record", e))
    }

    async fn insert_if_absent(&self, ip_address: &str, now: DateTime<Utc>) -> Result<(), Error> {
        let record = IpRecord::new(ip_address, now);
        sqlx::query(
            r#"
            INSERT INTO ip_records (ip_address, status, failed_attempt_count, last_activity, created_at, version)
            VALUES (?, ?, 0, ?, ?, 0)
            ON CONFLICT(ip_address) DO NOTHING
            "#,
        )
        .bind(&record.ip_address)
        .bind(record.status.as_str())
        .bind(record.last_activity.timestamp_millis())
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to create IP record", e))?;
        Ok(())
    }

    /// Write `record` only if the stored row is still at `version`.
    async fn compare_and_swap(&self, record: &IpRecord, version: i64) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE ip_records
            SET status = ?, failed_attempt_count = ?, block_reason = ?, block_until = ?,
                last_activity = ?, associated_user = ?, country = ?, region = ?, city = ?,
                version = version + 1
            WHERE ip_address = ? AND version = ?
            "#,
        )
        .bind(record.status.as_str())
        .bind(i64::from(record.failed_attempt_count))
        .bind(&record.block_reason)
        .bind(record.block_until.map(|t| t.timestamp_millis()))
        .bind(record.last_activity.timestamp_millis())
        .bind(&record.associated_user)
        .bind(&record.location.country)
        .bind(&record.location.region)
        .bind(&record.location.city)
        .bind(&record.ip_address)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error("Failed to update IP record", e))?;

        Ok(result.rows_affected() == 1)
    }

    /// Read-modify-write loop shared by both update paths.
    async fn mutate(
        &self,
        ip_address: &str,
        create_at: Option<DateTime<Utc>>,
        mutate: RecordMutation<'_>,
    ) -> Result<Option<IpRecord>, Error> {
        for _ in 0..MAX_WRITE_CONFLICTS {
            let row = match self.fetch(ip_address).await? {
                Some(row) => row,
                None => match create_at {
                    Some(now) => {
                        self.insert_if_absent(ip_address, now).await?;
                        continue;
                    }
                    None => return Ok(None),
                },
            };

            let version = row.version;
            let mut record = IpRecord::try_from(row)?;
            mutate(&mut record);

            if self.compare_and_swap(&record, version).await? {
                return Ok(Some(record));
            }
            tracing::debug!(ip_address, "Concurrent write to IP record, retrying");
        }

        tracing::error!(ip_address, "Gave up updating IP record under contention");
        Err(StorageError::Database(format!(
            "Too many concurrent writes to IP record {ip_address}"
        ))
        .into())
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteIpRecord {
    ip_address: String,
    status: String,
    failed_attempt_count: i64,
    block_reason: Option<String>,
    block_until: Option<i64>,
    last_activity: i64,
    associated_user: Option<String>,
    country: Option<String>,
    region: Option<String>,
    city: Option<String>,
    created_at: i64,
    version: i64,
}

impl TryFrom<SqliteIpRecord> for IpRecord {
    type Error = Error;

    fn try_from(row: SqliteIpRecord) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<IpStatus>()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let failed_attempt_count = u32::try_from(row.failed_attempt_count).map_err(|_| {
            StorageError::Corrupt(format!(
                "failed_attempt_count out of range: {}",
                row.failed_attempt_count
            ))
        })?;

        Ok(IpRecord {
            ip_address: row.ip_address,
            status,
            failed_attempt_count,
            block_reason: row.block_reason,
            block_until: row.block_until.map(timestamp).transpose()?,
            last_activity: timestamp(row.last_activity)?,
            associated_user: row.associated_user,
            location: Location {
                country: row.country,
                region: row.region,
                city: row.city,
            },
            created_at: timestamp(row.created_at)?,
        })
    }
}

/// Internal struct for the statistics query
#[derive(Debug, sqlx::FromRow)]
struct SqliteStatusCount {
    effective_status: String,
    count: i64,
    recent: i64,
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::Corrupt(format!("invalid timestamp: {millis}")).into())
}

fn database_error(context: &str, e: sqlx::Error) -> Error {
    tracing::error!(error = %e, "{context}");
    StorageError::Database(format!("{context}: {e}")).into()
}

/// `%needle%` with LIKE wildcards in the needle escaped.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl IpReputationRepository for SqliteIpReputationRepository {
    async fn find(&self, ip_address: &str) -> Result<Option<IpRecord>, Error> {
        self.fetch(ip_address)
            .await?
            .map(IpRecord::try_from)
            .transpose()
    }

    async fn upsert_with(
        &self,
        ip_address: &str,
        now: DateTime<Utc>,
        mutate: RecordMutation<'_>,
    ) -> Result<IpRecord, Error> {
        self.mutate(ip_address, Some(now), mutate)
            .await?
            .ok_or_else(|| StorageError::Database(format!("IP record {ip_address} vanished")).into())
    }

    async fn update_with(
        &self,
        ip_address: &str,
        mutate: RecordMutation<'_>,
    ) -> Result<Option<IpRecord>, Error> {
        self.mutate(ip_address, None, mutate).await
    }

    async fn list(
        &self,
        query: &IpRecordQuery,
        now: DateTime<Utc>,
    ) -> Result<Page<IpRecord>, Error> {
        let query = query.clone().normalized();
        let now_millis = now.timestamp_millis();
        let status = query.status.map(|s| s.as_str());
        let search = query.search.as_deref().map(like_pattern);
        let since = query.active_since.map(|t| t.timestamp_millis());
        let until = query.active_until.map(|t| t.timestamp_millis());

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM (SELECT *, {EFFECTIVE_STATUS} AS effective_status FROM ip_records) \
             WHERE {LIST_FILTER}"
        ))
        .bind(now_millis)
        .bind(status)
        .bind(search.as_deref())
        .bind(since)
        .bind(until)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| database_error("Failed to count IP records", e))?;

        let rows = sqlx::query_as::<_, SqliteIpRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM \
             (SELECT *, {EFFECTIVE_STATUS} AS effective_status FROM ip_records) \
             WHERE {LIST_FILTER} \
             ORDER BY last_activity DESC, ip_address ASC \
             LIMIT ?6 OFFSET ?7"
        ))
        .bind(now_millis)
        .bind(status)
        .bind(search.as_deref())
        .bind(since)
        .bind(until)
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to list IP records", e))?;

        let items = rows
            .into_iter()
            .map(|row| IpRecord::try_from(row).map(|r| r.effective(now)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, &query, total.max(0) as u64))
    }

    async fn statistics(&self, now: DateTime<Utc>) -> Result<IpStatistics, Error> {
        let recent_since = (now - recent_activity_window()).timestamp_millis();

        let rows = sqlx::query_as::<_, SqliteStatusCount>(&format!(
            r#"
            SELECT {EFFECTIVE_STATUS} AS effective_status,
                   COUNT(*) AS count,
                   SUM(CASE WHEN last_activity >= ?2 THEN 1 ELSE 0 END) AS recent
            FROM ip_records
            GROUP BY effective_status
            "#
        ))
        .bind(now.timestamp_millis())
        .bind(recent_since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| database_error("Failed to compute IP statistics", e))?;

        let mut stats = IpStatistics::default();
        for row in rows {
            let count = row.count.max(0) as u64;
            stats.total += count;
            stats.recent_activity += row.recent.max(0) as u64;
            match row.effective_status.parse::<IpStatus>() {
                Ok(IpStatus::Allowed) => stats.allowed += count,
                Ok(IpStatus::Suspicious) => stats.suspicious += count,
                Ok(IpStatus::Blocked) => stats.blocked += count,
                Err(e) => return Err(StorageError::Corrupt(e.to_string()).into()),
            }
        }
        Ok(stats)
    }
}
