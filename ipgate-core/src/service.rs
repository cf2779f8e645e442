//! IP reputation tracking service.
//!
//! This module decides, for a given source IP, whether a login attempt may
//! proceed, and updates the IP's reputation in response to attempt outcomes
//! and administrative actions.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ipgate_core::{InMemoryIpReputationRepository, IpReputationService, ReputationPolicy};
//!
//! let service = IpReputationService::new(
//!     Arc::new(InMemoryIpReputationRepository::new()),
//!     ReputationPolicy::default(),
//! );
//!
//! // Before accepting credentials
//! if service.check_status("203.0.113.7").await?.blocked {
//!     // Reject the request
//! }
//!
//! // After authentication has been decided
//! let record = service.record_attempt("203.0.113.7", false).await?;
//! ```

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::{
    Error,
    error::require_non_empty,
    policy::ReputationPolicy,
    query::{IpRecordQuery, IpStatistics, Page},
    record::{AttemptContext, IpRecord, IpStatus, StatusReport},
    repositories::IpReputationRepository,
};

/// A recorded attempt together with the status the IP had before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: IpStatus,
    pub record: IpRecord,
}

impl Transition {
    /// True when this attempt moved the IP into `Blocked`.
    pub fn became_blocked(&self) -> bool {
        self.previous != IpStatus::Blocked && self.record.status == IpStatus::Blocked
    }
}

/// Service owning the per-IP reputation records and their transitions.
///
/// All writes go through the repository's atomic update, so the service is
/// safe to share across tasks handling requests from the same IP.
pub struct IpReputationService<R: IpReputationRepository> {
    repository: Arc<R>,
    policy: ReputationPolicy,
}

impl<R: IpReputationRepository> IpReputationService<R> {
    pub fn new(repository: Arc<R>, policy: ReputationPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> &ReputationPolicy {
        &self.policy
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    /// Record the outcome of a login attempt from `ip_address`.
    pub async fn record_attempt(
        &self,
        ip_address: &str,
        succeeded: bool,
    ) -> Result<IpRecord, Error> {
        self.record_attempt_with(ip_address, succeeded, &AttemptContext::default())
            .await
    }

    /// Record the outcome of a login attempt, along with the user and location
    /// seen on it.
    ///
    /// Creates the record on first sight.
    pub async fn record_attempt_with(
        &self,
        ip_address: &str,
        succeeded: bool,
        context: &AttemptContext,
    ) -> Result<IpRecord, Error> {
        Ok(self
            .record_attempt_transition(ip_address, succeeded, context)
            .await?
            .record)
    }

    /// Like [`record_attempt_with`](Self::record_attempt_with), but also reports
    /// the status the IP had going in, so callers can alert on a fresh block.
    pub async fn record_attempt_transition(
        &self,
        ip_address: &str,
        succeeded: bool,
        context: &AttemptContext,
    ) -> Result<Transition, Error> {
        require_non_empty("ip_address", ip_address)?;

        let now = Utc::now();
        // Written on every application of the mutation; the last one is the one that stuck.
        let previous = Mutex::new(IpStatus::Allowed);
        let record = self
            .repository
            .upsert_with(ip_address, now, &|record| {
                record.expire_block(now);
                if let Ok(mut previous) = previous.lock() {
                    *previous = record.status;
                }
                context.apply_to(record);
                self.policy.apply_attempt(record, succeeded, now);
            })
            .await?;
        let previous = previous
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let transition = Transition { previous, record };

        if transition.became_blocked() {
            tracing::warn!(
                ip_address,
                failed_attempts = transition.record.failed_attempt_count,
                block_until = ?transition.record.block_until,
                "IP blocked after failed login attempt"
            );
        } else if transition.record.status == IpStatus::Suspicious
            && transition.previous != IpStatus::Suspicious
        {
            tracing::info!(
                ip_address,
                failed_attempts = transition.record.failed_attempt_count,
                "IP flagged as suspicious"
            );
        } else {
            tracing::debug!(ip_address, succeeded, "Recorded login attempt");
        }

        Ok(transition)
    }

    /// Block `ip_address` on an administrator's behalf.
    ///
    /// `until = None` blocks indefinitely. The record is created if the IP has
    /// never been seen.
    pub async fn block_manually(
        &self,
        ip_address: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<IpRecord, Error> {
        require_non_empty("ip_address", ip_address)?;
        require_non_empty("block_reason", reason)?;

        let now = Utc::now();
        let record = self
            .repository
            .upsert_with(ip_address, now, &|record| {
                self.policy.apply_manual_block(record, reason, until, now);
            })
            .await?;

        tracing::info!(ip_address, reason, until = ?until, "IP blocked manually");
        Ok(record)
    }

    /// Lift any block on `ip_address`. The failed attempt count is kept unless
    /// the policy resets it.
    pub async fn unblock(&self, ip_address: &str) -> Result<IpRecord, Error> {
        require_non_empty("ip_address", ip_address)?;

        let now = Utc::now();
        let record = self
            .repository
            .update_with(ip_address, &|record| self.policy.apply_unblock(record, now))
            .await?
            .ok_or_else(|| Error::NotFound(ip_address.to_string()))?;

        tracing::info!(ip_address, "IP unblocked");
        Ok(record)
    }

    /// Report whether `ip_address` is currently blocked.
    ///
    /// Unknown IPs are allowed. An elapsed block is reported as allowed and is
    /// written back as such.
    pub async fn check_status(&self, ip_address: &str) -> Result<StatusReport, Error> {
        require_non_empty("ip_address", ip_address)?;

        let now = Utc::now();
        let Some(record) = self.repository.find(ip_address).await? else {
            return Ok(StatusReport::default());
        };

        if record.is_block_expired(now) {
            self.repository
                .update_with(ip_address, &|record| {
                    record.expire_block(now);
                })
                .await?;
            tracing::debug!(ip_address, "Block on IP expired");
        }

        Ok(record.status_report(now))
    }

    /// Fetch a single record as a reader would see it now.
    pub async fn get(&self, ip_address: &str) -> Result<Option<IpRecord>, Error> {
        require_non_empty("ip_address", ip_address)?;
        let now = Utc::now();
        Ok(self
            .repository
            .find(ip_address)
            .await?
            .map(|record| record.effective(now)))
    }

    /// List records for administration, most recently active first.
    pub async fn list(&self, query: &IpRecordQuery) -> Result<Page<IpRecord>, Error> {
        self.repository.list(query, Utc::now()).await
    }

    pub async fn statistics(&self) -> Result<IpStatistics, Error> {
        self.repository.statistics(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::StorageError,
        policy::DEFAULT_BLOCK_REASON,
        record::Location,
        repositories::{InMemoryIpReputationRepository, RecordMutation},
    };
    use async_trait::async_trait;
    use chrono::Duration;

    fn service() -> IpReputationService<InMemoryIpReputationRepository> {
        IpReputationService::new(
            Arc::new(InMemoryIpReputationRepository::new()),
            ReputationPolicy::default(),
        )
    }

    /// Repository whose every call fails, for error propagation tests
    struct FailingRepository;

    #[async_trait]
    impl IpReputationRepository for FailingRepository {
        async fn find(&self, _ip_address: &str) -> Result<Option<IpRecord>, Error> {
            Err(StorageError::Connection("store unavailable".to_string()).into())
        }

        async fn upsert_with(
            &self,
            _ip_address: &str,
            _now: DateTime<Utc>,
            _mutate: RecordMutation<'_>,
        ) -> Result<IpRecord, Error> {
            Err(StorageError::Connection("store unavailable".to_string()).into())
        }

        async fn update_with(
            &self,
            _ip_address: &str,
            _mutate: RecordMutation<'_>,
        ) -> Result<Option<IpRecord>, Error> {
            Err(StorageError::Connection("store unavailable".to_string()).into())
        }

        async fn list(
            &self,
            _query: &IpRecordQuery,
            _now: DateTime<Utc>,
        ) -> Result<Page<IpRecord>, Error> {
            Err(StorageError::Connection("store unavailable".to_string()).into())
        }

        async fn statistics(&self, _now: DateTime<Utc>) -> Result<IpStatistics, Error> {
            Err(StorageError::Connection("store unavailable".to_string()).into())
        }
    }

    #[tokio::test]
    async fn test_five_failures_block_for_an_hour() {
        let service = service();
        let before = Utc::now();

        let mut record = None;
        for _ in 0..5 {
            record = Some(service.record_attempt("10.0.0.1", false).await.unwrap());
        }
        let record = record.unwrap();

        assert_eq!(record.status, IpStatus::Blocked);
        assert_eq!(record.failed_attempt_count, 5);
        assert_eq!(record.block_reason.as_deref(), Some(DEFAULT_BLOCK_REASON));
        let until = record.block_until.unwrap();
        assert!(until >= before + Duration::hours(1));
        assert!(until <= Utc::now() + Duration::hours(1));

        let report = service.check_status("10.0.0.1").await.unwrap();
        assert!(report.blocked);
        let retry_after = report.retry_after_seconds().unwrap();
        assert!(retry_after > 3590 && retry_after <= 3600);
    }

    #[tokio::test]
    async fn test_walkthrough_from_fresh_ip_to_rehabilitation() {
        let service = service();
        let ip = "10.0.0.5";

        service.record_attempt(ip, false).await.unwrap();
        let record = service.record_attempt(ip, false).await.unwrap();
        assert_eq!(record.status, IpStatus::Allowed);
        assert_eq!(record.failed_attempt_count, 2);

        let record = service.record_attempt(ip, false).await.unwrap();
        assert_eq!(record.status, IpStatus::Suspicious);
        assert_eq!(record.failed_attempt_count, 3);

        service.record_attempt(ip, false).await.unwrap();
        let record = service.record_attempt(ip, false).await.unwrap();
        assert_eq!(record.status, IpStatus::Blocked);
        assert_eq!(record.failed_attempt_count, 5);
        assert!(record.block_until.is_some());

        let record = service.record_attempt(ip, true).await.unwrap();
        assert_eq!(record.status, IpStatus::Allowed);
        assert_eq!(record.failed_attempt_count, 0);
        assert!(!service.check_status(ip).await.unwrap().blocked);
    }

    #[tokio::test]
    async fn test_success_clears_manual_block() {
        let service = service();
        service
            .block_manually("10.0.0.2", "abuse report", None)
            .await
            .unwrap();

        let record = service.record_attempt("10.0.0.2", true).await.unwrap();
        assert_eq!(record.status, IpStatus::Allowed);
        assert_eq!(record.block_reason, None);
    }

    #[tokio::test]
    async fn test_unknown_ip_is_allowed() {
        let service = service();
        let report = service.check_status("198.51.100.1").await.unwrap();
        assert!(!report.blocked);
        assert_eq!(report.status, IpStatus::Allowed);
        assert_eq!(report.reason, None);
        assert_eq!(report.block_until, None);

        // A read never creates a record.
        assert!(service.repository().is_empty());
    }

    #[tokio::test]
    async fn test_expired_block_is_reported_and_persisted_as_allowed() {
        let service = service();
        let past = Utc::now() - Duration::minutes(1);
        service
            .block_manually("10.0.0.3", "temporary", Some(past))
            .await
            .unwrap();

        let report = service.check_status("10.0.0.3").await.unwrap();
        assert!(!report.blocked);
        assert_eq!(report.status, IpStatus::Allowed);
        assert_eq!(report.block_until, None);

        let stored = service.repository().find("10.0.0.3").await.unwrap().unwrap();
        assert_eq!(stored.status, IpStatus::Allowed);
        assert_eq!(stored.block_reason, None);
    }

    #[tokio::test]
    async fn test_indefinite_manual_block() {
        let service = service();
        let record = service
            .block_manually("10.0.0.9", "manual review", None)
            .await
            .unwrap();
        assert_eq!(record.status, IpStatus::Blocked);
        assert_eq!(record.block_until, None);

        let report = service.check_status("10.0.0.9").await.unwrap();
        assert!(report.blocked);
        assert_eq!(report.reason.as_deref(), Some("manual review"));
        assert_eq!(report.block_until, None);
        assert_eq!(report.retry_after_seconds(), None);

        let stored = service.repository().find("10.0.0.9").await.unwrap().unwrap();
        assert!(stored.is_blocked(Utc::now() + Duration::days(3650)));
    }

    #[tokio::test]
    async fn test_empty_reason_is_rejected_without_touching_storage() {
        let service = service();
        let err = service
            .block_manually("10.0.0.4", "", None)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
        assert!(service.repository().find("10.0.0.4").await.unwrap().is_none());

        service
            .record_attempt("10.0.0.4", false)
            .await
            .unwrap();
        let err = service
            .block_manually("10.0.0.4", "   ", None)
            .await
            .unwrap_err();
        assert!(err.is_validation_error());
        let stored = service.repository().find("10.0.0.4").await.unwrap().unwrap();
        assert_eq!(stored.status, IpStatus::Allowed);
    }

    #[tokio::test]
    async fn test_empty_ip_is_rejected_everywhere() {
        let service = service();
        assert!(service.record_attempt("", false).await.unwrap_err().is_validation_error());
        assert!(
            service
                .block_manually(" ", "reason", None)
                .await
                .unwrap_err()
                .is_validation_error()
        );
        assert!(service.unblock("").await.unwrap_err().is_validation_error());
        assert!(service.check_status("").await.unwrap_err().is_validation_error());
        assert!(service.repository().is_empty());
    }

    #[tokio::test]
    async fn test_unblock_unknown_ip_is_not_found() {
        let service = service();
        let err = service.unblock("192.0.2.44").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(service.repository().is_empty());
    }

    #[tokio::test]
    async fn test_unblock_keeps_failure_count() {
        let service = service();
        for _ in 0..5 {
            service.record_attempt("10.0.0.6", false).await.unwrap();
        }

        let record = service.unblock("10.0.0.6").await.unwrap();
        assert_eq!(record.status, IpStatus::Allowed);
        assert_eq!(record.failed_attempt_count, 5);
        assert_eq!(record.block_reason, None);
        assert_eq!(record.block_until, None);

        let record = service.record_attempt("10.0.0.6", false).await.unwrap();
        assert_eq!(record.failed_attempt_count, 6);
        assert_eq!(record.status, IpStatus::Blocked);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        let service = Arc::new(service());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.record_attempt("10.0.0.7", false).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let record = service.get("10.0.0.7").await.unwrap().unwrap();
        assert_eq!(record.failed_attempt_count, 10);
        assert_eq!(record.status, IpStatus::Blocked);
    }

    #[tokio::test]
    async fn test_transition_reports_fresh_block_once() {
        let service = service();
        let context = AttemptContext::default();

        for _ in 0..4 {
            let transition = service
                .record_attempt_transition("10.0.0.20", false, &context)
                .await
                .unwrap();
            assert!(!transition.became_blocked());
        }

        let transition = service
            .record_attempt_transition("10.0.0.20", false, &context)
            .await
            .unwrap();
        assert_eq!(transition.previous, IpStatus::Suspicious);
        assert!(transition.became_blocked());

        let transition = service
            .record_attempt_transition("10.0.0.20", false, &context)
            .await
            .unwrap();
        assert_eq!(transition.previous, IpStatus::Blocked);
        assert!(!transition.became_blocked());
    }

    #[tokio::test]
    async fn test_attempt_records_user_and_location() {
        let service = service();
        let context = AttemptContext::default()
            .with_user("dave")
            .with_location(Location {
                country: Some("PT".to_string()),
                city: Some("Porto".to_string()),
                region: None,
            });

        service
            .record_attempt_with("10.0.0.8", false, &context)
            .await
            .unwrap();
        let record = service.record_attempt("10.0.0.8", false).await.unwrap();
        assert_eq!(record.associated_user.as_deref(), Some("dave"));
        assert_eq!(record.location.city.as_deref(), Some("Porto"));

        let page = service
            .list(&IpRecordQuery::default().with_search("porto"))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let service = IpReputationService::new(Arc::new(FailingRepository), ReputationPolicy::default());

        let err = service.record_attempt("10.0.0.1", false).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Connection(_))));
        assert!(service.check_status("10.0.0.1").await.unwrap_err().is_storage_error());
        assert!(service.unblock("10.0.0.1").await.unwrap_err().is_storage_error());
        assert!(
            service
                .block_manually("10.0.0.1", "reason", None)
                .await
                .unwrap_err()
                .is_storage_error()
        );
    }

    #[tokio::test]
    async fn test_statistics_by_status() {
        let service = service();
        service.record_attempt("10.9.0.1", true).await.unwrap();
        for _ in 0..3 {
            service.record_attempt("10.9.0.2", false).await.unwrap();
        }
        service.block_manually("10.9.0.3", "spam", None).await.unwrap();

        let stats = service.statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.suspicious, 1);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.recent_activity, 3);
    }
}
