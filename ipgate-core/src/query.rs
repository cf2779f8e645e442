//! Listing, filtering and aggregate views over IP records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{IpRecord, IpStatus};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filters for listing IP records. Results are ordered by most recent activity first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecordQuery {
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    /// Matches the status a reader would see, with elapsed blocks counted as allowed.
    pub status: Option<IpStatus>,
    /// Case-insensitive substring over IP, user and location.
    pub search: Option<String>,
    pub active_since: Option<DateTime<Utc>>,
    pub active_until: Option<DateTime<Utc>>,
}

impl Default for IpRecordQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            status: None,
            search: None,
            active_since: None,
            active_until: None,
        }
    }
}

impl IpRecordQuery {
    pub fn with_status(mut self, status: IpStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_page(mut self, page: u32, limit: u32) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    /// Page and limit clamped into range.
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self.search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Whether an already-effective record passes the filters.
    pub fn matches(&self, record: &IpRecord) -> bool {
        if self.status.is_some_and(|status| status != record.status) {
            return false;
        }
        if let Some(needle) = self.search.as_deref() {
            if !record.matches_search(needle) {
                return false;
            }
        }
        if self.active_since.is_some_and(|since| record.last_activity < since) {
            return false;
        }
        if self.active_until.is_some_and(|until| record.last_activity > until) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub pages: u32,
    pub total: u64,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, query: &IpRecordQuery, total: u64) -> Self {
        let limit = u64::from(query.limit.max(1));
        Self {
            items,
            page: query.page,
            pages: total.div_ceil(limit) as u32,
            total,
            limit: query.limit,
        }
    }
}

/// Counts of records by effective status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpStatistics {
    pub total: u64,
    pub allowed: u64,
    pub suspicious: u64,
    pub blocked: u64,
    /// Records active within [`recent_activity_window`].
    pub recent_activity: u64,
}

pub fn recent_activity_window() -> Duration {
    Duration::hours(24)
}

impl IpStatistics {
    pub fn tally(&mut self, record: &IpRecord, recent_since: DateTime<Utc>) {
        self.total += 1;
        match record.status {
            IpStatus::Allowed => self.allowed += 1,
            IpStatus::Suspicious => self.suspicious += 1,
            IpStatus::Blocked => self.blocked += 1,
        }
        if record.last_activity >= recent_since {
            self.recent_activity += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_clamps_paging() {
        let query = IpRecordQuery::default().with_page(0, 1_000).normalized();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, MAX_PAGE_SIZE);
        assert_eq!(query.offset(), 0);

        let query = IpRecordQuery::default().with_page(3, 20).normalized();
        assert_eq!(query.offset(), 40);
    }

    #[test]
    fn test_blank_search_is_dropped() {
        let query = IpRecordQuery::default().with_search("   ").normalized();
        assert_eq!(query.search, None);
    }

    #[test]
    fn test_page_count_rounds_up() {
        let query = IpRecordQuery::default().with_page(1, 10);
        let page: Page<()> = Page::new(vec![], &query, 21);
        assert_eq!(page.pages, 3);

        let page: Page<()> = Page::new(vec![], &query, 0);
        assert_eq!(page.pages, 0);
    }

    #[test]
    fn test_matches_applies_all_filters() {
        let now = Utc::now();
        let mut record = IpRecord::new("172.16.0.4", now);
        record.status = IpStatus::Suspicious;
        record.associated_user = Some("carol".to_string());

        let query = IpRecordQuery::default()
            .with_status(IpStatus::Suspicious)
            .with_search("CAROL");
        assert!(query.matches(&record));

        assert!(!query.clone().with_status(IpStatus::Blocked).matches(&record));

        let stale = IpRecordQuery {
            active_since: Some(now + Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!stale.matches(&record));
    }
}
