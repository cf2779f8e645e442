//! IP reputation records and the read-side view of them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Whether new attempts from an IP are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpStatus {
    #[default]
    Allowed,
    Suspicious,
    Blocked,
}

impl IpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IpStatus::Allowed => "allowed",
            IpStatus::Suspicious => "suspicious",
            IpStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for IpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allowed" => Ok(IpStatus::Allowed),
            "suspicious" => Ok(IpStatus::Suspicious),
            "blocked" => Ok(IpStatus::Blocked),
            other => Err(ValidationError::InvalidField(format!("status: {other}"))),
        }
    }
}

/// Coarse geographic location reported for an IP, used for display and search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.region.is_none() && self.city.is_none()
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = &str> {
        [&self.country, &self.region, &self.city]
            .into_iter()
            .filter_map(|f| f.as_deref())
    }
}

/// One record per distinct source IP address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    pub ip_address: String,
    pub status: IpStatus,
    pub failed_attempt_count: u32,
    pub block_reason: Option<String>,
    /// `None` while blocked means the block never expires.
    pub block_until: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    /// Last-seen username, for display only.
    pub associated_user: Option<String>,
    pub location: Location,
    pub created_at: DateTime<Utc>,
}

impl IpRecord {
    /// A fresh record in the initial `Allowed` state.
    pub fn new(ip_address: &str, now: DateTime<Utc>) -> Self {
        Self {
            ip_address: ip_address.to_string(),
            status: IpStatus::Allowed,
            failed_attempt_count: 0,
            block_reason: None,
            block_until: None,
            last_activity: now,
            associated_user: None,
            location: Location::default(),
            created_at: now,
        }
    }

    /// True when the record is blocked with a deadline that has already passed.
    pub fn is_block_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == IpStatus::Blocked && self.block_until.is_some_and(|until| until <= now)
    }

    /// True while a block is in force at `now`.
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.status == IpStatus::Blocked && !self.is_block_expired(now)
    }

    /// Reverts an elapsed block to `Allowed`. Returns whether anything changed.
    ///
    /// The failed attempt counter is left alone.
    pub fn expire_block(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_block_expired(now) {
            return false;
        }
        self.status = IpStatus::Allowed;
        self.block_reason = None;
        self.block_until = None;
        true
    }

    /// The record as any reader must see it at `now`, with lazy expiry applied.
    pub fn effective(mut self, now: DateTime<Utc>) -> Self {
        self.expire_block(now);
        self
    }

    /// Advances `last_activity`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn status_report(&self, now: DateTime<Utc>) -> StatusReport {
        let record = self.clone().effective(now);
        StatusReport {
            blocked: record.status == IpStatus::Blocked,
            status: record.status,
            reason: record.block_reason,
            block_until: record.block_until,
        }
    }

    /// Case-insensitive substring match over the IP, user and location fields.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        std::iter::once(self.ip_address.as_str())
            .chain(self.associated_user.as_deref())
            .chain(self.location.fields())
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

/// Result of an access check for a single IP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub blocked: bool,
    pub status: IpStatus,
    pub reason: Option<String>,
    pub block_until: Option<DateTime<Utc>>,
}

impl StatusReport {
    /// Seconds until an expiring block lifts, if any.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        if !self.blocked {
            return None;
        }
        self.block_until
            .map(|until| (until - Utc::now()).num_seconds().max(0))
    }
}

/// Optional details recorded alongside an attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptContext {
    pub user: Option<String>,
    pub location: Option<Location>,
}

impl AttemptContext {
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub(crate) fn apply_to(&self, record: &mut IpRecord) {
        if let Some(user) = self.user.as_deref().filter(|u| !u.trim().is_empty()) {
            record.associated_user = Some(user.to_string());
        }
        if let Some(location) = self.location.as_ref().filter(|l| !l.is_empty()) {
            record.location = location.clone();
        }
    }
}
