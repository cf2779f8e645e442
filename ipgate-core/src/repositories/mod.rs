//! Repository traits for IP reputation storage.
//!
//! The tracker never writes a record with a separate read and save. Every
//! mutation is handed to the repository as a closure, and the repository is
//! responsible for applying it atomically with respect to other writers of the
//! same `ip_address`: a row lock, a conditional update retried on conflict, or
//! a per-key lock in memory. Concurrent failures must never be undercounted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    query::{IpRecordQuery, IpStatistics, Page},
    record::IpRecord,
};

pub mod memory;

pub use memory::InMemoryIpReputationRepository;

/// A state change applied to a record inside the repository's atomic update.
///
/// Implementations that retry on conflict may call it more than once, always on
/// a freshly loaded copy.
pub type RecordMutation<'a> = &'a (dyn Fn(&mut IpRecord) + Send + Sync);

/// Storage for IP reputation records, keyed by a unique `ip_address`.
#[async_trait]
pub trait IpReputationRepository: Send + Sync + 'static {
    /// Load the stored record as persisted, without applying lazy expiry.
    async fn find(&self, ip_address: &str) -> Result<Option<IpRecord>, Error>;

    /// Atomically apply `mutate` to the record, creating it first if absent.
    ///
    /// A newly created record starts as [`IpRecord::new`] at `now`.
    async fn upsert_with(
        &self,
        ip_address: &str,
        now: DateTime<Utc>,
        mutate: RecordMutation<'_>,
    ) -> Result<IpRecord, Error>;

    /// Atomically apply `mutate` to an existing record. Returns `None` if absent.
    async fn update_with(
        &self,
        ip_address: &str,
        mutate: RecordMutation<'_>,
    ) -> Result<Option<IpRecord>, Error>;

    /// List records as seen at `now`, most recently active first.
    async fn list(&self, query: &IpRecordQuery, now: DateTime<Utc>)
    -> Result<Page<IpRecord>, Error>;

    /// Count records by effective status at `now`.
    async fn statistics(&self, now: DateTime<Utc>) -> Result<IpStatistics, Error>;
}
