//! In-memory IP reputation repository.
//!
//! Records live in a [`DashMap`]; each mutation runs while holding the shard
//! lock for its key, which makes read-modify-write atomic per IP.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::{
    Error,
    query::{IpRecordQuery, IpStatistics, Page, recent_activity_window},
    record::IpRecord,
    repositories::{IpReputationRepository, RecordMutation},
};

#[derive(Debug, Default)]
pub struct InMemoryIpReputationRepository {
    records: DashMap<String, IpRecord>,
}

impl InMemoryIpReputationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store a record as-is, replacing any existing one for the same IP.
    pub fn insert(&self, record: IpRecord) {
        self.records.insert(record.ip_address.clone(), record);
    }
}

#[async_trait]
impl IpReputationRepository for InMemoryIpReputationRepository {
    async fn find(&self, ip_address: &str) -> Result<Option<IpRecord>, Error> {
        Ok(self.records.get(ip_address).map(|r| r.value().clone()))
    }

    async fn upsert_with(
        &self,
        ip_address: &str,
        now: DateTime<Utc>,
        mutate: RecordMutation<'_>,
    ) -> Result<IpRecord, Error> {
        let mut entry = self
            .records
            .entry(ip_address.to_string())
            .or_insert_with(|| IpRecord::new(ip_address, now));
        mutate(entry.value_mut());
        Ok(entry.value().clone())
    }

    async fn update_with(
        &self,
        ip_address: &str,
        mutate: RecordMutation<'_>,
    ) -> Result<Option<IpRecord>, Error> {
        Ok(self.records.get_mut(ip_address).map(|mut entry| {
            mutate(entry.value_mut());
            entry.value().clone()
        }))
    }

    async fn list(
        &self,
        query: &IpRecordQuery,
        now: DateTime<Utc>,
    ) -> Result<Page<IpRecord>, Error> {
        let query = query.clone().normalized();
        let mut matching: Vec<IpRecord> = self
            .records
            .iter()
            .map(|r| r.value().clone().effective(now))
            .filter(|r| query.matches(r))
            .collect();
        matching.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.ip_address.cmp(&b.ip_address))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();
        Ok(Page::new(items, &query, total))
    }

    async fn statistics(&self, now: DateTime<Utc>) -> Result<IpStatistics, Error> {
        let recent_since = now - recent_activity_window();
        let mut stats = IpStatistics::default();
        for record in self.records.iter() {
            stats.tally(&record.value().clone().effective(now), recent_since);
        }
        Ok(stats)
    }
}
