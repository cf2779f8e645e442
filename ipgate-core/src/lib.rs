//! Core functionality for the ipgate project
//!
//! This crate holds the IP reputation record, the transition rules that move an
//! IP between `Allowed`, `Suspicious` and `Blocked`, the repository trait that
//! storage backends implement, and the [`IpReputationService`] that ties them
//! together.
//!
//! Storage backends depend on this crate; application code normally goes
//! through the `ipgate` crate instead.
//!
pub mod error;
pub mod policy;
pub mod query;
pub mod record;
pub mod repositories;
pub mod service;

pub use error::Error;
pub use policy::{DEFAULT_BLOCK_REASON, Escalation, ReputationPolicy, ThresholdRule};
pub use query::{IpRecordQuery, IpStatistics, Page};
pub use record::{AttemptContext, IpRecord, IpStatus, Location, StatusReport};
pub use repositories::{InMemoryIpReputationRepository, IpReputationRepository, RecordMutation};
pub use service::{IpReputationService, Transition};
