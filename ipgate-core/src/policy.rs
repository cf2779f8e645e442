//! Transition rules for IP reputation.
//!
//! Every state change to an [`IpRecord`] goes through [`ReputationPolicy`]. The
//! functions here are pure: they mutate a record in place and leave persistence
//! to the repository, which runs them inside its atomic update primitive.
//!
//! Escalation on failure is an ordered rule table evaluated top to bottom; the
//! first rule whose threshold the failure count meets wins.
//!
//! | failures | outcome                                              |
//! |----------|------------------------------------------------------|
//! | `>= 5`   | `Blocked` for one hour with a fixed reason           |
//! | `>= 3`   | `Suspicious`, unless a block is already in force     |
//! | else     | status unchanged                                     |

use chrono::{DateTime, Duration, Utc};

use crate::record::{IpRecord, IpStatus};

/// Reason attached to blocks raised by the failure threshold.
pub const DEFAULT_BLOCK_REASON: &str = "Too many failed login attempts";

/// What a threshold rule does to a record once it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    Block,
    Suspect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdRule {
    pub min_failures: u32,
    pub escalation: Escalation,
}

/// Configuration for IP reputation tracking.
#[derive(Debug, Clone)]
pub struct ReputationPolicy {
    /// Failed attempts at which an IP is flagged suspicious.
    pub suspicious_after: u32,
    /// Failed attempts at which an IP is blocked.
    pub block_after: u32,
    /// How long an automatic block lasts.
    pub block_duration: Duration,
    /// Reason stored on automatic blocks.
    pub block_reason: String,
    /// Whether an administrative unblock also clears the failure history.
    pub reset_attempts_on_unblock: bool,
}

impl Default for ReputationPolicy {
    fn default() -> Self {
        Self {
            suspicious_after: 3,
            block_after: 5,
            block_duration: Duration::hours(1),
            block_reason: DEFAULT_BLOCK_REASON.to_string(),
            reset_attempts_on_unblock: false,
        }
    }
}

impl ReputationPolicy {
    /// The escalation rules in precedence order.
    pub fn rules(&self) -> [ThresholdRule; 2] {
        [
            ThresholdRule {
                min_failures: self.block_after,
                escalation: Escalation::Block,
            },
            ThresholdRule {
                min_failures: self.suspicious_after,
                escalation: Escalation::Suspect,
            },
        ]
    }

    pub fn escalation_for(&self, failures: u32) -> Option<Escalation> {
        self.rules()
            .into_iter()
            .find(|rule| failures >= rule.min_failures)
            .map(|rule| rule.escalation)
    }

    /// Applies the outcome of one login attempt.
    pub fn apply_attempt(&self, record: &mut IpRecord, succeeded: bool, now: DateTime<Utc>) {
        record.expire_block(now);

        if succeeded {
            record.failed_attempt_count = 0;
            record.status = IpStatus::Allowed;
            record.block_reason = None;
            record.block_until = None;
        } else {
            record.failed_attempt_count = record.failed_attempt_count.saturating_add(1);
            match self.escalation_for(record.failed_attempt_count) {
                Some(Escalation::Block) => self.escalate_to_block(record, now),
                Some(Escalation::Suspect) if record.status != IpStatus::Blocked => {
                    record.status = IpStatus::Suspicious;
                }
                _ => {}
            }
        }

        record.touch(now);
    }

    /// Blocks the record by an administrator. `until = None` never expires.
    pub fn apply_manual_block(
        &self,
        record: &mut IpRecord,
        reason: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        record.status = IpStatus::Blocked;
        record.block_reason = Some(reason.to_string());
        record.block_until = until;
        record.touch(now);
    }

    /// Lifts any block. The failure count survives unless the policy says otherwise.
    pub fn apply_unblock(&self, record: &mut IpRecord, now: DateTime<Utc>) {
        record.status = IpStatus::Allowed;
        record.block_reason = None;
        record.block_until = None;
        if self.reset_attempts_on_unblock {
            record.failed_attempt_count = 0;
        }
        record.touch(now);
    }

    // A block already in force keeps its reason and is only ever lengthened,
    // so an indefinite manual block stays indefinite.
    fn escalate_to_block(&self, record: &mut IpRecord, now: DateTime<Utc>) {
        let until = now + self.block_duration;
        if record.status == IpStatus::Blocked {
            record.block_until = record.block_until.map(|current| current.max(until));
            if record.block_reason.is_none() {
                record.block_reason = Some(self.block_reason.clone());
            }
            return;
        }
        record.status = IpStatus::Blocked;
        record.block_reason = Some(self.block_reason.clone());
        record.block_until = Some(until);
    }
}
