//! Per-account failed-password counter with a fixed-duration lockout.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::ephemeral::{EphemeralStore, Entry, MemoryEphemeralStore};
use crate::models::user::normalize_email;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutRecord {
    pub failures: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub locked: bool,
    pub minutes_remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub locked: bool,
    pub lockout_minutes: u64,
    pub attempts_remaining: u32,
}

#[derive(Clone)]
pub struct LockoutTracker {
    store: Arc<dyn EphemeralStore<LockoutRecord>>,
    threshold: u32,
    duration: Duration,
}

impl LockoutTracker {
    pub fn new(
        store: Arc<dyn EphemeralStore<LockoutRecord>>,
        threshold: u32,
        duration: Duration,
    ) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
            duration,
        }
    }

    pub fn in_memory(threshold: u32, duration: Duration) -> Self {
        Self::new(Arc::new(MemoryEphemeralStore::new()), threshold, duration)
    }

    pub fn is_locked(&self, account: &str) -> LockStatus {
        self.is_locked_at(account, Utc::now())
    }

    pub fn record_failure(&self, account: &str) -> FailureOutcome {
        self.record_failure_at(account, Utc::now())
    }

    pub fn reset(&self, account: &str) {
        self.store.remove(&normalize_email(account));
    }

    /// An elapsed lockout clears the whole record, so the account starts
    /// over with a full attempt budget.
    pub fn is_locked_at(&self, account: &str, now: DateTime<Utc>) -> LockStatus {
        let mut status = LockStatus {
            locked: false,
            minutes_remaining: 0,
        };
        self.store
            .update(&normalize_email(account), now, &mut |slot| {
                let Some(entry) = slot.as_ref() else {
                    return;
                };
                match entry.value.locked_until {
                    Some(until) if until > now => {
                        status = LockStatus {
                            locked: true,
                            minutes_remaining: minutes_until(now, until),
                        };
                    }
                    Some(_) => *slot = None,
                    None => {}
                }
            });
        status
    }

    pub fn record_failure_at(&self, account: &str, now: DateTime<Utc>) -> FailureOutcome {
        let threshold = self.threshold;
        let duration = self.duration;
        let mut outcome = FailureOutcome {
            locked: false,
            lockout_minutes: 0,
            attempts_remaining: threshold,
        };

        self.store
            .update(&normalize_email(account), now, &mut |slot| {
                let mut record = slot.take().map(|entry| entry.value).unwrap_or_default();

                if let Some(until) = record.locked_until.filter(|until| *until > now) {
                    outcome = FailureOutcome {
                        locked: true,
                        lockout_minutes: minutes_until(now, until),
                        attempts_remaining: 0,
                    };
                    *slot = Some(Entry::new(record, until));
                    return;
                }

                record.locked_until = None;
                record.failures = record.failures.saturating_add(1);
                if record.failures >= threshold {
                    record.locked_until = Some(now + duration);
                    outcome = FailureOutcome {
                        locked: true,
                        lockout_minutes: duration.num_minutes().max(0) as u64,
                        attempts_remaining: 0,
                    };
                } else {
                    outcome.attempts_remaining = threshold - record.failures;
                }
                // Failures are forgotten after a quiet period as long as a lockout.
                let expires_at = record.locked_until.unwrap_or(now + duration);
                *slot = Some(Entry::new(record, expires_at));
            });

        outcome
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.store.purge_expired(now)
    }
}

fn minutes_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let seconds = (until - now).num_seconds().max(0) as u64;
    seconds.div_ceil(60)
}
