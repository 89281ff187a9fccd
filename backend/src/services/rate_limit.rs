//! Sliding-window limiter used for login attempts, keyed by client IP.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::ephemeral::{EphemeralStore, Entry, MemoryEphemeralStore};

pub type AttemptWindow = VecDeque<DateTime<Utc>>;

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn EphemeralStore<AttemptWindow>>,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn EphemeralStore<AttemptWindow>>,
        max_attempts: u32,
        window: Duration,
    ) -> Self {
        Self {
            store,
            max_attempts,
            window,
        }
    }

    pub fn in_memory(max_attempts: u32, window: Duration) -> Self {
        Self::new(
            Arc::new(MemoryEphemeralStore::new()),
            max_attempts,
            window,
        )
    }

    /// Admits and records one attempt. Rejected attempts are not recorded.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Utc::now())
    }

    pub fn allow_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let max = self.max_attempts as usize;
        let window = self.window;
        let mut admitted = false;

        self.store.update(key, now, &mut |slot| {
            let mut attempts = slot.take().map(|entry| entry.value).unwrap_or_default();
            drop_stale(&mut attempts, window, now);

            if attempts.len() < max {
                attempts.push_back(now);
                admitted = true;
            }

            if let Some(newest) = attempts.back().copied() {
                *slot = Some(Entry::new(attempts, newest + window));
            }
        });

        admitted
    }

    /// Whole seconds until `key` may attempt again; 0 when it already may.
    pub fn retry_after(&self, key: &str) -> u64 {
        self.retry_after_at(key, Utc::now())
    }

    pub fn retry_after_at(&self, key: &str, now: DateTime<Utc>) -> u64 {
        let Some(mut attempts) = self.store.get(key, now) else {
            return 0;
        };
        drop_stale(&mut attempts, self.window, now);
        if attempts.len() < self.max_attempts as usize {
            return 0;
        }
        let reopens_at = attempts
            .front()
            .map(|oldest| *oldest + self.window)
            .unwrap_or(now);
        let wait = (reopens_at - now).num_milliseconds().max(0) as u64;
        wait.div_ceil(1000).max(1)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.store.purge_expired(now)
    }
}

fn drop_stale(attempts: &mut AttemptWindow, window: Duration, now: DateTime<Utc>) {
    while attempts
        .front()
        .is_some_and(|oldest| *oldest + window <= now)
    {
        attempts.pop_front();
    }
}
