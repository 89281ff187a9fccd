//! Time-bounded key/value state shared by the login and two-factor services.
//!
//! Rate-limit windows, lockout counters and pending two-factor state all live
//! behind [`EphemeralStore`]. The bundled [`MemoryEphemeralStore`] is
//! per-process: a deployment with several replicas must supply a shared
//! implementation, otherwise each replica enforces its own budgets.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<V> {
    pub value: V,
    pub expires_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    pub fn new(value: V, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Keyed store whose entries vanish once their expiry passes. Expired
/// entries are treated as absent by every read and are dropped lazily.
pub trait EphemeralStore<V>: Send + Sync {
    /// Runs `apply` against the live entry for `key` (or `None`) while holding
    /// exclusive access to it. Leaving `None` in the slot removes the key.
    fn update(&self, key: &str, now: DateTime<Utc>, apply: &mut dyn FnMut(&mut Option<Entry<V>>));

    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V>;

    fn insert(&self, key: &str, value: V, expires_at: DateTime<Utc>);

    /// Removes and returns the live value for `key`.
    fn take(&self, key: &str, now: DateTime<Utc>) -> Option<V>;

    fn remove(&self, key: &str);

    /// Drops every expired entry, returning how many were removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemoryEphemeralStore<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> Default for MemoryEphemeralStore<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> MemoryEphemeralStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<V>>> {
        // Entries are replaced whole, so a poisoned map is still consistent.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V> EphemeralStore<V> for MemoryEphemeralStore<V>
where
    V: Clone + Send + 'static,
{
    fn update(&self, key: &str, now: DateTime<Utc>, apply: &mut dyn FnMut(&mut Option<Entry<V>>)) {
        let mut entries = self.lock();
        let mut slot = entries.remove(key).filter(|entry| entry.is_live_at(now));
        apply(&mut slot);
        if let Some(entry) = slot {
            entries.insert(key.to_string(), entry);
        }
    }

    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live_at(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: &str, value: V, expires_at: DateTime<Utc>) {
        self.lock()
            .insert(key.to_string(), Entry::new(value, expires_at));
    }

    fn take(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        self.lock()
            .remove(key)
            .filter(|entry| entry.is_live_at(now))
            .map(|entry| entry.value)
    }

    fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live_at(now));
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}
