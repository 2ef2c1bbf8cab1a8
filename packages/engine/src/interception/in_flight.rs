// packages/engine/src/interception/in_flight.rs
//! Transient store of partially-correlated requests
//!
//! Backed by a sharded concurrent map: operations on one correlation key
//! take only that key's shard lock, so unrelated requests never wait on
//! each other. Nothing here is persisted.

use crate::recording::record::RequestRecord;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// A pending record and the moment it was created
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub record: RequestRecord,
    pub created_at: Instant,
}

/// Map from correlation key to pending record
pub struct InFlightStore {
    entries: DashMap<String, PendingEntry>,
}

impl InFlightStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert a new pending record; returns `false` if `key` is already pending
    pub fn create(&self, key: &str, record: RequestRecord) -> bool {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    record,
                    created_at: Instant::now(),
                });
                true
            }
        }
    }

    /// Apply `merge` to the pending record under `key`; returns `false` if absent
    pub fn merge<F>(&self, key: &str, merge: F) -> bool
    where
        F: FnOnce(&mut RequestRecord),
    {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                merge(&mut entry.record);
                true
            }
            None => false,
        }
    }

    /// Copy of the pending record under `key`
    pub fn get(&self, key: &str) -> Option<RequestRecord> {
        self.entries.get(key).map(|entry| entry.record.clone())
    }

    /// Remove and return the pending record under `key`
    pub fn remove(&self, key: &str) -> Option<RequestRecord> {
        self.entries.remove(key).map(|(_, entry)| entry.record)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict entries created more than `ttl` before `now`; returns how many were evicted
    pub fn evict_expired(&self, now: Instant, ttl: Duration) -> usize {
        let mut evicted = 0;
        self.entries.retain(|key, entry| {
            let keep = now.saturating_duration_since(entry.created_at) <= ttl;
            if !keep {
                debug!("Evicting orphaned request {} ({})", key, entry.record.url);
                evicted += 1;
            }
            keep
        });
        evicted
    }
}

impl Default for InFlightStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pending(url: &str) -> RequestRecord {
        RequestRecord::pending("GET", url, Utc::now())
    }

    #[test]
    fn test_create_does_not_overwrite() {
        let store = InFlightStore::new();

        assert!(store.create("r1", pending("https://a.test/first")));
        assert!(!store.create("r1", pending("https://a.test/second")));

        assert_eq!(store.get("r1").unwrap().url, "https://a.test/first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_merge_and_remove() {
        let store = InFlightStore::new();
        store.create("r1", pending("https://a.test/"));

        assert!(store.merge("r1", |r| r.response_code = Some(204)));
        assert!(!store.merge("missing", |r| r.response_code = Some(500)));

        let record = store.remove("r1").unwrap();
        assert_eq!(record.response_code, Some(204));
        assert!(store.remove("r1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_expired() {
        let store = InFlightStore::new();
        store.create("old", pending("https://a.test/old"));

        let later = Instant::now() + Duration::from_secs(600);
        store.create("fresh", pending("https://a.test/fresh"));

        assert_eq!(store.evict_expired(later, Duration::from_secs(300)), 2);
        assert!(store.is_empty());

        store.create("fresh", pending("https://a.test/fresh"));
        assert_eq!(store.evict_expired(Instant::now(), Duration::from_secs(300)), 0);
        assert!(store.contains("fresh"));
    }

    #[test]
    fn test_concurrent_keys() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(InFlightStore::new());
        let mut handles = vec![];

        for t in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("t{}-{}", t, i);
                    store.create(&key, pending("https://a.test/"));
                    store.merge(&key, |r| r.response_code = Some(200));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 800);
        assert_eq!(store.get("t3-42").unwrap().response_code, Some(200));
    }
}
