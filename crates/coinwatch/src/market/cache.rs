//! In-memory TTL cache for upstream JSON responses.

use crate::market::key::CacheKey;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    value: serde_json::Value,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

/// Response cache keyed by request identity. Staleness is checked on read;
/// stale entries stay until overwritten, purged, or evicted for capacity.
pub struct ResponseCache {
    ttl: Duration,
    max_entries: Option<usize>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ResponseCache {
    /// Unbounded cache with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            max_entries: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache holding at most `max_entries` responses.
    pub fn bounded(ttl: Duration, max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::new(ttl)
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached value for `key` if it is younger than the TTL.
    pub fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let now = Instant::now();
        let entries = self.lock();
        entries
            .get(key)
            .filter(|e| e.is_live(self.ttl, now))
            .map(|e| e.value.clone())
    }

    /// Insert or replace the value for `key`, stamped with the current time.
    pub fn insert(&self, key: CacheKey, value: serde_json::Value) {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(max) = self.max_entries {
            if max == 0 {
                return;
            }
            if !entries.contains_key(&key) && entries.len() >= max {
                entries.retain(|_, e| e.is_live(self.ttl, now));
                if entries.len() >= max {
                    let oldest = entries
                        .iter()
                        .min_by_key(|(_, e)| e.stored_at)
                        .map(|(k, _)| k.clone());
                    if let Some(oldest) = oldest {
                        debug!(key = %oldest, "evict oldest");
                        entries.remove(&oldest);
                    }
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(self.ttl, now));
        before - entries.len()
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
