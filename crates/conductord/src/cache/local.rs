//! Local (L1) cache tier: bounded LRU map with per-entry TTL.

use super::pattern::glob_match;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub(crate) struct LocalEntry {
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    expires_at: Instant,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

pub(crate) struct LocalTier {
    entries: LruCache<String, LocalEntry>,
}

impl LocalTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Live entry for `key`; expired entries are dropped on access
    pub fn get(&mut self, key: &str) -> Option<&LocalEntry> {
        let now = Instant::now();
        let expired = match self.entries.peek(key) {
            Some(entry) => entry.is_expired(now),
            None => return None,
        };
        if expired {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: &str, value: String, ttl: Duration) {
        let entry = LocalEntry {
            value,
            created_at: Utc::now(),
            ttl,
            expires_at: Instant::now() + ttl,
        };
        self.entries.put(key.to_string(), entry);
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.pop(key).is_some()
    }

    pub fn remaining_ttl(&mut self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.get(key).map(|entry| entry.remaining(now))
    }

    /// Remove all entries, or those matching `pattern`
    pub fn clear(&mut self, pattern: Option<&str>) -> usize {
        match pattern {
            None => {
                let n = self.entries.len();
                self.entries.clear();
                n
            }
            Some(pattern) => {
                let doomed: Vec<String> = self
                    .entries
                    .iter()
                    .filter(|(k, _)| glob_match(pattern, k))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &doomed {
                    self.entries.pop(key);
                }
                doomed.len()
            }
        }
    }

    pub fn any_matching(&self, pattern: &str) -> bool {
        let now = Instant::now();
        self.entries
            .iter()
            .any(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
    }

    /// Drop every expired entry
    pub fn sweep_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
