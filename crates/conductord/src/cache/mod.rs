//! Two-tier cache: a bounded local LRU (L1) in front of an optional remote
//! store (L2).
//!
//! Reads check L1 first and promote L2 hits into L1. Writes go to both tiers.
//! The remote tier is best-effort: every call is bounded by a timeout and its
//! failures are logged and swallowed, never returned to the caller.

mod local;
mod pattern;
pub mod remote;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use pattern::glob_match;
pub use remote::{MemoryRemoteStore, NoopRemoteStore, RemoteError, RemoteStore};

use crate::config::CacheConfig;
use chrono::{DateTime, Utc};
use local::LocalTier;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tier an entry was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Local,
    Remote,
}

/// A cached value with its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized JSON value
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub origin: Tier,
}

/// Counter snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub remote_errors: u64,
    pub local_entries: usize,
    pub remote_degraded: bool,
}

impl CacheStats {
    /// Fraction of reads served by either tier
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.remote_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    remote_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct CacheStore {
    local: Mutex<LocalTier>,
    remote: Option<Arc<dyn RemoteStore>>,
    key_prefix: String,
    default_ttl: Duration,
    remote_timeout: Duration,
    counters: Counters,
    remote_degraded: AtomicBool,
}

impl CacheStore {
    /// Local-only store
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            local: Mutex::new(LocalTier::new(config.local_capacity)),
            remote: None,
            key_prefix: config.key_prefix.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            remote_timeout: Duration::from_millis(config.remote_timeout_ms),
            counters: Counters::default(),
            remote_degraded: AtomicBool::new(false),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        info!("Cache remote tier: {}", remote.name());
        self.remote = Some(remote);
        self
    }

    /// Build from config, connecting the remote tier when one is configured.
    /// A remote tier that cannot be reached at startup leaves the store local-only.
    pub async fn from_config(config: &CacheConfig) -> Self {
        let store = Self::new(config);
        match config.remote_url.as_deref() {
            None => store,
            Some(url) => match connect_remote(url).await {
                Ok(remote) => store.with_remote(remote),
                Err(e) => {
                    warn!("Remote cache tier unavailable, running local-only: {}", e);
                    store
                }
            },
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn local(&self) -> std::sync::MutexGuard<'_, LocalTier> {
        self.local.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn remote_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Run one remote call under the timeout. Failures flip the store into
    /// degraded mode and yield `None`.
    async fn remote_call<T, F>(&self, op: &str, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(Ok(value)) => {
                if self.remote_degraded.swap(false, Ordering::SeqCst) {
                    info!("Remote cache tier recovered");
                }
                Some(value)
            }
            Ok(Err(e)) => {
                self.note_remote_failure(op, &e.to_string());
                None
            }
            Err(_) => {
                self.note_remote_failure(op, "timed out");
                None
            }
        }
    }

    fn note_remote_failure(&self, op: &str, reason: &str) {
        bump(&self.counters.remote_errors);
        if !self.remote_degraded.swap(true, Ordering::SeqCst) {
            warn!(
                "Remote cache tier failed on {} ({}), degrading to local-only",
                op, reason
            );
        } else {
            debug!("Remote cache {} failed: {}", op, reason);
        }
    }

    /// Raw lookup returning the entry and its origin
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let local_hit = self.local().get(key).map(|e| CacheEntry {
            key: key.to_string(),
            value: e.value.clone(),
            created_at: e.created_at,
            ttl: e.ttl,
            origin: Tier::Local,
        });
        if let Some(entry) = local_hit {
            bump(&self.counters.local_hits);
            debug!("Cache hit (local): {}", key);
            return Some(entry);
        }

        if let Some(remote) = &self.remote {
            let rkey = self.remote_key(key);
            if let Some(Some(value)) = self.remote_call("get", remote.get(&rkey)).await {
                let ttl = self
                    .remote_call("ttl", remote.ttl(&rkey))
                    .await
                    .flatten()
                    .unwrap_or(self.default_ttl);
                self.local().insert(key, value.clone(), ttl);
                bump(&self.counters.remote_hits);
                debug!("Cache hit (remote, promoted): {}", key);
                return Some(CacheEntry {
                    key: key.to_string(),
                    value,
                    created_at: Utc::now(),
                    ttl,
                    origin: Tier::Remote,
                });
            }
        }

        bump(&self.counters.misses);
        debug!("Cache miss: {}", key);
        None
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entry = self.get_entry(key).await?;
        match serde_json::from_str(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.local().remove(key);
                None
            }
        }
    }

    /// Typed read; a value of the wrong shape counts as a miss
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        serde_json::from_value(value).ok()
    }

    /// Write to both tiers. `None` uses the configured default TTL.
    pub async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let serialized = value.to_string();
        self.local().insert(key, serialized.clone(), ttl);
        bump(&self.counters.sets);

        if let Some(remote) = &self.remote {
            let rkey = self.remote_key(key);
            self.remote_call("set", remote.set(&rkey, &serialized, ttl))
                .await;
        }
    }

    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, &value, ttl).await,
            Err(e) => warn!("Not caching {}: {}", key, e),
        }
    }

    /// Remove from both tiers; true if either tier held the key
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = self.local().remove(key);
        if let Some(remote) = &self.remote {
            let rkey = self.remote_key(key);
            removed |= self
                .remote_call("delete", remote.delete(&rkey))
                .await
                .unwrap_or(false);
        }
        bump(&self.counters.deletes);
        removed
    }

    pub async fn exists(&self, key: &str) -> bool {
        if self.local().get(key).is_some() {
            return true;
        }
        match &self.remote {
            Some(remote) => {
                let rkey = self.remote_key(key);
                self.remote_call("exists", remote.exists(&rkey))
                    .await
                    .unwrap_or(false)
            }
            None => false,
        }
    }

    /// Remaining TTL from whichever tier holds the key
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let local = self.local().remaining_ttl(key);
        if local.is_some() {
            return local;
        }
        let remote = self.remote.as_ref()?;
        let rkey = self.remote_key(key);
        self.remote_call("ttl", remote.ttl(&rkey)).await.flatten()
    }

    /// Clear everything, or only keys matching a glob pattern.
    /// Returns the number of keys removed across both tiers.
    pub async fn clear(&self, pattern: Option<&str>) -> usize {
        let mut removed = self.local().clear(pattern);

        if let Some(remote) = &self.remote {
            let rpattern = self.remote_key(pattern.unwrap_or("*"));
            if let Some(keys) = self.remote_call("keys", remote.keys(&rpattern)).await {
                for rkey in keys {
                    if let Some(true) = self.remote_call("delete", remote.delete(&rkey)).await {
                        removed += 1;
                    }
                }
            }
        }

        info!(
            "Cache cleared ({}): {} keys",
            pattern.unwrap_or("*"),
            removed
        );
        removed
    }

    /// Whether any live local key matches the pattern. Remote keys are
    /// consulted only when the local tier has none.
    pub async fn any_matching(&self, pattern: &str) -> bool {
        if self.local().any_matching(pattern) {
            return true;
        }
        match &self.remote {
            Some(remote) => {
                let rpattern = self.remote_key(pattern);
                self.remote_call("keys", remote.keys(&rpattern))
                    .await
                    .map(|keys| !keys.is_empty())
                    .unwrap_or(false)
            }
            None => false,
        }
    }

    /// Drop expired local entries
    pub fn sweep(&self) -> usize {
        let swept = self.local().sweep_expired();
        if swept > 0 {
            debug!("Swept {} expired cache entries", swept);
        }
        swept
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            local_hits: c.local_hits.load(Ordering::Relaxed),
            remote_hits: c.remote_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            sets: c.sets.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            remote_errors: c.remote_errors.load(Ordering::Relaxed),
            local_entries: self.local().len(),
            remote_degraded: self.remote_degraded.load(Ordering::SeqCst),
        }
    }

    /// Periodic L1 sweep. Stops once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(store) => {
                        store.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(feature = "redis")]
async fn connect_remote(url: &str) -> Result<Arc<dyn RemoteStore>, RemoteError> {
    let store = redis_store::RedisRemoteStore::connect(url).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_remote(url: &str) -> Result<Arc<dyn RemoteStore>, RemoteError> {
    Err(RemoteError::Unavailable(format!(
        "{} requires the `redis` feature",
        url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> CacheConfig {
        CacheConfig {
            local_capacity: 16,
            remote_timeout_ms: 100,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_set_twice_get_returns_value() {
        let cache = CacheStore::new(&config());
        let ttl = Some(Duration::from_secs(60));
        cache.set("k", &json!({"a": 1}), ttl).await;
        cache.set("k", &json!({"a": 1}), ttl).await;
        assert_eq!(cache.get("k").await, Some(json!({"a": 1})));
        assert_eq!(cache.get("k").await, Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_delete_then_exists_false() {
        let cache = CacheStore::new(&config());
        cache.set("k", &json!("v"), None).await;
        assert!(cache.exists("k").await);
        assert!(cache.delete("k").await);
        assert!(!cache.exists("k").await);
    }

    #[tokio::test]
    async fn test_remote_hit_promoted_to_local() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let writer = CacheStore::new(&config()).with_remote(remote.clone());
        let reader = CacheStore::new(&config()).with_remote(remote.clone());

        writer.set("shared", &json!(42), None).await;
        let entry = reader.get_entry("shared").await.unwrap();
        assert_eq!(entry.origin, Tier::Remote);

        // Second read is served locally even with the remote gone
        remote.set_available(false);
        let entry = reader.get_entry("shared").await.unwrap();
        assert_eq!(entry.origin, Tier::Local);
        assert_eq!(reader.stats().remote_hits, 1);
        assert_eq!(reader.stats().local_hits, 1);
    }

    #[tokio::test]
    async fn test_remote_outage_degrades_silently() {
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_available(false);
        let cache = CacheStore::new(&config()).with_remote(remote);

        cache.set("k", &json!("v"), None).await;
        assert_eq!(cache.get("k").await, Some(json!("v")));
        assert!(cache.get("missing").await.is_none());

        let stats = cache.stats();
        assert!(stats.remote_degraded);
        assert!(stats.remote_errors >= 2);
    }

    #[tokio::test]
    async fn test_clear_pattern_hits_both_tiers() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let cache = CacheStore::new(&config()).with_remote(remote.clone());
        cache.set("result:status:1", &json!(1), None).await;
        cache.set("result:help:1", &json!(1), None).await;
        cache.set("catalog:snapshot", &json!(1), None).await;

        // two local + two remote
        assert_eq!(cache.clear(Some("result:*")).await, 4);
        assert!(cache.exists("catalog:snapshot").await);
        assert!(!cache.exists("result:status:1").await);
        assert_eq!(remote.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_and_expiry() {
        let cache = CacheStore::new(&config());
        cache
            .set("short", &json!(1), Some(Duration::from_millis(10)))
            .await;
        assert!(cache.ttl("short").await.is_some());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get("short").await.is_none());
        assert!(cache.ttl("short").await.is_none());
    }

    #[tokio::test]
    async fn test_typed_roundtrip_and_stats() {
        let cache = CacheStore::new(&config());
        cache.set_as("nums", &vec![1u32, 2, 3], None).await;
        let nums: Vec<u32> = cache.get_as("nums").await.unwrap();
        assert_eq!(nums, vec![1, 2, 3]);
        assert!(cache.get_as::<String>("nums").await.is_none());
        assert!(cache.get("absent").await.is_none());

        let stats = cache.stats();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.hit_rate() > 0.5);
    }

    #[tokio::test]
    async fn test_any_matching() {
        let cache = CacheStore::new(&config());
        assert!(!cache.any_matching("result:status:*").await);
        cache.set("result:status:abc", &json!(1), None).await;
        assert!(cache.any_matching("result:status:*").await);
    }
}
