//! Remote (L2) cache tier abstraction.
//!
//! The remote tier is optional and best-effort: the [`CacheStore`] wraps
//! every call in a timeout and swallows failures.
//!
//! [`CacheStore`]: super::CacheStore

use super::pattern::glob_match;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Remote tier unavailable: {0}")]
    Unavailable(String),

    #[error("Remote tier protocol error: {0}")]
    Protocol(String),
}

/// Network key/value store backing the shared tier
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RemoteError>;

    async fn delete(&self, key: &str) -> Result<bool, RemoteError>;

    async fn exists(&self, key: &str) -> Result<bool, RemoteError>;

    /// Remaining TTL, `None` if the key is absent or has no expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, RemoteError>;

    /// Keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, RemoteError>;
}

/// Remote tier that stores nothing
pub struct NoopRemoteStore;

#[async_trait]
impl RemoteStore for NoopRemoteStore {
    fn name(&self) -> &str {
        "noop"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, RemoteError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<bool, RemoteError> {
        Ok(false)
    }

    async fn exists(&self, _key: &str) -> Result<bool, RemoteError> {
        Ok(false)
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, RemoteError> {
        Ok(None)
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, RemoteError> {
        Ok(Vec::new())
    }
}

/// In-process remote tier. Shared between several `CacheStore`s it behaves
/// like a network store; `set_available(false)` simulates an outage.
pub struct MemoryRemoteStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
    calls: AtomicU64,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of calls received (including failed ones)
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|(_, exp)| *exp > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("connection refused".to_string()))
        }
    }

    fn live_value(&self, key: &str) -> Option<(String, Instant)> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired = matches!(entries.get(key), Some((_, exp)) if *exp <= now);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).cloned()
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError> {
        self.check()?;
        Ok(self.live_value(key).map(|(v, _)| v))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), RemoteError> {
        self.check()?;
        self.lock()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, RemoteError> {
        self.check()?;
        Ok(self.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, RemoteError> {
        self.check()?;
        Ok(self.live_value(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, RemoteError> {
        self.check()?;
        Ok(self
            .live_value(key)
            .map(|(_, exp)| exp.saturating_duration_since(Instant::now())))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, RemoteError> {
        self.check()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(k, (_, exp))| *exp > now && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryRemoteStore::new();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert!(store.exists("k").await.unwrap());
        assert!(store.delete("k").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_outage() {
        let store = MemoryRemoteStore::new();
        store.set_available(false);
        assert!(store.get("k").await.is_err());
        assert_eq!(store.call_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_keys_pattern() {
        let store = MemoryRemoteStore::new();
        store.set("p:a", "1", Duration::from_secs(60)).await.unwrap();
        store.set("p:b", "1", Duration::from_secs(60)).await.unwrap();
        store.set("q:a", "1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.keys("p:*").await.unwrap(), vec!["p:a", "p:b"]);
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let store = MemoryRemoteStore::new();
        store.set("k", "v", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
