//! Fallback handlers consulted by the FALLBACK strategy.

use crate::cache::CacheStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::OperationContext;

/// Prefix of last-known-good copies in the cache
pub const LKG_PREFIX: &str = "lkg:";

pub fn lkg_key(key: &str) -> String {
    format!("{}{}", LKG_PREFIX, key)
}

/// Produces a substitute payload when an operation failed
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when there is nothing to serve
    async fn fallback(&self, ctx: &OperationContext) -> Option<Value>;
}

/// Serves the last successful payload stored under `lkg:<key>`
pub struct LastKnownGood {
    cache: Arc<CacheStore>,
}

impl LastKnownGood {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl FallbackHandler for LastKnownGood {
    fn name(&self) -> &str {
        "last_known_good"
    }

    async fn fallback(&self, ctx: &OperationContext) -> Option<Value> {
        let key = ctx
            .fallback_key
            .clone()
            .unwrap_or_else(|| lkg_key(&ctx.operation));
        self.cache.get(&key).await
    }
}

/// Always serves the same payload
pub struct StaticFallback(pub Value);

#[async_trait]
impl FallbackHandler for StaticFallback {
    fn name(&self) -> &str {
        "static"
    }

    async fn fallback(&self, _ctx: &OperationContext) -> Option<Value> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use serde_json::json;

    #[tokio::test]
    async fn test_last_known_good_reads_lkg_key() {
        let cache = Arc::new(CacheStore::new(&CacheConfig::default()));
        let handler = LastKnownGood::new(cache.clone());
        let ctx = OperationContext::new("handler:weather");

        assert!(handler.fallback(&ctx).await.is_none());
        cache.set(&lkg_key("handler:weather"), &json!({"temp": 21}), None).await;
        assert_eq!(handler.fallback(&ctx).await, Some(json!({"temp": 21})));
    }

    #[tokio::test]
    async fn test_explicit_fallback_key() {
        let cache = Arc::new(CacheStore::new(&CacheConfig::default()));
        cache.set("lkg:custom", &json!("old"), None).await;
        let handler = LastKnownGood::new(cache);
        let ctx = OperationContext::new("op").with_fallback_key("lkg:custom");
        assert_eq!(handler.fallback(&ctx).await, Some(json!("old")));
    }
}
