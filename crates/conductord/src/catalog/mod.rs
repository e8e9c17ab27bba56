//! Command catalog: versioned command definitions synced from an external
//! source, with alias resolution and fuzzy suggestions.
//!
//! The current snapshot is replaced wholesale on every successful refresh and
//! kept untouched when a fetch or parse fails. Snapshots are also written to
//! the [`CacheStore`] so a cold process can hydrate from a peer's fetch.

mod parser;
mod source;
mod suggest;

pub use parser::{parse_catalog, ParsedCatalog, UNVERSIONED};
pub use source::{
    source_from_url, CommandSource, FileCommandSource, HttpCommandSource, SourceFailure,
    StaticCommandSource,
};
pub use suggest::{levenshtein, similarity, Suggestion};

use crate::cache::CacheStore;
use crate::config::CatalogConfig;
use chrono::{DateTime, Utc};
use conductor_shared::{CommandDefinition, DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache key holding the serialized snapshot
pub const SNAPSHOT_KEY: &str = "catalog:snapshot";

/// Canonical form of a caller-supplied name: trimmed, lowercase, prefix removed
pub fn normalize(raw: &str, prefix: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let stripped = if prefix.is_empty() {
        lowered.as_str()
    } else {
        lowered.strip_prefix(prefix).unwrap_or(lowered.as_str())
    };
    stripped.trim().to_string()
}

/// One immutable version of the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub version: String,
    pub definitions: BTreeMap<String, CommandDefinition>,
    /// alias -> canonical name
    pub aliases: BTreeMap<String, String>,
    pub fetched_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    /// Index parsed definitions. Duplicate names and aliases that collide
    /// with another command are rejected.
    pub fn build(parsed: ParsedCatalog) -> Result<Self> {
        let mut definitions = BTreeMap::new();
        for def in parsed.definitions {
            if definitions.contains_key(&def.name) {
                return Err(DispatchError::Validation(format!(
                    "Malformed catalog: duplicate command '{}'",
                    def.name
                )));
            }
            definitions.insert(def.name.clone(), def);
        }

        let mut aliases = BTreeMap::new();
        for def in definitions.values() {
            for alias in &def.aliases {
                if definitions.contains_key(alias) {
                    return Err(DispatchError::Validation(format!(
                        "Malformed catalog: alias '{}' of '{}' shadows a command",
                        alias, def.name
                    )));
                }
                if let Some(owner) = aliases.insert(alias.clone(), def.name.clone()) {
                    return Err(DispatchError::Validation(format!(
                        "Malformed catalog: alias '{}' claimed by '{}' and '{}'",
                        alias, owner, def.name
                    )));
                }
            }
        }

        Ok(Self {
            version: parsed.version,
            definitions,
            aliases,
            fetched_at: Utc::now(),
        })
    }

    /// Follow the alias index for an already-normalized name
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandDefinition> {
        self.definitions.get(self.canonical(name))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at).to_std().unwrap_or_default()
    }
}

pub struct CommandCatalog {
    source: Arc<dyn CommandSource>,
    cache: Arc<CacheStore>,
    prefix: String,
    ttl: Duration,
    suggestion_limit: usize,
    snapshot: RwLock<Option<Arc<CatalogSnapshot>>>,
    /// Serializes fetches so concurrent cold callers share one
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CommandCatalog {
    pub fn new(config: &CatalogConfig, source: Arc<dyn CommandSource>, cache: Arc<CacheStore>) -> Self {
        Self {
            source,
            cache,
            prefix: config.prefix.clone(),
            ttl: Duration::from_secs(config.ttl_secs),
            suggestion_limit: config.suggestion_limit,
            snapshot: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suggestion_limit(&self) -> usize {
        self.suggestion_limit
    }

    pub fn normalize(&self, raw: &str) -> String {
        normalize(raw, &self.prefix)
    }

    /// Normalize and resolve aliases against the loaded snapshot, if any.
    /// Before the first load the plain normalized name is returned.
    pub fn canonical_name(&self, raw: &str) -> String {
        let name = self.normalize(raw);
        match self.snapshot() {
            Some(snap) => snap.canonical(&name).to_string(),
            None => name,
        }
    }

    pub fn snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn version(&self) -> Option<String> {
        self.snapshot().map(|s| s.version.clone())
    }

    fn install(&self, snapshot: Arc<CatalogSnapshot>) {
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = Some(snapshot);
    }

    /// Fetch, parse and install a new snapshot.
    ///
    /// On failure the current snapshot stays in place and the error is
    /// returned; with no snapshot at all the failure becomes `NotAvailable`.
    pub async fn refresh(&self) -> Result<Arc<CatalogSnapshot>> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Arc<CatalogSnapshot>> {
        let fetched = match self.source.fetch().await {
            Ok(payload) => parse_catalog(&payload, &self.prefix).and_then(CatalogSnapshot::build),
            Err(e) => Err(e),
        };

        match fetched {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.cache
                    .set_as(SNAPSHOT_KEY, snapshot.as_ref(), Some(self.ttl))
                    .await;
                let previous = self.version();
                self.install(snapshot.clone());
                info!(
                    "Catalog refreshed from {}: {} commands, version {} (was {})",
                    self.source.describe(),
                    snapshot.len(),
                    snapshot.version,
                    previous.as_deref().unwrap_or("none")
                );
                Ok(snapshot)
            }
            Err(e) if self.snapshot().is_some() => {
                warn!("Catalog refresh failed, keeping current snapshot: {}", e);
                Err(e)
            }
            Err(e) => {
                warn!("Catalog refresh failed with no snapshot loaded: {}", e);
                Err(match e {
                    DispatchError::NotAvailable(_) => e,
                    other => DispatchError::NotAvailable(other.to_string()),
                })
            }
        }
    }

    /// Current snapshot, hydrating from the cache or fetching when none is loaded
    pub async fn ensure_loaded(&self) -> Result<Arc<CatalogSnapshot>> {
        if let Some(snap) = self.snapshot() {
            return Ok(snap);
        }
        let _guard = self.refresh_lock.lock().await;
        // Another caller may have loaded it while we waited
        if let Some(snap) = self.snapshot() {
            return Ok(snap);
        }
        if let Some(cached) = self.cache.get_as::<CatalogSnapshot>(SNAPSHOT_KEY).await {
            info!(
                "Catalog hydrated from cache: {} commands, version {}",
                cached.len(),
                cached.version
            );
            let cached = Arc::new(cached);
            self.install(cached.clone());
            return Ok(cached);
        }
        self.refresh_locked().await
    }

    /// True when no snapshot is loaded, its cache entry expired, or it outlived the TTL
    pub async fn is_stale(&self) -> bool {
        match self.snapshot() {
            None => true,
            Some(snap) => snap.age() >= self.ttl || !self.cache.exists(SNAPSHOT_KEY).await,
        }
    }

    /// Look up a command by caller-supplied name or alias
    pub fn resolve(&self, name: &str) -> Result<CommandDefinition> {
        let snap = self
            .snapshot()
            .ok_or_else(|| DispatchError::NotAvailable("catalog not loaded".to_string()))?;
        let normalized = self.normalize(name);
        match snap.lookup(&normalized) {
            Some(def) => Ok(def.clone()),
            None => {
                debug!("Unknown command: {}", normalized);
                Err(DispatchError::NotFound(format!(
                    "{}{}",
                    self.prefix, normalized
                )))
            }
        }
    }

    /// Ranked suggestions for an unknown name, at most `limit`, best first
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<Suggestion> {
        let Some(snap) = self.snapshot() else {
            return Vec::new();
        };
        let query = self.normalize(query);
        let candidates = snap
            .definitions
            .keys()
            .map(|name| (name.as_str(), name.as_str()))
            .chain(
                snap.aliases
                    .iter()
                    .map(|(alias, canonical)| (alias.as_str(), canonical.as_str())),
            );
        suggest::rank(&query, candidates, limit)
    }

    /// Suggestions rendered with the command prefix, for user-facing output
    pub fn suggest_display(&self, query: &str, limit: usize) -> Vec<String> {
        self.suggest(query, limit)
            .into_iter()
            .map(|s| format!("{}{}", self.prefix, s.name))
            .collect()
    }

    pub fn definitions(&self) -> Vec<CommandDefinition> {
        self.snapshot()
            .map(|s| s.definitions.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryRemoteStore;
    use crate::config::CacheConfig;

    const PAYLOAD: &str = r#"
version: 3
## /status
Aliases: /st
Description: Show status
## /stats
Description: Show statistics
## /help
Aliases: /h, /?
Description: List commands
"#;

    fn catalog_with(source: Arc<StaticCommandSource>, cache: Arc<CacheStore>) -> CommandCatalog {
        CommandCatalog::new(&CatalogConfig::default(), source, cache)
    }

    fn local_cache() -> Arc<CacheStore> {
        Arc::new(CacheStore::new(&CacheConfig::default()))
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  /Status ", "/"), "status");
        assert_eq!(normalize("status", "/"), "status");
        assert_eq!(normalize("!Help", "!"), "help");
        assert_eq!(normalize("/x", ""), "/x");
    }

    #[tokio::test]
    async fn test_refresh_and_resolve() {
        let source = Arc::new(StaticCommandSource::new(PAYLOAD));
        let catalog = catalog_with(source.clone(), local_cache());
        catalog.refresh().await.unwrap();

        assert_eq!(catalog.resolve("/STATUS").unwrap().name, "status");
        assert_eq!(catalog.resolve("/st").unwrap().name, "status");
        assert_eq!(catalog.resolve("?").unwrap().name, "help");
        assert_eq!(catalog.version().as_deref(), Some("3"));
        assert_eq!(catalog.canonical_name("/H"), "help");
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let source = Arc::new(StaticCommandSource::new(PAYLOAD));
        let catalog = catalog_with(source, local_cache());
        catalog.refresh().await.unwrap();
        let err = catalog.resolve("/statuz").unwrap_err();
        assert_eq!(err.code(), "ERR_NOT_FOUND");

        let suggestions = catalog.suggest_display("/statuz", 5);
        assert_eq!(suggestions[0], "/status");
        assert!(suggestions.len() <= 5);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot() {
        let source = Arc::new(StaticCommandSource::new(PAYLOAD));
        let catalog = catalog_with(source.clone(), local_cache());
        catalog.refresh().await.unwrap();

        source.set_payload("not a catalog");
        assert!(catalog.refresh().await.is_err());
        assert!(catalog.resolve("status").is_ok());

        source.set_failure(Some(SourceFailure::Status(500)));
        assert!(catalog.refresh().await.is_err());
        assert_eq!(catalog.version().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_cold_failure_is_not_available() {
        let source = Arc::new(StaticCommandSource::new(PAYLOAD));
        source.set_failure(Some(SourceFailure::Status(502)));
        let catalog = catalog_with(source, local_cache());
        let err = catalog.refresh().await.unwrap_err();
        assert_eq!(err.code(), "ERR_NOT_AVAILABLE");
        assert!(catalog.resolve("status").is_err());
    }

    #[tokio::test]
    async fn test_alias_collision_rejected() {
        let payload = "## /a\nAliases: /x\n## /b\nAliases: /x\n";
        let source = Arc::new(StaticCommandSource::new(payload));
        let catalog = catalog_with(source, local_cache());
        assert!(catalog.refresh().await.is_err());

        let shadow = "## /a\nAliases: /b\n## /b\n";
        let parsed = parse_catalog(shadow, "/").unwrap();
        assert!(CatalogSnapshot::build(parsed).is_err());
    }

    #[tokio::test]
    async fn test_ensure_loaded_fetches_once() {
        let source = Arc::new(StaticCommandSource::new(PAYLOAD));
        let catalog = catalog_with(source.clone(), local_cache());
        catalog.ensure_loaded().await.unwrap();
        catalog.ensure_loaded().await.unwrap();
        assert_eq!(source.fetch_count(), 1);
        assert!(!catalog.is_stale().await);
    }

    #[tokio::test]
    async fn test_hydrates_from_shared_cache() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let cache_a = Arc::new(CacheStore::new(&CacheConfig::default()).with_remote(remote.clone()));
        let cache_b = Arc::new(CacheStore::new(&CacheConfig::default()).with_remote(remote));

        let source_a = Arc::new(StaticCommandSource::new(PAYLOAD));
        catalog_with(source_a, cache_a).refresh().await.unwrap();

        let source_b = Arc::new(StaticCommandSource::new(PAYLOAD));
        let catalog_b = catalog_with(source_b.clone(), cache_b);
        let snap = catalog_b.ensure_loaded().await.unwrap();
        assert_eq!(snap.len(), 3);
        assert_eq!(source_b.fetch_count(), 0);
    }
}
