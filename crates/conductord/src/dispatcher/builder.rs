//! Dispatcher construction.
//!
//! The dispatcher owns every component; nothing is process-global. Tests swap
//! in-memory collaborators through the builder.

use super::hooks::DispatchHook;
use super::inflight::InFlightSet;
use super::stats::ExecutionLog;
use super::Dispatcher;
use crate::cache::{CacheStore, RemoteStore};
use crate::catalog::{source_from_url, CommandCatalog, CommandSource};
use crate::config::DaemonConfig;
use crate::decision::{DecisionEngine, ResourceSampler, SysinfoSampler};
use crate::handlers::{HandlerEntry, HandlerRegistry};
use crate::resilience::{FallbackHandler, LastKnownGood, ResilienceManager};
use crate::security::SecurityGate;
use conductor_shared::{ErrorKind, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::info;

pub struct DispatcherBuilder {
    config: DaemonConfig,
    source: Option<Arc<dyn CommandSource>>,
    remote: Option<Arc<dyn RemoteStore>>,
    sampler: Option<Arc<dyn ResourceSampler>>,
    handlers: HandlerRegistry,
    hooks: Vec<Arc<dyn DispatchHook>>,
    fallbacks: Vec<(ErrorKind, Arc<dyn FallbackHandler>)>,
}

impl DispatcherBuilder {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            source: None,
            remote: None,
            sampler: None,
            handlers: HandlerRegistry::new(),
            hooks: Vec::new(),
            fallbacks: Vec::new(),
        }
    }

    /// Catalog source; defaults to the configured URL
    pub fn source(mut self, source: Arc<dyn CommandSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Remote cache tier; defaults to the configured address, if any
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn handler(mut self, command: impl Into<String>, entry: HandlerEntry) -> Self {
        self.handlers.register(command, entry);
        self
    }

    /// Handler for catalog commands without their own entry
    pub fn default_handler(mut self, entry: HandlerEntry) -> Self {
        self.handlers.set_default(Some(entry));
        self
    }

    pub fn hook(mut self, hook: Arc<dyn DispatchHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn fallback(mut self, kind: ErrorKind, handler: Arc<dyn FallbackHandler>) -> Self {
        self.fallbacks.push((kind, handler));
        self
    }

    pub async fn build(self) -> Result<Dispatcher> {
        let config = self.config;
        config.validate()?;

        let cache = match self.remote {
            Some(remote) => CacheStore::new(&config.cache).with_remote(remote),
            None => CacheStore::from_config(&config.cache).await,
        };
        let cache = Arc::new(cache);

        let source = match self.source {
            Some(source) => source,
            None => source_from_url(
                &config.catalog.source_url,
                Duration::from_secs(config.catalog.fetch_timeout_secs),
            )?,
        };
        let catalog = Arc::new(CommandCatalog::new(&config.catalog, source, cache.clone()));

        let inflight = InFlightSet::new();
        let sampler = self
            .sampler
            .unwrap_or_else(|| Arc::new(SysinfoSampler::new()));
        let decisions = DecisionEngine::new(&config.decision, &config.dispatch, cache.clone(), sampler)
            .with_inflight_gauge(inflight.gauge());

        let resilience = ResilienceManager::new(&config.resilience);
        resilience.register_fallback(ErrorKind::Cache, Arc::new(LastKnownGood::new(cache.clone())));
        for (kind, handler) in self.fallbacks {
            resilience.register_fallback(kind, handler);
        }

        info!(
            "Dispatcher ready: {} handlers, {} hooks, concurrency {}",
            self.handlers.len(),
            self.hooks.len(),
            config.dispatch.concurrency_limit
        );

        Ok(Dispatcher {
            permits: Semaphore::new(config.dispatch.concurrency_limit),
            executions: ExecutionLog::new(config.dispatch.history_size),
            security: Arc::new(SecurityGate::new(config.security.clone())),
            decisions: Arc::new(decisions),
            resilience: Arc::new(resilience),
            handlers: self.handlers,
            hooks: self.hooks,
            inflight,
            cache,
            catalog,
            config: config.dispatch,
        })
    }
}
