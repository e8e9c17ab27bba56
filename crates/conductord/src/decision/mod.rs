//! Decision engine: scores a command across weighted factors and emits a routing plan.
//!
//! Factors are normalized to [0, 1] where higher means heavier. The composite
//! score drives cache use, priority adjustment and processing strategy.

pub mod classify;
pub mod history;
pub mod metrics;

pub use classify::{classify, CommandProfile};
pub use history::{ClassStats, DecisionState, PerfSample, PerformanceTable};
pub use metrics::{FixedResourceSampler, ResourceSample, ResourceSampler, SysinfoSampler};

use crate::cache::CacheStore;
use crate::config::{DecisionConfig, DispatchConfig};
use chrono::Utc;
use conductor_shared::{
    CacheStrategy, CallerContext, CallerRole, CommandDefinition, Complexity, Decision,
    FactorScores, ProcessingStrategy, RoutingPlan,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const WEIGHT_COMPLEXITY: f64 = 0.25;
pub const WEIGHT_DATA_REQUIREMENT: f64 = 0.20;
pub const WEIGHT_PROCESSING_TIME: f64 = 0.15;
pub const WEIGHT_RESOURCES: f64 = 0.15;
pub const WEIGHT_CALLER: f64 = 0.10;
pub const WEIGHT_CACHE: f64 = 0.10;
pub const WEIGHT_HISTORY: f64 = 0.05;

/// Below this score a plan is light: fast path, priority raised
pub const LIGHT_SCORE: f64 = 0.3;
/// Above this score a plan is heavy: priority lowered
pub const HEAVY_SCORE: f64 = 0.8;
/// Above this score processing turns careful
pub const CAREFUL_SCORE: f64 = 0.7;
/// Moderate-strategy commands use the cache below this score
pub const MODERATE_CACHE_SCORE: f64 = 0.6;

/// Cache key prefix under which a command's results are stored
pub fn result_key_prefix(command: &str) -> String {
    format!("result:{}:", command)
}

pub struct DecisionEngine {
    config: DecisionConfig,
    priority_levels: u8,
    concurrency_limit: usize,
    cache: Arc<CacheStore>,
    sampler: Arc<dyn ResourceSampler>,
    inflight: Arc<AtomicUsize>,
    state: Mutex<DecisionState>,
}

impl DecisionEngine {
    /// Create an engine, restoring persisted state when a state path is configured
    pub fn new(
        config: &DecisionConfig,
        dispatch: &DispatchConfig,
        cache: Arc<CacheStore>,
        sampler: Arc<dyn ResourceSampler>,
    ) -> Self {
        let state = match &config.state_path {
            Some(path) => DecisionState::load_or_default(&PathBuf::from(path)),
            None => DecisionState::default(),
        };

        Self {
            config: config.clone(),
            priority_levels: dispatch.priority_levels.max(1),
            concurrency_limit: dispatch.concurrency_limit.max(1),
            cache,
            sampler,
            inflight: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(state),
        }
    }

    /// Share an in-flight counter used as the concurrency-load proxy
    pub fn with_inflight_gauge(mut self, gauge: Arc<AtomicUsize>) -> Self {
        self.inflight = gauge;
        self
    }

    fn state(&self) -> MutexGuard<'_, DecisionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide for a bare command name
    pub async fn decide(&self, command: &str, ctx: &CallerContext) -> Decision {
        self.decide_with(command, ctx, None, None).await
    }

    /// Decide using the catalog definition and the exact result key when known
    pub async fn decide_with(
        &self,
        command: &str,
        ctx: &CallerContext,
        definition: Option<&CommandDefinition>,
        result_key: Option<&str>,
    ) -> Decision {
        let profile = classify(command, definition);
        let cache_availability = self.cache_factor(command, result_key).await;
        let stats = self.class_stats(&profile.class);

        let factors = FactorScores {
            complexity: profile.complexity.score(),
            data_requirement: if profile.requires_external_data { 0.8 } else { 0.2 },
            processing_time: profile.time_class.score(),
            resource_availability: self.resource_factor(),
            caller_context: caller_factor(ctx),
            cache_availability,
            historical_performance: history_factor(stats, profile.time_class.baseline_ms()),
        };
        let score = composite(&factors);
        let plan = self.plan(&profile, &factors, score, ctx, stats);

        debug!(
            command = %command,
            class = %profile.class,
            score = score,
            strategy = %plan.strategy,
            priority = plan.priority,
            use_cache = plan.use_cache,
            "Routing decision"
        );

        let decision = Decision {
            command: command.to_string(),
            command_class: profile.class,
            factors,
            score,
            plan,
            decided_at: Utc::now(),
        };
        let cap = self.config.history_size;
        self.state().push_decision(decision.clone(), cap);
        decision
    }

    fn plan(
        &self,
        profile: &CommandProfile,
        factors: &FactorScores,
        score: f64,
        ctx: &CallerContext,
        stats: Option<ClassStats>,
    ) -> RoutingPlan {
        let use_cache = match profile.cache_strategy {
            CacheStrategy::Aggressive => true,
            CacheStrategy::None => false,
            CacheStrategy::Moderate => score < MODERATE_CACHE_SCORE,
            CacheStrategy::Minimal => score < LIGHT_SCORE,
        };

        let mut priority = i16::from(profile.base_priority);
        if score < LIGHT_SCORE {
            priority += 1;
        } else if score > HEAVY_SCORE {
            priority -= 1;
        }
        if ctx.urgent {
            priority += 1;
        }
        let priority = priority.clamp(1, i16::from(self.priority_levels)) as u8;

        let strategy = if profile.coordination {
            ProcessingStrategy::SquadCoordination
        } else if score < LIGHT_SCORE {
            ProcessingStrategy::FastPath
        } else if score > CAREFUL_SCORE || profile.complexity >= Complexity::High {
            ProcessingStrategy::CarefulProcessing
        } else {
            ProcessingStrategy::Standard
        };

        let baseline = profile.time_class.baseline_ms() as f64;
        let expected = match stats {
            Some(s) => (baseline + s.avg_latency_ms) / 2.0,
            None => baseline,
        };
        let estimated_time_ms = (expected * (1.0 + factors.resource_availability * 0.5)).round() as u64;

        RoutingPlan {
            use_cache,
            priority,
            strategy,
            squad_activation: strategy == ProcessingStrategy::SquadCoordination,
            estimated_time_ms,
            confidence: (1.0 - factors.variance()).clamp(0.1, 1.0),
            requires_external_data: profile.requires_external_data,
            cache_strategy: profile.cache_strategy,
        }
    }

    fn resource_factor(&self) -> f64 {
        let host = self.sampler.sample().pressure();
        let load = self.inflight.load(Ordering::Relaxed) as f64 / self.concurrency_limit as f64;
        (host * 0.7 + load.min(1.0) * 0.3).clamp(0.0, 1.0)
    }

    async fn cache_factor(&self, command: &str, result_key: Option<&str>) -> f64 {
        if let Some(key) = result_key {
            if self.cache.exists(key).await {
                return 0.0;
            }
        }
        let related = format!("{}*", result_key_prefix(command));
        if self.cache.any_matching(&related).await {
            0.4
        } else {
            1.0
        }
    }

    /// Feed an observed execution back into the performance table
    pub fn record_outcome(&self, class: &str, latency: Duration, success: bool) {
        let sample = PerfSample {
            at: Utc::now(),
            latency_ms: latency.as_millis().min(u128::from(u64::MAX)) as u64,
            success,
        };
        let cap = self.config.samples_per_class;
        self.state().performance.record(class, sample, cap);
    }

    pub fn class_stats(&self, class: &str) -> Option<ClassStats> {
        let window = Duration::from_secs(self.config.history_window_secs);
        self.state().performance.stats(class, window, Utc::now())
    }

    /// Most recent decisions, newest last
    pub fn history(&self, n: usize) -> Vec<Decision> {
        let state = self.state();
        let skip = state.history.len().saturating_sub(n);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.state().history.len()
    }

    /// Persist history and performance table; no-op without a state path
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.config.state_path else {
            return Ok(());
        };
        let mut snapshot = self.state().clone();
        snapshot.saved_at = Some(Utc::now());
        snapshot.save(&PathBuf::from(path))?;
        debug!("Saved decision state to {}", path);
        Ok(())
    }

    /// Periodically persist state until the engine is dropped
    pub fn spawn_persister(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else {
                    info!("Decision engine dropped, persister exiting");
                    break;
                };
                if let Err(e) = engine.save() {
                    warn!("Failed to persist decision state: {:#}", e);
                }
            }
        })
    }
}

fn composite(f: &FactorScores) -> f64 {
    let score = f.complexity * WEIGHT_COMPLEXITY
        + f.data_requirement * WEIGHT_DATA_REQUIREMENT
        + f.processing_time * WEIGHT_PROCESSING_TIME
        + f.resource_availability * WEIGHT_RESOURCES
        + f.caller_context * WEIGHT_CALLER
        + f.cache_availability * WEIGHT_CACHE
        + f.historical_performance * WEIGHT_HISTORY;
    score.clamp(0.0, 1.0)
}

fn caller_factor(ctx: &CallerContext) -> f64 {
    let base: f64 = match ctx.role {
        CallerRole::Admin => 0.3,
        CallerRole::Service => 0.4,
        CallerRole::User => 0.5,
        CallerRole::Guest => 0.7,
    };
    if ctx.urgent {
        (base - 0.2).max(0.0)
    } else {
        base
    }
}

/// Slow or failing classes weigh more; no data is neutral
fn history_factor(stats: Option<ClassStats>, baseline_ms: u64) -> f64 {
    match stats {
        None => 0.5,
        Some(s) => {
            let slowness = (s.avg_latency_ms / (baseline_ms.max(1) as f64 * 4.0)).min(1.0);
            (0.5 * slowness + 0.5 * (1.0 - s.success_rate)).clamp(0.0, 1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use approx::assert_relative_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn engine_with(sample: ResourceSample, state_path: Option<String>) -> (DecisionEngine, Arc<CacheStore>) {
        let cache = Arc::new(CacheStore::new(&CacheConfig::default()));
        let config = DecisionConfig {
            state_path,
            ..DecisionConfig::default()
        };
        let engine = DecisionEngine::new(
            &config,
            &DispatchConfig::default(),
            cache.clone(),
            Arc::new(FixedResourceSampler(sample)),
        );
        (engine, cache)
    }

    fn idle() -> ResourceSample {
        ResourceSample::default()
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total = WEIGHT_COMPLEXITY
            + WEIGHT_DATA_REQUIREMENT
            + WEIGHT_PROCESSING_TIME
            + WEIGHT_RESOURCES
            + WEIGHT_CALLER
            + WEIGHT_CACHE
            + WEIGHT_HISTORY;
        assert_relative_eq!(total, 1.0);
    }

    #[tokio::test]
    async fn test_help_is_light_and_cached() {
        let (engine, _) = engine_with(idle(), None);
        let decision = engine.decide("help", &CallerContext::new("alice")).await;
        assert!(decision.plan.use_cache);
        assert!(decision.score < HEAVY_SCORE);
        assert_eq!(decision.command_class, "info");
        assert!(!decision.plan.requires_external_data);
        assert!((0.1..=1.0).contains(&decision.plan.confidence));
        assert_eq!(engine.history_len(), 1);
    }

    #[tokio::test]
    async fn test_coordination_forces_squad() {
        let (engine, _) = engine_with(idle(), None);
        let decision = engine.decide("deploy", &CallerContext::new("ops")).await;
        assert_eq!(decision.plan.strategy, ProcessingStrategy::SquadCoordination);
        assert!(decision.plan.squad_activation);
        assert!(!decision.plan.use_cache);
    }

    #[tokio::test]
    async fn test_heavy_load_lowers_priority() {
        let loaded = ResourceSample {
            memory_pressure: 1.0,
            load_ratio: 1.0,
        };
        let (engine, _) = engine_with(loaded, None);
        let engine = engine.with_inflight_gauge(Arc::new(AtomicUsize::new(1_000)));
        let ctx = CallerContext::new("g").with_role(CallerRole::Guest);
        let decision = engine.decide("analyze-logs", &ctx).await;
        assert!(decision.score > HEAVY_SCORE, "score {}", decision.score);
        assert_eq!(decision.plan.priority, 1);
        assert_eq!(decision.plan.strategy, ProcessingStrategy::CarefulProcessing);
    }

    #[tokio::test]
    async fn test_cached_result_lowers_cache_factor() {
        let (engine, cache) = engine_with(idle(), None);
        let ctx = CallerContext::new("alice");
        let key = format!("{}abc", result_key_prefix("search"));

        let cold = engine.decide_with("search", &ctx, None, Some(&key)).await;
        assert_relative_eq!(cold.factors.cache_availability, 1.0);

        cache.set(&format!("{}other", result_key_prefix("search")), &json!(1), None).await;
        let related = engine.decide_with("search", &ctx, None, Some(&key)).await;
        assert_relative_eq!(related.factors.cache_availability, 0.4);

        cache.set(&key, &json!(2), None).await;
        let warm = engine.decide_with("search", &ctx, None, Some(&key)).await;
        assert_relative_eq!(warm.factors.cache_availability, 0.0);
        assert!(warm.score < cold.score);
    }

    #[tokio::test]
    async fn test_outcomes_feed_history_factor() {
        let (engine, _) = engine_with(idle(), None);
        let ctx = CallerContext::new("alice");
        let before = engine.decide("search", &ctx).await;
        assert_relative_eq!(before.factors.historical_performance, 0.5);

        for _ in 0..4 {
            engine.record_outcome("retrieval", Duration::from_millis(10), true);
        }
        let after = engine.decide("search", &ctx).await;
        assert!(after.factors.historical_performance < 0.1);
        assert_eq!(engine.class_stats("retrieval").unwrap().samples, 4);
    }

    #[tokio::test]
    async fn test_urgent_caller_raises_priority() {
        let (engine, _) = engine_with(idle(), None);
        let normal = engine.decide("search", &CallerContext::new("a")).await;
        let urgent = engine.decide("search", &CallerContext::new("a").urgent()).await;
        assert!(urgent.plan.priority > normal.plan.priority);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let cache = Arc::new(CacheStore::new(&CacheConfig::default()));
        let config = DecisionConfig {
            history_size: 3,
            state_path: None,
            ..DecisionConfig::default()
        };
        let engine = DecisionEngine::new(
            &config,
            &DispatchConfig::default(),
            cache,
            Arc::new(FixedResourceSampler(idle())),
        );
        for name in ["a", "b", "c", "d", "e"] {
            engine.decide(name, &CallerContext::new("x")).await;
        }
        let names: Vec<String> = engine.history(10).into_iter().map(|d| d.command).collect();
        assert_eq!(names, vec!["c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("decisions.json").to_string_lossy().to_string();

        let (engine, _) = engine_with(idle(), Some(path.clone()));
        engine.decide("help", &CallerContext::new("a")).await;
        engine.record_outcome("info", Duration::from_millis(5), true);
        engine.save().unwrap();

        let (restored, _) = engine_with(idle(), Some(path));
        assert_eq!(restored.history_len(), 1);
        assert!(restored.class_stats("info").is_some());
    }
}
