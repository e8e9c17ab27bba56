//! Routing decisions emitted by the decision engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much work a command is expected to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Complexity {
    pub fn score(&self) -> f64 {
        match self {
            Complexity::Low => 0.2,
            Complexity::Medium => 0.5,
            Complexity::High => 0.8,
            Complexity::VeryHigh => 1.0,
        }
    }

    pub fn raise(self) -> Self {
        match self {
            Complexity::Low => Complexity::Medium,
            Complexity::Medium => Complexity::High,
            Complexity::High | Complexity::VeryHigh => Complexity::VeryHigh,
        }
    }

    pub fn lower(self) -> Self {
        match self {
            Complexity::Low | Complexity::Medium => Complexity::Low,
            Complexity::High => Complexity::Medium,
            Complexity::VeryHigh => Complexity::High,
        }
    }
}

/// Expected processing time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeClass {
    Instant,
    Fast,
    Moderate,
    Slow,
}

impl TimeClass {
    pub fn score(&self) -> f64 {
        match self {
            TimeClass::Instant => 0.1,
            TimeClass::Fast => 0.3,
            TimeClass::Moderate => 0.6,
            TimeClass::Slow => 0.9,
        }
    }

    /// Baseline latency estimate in milliseconds
    pub fn baseline_ms(&self) -> u64 {
        match self {
            TimeClass::Instant => 50,
            TimeClass::Fast => 250,
            TimeClass::Moderate => 1_500,
            TimeClass::Slow => 5_000,
        }
    }
}

/// Declared cache strategy of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    Aggressive,
    Moderate,
    Minimal,
    None,
}

impl CacheStrategy {
    /// TTL for cached results, `None` when results must not be cached
    pub fn result_ttl_secs(&self) -> Option<u64> {
        match self {
            CacheStrategy::Aggressive => Some(3_600),
            CacheStrategy::Moderate => Some(600),
            CacheStrategy::Minimal => Some(60),
            CacheStrategy::None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    FastPath,
    SquadCoordination,
    CarefulProcessing,
    Standard,
}

impl ProcessingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStrategy::FastPath => "fast_path",
            ProcessingStrategy::SquadCoordination => "squad_coordination",
            ProcessingStrategy::CarefulProcessing => "careful_processing",
            ProcessingStrategy::Standard => "standard",
        }
    }

    /// Multiplier applied to the handler timeout
    pub fn timeout_factor(&self) -> f64 {
        match self {
            ProcessingStrategy::FastPath => 0.5,
            ProcessingStrategy::Standard => 1.0,
            ProcessingStrategy::CarefulProcessing => 2.0,
            ProcessingStrategy::SquadCoordination => 3.0,
        }
    }
}

impl std::fmt::Display for ProcessingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-factor scores, each normalized to [0, 1]. Higher means heavier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub complexity: f64,
    pub data_requirement: f64,
    pub processing_time: f64,
    pub resource_availability: f64,
    pub caller_context: f64,
    pub cache_availability: f64,
    pub historical_performance: f64,
}

impl FactorScores {
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.complexity,
            self.data_requirement,
            self.processing_time,
            self.resource_availability,
            self.caller_context,
            self.cache_availability,
            self.historical_performance,
        ]
    }

    /// Population variance of the seven factors
    pub fn variance(&self) -> f64 {
        let values = self.as_array();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub use_cache: bool,
    /// 1 (lowest) ..= configured priority levels
    pub priority: u8,
    pub strategy: ProcessingStrategy,
    pub squad_activation: bool,
    pub estimated_time_ms: u64,
    pub confidence: f64,
    pub requires_external_data: bool,
    pub cache_strategy: CacheStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub command: String,
    /// Key of the performance table row this command feeds
    pub command_class: String,
    pub factors: FactorScores,
    pub score: f64,
    pub plan: RoutingPlan,
    pub decided_at: DateTime<Utc>,
}
