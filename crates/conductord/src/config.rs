//! Configuration management for conductord.
//!
//! Loads settings from /etc/conductor/config.toml or uses defaults.
//! Every field has a default so partial files are accepted.

use anyhow::{Context, Result};
use conductor_shared::DispatchError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/conductor/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/conductor/config.toml";

/// Command catalog source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Where command definitions are fetched from (`http(s)://` or `file://`)
    #[serde(default = "default_source_url")]
    pub source_url: String,

    /// Prefix stripped from caller-supplied command names
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// How long a fetched snapshot stays fresh
    #[serde(default = "default_catalog_ttl")]
    pub ttl_secs: u64,

    /// Per-fetch timeout
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Number of suggestions returned for unknown commands
    #[serde(default = "default_suggestion_limit")]
    pub suggestion_limit: usize,
}

fn default_source_url() -> String {
    "file:///etc/conductor/commands.md".to_string()
}

fn default_prefix() -> String {
    conductor_shared::DEFAULT_COMMAND_PREFIX.to_string()
}

fn default_catalog_ttl() -> u64 {
    300
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_suggestion_limit() -> usize {
    5
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            source_url: default_source_url(),
            prefix: default_prefix(),
            ttl_secs: default_catalog_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
            suggestion_limit: default_suggestion_limit(),
        }
    }
}

/// Two-tier cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when a caller does not pass one
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Maximum entries in the local tier
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,

    /// Remote tier address (`redis://...`); unset means local-only
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Timeout for a single remote round-trip
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_ms: u64,

    /// Prefix applied to every key in the remote tier
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Interval of the local expired-entry sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_local_capacity() -> usize {
    4_096
}

fn default_remote_timeout() -> u64 {
    250
}

fn default_key_prefix() -> String {
    "conductor:".to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl(),
            local_capacity: default_local_capacity(),
            remote_url: None,
            remote_timeout_ms: default_remote_timeout(),
            key_prefix: default_key_prefix(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum concurrently executing handlers
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Number of priority levels (priority ranges 1..=levels)
    #[serde(default = "default_priority_levels")]
    pub priority_levels: u8,

    /// Execution records kept in memory
    #[serde(default = "default_execution_history")]
    pub history_size: usize,

    /// Deadline applied when the caller does not supply one
    #[serde(default = "default_deadline")]
    pub default_deadline_ms: u64,

    /// Base handler timeout before strategy scaling
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_ms: u64,
}

fn default_concurrency_limit() -> usize {
    64
}

fn default_priority_levels() -> u8 {
    5
}

fn default_execution_history() -> usize {
    500
}

fn default_deadline() -> u64 {
    30_000
}

fn default_handler_timeout() -> u64 {
    10_000
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            priority_levels: default_priority_levels(),
            history_size: default_execution_history(),
            default_deadline_ms: default_deadline(),
            handler_timeout_ms: default_handler_timeout(),
        }
    }
}

/// Security gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Largest accepted serialized input
    #[serde(default = "default_max_input")]
    pub max_input_bytes: usize,

    /// Deepest accepted nesting of arrays/objects
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Block on any finding
    #[serde(default)]
    pub strict_mode: bool,

    /// Block on HIGH findings as well as CRITICAL ones
    #[serde(default = "default_true")]
    pub block_threats: bool,

    #[serde(default = "default_rate_window")]
    pub rate_limit_window_secs: u64,

    #[serde(default = "default_rate_max")]
    pub rate_limit_max: u32,

    /// Window for repeat-offender tracking
    #[serde(default = "default_offender_window")]
    pub offender_window_secs: u64,

    /// Findings within the window above which a caller is blocked outright
    #[serde(default = "default_offender_threshold")]
    pub offender_threshold: u32,

    /// Shannon entropy (bits/char) above which input looks encoded
    #[serde(default = "default_entropy_high")]
    pub entropy_high: f64,

    /// Entropy below which large input looks like padding
    #[serde(default = "default_entropy_low")]
    pub entropy_low: f64,

    /// Minimum length before entropy bands are evaluated
    #[serde(default = "default_entropy_min_len")]
    pub entropy_min_len: usize,

    /// Minimum length for the low-entropy padding check
    #[serde(default = "default_padding_min_len")]
    pub padding_min_len: usize,

    /// Special-character ratio above which input is anomalous
    #[serde(default = "default_anomaly_ratio")]
    pub anomaly_ratio: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_input() -> usize {
    64 * 1024
}

fn default_max_depth() -> usize {
    10
}

fn default_rate_window() -> u64 {
    60
}

fn default_rate_max() -> u32 {
    120
}

fn default_offender_window() -> u64 {
    3_600
}

fn default_offender_threshold() -> u32 {
    10
}

fn default_entropy_high() -> f64 {
    5.2
}

fn default_entropy_low() -> f64 {
    1.0
}

fn default_entropy_min_len() -> usize {
    64
}

fn default_padding_min_len() -> usize {
    1_024
}

fn default_anomaly_ratio() -> f64 {
    0.4
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: default_max_input(),
            max_depth: default_max_depth(),
            strict_mode: false,
            block_threats: default_true(),
            rate_limit_window_secs: default_rate_window(),
            rate_limit_max: default_rate_max(),
            offender_window_secs: default_offender_window(),
            offender_threshold: default_offender_threshold(),
            entropy_high: default_entropy_high(),
            entropy_low: default_entropy_low(),
            entropy_min_len: default_entropy_min_len(),
            padding_min_len: default_padding_min_len(),
            anomaly_ratio: default_anomaly_ratio(),
        }
    }
}

/// Decision engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Decisions kept in the ring buffer
    #[serde(default = "default_decision_history")]
    pub history_size: usize,

    /// Window over which historical performance is averaged
    #[serde(default = "default_history_window")]
    pub history_window_secs: u64,

    /// Samples kept per command class
    #[serde(default = "default_samples_per_class")]
    pub samples_per_class: usize,

    /// Where decision state is persisted; unset disables persistence
    #[serde(default = "default_state_path")]
    pub state_path: Option<String>,

    /// Interval of the background persistence task
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,
}

fn default_decision_history() -> usize {
    1_000
}

fn default_history_window() -> u64 {
    3_600
}

fn default_samples_per_class() -> usize {
    200
}

fn default_state_path() -> Option<String> {
    Some("/var/lib/conductor/decisions.json".to_string())
}

fn default_persist_interval() -> u64 {
    120
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            history_size: default_decision_history(),
            history_window_secs: default_history_window(),
            samples_per_class: default_samples_per_class(),
            state_path: default_state_path(),
            persist_interval_secs: default_persist_interval(),
        }
    }
}

/// Retry and circuit-breaker parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    #[serde(default = "default_retry_cap")]
    pub retry_cap_ms: u64,

    /// Retries allowed per (kind, operation) before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// HIGH/CRITICAL failures that open a circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cool-down before an open circuit lets a trial call through
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,

    /// Consecutive successes needed to close a half-open circuit
    #[serde(default = "default_half_open_successes")]
    pub half_open_successes: u32,

    /// Include raw error internals in failure reports
    #[serde(default)]
    pub debug: bool,
}

fn default_retry_base() -> u64 {
    100
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_cap() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout() -> u64 {
    60_000
}

fn default_half_open_successes() -> u32 {
    3
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: default_retry_base(),
            retry_multiplier: default_retry_multiplier(),
            retry_cap_ms: default_retry_cap(),
            max_attempts: default_max_attempts(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout(),
            half_open_successes: default_half_open_successes(),
            debug: false,
        }
    }
}

impl ResilienceConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Logging output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load config from standard locations, falling back to defaults
    pub fn load() -> Self {
        Self::load_first(&[Path::new(CONFIG_PATH), Path::new(DEFAULT_CONFIG_PATH)])
    }

    /// First readable and valid file among `paths`. A file that exists but
    /// fails to load is reported and skipped.
    pub fn load_first(paths: &[&Path]) -> Self {
        for path in paths {
            if !path.exists() {
                debug!("No config at {}", path.display());
                continue;
            }
            match Self::load_from_path(path) {
                Ok(config) => return config,
                Err(e) => warn!("Ignoring config {}: {:#}", path.display(), e),
            }
        }
        warn!("No usable config found, using defaults");
        DaemonConfig::default()
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> std::result::Result<(), DispatchError> {
        let invalid = |msg: &str| Err(DispatchError::Configuration(msg.to_string()));

        if self.cache.local_capacity == 0 {
            return invalid("cache.local_capacity must be at least 1");
        }
        if self.dispatch.concurrency_limit == 0 {
            return invalid("dispatch.concurrency_limit must be at least 1");
        }
        if self.dispatch.priority_levels == 0 {
            return invalid("dispatch.priority_levels must be at least 1");
        }
        if self.dispatch.history_size == 0 || self.decision.history_size == 0 {
            return invalid("history sizes must be at least 1");
        }
        if self.resilience.retry_multiplier < 1.0 {
            return invalid("resilience.retry_multiplier must be >= 1.0");
        }
        if self.resilience.failure_threshold == 0 {
            return invalid("resilience.failure_threshold must be at least 1");
        }
        if self.security.rate_limit_max == 0 {
            return invalid("security.rate_limit_max must be at least 1");
        }
        if self.security.entropy_low >= self.security.entropy_high {
            return invalid("security.entropy_low must be below entropy_high");
        }
        Ok(())
    }

    /// Render the default config as TOML (for `--print-default-config`)
    pub fn default_toml() -> Result<String> {
        Ok(toml::to_string_pretty(&DaemonConfig::default())?)
    }
}
