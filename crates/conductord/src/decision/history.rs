//! Decision history and rolling per-class performance table.
//!
//! Both survive restarts through a JSON state file written atomically.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use conductor_shared::Decision;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// One observed execution of a command class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerfSample {
    pub at: DateTime<Utc>,
    pub latency_ms: u64,
    pub success: bool,
}

/// Aggregate over the samples inside the history window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub samples: usize,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
}

/// Rolling latency/success samples keyed by command class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceTable {
    classes: BTreeMap<String, VecDeque<PerfSample>>,
}

impl PerformanceTable {
    /// Append a sample, keeping at most `cap` per class
    pub fn record(&mut self, class: &str, sample: PerfSample, cap: usize) {
        let samples = self.classes.entry(class.to_string()).or_default();
        samples.push_back(sample);
        while samples.len() > cap.max(1) {
            samples.pop_front();
        }
    }

    /// Stats over samples newer than `window`; `None` when there are none
    pub fn stats(&self, class: &str, window: Duration, now: DateTime<Utc>) -> Option<ClassStats> {
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent: Vec<&PerfSample> = self
            .classes
            .get(class)?
            .iter()
            .filter(|s| s.at >= cutoff)
            .collect();
        if recent.is_empty() {
            return None;
        }

        let n = recent.len() as f64;
        let total_latency: u64 = recent.iter().map(|s| s.latency_ms).sum();
        let successes = recent.iter().filter(|s| s.success).count();
        Some(ClassStats {
            samples: recent.len(),
            avg_latency_ms: total_latency as f64 / n,
            success_rate: successes as f64 / n,
        })
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Everything the decision engine persists between runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionState {
    #[serde(default)]
    pub history: VecDeque<Decision>,
    #[serde(default)]
    pub performance: PerformanceTable,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl DecisionState {
    /// Append a decision, dropping the oldest beyond `cap`
    pub fn push_decision(&mut self, decision: Decision, cap: usize) {
        self.history.push_back(decision);
        while self.history.len() > cap.max(1) {
            self.history.pop_front();
        }
    }

    /// Load state from disk; missing or unreadable files give an empty state
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<DecisionState>(&contents) {
                Ok(state) => {
                    info!(
                        "Loaded decision state: {} decisions, {} classes",
                        state.history.len(),
                        state.performance.classes.len()
                    );
                    state
                }
                Err(e) => {
                    warn!("Failed to parse decision state: {}. Using defaults.", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read decision state: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize decision state")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        // Atomic write
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename to {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn sample(at: DateTime<Utc>, latency_ms: u64, success: bool) -> PerfSample {
        PerfSample {
            at,
            latency_ms,
            success,
        }
    }

    #[test]
    fn test_stats_respect_window_and_cap() {
        let now = Utc::now();
        let mut table = PerformanceTable::default();
        table.record("info", sample(now - ChronoDuration::hours(2), 9_000, false), 10);
        table.record("info", sample(now, 100, true), 10);
        table.record("info", sample(now, 300, false), 10);

        let stats = table.stats("info", Duration::from_secs(3_600), now).unwrap();
        assert_eq!(stats.samples, 2);
        assert_relative_eq!(stats.avg_latency_ms, 200.0);
        assert_relative_eq!(stats.success_rate, 0.5);

        for _ in 0..5 {
            table.record("info", sample(now, 1, true), 3);
        }
        let stats = table.stats("info", Duration::from_secs(3_600), now).unwrap();
        assert_eq!(stats.samples, 3);
        assert!(table.stats("unknown", Duration::from_secs(60), now).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("decisions.json");

        let mut state = DecisionState::default();
        state
            .performance
            .record("analysis", sample(Utc::now(), 42, true), 10);
        state.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = DecisionState::load_or_default(&path);
        assert_eq!(loaded.performance.classes().collect::<Vec<_>>(), vec!["analysis"]);
    }

    #[test]
    fn test_missing_or_corrupt_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let missing = DecisionState::load_or_default(&dir.path().join("nope.json"));
        assert!(missing.history.is_empty());

        let corrupt = dir.path().join("bad.json");
        fs::write(&corrupt, "{not json").unwrap();
        let state = DecisionState::load_or_default(&corrupt);
        assert!(state.performance.is_empty());
    }
}
