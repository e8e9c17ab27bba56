//! Breakers keyed by error class

use super::circuit::{CircuitBreaker, CircuitState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    /// Milliseconds since the circuit last opened
    pub open_for_ms: Option<u64>,
    /// Milliseconds until an open circuit admits a trial call
    pub retry_after_ms: Option<u64>,
}

/// Registry of breakers. Every transition happens under one lock, so
/// concurrent failures of the same class never lose an update.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
}

impl BreakerRegistry {
    pub fn new(failure_threshold: u32, reset_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold,
            reset_timeout,
            success_threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check whether a call for `key` may proceed; `Err` carries the time left
    pub fn allow(&self, key: &str) -> Result<(), Duration> {
        let mut breakers = self.lock();
        let Some(breaker) = breakers.get_mut(key) else {
            return Ok(());
        };
        let before = breaker.state();
        let result = breaker.allow(Instant::now());
        if before == CircuitState::Open && breaker.state() == CircuitState::HalfOpen {
            info!("Circuit {} half-open, probing", key);
        }
        result
    }

    /// Record a failure that counts toward the threshold; returns the new state
    pub fn record_failure(&self, key: &str) -> CircuitState {
        let mut breakers = self.lock();
        let breaker = breakers.entry(key.to_string()).or_insert_with(|| {
            CircuitBreaker::new(self.failure_threshold, self.reset_timeout, self.success_threshold)
        });
        let before = breaker.state();
        breaker.record_failure(Instant::now());
        let after = breaker.state();
        if before != CircuitState::Open && after == CircuitState::Open {
            warn!(
                "Circuit {} opened after {} failures",
                key,
                breaker.failure_count()
            );
        }
        after
    }

    pub fn record_success(&self, key: &str) {
        let mut breakers = self.lock();
        if let Some(breaker) = breakers.get_mut(key) {
            let before = breaker.state();
            breaker.record_success();
            if before == CircuitState::HalfOpen && breaker.state() == CircuitState::Closed {
                info!("Circuit {} closed", key);
            }
        }
    }

    /// State for `key`; unknown keys are closed
    pub fn state(&self, key: &str) -> CircuitState {
        self.lock()
            .get(key)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let now = Instant::now();
        let breakers = self.lock();
        let mut out: Vec<CircuitSnapshot> = breakers
            .iter()
            .map(|(key, b)| CircuitSnapshot {
                key: key.clone(),
                state: b.state(),
                failure_count: b.failure_count(),
                open_for_ms: b
                    .opened_at()
                    .filter(|_| b.state() != CircuitState::Closed)
                    .map(|at| now.saturating_duration_since(at).as_millis() as u64),
                retry_after_ms: b.retry_after(now).map(|d| d.as_millis() as u64),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakers_are_independent() {
        let registry = BreakerRegistry::new(2, Duration::from_secs(60), 1);
        registry.record_failure("catalog_fetch");
        assert_eq!(registry.record_failure("catalog_fetch"), CircuitState::Open);

        assert!(registry.allow("catalog_fetch").is_err());
        assert!(registry.allow("handler:help").is_ok());
        assert_eq!(registry.state("handler:help"), CircuitState::Closed);
    }

    #[test]
    fn test_snapshot_lists_breakers() {
        let registry = BreakerRegistry::new(1, Duration::from_secs(60), 1);
        registry.record_failure("b");
        registry.record_success("a");
        registry.record_failure("a");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].key, "a");
        assert_eq!(snapshot[1].state, CircuitState::Open);
        assert!(snapshot[1].retry_after_ms.is_some());
    }

    #[test]
    fn test_concurrent_failures_are_counted() {
        use std::sync::Arc;

        let registry = Arc::new(BreakerRegistry::new(100, Duration::from_secs(60), 1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        registry.record_failure("shared");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.snapshot()[0].failure_count, 80);
    }
}
