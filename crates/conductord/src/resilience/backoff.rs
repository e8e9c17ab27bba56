//! Retry backoff and per-(kind, operation) attempt tracking

use conductor_shared::ErrorKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Exponential backoff without jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub cap: Duration,
    /// Retries allowed before giving up
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): min(base * multiplier^(attempt-1), cap)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap = self.cap.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.cap
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

/// Next step after a retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

type Key = (ErrorKind, String);

/// Retry counters keyed by (kind, operation)
#[derive(Clone, Default)]
pub struct AttemptTracker {
    counts: Arc<Mutex<HashMap<Key, u32>>>,
}

impl AttemptTracker {
    fn lock(&self) -> MutexGuard<'_, HashMap<Key, u32>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one failure; exhaustion clears the counter
    pub fn next(&self, policy: &RetryPolicy, kind: ErrorKind, operation: &str) -> Attempt {
        let mut counts = self.lock();
        let key = (kind, operation.to_string());
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;

        if *count > policy.max_attempts {
            let attempts = *count - 1;
            counts.remove(&key);
            Attempt::Exhausted { attempts }
        } else {
            let attempt = *count;
            Attempt::Retry {
                attempt,
                delay: policy.delay(attempt),
            }
        }
    }

    pub fn count(&self, kind: ErrorKind, operation: &str) -> u32 {
        self.lock()
            .get(&(kind, operation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Forget every counter of `operation`
    pub fn clear(&self, operation: &str) {
        self.lock().retain(|(_, op), _| op != operation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(100),
            multiplier: 2.0,
            cap: Duration::from_millis(500),
            max_attempts,
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let p = policy(10);
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(400));
        assert_eq!(p.delay(4), Duration::from_millis(500));
        assert_eq!(p.delay(60), Duration::from_millis(500));
    }

    #[test]
    fn test_exhaustion_clears_counter() {
        let tracker = AttemptTracker::default();
        let p = policy(2);
        assert!(matches!(
            tracker.next(&p, ErrorKind::Network, "op"),
            Attempt::Retry { attempt: 1, .. }
        ));
        assert!(matches!(
            tracker.next(&p, ErrorKind::Network, "op"),
            Attempt::Retry { attempt: 2, .. }
        ));
        assert_eq!(
            tracker.next(&p, ErrorKind::Network, "op"),
            Attempt::Exhausted { attempts: 2 }
        );
        assert_eq!(tracker.count(ErrorKind::Network, "op"), 0);
    }

    #[test]
    fn test_keys_are_per_kind_and_operation() {
        let tracker = AttemptTracker::default();
        let p = policy(5);
        tracker.next(&p, ErrorKind::Network, "a");
        tracker.next(&p, ErrorKind::Timeout, "a");
        tracker.next(&p, ErrorKind::Network, "b");
        assert_eq!(tracker.count(ErrorKind::Network, "a"), 1);

        tracker.clear("a");
        assert_eq!(tracker.count(ErrorKind::Network, "a"), 0);
        assert_eq!(tracker.count(ErrorKind::Timeout, "a"), 0);
        assert_eq!(tracker.count(ErrorKind::Network, "b"), 1);
    }
}
