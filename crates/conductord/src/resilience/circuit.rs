//! Circuit breaker state machine

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the reset deadline
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        write!(f, "{}", s)
    }
}

/// Circuit breaker for one error class
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    /// Qualifying failures since the last reset
    failure_count: u32,
    /// Successes while half-open
    success_count: u32,
    failure_threshold: u32,
    success_threshold: u32,
    opened_at: Option<Instant>,
    reset_deadline: Option<Instant>,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration, success_threshold: u32) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            opened_at: None,
            reset_deadline: None,
            reset_timeout,
        }
    }

    /// Record a qualifying failure
    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.failure_threshold {
                    self.open(now);
                }
            }
            CircuitState::HalfOpen => {
                // Trial call failed
                self.failure_count += 1;
                self.open(now);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a success
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.success_threshold {
                    self.close();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Whether a call may proceed. Moves OPEN to HALF_OPEN once the deadline passed.
    pub fn allow(&mut self, now: Instant) -> Result<(), Duration> {
        if self.state == CircuitState::Open {
            match self.reset_deadline {
                Some(deadline) if now < deadline => return Err(deadline - now),
                _ => self.half_open(),
            }
        }
        Ok(())
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Time left before an open circuit admits a trial call
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        match (self.state, self.reset_deadline) {
            (CircuitState::Open, Some(deadline)) => Some(deadline.saturating_duration_since(now)),
            _ => None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.reset_deadline = Some(now + self.reset_timeout);
        self.success_count = 0;
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.success_count = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.opened_at = None;
        self.reset_deadline = None;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60), 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_opens() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60), 1);
        let now = Instant::now();

        cb.record_failure(now);
        cb.record_failure(now);
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure(now);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow(now).is_err());
        assert!(cb.retry_after(now).is_some());
    }

    #[test]
    fn test_half_open_after_deadline() {
        let mut cb = CircuitBreaker::new(2, Duration::from_millis(10), 1);
        let start = Instant::now();
        cb.record_failure(start);
        cb.record_failure(start);

        assert!(cb.allow(start + Duration::from_millis(5)).is_err());
        assert!(cb.allow(start + Duration::from_millis(20)).is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut cb = CircuitBreaker::new(1, Duration::from_millis(10), 2);
        let start = Instant::now();
        cb.record_failure(start);
        let later = start + Duration::from_millis(20);
        assert!(cb.allow(later).is_ok());

        cb.record_failure(later);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow(later + Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_sustained_success_closes() {
        let mut cb = CircuitBreaker::new(2, Duration::from_millis(10), 3);
        let start = Instant::now();
        cb.record_failure(start);
        cb.record_failure(start);
        assert!(cb.allow(start + Duration::from_millis(20)).is_ok());

        cb.record_success();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60), 1);
        cb.record_failure(Instant::now());
        assert_eq!(cb.failure_count(), 1);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
