//! Per-caller sliding windows: request rate and recent findings.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Result of one rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// Until the oldest request leaves the window (when denied)
    pub retry_after: Option<Duration>,
}

/// Sliding-window request counter keyed by caller
pub struct SlidingWindow {
    window: Duration,
    events: HashMap<String, VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: HashMap::new(),
        }
    }

    fn trim(window: Duration, events: &mut VecDeque<Instant>, now: Instant) {
        while let Some(front) = events.front() {
            if now.duration_since(*front) >= window {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Count one request for `caller` against `max`. Denied requests are not recorded.
    pub fn check(&mut self, caller: &str, max: u32, now: Instant) -> RateDecision {
        let window = self.window;
        let events = self.events.entry(caller.to_string()).or_default();
        Self::trim(window, events, now);

        if events.len() as u32 >= max {
            let retry_after = events
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)));
            return RateDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        events.push_back(now);
        RateDecision {
            allowed: true,
            remaining: max - events.len() as u32,
            retry_after: None,
        }
    }

    /// Record `n` events without a limit (finding tallies)
    pub fn record(&mut self, caller: &str, n: usize, now: Instant) {
        let window = self.window;
        let events = self.events.entry(caller.to_string()).or_default();
        Self::trim(window, events, now);
        events.extend(std::iter::repeat(now).take(n));
    }

    /// Events for `caller` still inside the window
    pub fn count(&mut self, caller: &str, now: Instant) -> usize {
        let window = self.window;
        match self.events.get_mut(caller) {
            Some(events) => {
                Self::trim(window, events, now);
                events.len()
            }
            None => 0,
        }
    }

    /// Forget callers with nothing left in the window
    pub fn prune(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.events.len();
        self.events.retain(|_, events| {
            Self::trim(window, events, now);
            !events.is_empty()
        });
        before - self.events.len()
    }

    pub fn tracked(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced_within_window() {
        let mut limiter = SlidingWindow::new(Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(limiter.check("alice", 2, now).remaining, 1);
        assert_eq!(limiter.check("alice", 2, now).remaining, 0);
        let denied = limiter.check("alice", 2, now);
        assert!(!denied.allowed);
        assert!(denied.retry_after.is_some());
        // other callers unaffected
        assert!(limiter.check("bob", 2, now).allowed);
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = SlidingWindow::new(Duration::from_millis(100));
        let start = Instant::now();
        assert!(limiter.check("c", 1, start).allowed);
        assert!(!limiter.check("c", 1, start + Duration::from_millis(50)).allowed);
        assert!(limiter.check("c", 1, start + Duration::from_millis(150)).allowed);
    }

    #[test]
    fn test_record_count_and_prune() {
        let mut log = SlidingWindow::new(Duration::from_millis(100));
        let start = Instant::now();
        log.record("x", 3, start);
        assert_eq!(log.count("x", start), 3);
        assert_eq!(log.count("x", start + Duration::from_millis(200)), 0);
        assert_eq!(log.prune(start + Duration::from_millis(200)), 1);
        assert_eq!(log.tracked(), 0);
    }
}
