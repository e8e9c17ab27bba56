//! In-flight guard: one execution per normalized command.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Commands currently executing
#[derive(Clone, Default)]
pub struct InFlightSet {
    active: Arc<Mutex<HashSet<String>>>,
    gauge: Arc<AtomicUsize>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `command` as running; `None` if it already is
    pub fn try_acquire(&self, command: &str) -> Option<InFlightGuard> {
        if !self.lock().insert(command.to_string()) {
            return None;
        }
        self.gauge.fetch_add(1, Ordering::SeqCst);
        Some(InFlightGuard {
            set: self.clone(),
            command: command.to_string(),
        })
    }

    pub fn contains(&self, command: &str) -> bool {
        self.lock().contains(command)
    }

    pub fn len(&self) -> usize {
        self.gauge.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared counter of running commands
    pub fn gauge(&self) -> Arc<AtomicUsize> {
        self.gauge.clone()
    }
}

/// Releases the in-flight marker when dropped, including on cancellation
pub struct InFlightGuard {
    set: InFlightSet,
    command: String,
}

impl InFlightGuard {
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.set.lock().remove(&self.command) {
            self.set.gauge.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rejected_until_released() {
        let set = InFlightSet::new();
        let guard = set.try_acquire("help").unwrap();
        assert!(set.try_acquire("help").is_none());
        assert!(set.try_acquire("status").is_some());
        assert_eq!(set.len(), 1);

        drop(guard);
        assert!(!set.contains("help"));
        assert!(set.try_acquire("help").is_some());
    }

    #[tokio::test]
    async fn test_released_on_cancellation() {
        let set = InFlightSet::new();
        let held = set.clone();
        let task = tokio::spawn(async move {
            let _guard = held.try_acquire("slow").unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(set.contains("slow"));

        task.abort();
        let _ = task.await;
        assert!(!set.contains("slow"));
        assert!(set.is_empty());
    }
}
