//! Execution history and aggregate counters

use chrono::{DateTime, Utc};
use conductor_shared::{DispatchStatus, ErrorKind, ProcessingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// One finished dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub request_id: String,
    pub command: String,
    pub caller_id: String,
    pub status: DispatchStatus,
    pub success: bool,
    pub duration_ms: u64,
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ProcessingStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub average_duration_ms: f64,
    pub in_flight: usize,
}

#[derive(Default)]
struct Inner {
    records: VecDeque<ExecutionRecord>,
    total: u64,
    successes: u64,
    cache_hits: u64,
    total_duration_ms: u64,
}

/// Bounded execution history; totals cover every dispatch ever recorded
pub struct ExecutionLog {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl ExecutionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, record: ExecutionRecord) {
        let mut inner = self.lock();
        inner.total += 1;
        if record.success {
            inner.successes += 1;
        }
        if record.from_cache {
            inner.cache_hits += 1;
        }
        inner.total_duration_ms = inner.total_duration_ms.saturating_add(record.duration_ms);
        inner.records.push_back(record);
        while inner.records.len() > self.capacity {
            inner.records.pop_front();
        }
    }

    /// Last `n` records, newest last
    pub fn recent(&self, n: usize) -> Vec<ExecutionRecord> {
        let inner = self.lock();
        let skip = inner.records.len().saturating_sub(n);
        inner.records.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self, in_flight: usize) -> ExecutionStats {
        let inner = self.lock();
        ExecutionStats {
            total: inner.total,
            successes: inner.successes,
            failures: inner.total - inner.successes,
            cache_hits: inner.cache_hits,
            average_duration_ms: if inner.total == 0 {
                0.0
            } else {
                inner.total_duration_ms as f64 / inner.total as f64
            },
            in_flight,
        }
    }
}
