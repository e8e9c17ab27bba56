//! Structured results returned to callers.
//!
//! Transports relay a [`DispatchResponse`] verbatim. Failures always carry a
//! [`FailureReport`]; raw internals only appear in `debug` when explicitly
//! requested.

use crate::decision::Decision;
use crate::error::{ErrorKind, Severity};
use crate::threat::ThreatFinding;
use serde::{Deserialize, Serialize};

/// Recovery strategies the resilience manager can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    Retry,
    Fallback,
    CircuitBreaker,
    GracefulDegradation,
    FailFast,
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecoveryStrategy::Retry => "RETRY",
            RecoveryStrategy::Fallback => "FALLBACK",
            RecoveryStrategy::CircuitBreaker => "CIRCUIT_BREAKER",
            RecoveryStrategy::GracefulDegradation => "GRACEFUL_DEGRADATION",
            RecoveryStrategy::FailFast => "FAIL_FAST",
        };
        write!(f, "{}", s)
    }
}

/// What happened when a strategy was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// A retry is scheduled
    RetryScheduled { attempt: u32, delay_ms: u64 },
    /// Retries used up; counter cleared
    AttemptsExhausted { attempts: u32 },
    /// Fallback produced a payload
    FallbackServed { stale: bool },
    /// No fallback handler registered, or it had nothing to serve
    FallbackUnavailable,
    /// Circuit open; nothing attempted
    ShortCircuited { retry_after_ms: u64 },
    /// Reduced-functionality success
    Degraded,
    /// Failed immediately
    FailedFast,
    /// Caller deadline passed
    DeadlineExceeded,
}

/// Raw details withheld unless debugging is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugDetail {
    pub raw_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// The stable failure shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub success: bool,
    pub user_facing_message: String,
    pub kind: ErrorKind,
    pub code: String,
    pub severity: Severity,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RecoveryStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_outcome: Option<RecoveryOutcome>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugDetail>,
}

impl FailureReport {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            user_facing_message: message.into(),
            kind,
            code: kind.code().to_string(),
            severity: kind.default_severity(),
            recoverable: false,
            strategy: None,
            recovery_outcome: None,
            suggestions: Vec::new(),
            debug: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_recovery(mut self, strategy: RecoveryStrategy, outcome: RecoveryOutcome) -> Self {
        self.strategy = Some(strategy);
        self.recovery_outcome = Some(outcome);
        self
    }
}

/// Coarse outcome of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Ok,
    Degraded,
    InProgress,
    Blocked,
    RateLimited,
    NotFound,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<ThreatFinding>,
    pub request_id: String,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub degraded: bool,
}

impl DispatchResponse {
    pub fn ok(request_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            status: DispatchStatus::Ok,
            data: Some(data),
            error: None,
            decision: None,
            findings: Vec::new(),
            request_id: request_id.into(),
            processing_time_ms: 0,
            from_cache: false,
            stale: false,
            degraded: false,
        }
    }

    pub fn failure(
        request_id: impl Into<String>,
        status: DispatchStatus,
        report: FailureReport,
    ) -> Self {
        Self {
            success: false,
            status,
            data: None,
            error: Some(report),
            decision: None,
            findings: Vec::new(),
            request_id: request_id.into(),
            processing_time_ms: 0,
            from_cache: false,
            stale: false,
            degraded: false,
        }
    }

    /// Kind of the failure, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Strategy applied by the resilience manager, if any
    pub fn recovery_strategy(&self) -> Option<RecoveryStrategy> {
        self.error.as_ref().and_then(|e| e.strategy)
    }
}
