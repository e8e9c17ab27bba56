//! Error taxonomy for the dispatch engine.
//!
//! Every failure that can reach a caller carries an [`ErrorKind`] and a
//! [`Severity`]. Typed errors raised inside the engine use [`DispatchError`];
//! failures coming from collaborators (HTTP, remote cache, handlers) are
//! lowered into a [`RawError`] so they can be classified by signature.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    SecurityThreat,
    NotFound,
    RateLimited,
    InProgress,
    Timeout,
    Network,
    ExternalService,
    Cache,
    Configuration,
    System,
    Critical,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 12] = [
        ErrorKind::Validation,
        ErrorKind::SecurityThreat,
        ErrorKind::NotFound,
        ErrorKind::RateLimited,
        ErrorKind::InProgress,
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::ExternalService,
        ErrorKind::Cache,
        ErrorKind::Configuration,
        ErrorKind::System,
        ErrorKind::Critical,
    ];

    /// Stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ERR_VALIDATION",
            ErrorKind::SecurityThreat => "ERR_SECURITY_THREAT",
            ErrorKind::NotFound => "ERR_NOT_FOUND",
            ErrorKind::RateLimited => "ERR_RATE_LIMITED",
            ErrorKind::InProgress => "ERR_IN_PROGRESS",
            ErrorKind::Timeout => "ERR_TIMEOUT",
            ErrorKind::Network => "ERR_NETWORK",
            ErrorKind::ExternalService => "ERR_EXTERNAL_SERVICE",
            ErrorKind::Cache => "ERR_CACHE",
            ErrorKind::Configuration => "ERR_CONFIGURATION",
            ErrorKind::System => "ERR_SYSTEM",
            ErrorKind::Critical => "ERR_CRITICAL",
        }
    }

    /// Terminal kinds are reported directly and never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::RateLimited
                | ErrorKind::InProgress
        )
    }

    /// Default severity when nothing more specific is known.
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::InProgress => Severity::Low,
            ErrorKind::Cache => Severity::Low,
            ErrorKind::RateLimited | ErrorKind::Timeout => Severity::Medium,
            ErrorKind::Network | ErrorKind::ExternalService => Severity::High,
            ErrorKind::SecurityThreat | ErrorKind::Configuration => Severity::High,
            ErrorKind::System | ErrorKind::Critical => Severity::Critical,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::SecurityThreat => "SECURITY_THREAT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::RateLimited => "RATE_LIMITED",
            ErrorKind::InProgress => "IN_PROGRESS",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Network => "NETWORK",
            ErrorKind::ExternalService => "EXTERNAL_SERVICE",
            ErrorKind::Cache => "CACHE",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::System => "SYSTEM",
            ErrorKind::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// Severity ladder shared by errors and threat findings.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Whether this severity counts toward circuit-breaker thresholds.
    pub fn trips_breaker(&self) -> bool {
        *self >= Severity::High
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Request blocked by security gate: {0}")]
    SecurityThreat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Command already in progress: {0}")]
    InProgress(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("External service {service} failed: {message}")]
    ExternalService {
        service: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Catalog not available: {0}")]
    NotAvailable(String),

    #[error("System error: {0}")]
    System(String),

    #[error("Critical failure: {0}")]
    Critical(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Validation(_) => ErrorKind::Validation,
            DispatchError::SecurityThreat(_) => ErrorKind::SecurityThreat,
            DispatchError::NotFound(_) => ErrorKind::NotFound,
            DispatchError::RateLimited(_) => ErrorKind::RateLimited,
            DispatchError::InProgress(_) => ErrorKind::InProgress,
            DispatchError::Timeout(_) => ErrorKind::Timeout,
            DispatchError::Network(_) => ErrorKind::Network,
            DispatchError::ExternalService { .. } => ErrorKind::ExternalService,
            DispatchError::NotAvailable(_) => ErrorKind::ExternalService,
            DispatchError::Cache(_) => ErrorKind::Cache,
            DispatchError::Configuration(_) => ErrorKind::Configuration,
            DispatchError::System(_) | DispatchError::Io(_) => ErrorKind::System,
            DispatchError::Json(_) => ErrorKind::Validation,
            DispatchError::Critical(_) => ErrorKind::Critical,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::NotAvailable(_) => "ERR_NOT_AVAILABLE",
            other => other.kind().code(),
        }
    }

    /// Lower into a raw error for signature classification.
    pub fn to_raw(&self) -> RawError {
        let status = match self {
            DispatchError::ExternalService { status, .. } => *status,
            _ => None,
        };
        RawError {
            message: self.to_string(),
            code: Some(self.code().to_string()),
            status,
            kind_hint: Some(self.kind()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Untyped failure description as produced by collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawError {
    /// Human or library message
    pub message: String,
    /// Network or library code (e.g. `ECONNREFUSED`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Upstream status code, if the failure came from an HTTP-like service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Kind already known by the producer; wins over signature matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind_hint: Option<ErrorKind>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind_hint = Some(kind);
        self
    }
}

impl std::fmt::Display for RawError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, self.status) {
            (Some(code), Some(status)) => write!(f, "{} ({}, status {})", self.message, code, status),
            (Some(code), None) => write!(f, "{} ({})", self.message, code),
            (None, Some(status)) => write!(f, "{} (status {})", self.message, status),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl From<DispatchError> for RawError {
    fn from(err: DispatchError) -> Self {
        err.to_raw()
    }
}

impl From<&DispatchError> for RawError {
    fn from(err: &DispatchError) -> Self {
        err.to_raw()
    }
}
