//! Deterministic error classification.
//!
//! Order of precedence: kind hint from the producer, network/library code,
//! upstream status, then message substrings. Unmatched errors are SYSTEM.

use conductor_shared::{ErrorKind, RawError, Severity};

/// Kind, severity and recoverability of one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub recoverable: bool,
}

impl Classification {
    fn of(kind: ErrorKind) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            recoverable: is_recoverable(kind),
        }
    }
}

/// Kinds routed through recovery. Upstream rate limits are degraded rather
/// than reported, so they count as recoverable here.
pub fn is_recoverable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Timeout
            | ErrorKind::Network
            | ErrorKind::ExternalService
            | ErrorKind::Cache
            | ErrorKind::RateLimited
    )
}

const CODE_SIGNATURES: &[(&str, ErrorKind)] = &[
    ("ETIMEDOUT", ErrorKind::Timeout),
    ("ESOCKETTIMEDOUT", ErrorKind::Timeout),
    ("ECONNREFUSED", ErrorKind::Network),
    ("ECONNRESET", ErrorKind::Network),
    ("ECONNABORTED", ErrorKind::Network),
    ("ENOTFOUND", ErrorKind::Network),
    ("EAI_AGAIN", ErrorKind::Network),
    ("EHOSTUNREACH", ErrorKind::Network),
    ("ENETUNREACH", ErrorKind::Network),
    ("EPIPE", ErrorKind::Network),
    ("ENOMEM", ErrorKind::Critical),
    ("EMFILE", ErrorKind::System),
    ("ENOSPC", ErrorKind::System),
    ("EACCES", ErrorKind::Configuration),
];

const MESSAGE_SIGNATURES: &[(&str, ErrorKind)] = &[
    ("timed out", ErrorKind::Timeout),
    ("timeout", ErrorKind::Timeout),
    ("deadline", ErrorKind::Timeout),
    ("connection refused", ErrorKind::Network),
    ("connection reset", ErrorKind::Network),
    ("broken pipe", ErrorKind::Network),
    ("dns", ErrorKind::Network),
    ("unreachable", ErrorKind::Network),
    ("network", ErrorKind::Network),
    ("too many requests", ErrorKind::RateLimited),
    ("rate limit", ErrorKind::RateLimited),
    ("quota", ErrorKind::RateLimited),
    ("redis", ErrorKind::Cache),
    ("cache", ErrorKind::Cache),
    ("service unavailable", ErrorKind::ExternalService),
    ("bad gateway", ErrorKind::ExternalService),
    ("upstream", ErrorKind::ExternalService),
    ("not found", ErrorKind::NotFound),
    ("unknown command", ErrorKind::NotFound),
    ("invalid", ErrorKind::Validation),
    ("malformed", ErrorKind::Validation),
    ("missing required", ErrorKind::Validation),
    ("out of memory", ErrorKind::Critical),
    ("panicked", ErrorKind::Critical),
    ("corrupt", ErrorKind::Critical),
    ("configuration", ErrorKind::Configuration),
    ("permission denied", ErrorKind::Configuration),
];

fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        408 | 504 => Some(ErrorKind::Timeout),
        429 => Some(ErrorKind::RateLimited),
        404 | 410 => Some(ErrorKind::NotFound),
        401 | 403 => Some(ErrorKind::Configuration),
        400..=499 => Some(ErrorKind::Validation),
        500..=599 => Some(ErrorKind::ExternalService),
        _ => None,
    }
}

pub fn classify(raw: &RawError) -> Classification {
    if let Some(kind) = raw.kind_hint {
        return with_status_severity(Classification::of(kind), raw.status);
    }

    if let Some(code) = raw.code.as_deref() {
        let upper = code.to_ascii_uppercase();
        if let Some((_, kind)) = CODE_SIGNATURES.iter().find(|(sig, _)| upper == *sig) {
            return Classification::of(*kind);
        }
        if let Some(kind) = ErrorKind::ALL.iter().find(|k| k.code() == upper) {
            return Classification::of(*kind);
        }
    }

    if let Some(kind) = raw.status.and_then(kind_for_status) {
        return with_status_severity(Classification::of(kind), raw.status);
    }

    let message = raw.message.to_lowercase();
    if let Some((_, kind)) = MESSAGE_SIGNATURES.iter().find(|(sig, _)| message.contains(sig)) {
        return Classification::of(*kind);
    }

    Classification {
        kind: ErrorKind::System,
        severity: Severity::High,
        recoverable: false,
    }
}

/// Server-side 5xx failures are HIGH even when the kind defaults lower
fn with_status_severity(mut c: Classification, status: Option<u16>) -> Classification {
    if matches!(status, Some(500..=599)) && c.severity < Severity::High {
        c.severity = Severity::High;
    }
    c
}
