//! Wire contract tests: what transports send and receive must stay stable.

use conductor_shared::{
    CallerRole, DispatchError, DispatchRequest, DispatchResponse, DispatchStatus, ErrorKind,
    FailureReport, RecoveryOutcome, RecoveryStrategy, Severity,
};
use serde_json::json;

#[test]
fn test_minimal_request_fills_defaults() {
    let req: DispatchRequest = serde_json::from_value(json!({"command": "/help"})).unwrap();
    assert_eq!(req.command, "/help");
    assert!(req.parameters.is_null());
    assert_eq!(req.context.caller_id, "anonymous");
    assert_eq!(req.context.role, CallerRole::Guest);
    assert!(!req.context.debug);
}

#[test]
fn test_request_context_roles() {
    let req: DispatchRequest = serde_json::from_value(json!({
        "command": "/deploy",
        "parameters": {"env": "staging"},
        "context": {"caller_id": "ci", "role": "service", "urgent": true}
    }))
    .unwrap();
    assert_eq!(req.context.role, CallerRole::Service);
    assert!(req.context.urgent);
    assert_eq!(req.parameters["env"], "staging");
}

#[test]
fn test_error_codes_are_unique() {
    let mut codes: Vec<&str> = ErrorKind::ALL.iter().map(|k| k.code()).collect();
    codes.sort();
    codes.dedup();
    assert_eq!(codes.len(), ErrorKind::ALL.len());
    assert!(codes.iter().all(|c| c.starts_with("ERR_")));
}

#[test]
fn test_terminal_kinds() {
    assert!(ErrorKind::NotFound.is_terminal());
    assert!(ErrorKind::InProgress.is_terminal());
    assert!(!ErrorKind::Timeout.is_terminal());
    assert!(!ErrorKind::ExternalService.is_terminal());
}

#[test]
fn test_only_high_severity_trips_breakers() {
    assert!(!Severity::Low.trips_breaker());
    assert!(!Severity::Medium.trips_breaker());
    assert!(Severity::High.trips_breaker());
    assert!(Severity::Critical.trips_breaker());
}

#[test]
fn test_not_available_keeps_its_code() {
    let err = DispatchError::NotAvailable("catalog not loaded".to_string());
    assert_eq!(err.kind(), ErrorKind::ExternalService);
    assert_eq!(err.code(), "ERR_NOT_AVAILABLE");

    let raw = err.to_raw();
    assert_eq!(raw.kind_hint, Some(ErrorKind::ExternalService));
    assert_eq!(raw.code.as_deref(), Some("ERR_NOT_AVAILABLE"));
}

#[test]
fn test_failure_response_shape() {
    let report = FailureReport::new(ErrorKind::ExternalService, "Upstream is down")
        .with_severity(Severity::High)
        .with_suggestions(vec!["Try again shortly".to_string()])
        .with_recovery(
            RecoveryStrategy::CircuitBreaker,
            RecoveryOutcome::ShortCircuited { retry_after_ms: 900 },
        );
    let response = DispatchResponse::failure("req-9", DispatchStatus::Failed, report);
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["success"], false);
    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["error"]["code"], "ERR_EXTERNAL_SERVICE");
    assert_eq!(json["error"]["kind"], "EXTERNAL_SERVICE");
    assert_eq!(json["error"]["severity"], "HIGH");
    assert_eq!(json["error"]["strategy"], "CIRCUIT_BREAKER");
    assert_eq!(json["error"]["recovery_outcome"]["outcome"], "short_circuited");
    assert_eq!(json["error"]["recovery_outcome"]["retry_after_ms"], 900);
    assert!(json["error"].get("debug").is_none());
    assert!(json.get("data").is_none());

    let back: DispatchResponse = serde_json::from_value(json).unwrap();
    assert_eq!(back, response);
}
