//! Lifecycle hooks, invoked synchronously in registration order.

use super::stats::ExecutionRecord;
use crate::handlers::Invocation;
use conductor_shared::FailureReport;
use serde_json::Value;
use tracing::debug;

/// Extension points around handler execution. All methods default to no-ops.
pub trait DispatchHook: Send + Sync {
    fn name(&self) -> &str;

    fn before_execute(&self, _invocation: &Invocation) {}

    fn on_success(&self, _invocation: &Invocation, _data: &Value) {}

    fn on_error(&self, _command: &str, _report: &FailureReport) {}

    /// Called once per dispatch, whatever the outcome
    fn after_execute(&self, _record: &ExecutionRecord) {}
}

/// Logs every completed dispatch at debug level
pub struct TracingHook;

impl DispatchHook for TracingHook {
    fn name(&self) -> &str {
        "tracing"
    }

    fn after_execute(&self, record: &ExecutionRecord) {
        debug!(
            request_id = %record.request_id,
            command = %record.command,
            status = ?record.status,
            duration_ms = record.duration_ms,
            "Dispatch finished"
        );
    }
}
