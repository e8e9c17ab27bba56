//! Resilience manager: error classification, circuit breakers and recovery strategies.
//!
//! Every failure that leaves the engine goes through [`ResilienceManager::handle`],
//! which turns it into a structured [`RecoveryResult`]. [`ResilienceManager::execute`]
//! wraps an operation with breaker checks and scheduled retries. Breakers are shared
//! per operation, while each `execute` call owns its retry budget.

pub mod backoff;
pub mod circuit;
pub mod classify;
pub mod fallback;
pub mod registry;

pub use backoff::{Attempt, AttemptTracker, RetryPolicy};
pub use circuit::{CircuitBreaker, CircuitState};
pub use classify::{classify, is_recoverable, Classification};
pub use fallback::{lkg_key, FallbackHandler, LastKnownGood, StaticFallback, LKG_PREFIX};
pub use registry::{BreakerRegistry, CircuitSnapshot};

use crate::config::ResilienceConfig;
use conductor_shared::{
    DebugDetail, ErrorKind, FailureReport, RawError, RecoveryOutcome, RecoveryStrategy, Severity,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Where a failure happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// Error-class key: breakers and retry counters are tracked per operation
    pub operation: String,
    pub request_id: Option<String>,
    /// Cache key served by the last-known-good fallback
    pub fallback_key: Option<String>,
    /// Include raw internals in the report
    pub debug: bool,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            request_id: None,
            fallback_key: None,
            debug: false,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_fallback_key(mut self, key: impl Into<String>) -> Self {
        self.fallback_key = Some(key.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Structured outcome of handling one failure
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryResult {
    /// Fallback or degradation produced something usable
    pub success: bool,
    pub data: Option<Value>,
    pub stale: bool,
    pub degraded: bool,
    pub report: FailureReport,
    /// Set when the caller should retry after this delay
    pub retry_in: Option<Duration>,
}

impl RecoveryResult {
    fn failed(report: FailureReport) -> Self {
        Self {
            success: false,
            data: None,
            stale: false,
            degraded: false,
            report,
            retry_in: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.report.kind
    }

    pub fn strategy(&self) -> Option<RecoveryStrategy> {
        self.report.strategy
    }
}

/// Strategy for a classified failure given the breaker state of its class
pub fn choose_strategy(classification: &Classification, circuit: CircuitState) -> RecoveryStrategy {
    if !classification.recoverable {
        return RecoveryStrategy::FailFast;
    }
    if circuit == CircuitState::Open {
        return RecoveryStrategy::CircuitBreaker;
    }
    match classification.kind {
        ErrorKind::Timeout | ErrorKind::Network | ErrorKind::ExternalService => {
            RecoveryStrategy::Retry
        }
        ErrorKind::RateLimited => RecoveryStrategy::GracefulDegradation,
        ErrorKind::Cache => RecoveryStrategy::Fallback,
        _ => RecoveryStrategy::FailFast,
    }
}

fn user_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "The request was not valid.",
        ErrorKind::SecurityThreat => "The request was blocked for security reasons.",
        ErrorKind::NotFound => "The requested command was not found.",
        ErrorKind::RateLimited => "Too many requests. Please slow down.",
        ErrorKind::InProgress => "This command is already running.",
        ErrorKind::Timeout => "The operation took too long to complete.",
        ErrorKind::Network => "A network problem prevented the operation.",
        ErrorKind::ExternalService => "An upstream service is not responding correctly.",
        ErrorKind::Cache => "Cached data is temporarily unavailable.",
        ErrorKind::Configuration => "The service is misconfigured.",
        ErrorKind::System => "An internal error occurred.",
        ErrorKind::Critical => "A critical internal error occurred.",
    }
}

fn suggestions(kind: ErrorKind, strategy: RecoveryStrategy) -> Vec<String> {
    let mut out: Vec<String> = match kind {
        ErrorKind::Validation => vec!["Check the command parameters and try again".into()],
        ErrorKind::NotFound => vec!["Use /help to list available commands".into()],
        ErrorKind::RateLimited => vec!["Wait a moment before sending more requests".into()],
        ErrorKind::InProgress => vec!["Wait for the running command to finish".into()],
        ErrorKind::Timeout | ErrorKind::Network | ErrorKind::ExternalService => {
            vec!["Try again in a few moments".into()]
        }
        ErrorKind::Cache => vec!["Results may be out of date".into()],
        ErrorKind::Configuration => vec!["Contact the service operator".into()],
        ErrorKind::System | ErrorKind::Critical | ErrorKind::SecurityThreat => {
            vec!["Contact support if the problem persists".into()]
        }
    };
    if strategy == RecoveryStrategy::CircuitBreaker {
        out.insert(0, "The service is recovering; retry after the cool-down".into());
    }
    out
}

pub struct ResilienceManager {
    config: ResilienceConfig,
    policy: RetryPolicy,
    breakers: BreakerRegistry,
    attempts: AttemptTracker,
    fallbacks: RwLock<HashMap<ErrorKind, Arc<dyn FallbackHandler>>>,
}

impl ResilienceManager {
    pub fn new(config: &ResilienceConfig) -> Self {
        Self {
            policy: RetryPolicy {
                base: Duration::from_millis(config.retry_base_ms),
                multiplier: config.retry_multiplier,
                cap: Duration::from_millis(config.retry_cap_ms),
                max_attempts: config.max_attempts,
            },
            breakers: BreakerRegistry::new(
                config.failure_threshold,
                config.reset_timeout(),
                config.half_open_successes,
            ),
            attempts: AttemptTracker::default(),
            fallbacks: RwLock::new(HashMap::new()),
            config: config.clone(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Register the fallback used when a failure of `kind` selects FALLBACK
    pub fn register_fallback(&self, kind: ErrorKind, handler: Arc<dyn FallbackHandler>) {
        let mut fallbacks = self.fallbacks.write().unwrap_or_else(|e| e.into_inner());
        fallbacks.insert(kind, handler);
    }

    fn fallback_for(&self, kind: ErrorKind) -> Option<Arc<dyn FallbackHandler>> {
        let fallbacks = self.fallbacks.read().unwrap_or_else(|e| e.into_inner());
        fallbacks.get(&kind).cloned()
    }

    pub fn circuit_state(&self, operation: &str) -> CircuitState {
        self.breakers.state(operation)
    }

    pub fn circuit_snapshot(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshot()
    }

    pub fn attempts(&self, kind: ErrorKind, operation: &str) -> u32 {
        self.attempts.count(kind, operation)
    }

    /// Classify a failure, update its breaker and apply the chosen strategy.
    /// Retry counters persist across calls for the same (kind, operation).
    pub async fn handle(&self, raw: &RawError, ctx: &OperationContext) -> RecoveryResult {
        self.respond(raw, ctx, &self.attempts).await
    }

    /// Like [`handle`](Self::handle) for a failure outside any retry loop.
    /// No retry counter survives the call.
    pub async fn handle_once(&self, raw: &RawError, ctx: &OperationContext) -> RecoveryResult {
        self.respond(raw, ctx, &AttemptTracker::default()).await
    }

    async fn respond(
        &self,
        raw: &RawError,
        ctx: &OperationContext,
        attempts: &AttemptTracker,
    ) -> RecoveryResult {
        let classification = classify(raw);
        let kind = classification.kind;

        if classification.severity.trips_breaker() {
            self.breakers.record_failure(&ctx.operation);
        }
        self.log_failure(raw, &classification, ctx);

        let strategy = choose_strategy(&classification, self.breakers.state(&ctx.operation));
        let report = FailureReport::new(kind, user_message(kind))
            .with_severity(classification.severity)
            .with_suggestions(suggestions(kind, strategy));
        let mut report = FailureReport {
            recoverable: classification.recoverable,
            ..report
        };
        if self.config.debug || ctx.debug {
            report.debug = Some(DebugDetail {
                raw_message: raw.message.clone(),
                code: raw.code.clone(),
                status: raw.status,
                operation: Some(ctx.operation.clone()),
            });
        }

        match strategy {
            RecoveryStrategy::Retry => match attempts.next(&self.policy, kind, &ctx.operation) {
                Attempt::Retry { attempt, delay } => {
                    debug!(
                        "Retry {} of {} scheduled in {:?}",
                        attempt, ctx.operation, delay
                    );
                    let mut result = RecoveryResult::failed(report.with_recovery(
                        strategy,
                        RecoveryOutcome::RetryScheduled {
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        },
                    ));
                    result.retry_in = Some(delay);
                    result
                }
                Attempt::Exhausted { attempts } => {
                    warn!("Retries exhausted for {} after {} attempts", ctx.operation, attempts);
                    RecoveryResult::failed(
                        report.with_recovery(strategy, RecoveryOutcome::AttemptsExhausted { attempts }),
                    )
                }
            },
            RecoveryStrategy::Fallback => {
                let served = match self.fallback_for(kind) {
                    Some(handler) => handler.fallback(ctx).await,
                    None => None,
                };
                match served {
                    Some(data) => RecoveryResult {
                        success: true,
                        data: Some(data),
                        stale: true,
                        degraded: false,
                        report: report
                            .with_recovery(strategy, RecoveryOutcome::FallbackServed { stale: true }),
                        retry_in: None,
                    },
                    None => RecoveryResult::failed(
                        report.with_recovery(strategy, RecoveryOutcome::FallbackUnavailable),
                    ),
                }
            }
            RecoveryStrategy::CircuitBreaker => {
                let retry_after_ms = self
                    .circuit_snapshot()
                    .into_iter()
                    .find(|s| s.key == ctx.operation)
                    .and_then(|s| s.retry_after_ms)
                    .unwrap_or(0);
                RecoveryResult::failed(
                    report.with_recovery(strategy, RecoveryOutcome::ShortCircuited { retry_after_ms }),
                )
            }
            RecoveryStrategy::GracefulDegradation => {
                let message = report.user_facing_message.clone();
                RecoveryResult {
                    success: true,
                    data: Some(json!({
                        "degraded": true,
                        "operation": ctx.operation,
                        "message": message,
                    })),
                    stale: false,
                    degraded: true,
                    report: report.with_recovery(strategy, RecoveryOutcome::Degraded),
                    retry_in: None,
                }
            }
            RecoveryStrategy::FailFast => {
                RecoveryResult::failed(report.with_recovery(strategy, RecoveryOutcome::FailedFast))
            }
        }
    }

    /// Result for a call rejected by an open circuit; nothing is attempted
    fn short_circuit(&self, ctx: &OperationContext, retry_after: Duration) -> RecoveryResult {
        debug!("Circuit open for {}, call rejected", ctx.operation);
        let kind = ErrorKind::ExternalService;
        let strategy = RecoveryStrategy::CircuitBreaker;
        let report = FailureReport::new(kind, "The service is temporarily unavailable.")
            .with_severity(Severity::High)
            .with_suggestions(suggestions(kind, strategy))
            .with_recovery(
                strategy,
                RecoveryOutcome::ShortCircuited {
                    retry_after_ms: retry_after.as_millis() as u64,
                },
            );
        RecoveryResult::failed(FailureReport {
            recoverable: true,
            ..report
        })
    }

    /// Run `op` under the breaker of `ctx.operation`, sleeping between scheduled retries.
    /// Concurrent calls for the same operation never share retry counters.
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &OperationContext,
        mut op: F,
    ) -> std::result::Result<T, RecoveryResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawError>,
    {
        let attempts = AttemptTracker::default();
        loop {
            if let Err(retry_after) = self.breakers.allow(&ctx.operation) {
                return Err(self.short_circuit(ctx, retry_after));
            }

            match op().await {
                Ok(value) => {
                    self.breakers.record_success(&ctx.operation);
                    return Ok(value);
                }
                Err(e) => {
                    let result = self.respond(&e.into(), ctx, &attempts).await;
                    match result.retry_in {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Err(result),
                    }
                }
            }
        }
    }

    fn log_failure(&self, raw: &RawError, c: &Classification, ctx: &OperationContext) {
        let request_id = ctx.request_id.as_deref().unwrap_or("-");
        let highest = c.severity == Severity::Critical
            || matches!(c.kind, ErrorKind::System | ErrorKind::Critical);
        match c.severity {
            _ if highest => error!(
                operation = %ctx.operation,
                request_id = %request_id,
                kind = %c.kind,
                "Critical failure: {}",
                raw
            ),
            Severity::High => warn!(
                operation = %ctx.operation,
                request_id = %request_id,
                kind = %c.kind,
                "Operation failed: {}",
                raw
            ),
            _ => debug!(
                operation = %ctx.operation,
                request_id = %request_id,
                kind = %c.kind,
                "Operation failed: {}",
                raw
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_shared::DispatchError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_attempts: u32, failure_threshold: u32) -> ResilienceConfig {
        ResilienceConfig {
            retry_base_ms: 1,
            retry_multiplier: 2.0,
            retry_cap_ms: 4,
            max_attempts,
            failure_threshold,
            reset_timeout_ms: 60_000,
            half_open_successes: 1,
            debug: false,
        }
    }

    fn upstream() -> RawError {
        RawError::new("upstream said no")
            .with_status(503)
            .with_kind(ErrorKind::ExternalService)
    }

    #[test]
    fn test_strategy_table() {
        let c = |kind| Classification {
            kind,
            severity: Severity::High,
            recoverable: is_recoverable(kind),
        };
        let closed = CircuitState::Closed;
        assert_eq!(choose_strategy(&c(ErrorKind::Timeout), closed), RecoveryStrategy::Retry);
        assert_eq!(choose_strategy(&c(ErrorKind::Cache), closed), RecoveryStrategy::Fallback);
        assert_eq!(
            choose_strategy(&c(ErrorKind::RateLimited), closed),
            RecoveryStrategy::GracefulDegradation
        );
        assert_eq!(choose_strategy(&c(ErrorKind::NotFound), closed), RecoveryStrategy::FailFast);
        assert_eq!(
            choose_strategy(&c(ErrorKind::Network), CircuitState::Open),
            RecoveryStrategy::CircuitBreaker
        );
        // non-recoverable wins over an open circuit
        assert_eq!(
            choose_strategy(&c(ErrorKind::Critical), CircuitState::Open),
            RecoveryStrategy::FailFast
        );
    }

    #[tokio::test]
    async fn test_retry_then_exhausted() {
        let manager = ResilienceManager::new(&config(2, 100));
        let ctx = OperationContext::new("op");

        let first = manager.handle(&upstream(), &ctx).await;
        assert_eq!(
            first.report.recovery_outcome,
            Some(RecoveryOutcome::RetryScheduled { attempt: 1, delay_ms: 1 })
        );
        let second = manager.handle(&upstream(), &ctx).await;
        assert_eq!(second.retry_in, Some(Duration::from_millis(2)));

        let third = manager.handle(&upstream(), &ctx).await;
        assert_eq!(
            third.report.recovery_outcome,
            Some(RecoveryOutcome::AttemptsExhausted { attempts: 2 })
        );
        assert!(third.retry_in.is_none());
        assert_eq!(manager.attempts(ErrorKind::ExternalService, "op"), 0);
    }

    #[tokio::test]
    async fn test_execute_retries_until_success() {
        let manager = ResilienceManager::new(&config(3, 100));
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = manager
            .execute(&OperationContext::new("flaky"), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DispatchError::Network("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.ok(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.attempts(ErrorKind::Network, "flaky"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_executions_keep_their_own_budget() {
        let manager = ResilienceManager::new(&config(3, 100));
        let ctx = OperationContext::new("handler:search");
        let (a, b) = (AtomicU32::new(0), AtomicU32::new(0));

        async fn failing(
            manager: &ResilienceManager,
            ctx: &OperationContext,
            calls: &AtomicU32,
        ) -> std::result::Result<(), RecoveryResult> {
            manager
                .execute(ctx, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Err(DispatchError::Network("reset".into()))
                })
                .await
        }
        let (first, second) = tokio::join!(
            failing(&manager, &ctx, &a),
            failing(&manager, &ctx, &b)
        );

        for result in [first, second] {
            assert_eq!(
                result.unwrap_err().report.recovery_outcome,
                Some(RecoveryOutcome::AttemptsExhausted { attempts: 3 })
            );
        }
        assert_eq!(a.load(Ordering::SeqCst), 4);
        assert_eq!(b.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_execute_leaves_handle_counters_alone() {
        let manager = ResilienceManager::new(&config(3, 100));
        let ctx = OperationContext::new("op");
        manager.handle(&upstream(), &ctx).await;

        let result = manager.execute(&ctx, || async { Ok::<_, RawError>(1) }).await;
        assert_eq!(result.ok(), Some(1));
        assert_eq!(manager.attempts(ErrorKind::ExternalService, "op"), 1);
    }

    #[tokio::test]
    async fn test_handle_once_keeps_no_counter() {
        let manager = ResilienceManager::new(&config(3, 100));
        let ctx = OperationContext::new("catalog_fetch");
        let raw = DispatchError::Network("catalog unreachable".into()).to_raw();

        for _ in 0..5 {
            let result = manager.handle_once(&raw, &ctx).await;
            assert_eq!(
                result.report.recovery_outcome,
                Some(RecoveryOutcome::RetryScheduled { attempt: 1, delay_ms: 1 })
            );
        }
        assert_eq!(manager.attempts(ErrorKind::Network, "catalog_fetch"), 0);
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits_without_attempt() {
        let manager = ResilienceManager::new(&config(0, 5));
        let ctx = OperationContext::new("catalog_fetch");
        let calls = AtomicU32::new(0);
        let calls = &calls;

        for _ in 0..5 {
            let result: std::result::Result<(), _> = manager
                .execute(&ctx, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(upstream())
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(manager.circuit_state("catalog_fetch"), CircuitState::Open);

        let sixth: std::result::Result<(), _> = manager
            .execute(&ctx, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(upstream())
            })
            .await;
        let sixth = sixth.unwrap_err();
        assert_eq!(sixth.strategy(), Some(RecoveryStrategy::CircuitBreaker));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_low_severity_never_opens_circuit() {
        let manager = ResilienceManager::new(&config(0, 2));
        let ctx = OperationContext::new("lookups");
        for _ in 0..10 {
            manager
                .handle(&DispatchError::NotFound("/x".into()).to_raw(), &ctx)
                .await;
        }
        assert_eq!(manager.circuit_state("lookups"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_fallback_serves_stale_payload() {
        let manager = ResilienceManager::new(&config(0, 100));
        let ctx = OperationContext::new("handler:weather");
        let raw = RawError::new("cache backend down").with_kind(ErrorKind::Cache);

        let missing = manager.handle(&raw, &ctx).await;
        assert_eq!(
            missing.report.recovery_outcome,
            Some(RecoveryOutcome::FallbackUnavailable)
        );

        manager.register_fallback(ErrorKind::Cache, Arc::new(StaticFallback(json!({"temp": 20}))));
        let served = manager.handle(&raw, &ctx).await;
        assert!(served.success);
        assert!(served.stale);
        assert_eq!(served.data, Some(json!({"temp": 20})));
    }

    #[tokio::test]
    async fn test_rate_limit_degrades() {
        let manager = ResilienceManager::new(&config(0, 100));
        let raw = RawError::new("slow down").with_status(429);
        let result = manager.handle(&raw, &OperationContext::new("handler:search")).await;
        assert!(result.success);
        assert!(result.degraded);
        assert_eq!(result.data.as_ref().unwrap()["degraded"], json!(true));
    }

    #[tokio::test]
    async fn test_debug_detail_only_when_requested() {
        let manager = ResilienceManager::new(&config(0, 100));
        let raw = RawError::new("secret stack trace");

        let plain = manager.handle(&raw, &OperationContext::new("op")).await;
        assert!(plain.report.debug.is_none());
        assert!(!plain.report.user_facing_message.contains("secret"));

        let verbose = manager
            .handle(&raw, &OperationContext::new("op").with_debug(true))
            .await;
        assert_eq!(verbose.report.debug.unwrap().raw_message, "secret stack trace");
    }
}
