//! Dispatcher: the request lifecycle.
//!
//! normalize -> in-flight guard -> security gate -> catalog resolve -> decide
//! -> optional catalog refresh -> result cache -> handler under resilience.
//! Every exit path records an execution and releases the in-flight marker.

mod builder;
pub mod hooks;
pub mod inflight;
pub mod stats;

pub use builder::DispatcherBuilder;
pub use hooks::{DispatchHook, TracingHook};
pub use inflight::{InFlightGuard, InFlightSet};
pub use stats::{ExecutionLog, ExecutionRecord, ExecutionStats};

use crate::cache::CacheStore;
use crate::catalog::CommandCatalog;
use crate::config::DispatchConfig;
use crate::decision::{result_key_prefix, DecisionEngine};
use crate::handlers::{HandlerRegistry, Invocation};
use crate::resilience::{lkg_key, OperationContext, RecoveryResult, ResilienceManager};
use crate::security::{SecurityGate, ValidationOutcome};
use chrono::Utc;
use conductor_shared::{
    DispatchError, DispatchRequest, DispatchResponse, DispatchStatus, ErrorKind, FailureReport,
    ProcessingStrategy, RawError, RecoveryOutcome, RecoveryStrategy, RoutingPlan,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Error class of catalog loads and refreshes
pub const CATALOG_OPERATION: &str = "catalog_fetch";

/// How long last-known-good copies are kept
const LKG_TTL: Duration = Duration::from_secs(24 * 3600);

/// Error class of a command's handler
pub fn handler_operation(command: &str) -> String {
    format!("handler:{}", command)
}

/// Result cache key: command plus a digest of its parameters
pub fn result_key(command: &str, parameters: &Value) -> String {
    let digest = Sha256::digest(parameters.to_string().as_bytes());
    format!("{}{}", result_key_prefix(command), hex::encode(&digest[..16]))
}

/// Per-call options supplied by the transport
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Overall deadline; the configured default applies when unset
    pub deadline: Option<Duration>,
    /// Refresh the catalog before executing, stale or not
    pub force_refresh: bool,
    /// Skip the result cache lookup
    pub bypass_cache: bool,
}

impl DispatchOptions {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

fn status_for(kind: ErrorKind) -> DispatchStatus {
    match kind {
        ErrorKind::NotFound => DispatchStatus::NotFound,
        ErrorKind::RateLimited => DispatchStatus::RateLimited,
        ErrorKind::SecurityThreat => DispatchStatus::Blocked,
        ErrorKind::InProgress => DispatchStatus::InProgress,
        _ => DispatchStatus::Failed,
    }
}

/// Response for errors reported directly, without recovery
fn terminal(request_id: &str, kind: ErrorKind, message: String, suggestions: Vec<String>) -> DispatchResponse {
    let report = FailureReport::new(kind, message)
        .with_suggestions(suggestions)
        .with_recovery(RecoveryStrategy::FailFast, RecoveryOutcome::FailedFast);
    DispatchResponse::failure(request_id, status_for(kind), report)
}

fn recovery_response(request_id: &str, recovery: RecoveryResult) -> DispatchResponse {
    if recovery.success {
        let mut response = DispatchResponse::ok(request_id, recovery.data.unwrap_or(Value::Null));
        response.status = DispatchStatus::Degraded;
        response.stale = recovery.stale;
        response.degraded = recovery.degraded;
        response.error = Some(recovery.report);
        response
    } else {
        let status = status_for(recovery.report.kind);
        DispatchResponse::failure(request_id, status, recovery.report)
    }
}

fn blocked_response(request_id: &str, verdict: ValidationOutcome) -> DispatchResponse {
    let err = verdict.to_error();
    let kind = err.kind();
    let severity = verdict
        .highest_severity()
        .unwrap_or_else(|| kind.default_severity());
    let message = verdict.reason.clone().unwrap_or_else(|| err.to_string());
    let suggestion = if verdict.rate_limited {
        "Wait a moment before sending more requests"
    } else {
        "Remove markup, scripts or shell syntax from the request"
    };
    let report = FailureReport::new(kind, message)
        .with_severity(severity)
        .with_suggestions(vec![suggestion.to_string()])
        .with_recovery(RecoveryStrategy::FailFast, RecoveryOutcome::FailedFast);
    let status = if verdict.rate_limited {
        DispatchStatus::RateLimited
    } else {
        DispatchStatus::Blocked
    };
    let mut response = DispatchResponse::failure(request_id, status, report);
    response.findings = verdict.findings;
    response
}

pub struct Dispatcher {
    config: DispatchConfig,
    cache: Arc<CacheStore>,
    catalog: Arc<CommandCatalog>,
    security: Arc<SecurityGate>,
    decisions: Arc<DecisionEngine>,
    resilience: Arc<ResilienceManager>,
    handlers: HandlerRegistry,
    hooks: Vec<Arc<dyn DispatchHook>>,
    inflight: InFlightSet,
    permits: Semaphore,
    executions: ExecutionLog,
}

impl Dispatcher {
    pub fn builder(config: crate::config::DaemonConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn catalog(&self) -> &Arc<CommandCatalog> {
        &self.catalog
    }

    pub fn security(&self) -> &Arc<SecurityGate> {
        &self.security
    }

    pub fn decisions(&self) -> &Arc<DecisionEngine> {
        &self.decisions
    }

    pub fn resilience(&self) -> &Arc<ResilienceManager> {
        &self.resilience
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_in_flight(&self, command: &str) -> bool {
        self.inflight.contains(&self.catalog.canonical_name(command))
    }

    pub fn stats(&self) -> ExecutionStats {
        self.executions.stats(self.inflight.len())
    }

    /// Most recent executions, newest last
    pub fn recent(&self, n: usize) -> Vec<ExecutionRecord> {
        self.executions.recent(n)
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse {
        self.process_command(request, DispatchOptions::default()).await
    }

    /// Run one request through the full lifecycle
    pub async fn process_command(
        &self,
        request: DispatchRequest,
        options: DispatchOptions,
    ) -> DispatchResponse {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let command = self.catalog.canonical_name(&request.command);

        let mut response = if command.is_empty() {
            terminal(
                &request_id,
                ErrorKind::Validation,
                "No command given".to_string(),
                vec![format!("Try {}help", self.catalog.prefix())],
            )
        } else {
            match self.inflight.try_acquire(&command) {
                None => {
                    debug!(command = %command, "Duplicate request while in flight");
                    terminal(
                        &request_id,
                        ErrorKind::InProgress,
                        format!("{}{} is already running", self.catalog.prefix(), command),
                        vec!["Wait for the running command to finish".to_string()],
                    )
                }
                Some(_guard) => {
                    let deadline = options
                        .deadline
                        .unwrap_or(Duration::from_millis(self.config.default_deadline_ms));
                    match tokio::time::timeout(
                        deadline,
                        self.run(&request_id, &command, &request, &options),
                    )
                    .await
                    {
                        Ok(response) => response,
                        Err(_) => {
                            warn!(
                                request_id = %request_id,
                                command = %command,
                                "Deadline of {:?} exceeded",
                                deadline
                            );
                            let report = FailureReport::new(
                                ErrorKind::Timeout,
                                "The request did not complete before its deadline.",
                            )
                            .with_suggestions(vec!["Try again with a longer deadline".to_string()])
                            .with_recovery(
                                RecoveryStrategy::FailFast,
                                RecoveryOutcome::DeadlineExceeded,
                            );
                            DispatchResponse::failure(&request_id, DispatchStatus::Failed, report)
                        }
                    }
                }
            }
        };

        response.processing_time_ms = started.elapsed().as_millis() as u64;
        self.finish(&command, &request, &response);
        response
    }

    async fn run(
        &self,
        request_id: &str,
        command: &str,
        request: &DispatchRequest,
        options: &DispatchOptions,
    ) -> DispatchResponse {
        let ctx = &request.context;

        let verdict = self
            .security
            .validate_request(&request.command, &request.parameters, ctx);
        if verdict.blocked {
            info!(
                request_id = %request_id,
                command = %command,
                caller = %ctx.caller_id,
                "Request blocked: {}",
                verdict.reason.as_deref().unwrap_or("threat detected")
            );
            return blocked_response(request_id, verdict);
        }
        let parameters = verdict
            .sanitized
            .get("parameters")
            .cloned()
            .unwrap_or(Value::Null);

        let catalog_ctx = OperationContext::new(CATALOG_OPERATION)
            .with_request_id(request_id)
            .with_debug(ctx.debug);
        let catalog = &self.catalog;
        if let Err(recovery) = self
            .resilience
            .execute(&catalog_ctx, move || catalog.ensure_loaded())
            .await
        {
            return recovery_response(request_id, recovery);
        }

        let definition = match self.catalog.resolve(command) {
            Ok(def) => def,
            Err(DispatchError::NotFound(name)) => {
                let suggestions = self
                    .catalog
                    .suggest_display(command, self.catalog.suggestion_limit());
                return terminal(
                    request_id,
                    ErrorKind::NotFound,
                    format!("Unknown command: {}", name),
                    suggestions,
                );
            }
            Err(e) => {
                let recovery = self.resilience.handle_once(&e.to_raw(), &catalog_ctx).await;
                return recovery_response(request_id, recovery);
            }
        };

        let missing: Vec<&str> = definition
            .required_parameters()
            .into_iter()
            .filter(|p| parameters.get(*p).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            let mut suggestions = Vec::new();
            if !definition.usage.is_empty() {
                suggestions.push(format!("Usage: {}", definition.usage));
            }
            return terminal(
                request_id,
                ErrorKind::Validation,
                format!("Missing required parameter(s): {}", missing.join(", ")),
                suggestions,
            );
        }

        let name = definition.name.clone();
        let key = result_key(&name, &parameters);
        let decision = self
            .decisions
            .decide_with(&name, ctx, Some(&definition), Some(&key))
            .await;

        if decision.plan.requires_external_data
            && (options.force_refresh || self.catalog.is_stale().await)
        {
            if let Err(recovery) = self
                .resilience
                .execute(&catalog_ctx, move || catalog.refresh())
                .await
            {
                warn!(
                    "Catalog refresh failed, using current snapshot: {}",
                    recovery.report.user_facing_message
                );
            }
        }

        if decision.plan.use_cache && !options.bypass_cache {
            if let Some(data) = self.cache.get(&key).await {
                debug!(request_id = %request_id, command = %name, "Serving cached result");
                let mut response = DispatchResponse::ok(request_id, data);
                response.from_cache = true;
                response.decision = Some(decision);
                return response;
            }
        }

        let Some(entry) = self.handlers.lookup(&name).cloned() else {
            let mut response = terminal(
                request_id,
                ErrorKind::Configuration,
                format!("No handler registered for {}{}", self.catalog.prefix(), name),
                vec!["Contact the service operator".to_string()],
            );
            response.decision = Some(decision);
            return response;
        };

        let invocation = Invocation {
            request_id: request_id.to_string(),
            command: name.clone(),
            definition,
            parameters,
            context: ctx.clone(),
            plan: decision.plan.clone(),
        };
        for hook in &self.hooks {
            hook.before_execute(&invocation);
        }

        let Ok(_permit) = self.permits.acquire().await else {
            let mut response = terminal(
                request_id,
                ErrorKind::System,
                "The dispatcher is shutting down".to_string(),
                Vec::new(),
            );
            response.decision = Some(decision);
            return response;
        };

        let timeout = self.handler_timeout(decision.plan.strategy);
        let operation = handler_operation(&name);
        let handler_ctx = OperationContext::new(operation)
            .with_request_id(request_id)
            .with_fallback_key(lkg_key(&key))
            .with_debug(ctx.debug);
        let started = Instant::now();
        let inv = &invocation;
        let entry = &entry;
        let result = self
            .resilience
            .execute(&handler_ctx, move || async move {
                match tokio::time::timeout(timeout, entry.run(inv)).await {
                    Ok(result) => result,
                    Err(_) => Err(RawError::new(format!(
                        "handler timed out after {}ms",
                        timeout.as_millis()
                    ))
                    .with_kind(ErrorKind::Timeout)),
                }
            })
            .await;
        let elapsed = started.elapsed();

        match result {
            Ok(data) => {
                self.decisions
                    .record_outcome(&decision.command_class, elapsed, true);
                self.store_result(&key, &data, &decision.plan).await;
                for hook in &self.hooks {
                    hook.on_success(&invocation, &data);
                }
                let mut response = DispatchResponse::ok(request_id, data);
                response.decision = Some(decision);
                response
            }
            Err(recovery) => {
                self.decisions
                    .record_outcome(&decision.command_class, elapsed, false);
                for hook in &self.hooks {
                    hook.on_error(&name, &recovery.report);
                }
                let mut response = recovery_response(request_id, recovery);
                response.decision = Some(decision);
                response
            }
        }
    }

    fn handler_timeout(&self, strategy: ProcessingStrategy) -> Duration {
        let millis = self.config.handler_timeout_ms as f64 * strategy.timeout_factor();
        Duration::from_millis(millis.max(1.0) as u64)
    }

    async fn store_result(&self, key: &str, data: &Value, plan: &RoutingPlan) {
        let Some(ttl) = plan.cache_strategy.result_ttl_secs() else {
            return;
        };
        self.cache.set(key, data, Some(Duration::from_secs(ttl))).await;
        self.cache.set(&lkg_key(key), data, Some(LKG_TTL)).await;
    }

    fn finish(&self, command: &str, request: &DispatchRequest, response: &DispatchResponse) {
        let record = ExecutionRecord {
            request_id: response.request_id.clone(),
            command: command.to_string(),
            caller_id: request.context.caller_id.clone(),
            status: response.status,
            success: response.success,
            duration_ms: response.processing_time_ms,
            from_cache: response.from_cache,
            strategy: response.decision.as_ref().map(|d| d.plan.strategy),
            error_kind: response.error_kind(),
            finished_at: Utc::now(),
        };
        for hook in &self.hooks {
            hook.after_execute(&record);
        }
        self.executions.record(record);
    }
}
