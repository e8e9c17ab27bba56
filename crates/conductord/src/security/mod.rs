//! Security gate: admission control in front of dispatch.
//!
//! Every request passes, in order: caller rate limit, repeat-offender check,
//! structural limits (size, null bytes, depth), category patterns, statistical
//! checks and polyglot detection. The blocking policy then decides on the
//! collected findings. Findings are tallied per caller so persistent probing
//! gets the caller blocked outright.

pub mod analysis;
pub mod patterns;
mod rate_limit;

pub use rate_limit::{RateDecision, SlidingWindow};

use crate::config::SecurityConfig;
use conductor_shared::{
    CallerContext, CallerRole, DispatchError, Severity, ThreatFinding, ThreatKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of validating one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub allowed: bool,
    pub blocked: bool,
    /// Input with matched spans redacted and markup escaped
    pub sanitized: Value,
    pub findings: Vec<ThreatFinding>,
    pub rate_limited: bool,
    /// Requests left in the caller's window
    pub remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationOutcome {
    fn allow(sanitized: Value, findings: Vec<ThreatFinding>, remaining: u32) -> Self {
        Self {
            allowed: true,
            blocked: false,
            sanitized,
            findings,
            rate_limited: false,
            remaining,
            reason: None,
        }
    }

    fn block(findings: Vec<ThreatFinding>, remaining: u32, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            blocked: true,
            sanitized: Value::Null,
            findings,
            rate_limited: false,
            remaining,
            reason: Some(reason.into()),
        }
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// Error to report for a blocked outcome
    pub fn to_error(&self) -> DispatchError {
        let reason = self
            .reason
            .clone()
            .unwrap_or_else(|| "input rejected".to_string());
        if self.rate_limited {
            DispatchError::RateLimited(reason)
        } else {
            DispatchError::SecurityThreat(reason)
        }
    }
}

/// Gate counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityStats {
    pub validated: u64,
    pub blocked: u64,
    pub rate_limited: u64,
    pub findings: u64,
}

#[derive(Default)]
struct Counters {
    validated: AtomicU64,
    blocked: AtomicU64,
    rate_limited: AtomicU64,
    findings: AtomicU64,
}

pub struct SecurityGate {
    config: SecurityConfig,
    requests: Mutex<SlidingWindow>,
    offenders: Mutex<SlidingWindow>,
    counters: Counters,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig) -> Self {
        let requests = SlidingWindow::new(Duration::from_secs(config.rate_limit_window_secs));
        let offenders = SlidingWindow::new(Duration::from_secs(config.offender_window_secs));
        Self {
            config,
            requests: Mutex::new(requests),
            offenders: Mutex::new(offenders),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Requests per window allowed for a role
    pub fn rate_limit_for(&self, role: CallerRole) -> u32 {
        let base = self.config.rate_limit_max;
        match role {
            CallerRole::Guest => (base / 2).max(1),
            CallerRole::User => base,
            CallerRole::Admin | CallerRole::Service => base.saturating_mul(2),
        }
    }

    /// Validate raw input on behalf of `ctx`
    pub fn validate(&self, input: &Value, ctx: &CallerContext) -> ValidationOutcome {
        self.validate_scoped(input, input, ctx)
    }

    /// Validate a dispatch request. Every string is scanned, but the depth
    /// limit applies to the caller's parameters only.
    pub fn validate_request(
        &self,
        command: &str,
        parameters: &Value,
        ctx: &CallerContext,
    ) -> ValidationOutcome {
        let input = json!({
            "command": command,
            "parameters": parameters,
        });
        self.validate_scoped(&input, parameters, ctx)
    }

    fn validate_scoped(&self, input: &Value, depth_root: &Value, ctx: &CallerContext) -> ValidationOutcome {
        self.counters.validated.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let caller = ctx.caller_id.as_str();

        let rate = self
            .requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .check(caller, self.rate_limit_for(ctx.role), now);
        if !rate.allowed {
            let retry = rate.retry_after.unwrap_or_default();
            let finding = ThreatFinding::new(
                ThreatKind::RateAbuse,
                format!("{} exceeded {} requests", caller, self.rate_limit_for(ctx.role)),
            );
            self.note_findings(caller, 1, 1, now);
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            let mut outcome = self.blocked(
                vec![finding],
                0,
                &format!("rate limit exceeded, retry in {}s", retry.as_secs().max(1)),
            );
            outcome.rate_limited = true;
            return outcome;
        }

        let prior = self
            .offenders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .count(caller, now);
        if prior > self.config.offender_threshold as usize {
            let finding = ThreatFinding::new(
                ThreatKind::RepeatOffender,
                format!("{} findings in window", prior),
            );
            return self.blocked(vec![finding], rate.remaining, "caller blocked after repeated findings");
        }

        let findings = self.inspect_scoped(input, depth_root);
        self.decide(input, findings, caller, rate.remaining, now)
    }

    /// Run structural, pattern and statistical checks
    pub fn inspect(&self, input: &Value) -> Vec<ThreatFinding> {
        self.inspect_scoped(input, input)
    }

    fn inspect_scoped(&self, input: &Value, depth_root: &Value) -> Vec<ThreatFinding> {
        let mut findings = Vec::new();

        let size = input.to_string().len();
        if size > self.config.max_input_bytes {
            findings.push(ThreatFinding::new(
                ThreatKind::OversizedInput,
                format!("{} bytes exceeds {}", size, self.config.max_input_bytes),
            ));
            // Not worth scanning further
            return findings;
        }

        let depth = analysis::depth(depth_root);
        if depth > self.config.max_depth {
            findings.push(ThreatFinding::new(
                ThreatKind::ExcessiveDepth,
                format!("depth {} exceeds {}", depth, self.config.max_depth),
            ));
        }

        let texts = analysis::strings(input);
        if texts.iter().any(|s| s.contains('\0')) {
            findings.push(ThreatFinding::new(ThreatKind::NullByte, "NUL in input"));
        }

        let mut seen: HashSet<(ThreatKind, String)> = HashSet::new();
        let mut push = |findings: &mut Vec<ThreatFinding>, finding: ThreatFinding| {
            if seen.insert((finding.kind, finding.evidence.clone())) {
                findings.push(finding);
            }
        };

        for text in &texts {
            for (kind, pattern) in patterns::THREAT_PATTERNS.iter() {
                if let Some(m) = pattern.find(text) {
                    push(&mut findings, ThreatFinding::new(*kind, m.as_str()));
                }
            }
            if let Some(m) = patterns::OBFUSCATION_PATTERNS
                .iter()
                .find_map(|re| re.find(text))
            {
                push(&mut findings, ThreatFinding::new(ThreatKind::Obfuscation, m.as_str()));
            }
            for finding in self.statistical(text) {
                push(&mut findings, finding);
            }
        }

        let joined = texts.join("\n");
        let contexts = patterns::contexts_in(&joined);
        if contexts.len() >= 2 {
            push(
                &mut findings,
                ThreatFinding::new(ThreatKind::Polyglot, contexts.join("+")),
            );
        }

        findings
    }

    fn statistical(&self, text: &str) -> Vec<ThreatFinding> {
        let mut findings = Vec::new();
        let len = text.chars().count();

        if len >= self.config.entropy_min_len {
            let entropy = analysis::shannon_entropy(text);
            // Identifiers and tokens are random by nature
            if entropy > self.config.entropy_high && !analysis::is_token_like(text) {
                findings.push(ThreatFinding::new(
                    ThreatKind::EncodedPayload,
                    format!("entropy {:.2} over {} chars", entropy, len),
                ));
            } else if len >= self.config.padding_min_len && entropy < self.config.entropy_low {
                findings.push(ThreatFinding::new(
                    ThreatKind::PaddingAttack,
                    format!("entropy {:.2} over {} chars", entropy, len),
                ));
            }
        }

        if len >= analysis::ANOMALY_MIN_LEN {
            let ratio = analysis::special_char_ratio(text);
            if ratio > self.config.anomaly_ratio {
                findings.push(ThreatFinding::new(
                    ThreatKind::AnomalousDistribution,
                    format!("{:.0}% special characters", ratio * 100.0),
                ));
            }
        }

        findings
    }

    fn decide(
        &self,
        input: &Value,
        findings: Vec<ThreatFinding>,
        caller: &str,
        remaining: u32,
        now: Instant,
    ) -> ValidationOutcome {
        if findings.is_empty() {
            return ValidationOutcome::allow(sanitize(input), findings, remaining);
        }

        let serious = findings
            .iter()
            .filter(|f| f.severity >= Severity::High)
            .count();
        self.note_findings(caller, findings.len(), serious, now);

        let critical = findings.iter().any(|f| f.severity == Severity::Critical);
        let high = findings.iter().any(|f| f.severity >= Severity::High);
        let block_reason = if critical {
            Some("critical threat detected")
        } else if self.config.block_threats && high {
            Some("high-severity threat detected")
        } else if self.config.strict_mode {
            Some("strict mode rejects any finding")
        } else {
            None
        };

        match block_reason {
            Some(reason) => self.blocked(findings, remaining, reason),
            None => {
                debug!(
                    "Allowing {} with {} low-risk findings",
                    caller,
                    findings.len()
                );
                ValidationOutcome::allow(sanitize(input), findings, remaining)
            }
        }
    }

    fn blocked(
        &self,
        findings: Vec<ThreatFinding>,
        remaining: u32,
        reason: &str,
    ) -> ValidationOutcome {
        self.counters.blocked.fetch_add(1, Ordering::Relaxed);
        let kinds: Vec<&str> = findings.iter().map(|f| f.kind.as_str()).collect();
        warn!("Security gate blocked request: {} [{}]", reason, kinds.join(", "));
        ValidationOutcome::block(findings, remaining, reason)
    }

    /// Count all findings; only `serious` ones feed the offender window
    fn note_findings(&self, caller: &str, n: usize, serious: usize, now: Instant) {
        self.counters.findings.fetch_add(n as u64, Ordering::Relaxed);
        if serious == 0 {
            return;
        }
        self.offenders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .record(caller, serious, now);
    }

    /// Drop idle callers from both windows
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let a = self.requests.lock().unwrap_or_else(|p| p.into_inner()).prune(now);
        let b = self.offenders.lock().unwrap_or_else(|p| p.into_inner()).prune(now);
        a + b
    }

    pub fn stats(&self) -> SecurityStats {
        let c = &self.counters;
        SecurityStats {
            validated: c.validated.load(Ordering::Relaxed),
            blocked: c.blocked.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            findings: c.findings.load(Ordering::Relaxed),
        }
    }
}

/// Redact matched spans, then escape residual markup characters
pub fn sanitize(input: &Value) -> Value {
    analysis::map_strings(input, &|s| patterns::escape(&patterns::redact(s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate() -> SecurityGate {
        SecurityGate::new(SecurityConfig::default())
    }

    fn user(id: &str) -> CallerContext {
        CallerContext::new(id)
    }

    #[test]
    fn test_benign_input_has_no_findings() {
        let outcome = gate().validate(&json!({"command": "status", "parameters": {"service": "api42"}}), &user("u"));
        assert!(outcome.allowed);
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.sanitized["parameters"]["service"], "api42");
    }

    #[test]
    fn test_script_blocked() {
        let outcome = gate().validate(&json!({"q": "<script>alert(1)</script>"}), &user("u"));
        assert!(outcome.blocked);
        assert!(outcome.highest_severity().unwrap() >= Severity::High);
        assert!(outcome
            .findings
            .iter()
            .any(|f| f.kind == ThreatKind::ScriptInjection));
    }

    #[test]
    fn test_high_finding_allowed_without_block_threats() {
        let config = SecurityConfig {
            block_threats: false,
            ..SecurityConfig::default()
        };
        let gate = SecurityGate::new(config);
        let outcome = gate.validate(&json!({"q": "<script>x</script>"}), &user("u"));
        assert!(outcome.allowed);
        assert!(!outcome.findings.is_empty());
        let sanitized = outcome.sanitized["q"].as_str().unwrap();
        assert!(sanitized.contains(patterns::REDACTION_MARKER));
        assert!(!sanitized.contains('<'));
    }

    #[test]
    fn test_critical_always_blocks() {
        let config = SecurityConfig {
            block_threats: false,
            ..SecurityConfig::default()
        };
        let gate = SecurityGate::new(config);
        let outcome = gate.validate(&json!({"q": "1 UNION SELECT password FROM users"}), &user("u"));
        assert!(outcome.blocked);
        assert_eq!(outcome.to_error().code(), "ERR_SECURITY_THREAT");
    }

    #[test]
    fn test_strict_mode_blocks_low_findings() {
        let noisy = json!({"q": "!!@@##$$%%^^&&**(())"});
        let relaxed = gate().validate(&noisy, &user("a"));
        assert!(relaxed.allowed);
        assert!(relaxed
            .findings
            .iter()
            .any(|f| f.kind == ThreatKind::AnomalousDistribution));

        let strict = SecurityGate::new(SecurityConfig {
            strict_mode: true,
            ..SecurityConfig::default()
        });
        assert!(strict.validate(&noisy, &user("a")).blocked);
    }

    #[test]
    fn test_structural_limits() {
        let gate = SecurityGate::new(SecurityConfig {
            max_input_bytes: 32,
            max_depth: 2,
            ..SecurityConfig::default()
        });
        let big = json!({"q": "x".repeat(64)});
        assert!(gate
            .validate(&big, &user("a"))
            .findings
            .iter()
            .any(|f| f.kind == ThreatKind::OversizedInput));

        let deep = json!([[[1]]]);
        let outcome = gate.validate(&deep, &user("b"));
        assert!(outcome.blocked);
        assert_eq!(outcome.findings[0].kind, ThreatKind::ExcessiveDepth);

        let nul = json!({"q": "a\u{0000}b"});
        assert!(gate.validate(&nul, &user("c")).blocked);
    }

    #[test]
    fn test_rate_limit() {
        let gate = SecurityGate::new(SecurityConfig {
            rate_limit_max: 2,
            ..SecurityConfig::default()
        });
        let ctx = user("burst");
        assert_eq!(gate.validate(&json!("a"), &ctx).remaining, 1);
        assert_eq!(gate.validate(&json!("a"), &ctx).remaining, 0);
        let denied = gate.validate(&json!("a"), &ctx);
        assert!(denied.blocked);
        assert!(denied.rate_limited);
        assert_eq!(denied.findings[0].kind, ThreatKind::RateAbuse);
        assert_eq!(denied.to_error().code(), "ERR_RATE_LIMITED");
        assert_eq!(gate.stats().rate_limited, 1);
    }

    #[test]
    fn test_repeat_offender_blocked_even_when_clean() {
        let gate = SecurityGate::new(SecurityConfig {
            offender_threshold: 2,
            ..SecurityConfig::default()
        });
        let ctx = user("scanner");
        for _ in 0..3 {
            gate.validate(&json!({"q": "../../etc/passwd"}), &ctx);
        }
        let outcome = gate.validate(&json!({"q": "hello"}), &ctx);
        assert!(outcome.blocked);
        assert_eq!(outcome.findings[0].kind, ThreatKind::RepeatOffender);

        // Other callers are unaffected
        assert!(gate.validate(&json!({"q": "hello"}), &user("other")).allowed);
    }

    #[test]
    fn test_entropy_bands() {
        let gate = gate();
        let encoded: String = (0..200u32)
            .map(|i| char::from_u32(0x21 + (i * 37) % 90).unwrap_or('x'))
            .collect();
        assert!(gate
            .inspect(&json!(encoded))
            .iter()
            .any(|f| f.kind == ThreatKind::EncodedPayload));

        let padding = "A".repeat(2048);
        assert!(gate
            .inspect(&json!(padding))
            .iter()
            .any(|f| f.kind == ThreatKind::PaddingAttack));
    }

    fn token(len: usize, stride: usize) -> String {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        (0..len)
            .map(|i| ALPHABET[(i * stride + 3) % ALPHABET.len()] as char)
            .collect()
    }

    #[test]
    fn test_long_alphanumeric_tokens_are_benign() {
        let gate = gate();
        for (len, stride) in [(64, 7), (128, 7), (256, 11), (1_000, 13)] {
            let value = token(len, stride);
            assert!(analysis::shannon_entropy(&value) > gate.config().entropy_high);
            let input = json!({"token": value, "session-id": format!("{}_{}", value, "x-1")});
            let findings = gate.inspect(&input);
            assert!(findings.is_empty(), "len {}: {:?}", len, findings);
        }

        let ctx = user("api-client");
        for _ in 0..20 {
            let outcome = gate.validate(&json!({"token": token(128, 7)}), &ctx);
            assert!(outcome.allowed);
            assert!(outcome.findings.is_empty());
        }
    }

    #[test]
    fn test_medium_findings_do_not_make_offenders() {
        let gate = SecurityGate::new(SecurityConfig {
            offender_threshold: 2,
            ..SecurityConfig::default()
        });
        let ctx = user("uploader");
        let padding = json!({"blob": "A".repeat(2048)});
        for _ in 0..5 {
            let outcome = gate.validate(&padding, &ctx);
            assert!(outcome.allowed);
            assert_eq!(outcome.findings[0].kind, ThreatKind::PaddingAttack);
        }
        assert!(gate.validate(&json!({"q": "hello"}), &ctx).allowed);
        assert_eq!(gate.stats().findings, 5);
    }

    #[test]
    fn test_request_depth_counts_parameters_only() {
        let gate = SecurityGate::new(SecurityConfig {
            max_depth: 2,
            ..SecurityConfig::default()
        });
        let params = json!({"filter": {"name": "api"}});
        let outcome = gate.validate_request("/search", &params, &user("a"));
        assert!(outcome.allowed);
        assert_eq!(outcome.sanitized["parameters"], params);

        let deeper = json!({"filter": {"name": ["api"]}});
        let outcome = gate.validate_request("/search", &deeper, &user("b"));
        assert!(outcome.blocked);
        assert_eq!(outcome.findings[0].kind, ThreatKind::ExcessiveDepth);
    }

    #[test]
    fn test_polyglot() {
        let findings = gate().inspect(&json!({"q": "<b>x</b> {{ y }}"}));
        assert!(findings.iter().any(|f| f.kind == ThreatKind::Polyglot));
    }

    #[test]
    fn test_guest_gets_half_limit() {
        let gate = gate();
        assert_eq!(gate.rate_limit_for(CallerRole::Guest), 60);
        assert_eq!(gate.rate_limit_for(CallerRole::Service), 240);
    }
}
