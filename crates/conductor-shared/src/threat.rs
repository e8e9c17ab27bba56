//! Threat findings produced by the security gate.

use crate::error::Severity;
use serde::{Deserialize, Serialize};

/// Category of a detected threat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    ScriptInjection,
    QueryInjection,
    CommandInjection,
    PathTraversal,
    TemplateInjection,
    Deserialization,
    RateAbuse,
    RepeatOffender,
    OversizedInput,
    NullByte,
    ExcessiveDepth,
    EncodedPayload,
    PaddingAttack,
    AnomalousDistribution,
    Obfuscation,
    Polyglot,
}

impl ThreatKind {
    /// Fixed severity per category
    pub fn default_severity(&self) -> Severity {
        match self {
            ThreatKind::QueryInjection
            | ThreatKind::CommandInjection
            | ThreatKind::Deserialization
            | ThreatKind::OversizedInput
            | ThreatKind::NullByte
            | ThreatKind::ExcessiveDepth => Severity::Critical,
            ThreatKind::ScriptInjection
            | ThreatKind::PathTraversal
            | ThreatKind::TemplateInjection
            | ThreatKind::RateAbuse
            | ThreatKind::RepeatOffender
            | ThreatKind::Obfuscation
            | ThreatKind::Polyglot => Severity::High,
            ThreatKind::EncodedPayload | ThreatKind::PaddingAttack => Severity::Medium,
            ThreatKind::AnomalousDistribution => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::ScriptInjection => "script_injection",
            ThreatKind::QueryInjection => "query_injection",
            ThreatKind::CommandInjection => "command_injection",
            ThreatKind::PathTraversal => "path_traversal",
            ThreatKind::TemplateInjection => "template_injection",
            ThreatKind::Deserialization => "deserialization",
            ThreatKind::RateAbuse => "rate_abuse",
            ThreatKind::RepeatOffender => "repeat_offender",
            ThreatKind::OversizedInput => "oversized_input",
            ThreatKind::NullByte => "null_byte",
            ThreatKind::ExcessiveDepth => "excessive_depth",
            ThreatKind::EncodedPayload => "encoded_payload",
            ThreatKind::PaddingAttack => "padding_attack",
            ThreatKind::AnomalousDistribution => "anomalous_distribution",
            ThreatKind::Obfuscation => "obfuscation",
            ThreatKind::Polyglot => "polyglot",
        }
    }
}

impl std::fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatFinding {
    pub kind: ThreatKind,
    pub severity: Severity,
    /// Matched evidence, truncated
    pub evidence: String,
}

/// Longest evidence excerpt kept on a finding
pub const MAX_EVIDENCE_CHARS: usize = 80;

impl ThreatFinding {
    pub fn new(kind: ThreatKind, evidence: impl AsRef<str>) -> Self {
        let evidence: String = evidence.as_ref().chars().take(MAX_EVIDENCE_CHARS).collect();
        Self {
            kind,
            severity: kind.default_severity(),
            evidence,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_severities() {
        assert_eq!(ThreatKind::QueryInjection.default_severity(), Severity::Critical);
        assert_eq!(ThreatKind::CommandInjection.default_severity(), Severity::Critical);
        assert_eq!(ThreatKind::Deserialization.default_severity(), Severity::Critical);
        assert_eq!(ThreatKind::ScriptInjection.default_severity(), Severity::High);
        assert_eq!(ThreatKind::PathTraversal.default_severity(), Severity::High);
        assert_eq!(ThreatKind::TemplateInjection.default_severity(), Severity::High);
    }

    #[test]
    fn test_evidence_truncated() {
        let long = "x".repeat(500);
        let finding = ThreatFinding::new(ThreatKind::EncodedPayload, &long);
        assert_eq!(finding.evidence.chars().count(), MAX_EVIDENCE_CHARS);
    }
}
