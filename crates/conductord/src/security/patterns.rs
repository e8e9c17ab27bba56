//! Detection patterns for the security gate.
//!
//! Each category carries a fixed [`ThreatKind`]; severity comes from the kind.
//! Context markers are deliberately broader and only feed polyglot detection.

use conductor_shared::ThreatKind;
use regex::Regex;
use std::sync::LazyLock;

/// Replacement for matched spans during sanitization
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Category-specific injection patterns
pub static THREAT_PATTERNS: LazyLock<Vec<(ThreatKind, Regex)>> = LazyLock::new(|| {
    vec![
        // Script injection / XSS
        (ThreatKind::ScriptInjection, Regex::new(r"(?i)<\s*script\b[^>]*>").unwrap()),
        (ThreatKind::ScriptInjection, Regex::new(r"(?i)<\s*/\s*script\s*>").unwrap()),
        (ThreatKind::ScriptInjection, Regex::new(r"(?i)\bjavascript\s*:").unwrap()),
        (
            ThreatKind::ScriptInjection,
            Regex::new(r"(?i)\bon(?:error|load|click|mouseover|focus|submit)\s*=").unwrap(),
        ),
        (
            ThreatKind::ScriptInjection,
            Regex::new(r"(?i)<\s*(?:iframe|object|embed|svg)\b").unwrap(),
        ),
        (
            ThreatKind::ScriptInjection,
            Regex::new(r"(?i)\bdocument\s*\.\s*(?:cookie|write|location)").unwrap(),
        ),
        // Query injection (SQL / NoSQL)
        (
            ThreatKind::QueryInjection,
            Regex::new(r"(?i)\bunion\s+(?:all\s+)?select\b").unwrap(),
        ),
        (
            ThreatKind::QueryInjection,
            Regex::new(r#"(?i)['"]\s*(?:or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#).unwrap(),
        ),
        (
            ThreatKind::QueryInjection,
            Regex::new(r"(?i);\s*(?:drop|delete|truncate|alter|insert|update|exec)\s").unwrap(),
        ),
        (
            ThreatKind::QueryInjection,
            Regex::new(r"(?i)\b(?:drop|truncate)\s+(?:table|database)\b").unwrap(),
        ),
        (
            ThreatKind::QueryInjection,
            Regex::new(r"(?i)\b(?:sleep|benchmark|pg_sleep)\s*\(\s*\d+").unwrap(),
        ),
        (ThreatKind::QueryInjection, Regex::new(r"(?i)\bwaitfor\s+delay\b").unwrap()),
        (
            ThreatKind::QueryInjection,
            Regex::new(r"\$(?:where|ne|gt|lt|regex|expr)\b").unwrap(),
        ),
        // Command injection
        (
            ThreatKind::CommandInjection,
            Regex::new(
                r"[;&|\n]\s*(?:rm|cat|curl|wget|nc|ncat|bash|sh|zsh|chmod|chown|python[0-9.]*|perl|ruby|powershell)\s",
            )
            .unwrap(),
        ),
        (ThreatKind::CommandInjection, Regex::new(r"\$\([^)]*\)").unwrap()),
        (ThreatKind::CommandInjection, Regex::new(r"`[^`]+`").unwrap()),
        (
            ThreatKind::CommandInjection,
            Regex::new(r"(?i)/bin/(?:ba|z|da)?sh\b").unwrap(),
        ),
        (
            ThreatKind::CommandInjection,
            Regex::new(r"(?:\|\||&&)\s*(?:rm|curl|wget|nc|bash|sh)\b").unwrap(),
        ),
        // Path traversal
        (ThreatKind::PathTraversal, Regex::new(r"\.\.[/\\]").unwrap()),
        (
            ThreatKind::PathTraversal,
            Regex::new(r"(?i)%2e%2e(?:%2f|%5c|/|\\)").unwrap(),
        ),
        (
            ThreatKind::PathTraversal,
            Regex::new(r"(?i)/etc/(?:passwd|shadow|sudoers)\b").unwrap(),
        ),
        (
            ThreatKind::PathTraversal,
            Regex::new(r"(?i)\b[a-z]:\\(?:windows|winnt)\\").unwrap(),
        ),
        // Template injection
        (ThreatKind::TemplateInjection, Regex::new(r"\{\{.*?\}\}").unwrap()),
        (ThreatKind::TemplateInjection, Regex::new(r"\{%.*?%\}").unwrap()),
        (ThreatKind::TemplateInjection, Regex::new(r"<%.*?%>").unwrap()),
        (ThreatKind::TemplateInjection, Regex::new(r"\$\{[^}]*\}").unwrap()),
        (ThreatKind::TemplateInjection, Regex::new(r"#\{[^}]*\}").unwrap()),
        // Deserialization markers
        (ThreatKind::Deserialization, Regex::new(r"\brO0AB").unwrap()),
        (ThreatKind::Deserialization, Regex::new(r"\bAC ED 00 05\b").unwrap()),
        (
            ThreatKind::Deserialization,
            Regex::new(r#"\bO:\d+:"[^"]+":\d+:\{"#).unwrap(),
        ),
        (
            ThreatKind::Deserialization,
            Regex::new(r"(?i)!!python/(?:object|name|module)").unwrap(),
        ),
        (ThreatKind::Deserialization, Regex::new(r"\b__proto__\b").unwrap()),
        (
            ThreatKind::Deserialization,
            Regex::new(r"(?i)\bconstructor\s*\.\s*prototype\b").unwrap(),
        ),
        (
            ThreatKind::Deserialization,
            Regex::new(r"(?i)\bc__builtin__\b|\bcposix\b").unwrap(),
        ),
    ]
});

/// Dynamic-evaluation and encoding tricks used to hide payloads
pub static OBFUSCATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\beval\s*\(").unwrap(),
        Regex::new(r"(?i)\bString\s*\.\s*fromCharCode\b").unwrap(),
        Regex::new(r"(?i)\batob\s*\(").unwrap(),
        Regex::new(r"(?i)\b(?:setTimeout|setInterval|Function)\s*\(\s*['\x22]").unwrap(),
        Regex::new(r"(?:\\x[0-9a-fA-F]{2}){3,}").unwrap(),
        Regex::new(r"(?:\\u[0-9a-fA-F]{4}){3,}").unwrap(),
        Regex::new(r"(?:%[0-9a-fA-F]{2}){6,}").unwrap(),
        // 'ev' + 'a' + 'l' style string splitting
        Regex::new(r#"(?:['"][^'"]{0,4}['"]\s*\+\s*){2,}['"][^'"]{0,4}['"]"#).unwrap(),
    ]
});

/// Markers of each language context, for polyglot detection
pub static CONTEXT_MARKERS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    vec![
        ("html", Regex::new(r"<\s*/?\s*[a-zA-Z][a-zA-Z0-9]*(?:\s[^>]*)?>").unwrap()),
        (
            "sql",
            Regex::new(r"(?i)\b(?:select\s+.+?\s+from|union\s+select|insert\s+into|drop\s+table|delete\s+from)\b")
                .unwrap(),
        ),
        (
            "shell",
            Regex::new(r"(?:\$\(|`[^`]+`|[;&|]\s*(?:rm|ls|cat|curl|wget|bash|sh)\b)").unwrap(),
        ),
        ("template", Regex::new(r"(?:\{\{|\{%|<%|\$\{)").unwrap()),
        (
            "js",
            Regex::new(r"(?i)(?:\beval\s*\(|\bfunction\s*\(|=>\s*\{|\bdocument\.|\bwindow\.|\balert\s*\()")
                .unwrap(),
        ),
    ]
});

/// Contexts present in `text`
pub fn contexts_in(text: &str) -> Vec<&'static str> {
    CONTEXT_MARKERS
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(name, _)| *name)
        .collect()
}

/// Replace every injection and obfuscation match with the redaction marker
pub fn redact(text: &str) -> String {
    let mut result = text.to_string();
    for (_, pattern) in THREAT_PATTERNS.iter() {
        result = pattern.replace_all(&result, REDACTION_MARKER).to_string();
    }
    for pattern in OBFUSCATION_PATTERNS.iter() {
        result = pattern.replace_all(&result, REDACTION_MARKER).to_string();
    }
    result
}

/// Escape characters with structural meaning in markup
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '\0' => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<ThreatKind> {
        THREAT_PATTERNS
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(k, _)| *k)
            .collect()
    }

    #[test]
    fn test_script_detected() {
        assert!(kinds("<script>alert(1)</script>").contains(&ThreatKind::ScriptInjection));
        assert!(kinds("<img src=x onerror=alert(1)>").contains(&ThreatKind::ScriptInjection));
    }

    #[test]
    fn test_query_injection_detected() {
        assert!(kinds("1' OR '1'='1").contains(&ThreatKind::QueryInjection));
        assert!(kinds("x UNION SELECT password FROM users").contains(&ThreatKind::QueryInjection));
        assert!(kinds("name; DROP TABLE users").contains(&ThreatKind::QueryInjection));
    }

    #[test]
    fn test_command_injection_detected() {
        assert!(kinds("file.txt; rm -rf /").contains(&ThreatKind::CommandInjection));
        assert!(kinds("$(whoami)").contains(&ThreatKind::CommandInjection));
    }

    #[test]
    fn test_traversal_template_deserialization() {
        assert!(kinds("../../etc/passwd").contains(&ThreatKind::PathTraversal));
        assert!(kinds("{{ config.items() }}").contains(&ThreatKind::TemplateInjection));
        assert!(kinds(r#"{"__proto__": {"admin": true}}"#).contains(&ThreatKind::Deserialization));
    }

    #[test]
    fn test_benign_text_is_clean() {
        for text in [
            "hello world 123",
            "deploy service api to staging",
            "What is the status of order 42?",
            "user@example.com",
        ] {
            assert!(kinds(text).is_empty(), "false positive on {:?}", text);
            assert!(contexts_in(text).is_empty(), "context on {:?}", text);
            assert!(
                !OBFUSCATION_PATTERNS.iter().any(|re| re.is_match(text)),
                "obfuscation on {:?}",
                text
            );
        }
    }

    #[test]
    fn test_obfuscation() {
        let hits = |t: &str| OBFUSCATION_PATTERNS.iter().any(|re| re.is_match(t));
        assert!(hits("eval(atob('YWxlcnQoMSk='))"));
        assert!(hits(r"\x61\x6c\x65\x72\x74"));
        assert!(hits("'ev' + 'a' + 'l'"));
    }

    #[test]
    fn test_polyglot_contexts() {
        let payload = "<b>x</b> UNION SELECT 1 FROM t; $(id)";
        let found = contexts_in(payload);
        assert!(found.contains(&"html"));
        assert!(found.contains(&"sql"));
        assert!(found.contains(&"shell"));
    }

    #[test]
    fn test_redact_and_escape() {
        let cleaned = escape(&redact("hi <script>alert(1)</script> there"));
        assert!(cleaned.contains(REDACTION_MARKER));
        assert!(!cleaned.contains("<script"));
        assert_eq!(escape("a<b & 'c'"), "a&lt;b &amp; &#x27;c&#x27;");
    }
}
