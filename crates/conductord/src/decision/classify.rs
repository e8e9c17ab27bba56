//! Command classification.
//!
//! A static table maps well-known command families to their characteristics.
//! Anything else is classified from keywords in its name and description,
//! and catalog metadata can override individual fields.

use conductor_shared::{CacheStrategy, CommandDefinition, Complexity, TimeClass};
use serde::{Deserialize, Serialize};

/// Characteristics that drive scoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProfile {
    /// Key of the rolling performance table
    pub class: String,
    pub complexity: Complexity,
    pub requires_external_data: bool,
    pub time_class: TimeClass,
    pub cache_strategy: CacheStrategy,
    /// Starting priority, 1 (lowest) to the configured level count
    pub base_priority: u8,
    /// Needs several handlers working together
    pub coordination: bool,
}

struct Row {
    names: &'static [&'static str],
    class: &'static str,
    complexity: Complexity,
    external: bool,
    time: TimeClass,
    cache: CacheStrategy,
    priority: u8,
    coordination: bool,
}

const TABLE: &[Row] = &[
    Row {
        names: &["help", "commands", "about", "version", "ping"],
        class: "info",
        complexity: Complexity::Low,
        external: false,
        time: TimeClass::Instant,
        cache: CacheStrategy::Aggressive,
        priority: 3,
        coordination: false,
    },
    Row {
        names: &["status", "health", "stats", "metrics", "uptime"],
        class: "monitoring",
        complexity: Complexity::Low,
        external: true,
        time: TimeClass::Fast,
        cache: CacheStrategy::Minimal,
        priority: 4,
        coordination: false,
    },
    Row {
        names: &["search", "query", "lookup", "find", "list"],
        class: "retrieval",
        complexity: Complexity::Medium,
        external: true,
        time: TimeClass::Moderate,
        cache: CacheStrategy::Moderate,
        priority: 3,
        coordination: false,
    },
    Row {
        names: &["analyze", "analyse", "report", "audit", "summarize"],
        class: "analysis",
        complexity: Complexity::High,
        external: true,
        time: TimeClass::Slow,
        cache: CacheStrategy::Moderate,
        priority: 2,
        coordination: false,
    },
    Row {
        names: &["config", "settings", "preferences"],
        class: "configuration",
        complexity: Complexity::Low,
        external: false,
        time: TimeClass::Fast,
        cache: CacheStrategy::Moderate,
        priority: 3,
        coordination: false,
    },
    Row {
        names: &["restart", "reload", "rollback", "scale"],
        class: "operations",
        complexity: Complexity::High,
        external: true,
        time: TimeClass::Slow,
        cache: CacheStrategy::None,
        priority: 4,
        coordination: false,
    },
    Row {
        names: &["deploy", "migrate", "provision", "orchestrate", "pipeline", "workflow"],
        class: "coordination",
        complexity: Complexity::VeryHigh,
        external: true,
        time: TimeClass::Slow,
        cache: CacheStrategy::None,
        priority: 3,
        coordination: true,
    },
];

const COMPLEX_KEYWORDS: &[&str] = &[
    "analy", "complex", "batch", "bulk", "deep", "full", "generate", "report", "sync", "migrat",
    "export", "import",
];

const SIMPLE_KEYWORDS: &[&str] = &["get", "show", "view", "info", "quick", "simple", "echo", "count"];

const EXTERNAL_KEYWORDS: &[&str] = &[
    "fetch", "remote", "live", "sync", "api", "external", "download", "upstream", "weather",
    "price",
];

/// Table row for `command`, matching exact names and `name-suffix` forms
fn table_row(command: &str) -> Option<&'static Row> {
    TABLE.iter().find(|row| {
        row.names.iter().any(|name| {
            command == *name
                || command
                    .strip_prefix(name)
                    .is_some_and(|rest| rest.starts_with(['-', '_', ':', '.']))
        })
    })
}

/// Classify a normalized command, optionally using its catalog definition
pub fn classify(command: &str, definition: Option<&CommandDefinition>) -> CommandProfile {
    let mut profile = match table_row(command) {
        Some(row) => CommandProfile {
            class: row.class.to_string(),
            complexity: row.complexity,
            requires_external_data: row.external,
            time_class: row.time,
            cache_strategy: row.cache,
            base_priority: row.priority,
            coordination: row.coordination,
        },
        None => heuristic(command, definition),
    };

    if let Some(def) = definition {
        apply_metadata(&mut profile, def);
    }
    profile
}

fn heuristic(command: &str, definition: Option<&CommandDefinition>) -> CommandProfile {
    let mut text = command.to_lowercase();
    if let Some(def) = definition {
        text.push(' ');
        text.push_str(&def.description.to_lowercase());
    }
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    let mut complexity = Complexity::Medium;
    let mut priority: u8 = 3;
    if has(COMPLEX_KEYWORDS) {
        complexity = complexity.raise();
        priority -= 1;
    }
    if has(SIMPLE_KEYWORDS) {
        complexity = complexity.lower();
        priority += 1;
    }
    let external = has(EXTERNAL_KEYWORDS);

    let time_class = match complexity {
        Complexity::Low => TimeClass::Fast,
        Complexity::Medium => TimeClass::Moderate,
        Complexity::High | Complexity::VeryHigh => TimeClass::Slow,
    };
    let cache_strategy = if external {
        CacheStrategy::Minimal
    } else {
        CacheStrategy::Moderate
    };
    let class = definition
        .map(|d| d.category.clone())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "general".to_string());

    CommandProfile {
        class,
        complexity,
        requires_external_data: external,
        time_class,
        cache_strategy,
        base_priority: priority,
        coordination: false,
    }
}

/// Catalog metadata wins over table and heuristics
fn apply_metadata(profile: &mut CommandProfile, def: &CommandDefinition) {
    let get = |key: &str| def.metadata.get(key).cloned();

    if let Some(v) = get("complexity").and_then(|v| serde_json::from_value(v).ok()) {
        profile.complexity = v;
    }
    if let Some(v) = get("time_class").and_then(|v| serde_json::from_value(v).ok()) {
        profile.time_class = v;
    }
    if let Some(v) = get("cache_strategy").and_then(|v| serde_json::from_value(v).ok()) {
        profile.cache_strategy = v;
    }
    if let Some(v) = get("requires_external_data").and_then(|v| v.as_bool()) {
        profile.requires_external_data = v;
    }
    if let Some(v) = get("coordination").and_then(|v| v.as_bool()) {
        profile.coordination = v;
    }
    if let Some(v) = get("priority").and_then(|v| v.as_u64()) {
        profile.base_priority = v.min(u8::MAX as u64) as u8;
    }
    if let Some(v) = get("class").and_then(|v| v.as_str().map(String::from)) {
        profile.class = v;
    }
}
