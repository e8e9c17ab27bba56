//! Catalog payload parsing.
//!
//! Two formats are accepted:
//!
//! - JSON: `{"version": "...", "commands": [CommandDefinition, ...]}` or a bare
//!   array of definitions.
//! - Sectioned text: an optional `version:` line, then one `## /name` header
//!   per command followed by `Aliases:`, `Category:`, `Description:`, `Usage:`,
//!   `Examples:` and `Parameters:` fields. Examples and parameters are `- `
//!   bullet lines; other free text extends the description.

use super::normalize;
use conductor_shared::{CommandDefinition, DispatchError, ParameterSpec, Result};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// Version used when the payload does not declare one
pub const UNVERSIONED: &str = "unversioned";

#[derive(Debug, Clone)]
pub struct ParsedCatalog {
    pub version: String,
    pub definitions: Vec<CommandDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPayload {
    Versioned {
        #[serde(default)]
        version: Option<serde_json::Value>,
        commands: Vec<CommandDefinition>,
    },
    Bare(Vec<CommandDefinition>),
}

static PARAM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-\s*([A-Za-z0-9_\-]+)\s*(?:\(([^)]*)\))?\s*(?::\s*(.*))?$").unwrap()
});

fn malformed(msg: impl Into<String>) -> DispatchError {
    DispatchError::Validation(format!("Malformed catalog: {}", msg.into()))
}

/// Parse a catalog payload, normalizing names and aliases with `prefix`
pub fn parse_catalog(payload: &str, prefix: &str) -> Result<ParsedCatalog> {
    let trimmed = payload.trim_start();
    let mut parsed = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        parse_json(trimmed)?
    } else {
        parse_text(payload)?
    };

    if parsed.definitions.is_empty() {
        return Err(malformed("no commands defined"));
    }

    for def in &mut parsed.definitions {
        def.name = normalize(&def.name, prefix);
        if def.name.is_empty() {
            return Err(malformed("command with empty name"));
        }
        let own = def.name.clone();
        def.aliases = std::mem::take(&mut def.aliases)
            .into_iter()
            .map(|a| normalize(&a, prefix))
            .filter(|a| !a.is_empty() && *a != own)
            .collect();
    }
    Ok(parsed)
}

fn parse_json(payload: &str) -> Result<ParsedCatalog> {
    let parsed: JsonPayload =
        serde_json::from_str(payload).map_err(|e| malformed(e.to_string()))?;
    Ok(match parsed {
        JsonPayload::Versioned { version, commands } => ParsedCatalog {
            version: match version {
                Some(serde_json::Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => UNVERSIONED.to_string(),
            },
            definitions: commands,
        },
        JsonPayload::Bare(commands) => ParsedCatalog {
            version: UNVERSIONED.to_string(),
            definitions: commands,
        },
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    Free,
    Examples,
    Parameters,
}

fn parse_text(payload: &str) -> Result<ParsedCatalog> {
    let mut version = UNVERSIONED.to_string();
    let mut definitions: Vec<CommandDefinition> = Vec::new();
    let mut block = Block::Free;

    for (lineno, raw) in payload.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("<!--") {
            continue;
        }

        if let Some(header) = line.strip_prefix("## ") {
            let name = header.trim();
            if name.is_empty() {
                return Err(malformed(format!("line {}: empty command header", lineno + 1)));
            }
            definitions.push(CommandDefinition::new(name));
            block = Block::Free;
            continue;
        }

        let Some(current) = definitions.last_mut() else {
            // Preamble before the first command: only the version marker matters
            if let Some(v) = field(line, "version") {
                version = v.to_string();
            }
            continue;
        };

        if let Some(v) = field(line, "aliases") {
            current.aliases.extend(
                v.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(String::from),
            );
            block = Block::Free;
        } else if let Some(v) = field(line, "category") {
            current.category = v.to_lowercase();
            block = Block::Free;
        } else if let Some(v) = field(line, "description") {
            current.description = v.to_string();
            block = Block::Free;
        } else if let Some(v) = field(line, "usage") {
            current.usage = v.to_string();
            block = Block::Free;
        } else if let Some(v) = field(line, "examples") {
            if !v.is_empty() {
                current.examples.push(v.to_string());
            }
            block = Block::Examples;
        } else if let Some(v) = field(line, "parameters") {
            if !v.is_empty() && !v.eq_ignore_ascii_case("none") {
                return Err(malformed(format!(
                    "line {}: parameters must be listed as bullets",
                    lineno + 1
                )));
            }
            block = Block::Parameters;
        } else if line.starts_with('-') && block == Block::Examples {
            current
                .examples
                .push(line.trim_start_matches('-').trim().to_string());
        } else if line.starts_with('-') && block == Block::Parameters {
            current.parameters.push(parse_parameter(line).ok_or_else(|| {
                malformed(format!("line {}: bad parameter '{}'", lineno + 1, line))
            })?);
        } else {
            if !current.description.is_empty() {
                current.description.push(' ');
            }
            current.description.push_str(line);
        }
    }

    Ok(ParsedCatalog {
        version,
        definitions,
    })
}

/// `Key: value` with a case-insensitive key
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (k, v) = line.split_once(':')?;
    if k.trim().eq_ignore_ascii_case(key) {
        Some(v.trim())
    } else {
        None
    }
}

/// `- name (type, required): description`
fn parse_parameter(line: &str) -> Option<ParameterSpec> {
    let caps = PARAM_LINE.captures(line)?;
    let name = caps.get(1)?.as_str().to_string();
    let mut param_type = "string".to_string();
    let mut required = false;

    if let Some(attrs) = caps.get(2) {
        for attr in attrs.as_str().split(',').map(str::trim) {
            match attr.to_lowercase().as_str() {
                "" => {}
                "required" => required = true,
                "optional" => required = false,
                other => param_type = other.to_string(),
            }
        }
    }

    Some(ParameterSpec {
        name,
        param_type,
        required,
        description: caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    })
}
