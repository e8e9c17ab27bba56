//! Structural and statistical checks over JSON input.

use serde_json::Value;
use std::collections::HashMap;

/// Strings shorter than this are not judged on character distribution
pub const ANOMALY_MIN_LEN: usize = 16;

/// Shannon entropy in bits per character
pub fn shannon_entropy(text: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Share of characters that are neither alphanumeric nor whitespace
pub fn special_char_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut special = 0usize;
    for c in text.chars() {
        total += 1;
        if !c.is_alphanumeric() && !c.is_whitespace() {
            special += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        special as f64 / total as f64
    }
}

/// Identifier-shaped text: ASCII letters, digits, `_` and `-` only
pub fn is_token_like(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Nesting depth of arrays and objects; scalars are depth 0
pub fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Every string in the value, object keys included
pub fn strings(value: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    collect(value, &mut out);
    out
}

fn collect<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
        Value::Object(map) => {
            for (k, v) in map {
                out.push(k);
                collect(v, out);
            }
        }
        _ => {}
    }
}

/// Rebuild the value with every string (keys included) passed through `f`
pub fn map_strings(value: &Value, f: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_strings(v, f)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (f(k), map_strings(v, f)))
                .collect(),
        ),
        other => other.clone(),
    }
}
