//! Command definitions and caller context.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Declared parameter of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// Free-form type label (`string`, `number`, `bool`, ...)
    #[serde(default = "default_param_type", rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// A command as published by the catalog source.
///
/// `name` is stored normalized (lowercase, no prefix).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub name: String,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub usage: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_category() -> String {
    "general".to_string()
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: BTreeSet::new(),
            description: String::new(),
            usage: String::new(),
            examples: Vec::new(),
            category: default_category(),
            parameters: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Names of required parameters
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Who is calling. Drives rate limiting and the caller-context factor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    Guest,
    #[default]
    User,
    Admin,
    Service,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallerContext {
    /// Caller identity used for rate limiting and offender tracking
    pub caller_id: String,
    #[serde(default)]
    pub role: CallerRole,
    /// Channel the request came from (`http`, `queue`, `socket`, ...)
    #[serde(default)]
    pub channel: Option<String>,
    /// Caller asks for expedited handling
    #[serde(default)]
    pub urgent: bool,
    /// Expose raw error internals in failure reports
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CallerContext {
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            role: CallerRole::default(),
            channel: None,
            urgent: false,
            debug: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: CallerRole) -> Self {
        self.role = role;
        self
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }
}

impl Default for CallerContext {
    fn default() -> Self {
        Self::new("anonymous").with_role(CallerRole::Guest)
    }
}

/// What a transport hands to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub command: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub context: CallerContext,
}

impl DispatchRequest {
    pub fn new(command: impl Into<String>, context: CallerContext) -> Self {
        Self {
            command: command.into(),
            parameters: serde_json::Value::Null,
            context,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}
