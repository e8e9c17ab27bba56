//! Command handler registration.
//!
//! Handlers are registered explicitly per command name. An entry either
//! describes the command from the catalog, returns a fixed payload, or
//! delegates to an async collaborator.

use async_trait::async_trait;
use conductor_shared::{CallerContext, CommandDefinition, RawError, RoutingPlan};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a handler gets for one execution
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    /// Normalized command name
    pub command: String,
    pub definition: CommandDefinition,
    /// Sanitized parameters
    pub parameters: Value,
    pub context: CallerContext,
    pub plan: RoutingPlan,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, invocation: &Invocation) -> Result<Value, RawError>;
}

/// Handler backed by a plain function
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> CommandHandler for FnHandler<F>
where
    F: Fn(&Invocation) -> Result<Value, RawError> + Send + Sync,
{
    async fn handle(&self, invocation: &Invocation) -> Result<Value, RawError> {
        (self.0)(invocation)
    }
}

#[derive(Clone)]
pub enum HandlerEntry {
    /// Return the command's catalog definition
    Describe,
    /// Return a fixed payload
    Static(Value),
    /// Delegate to a collaborator
    Native(Arc<dyn CommandHandler>),
}

impl HandlerEntry {
    pub fn native(handler: impl CommandHandler + 'static) -> Self {
        HandlerEntry::Native(Arc::new(handler))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HandlerEntry::Describe => "describe",
            HandlerEntry::Static(_) => "static",
            HandlerEntry::Native(_) => "native",
        }
    }

    pub async fn run(&self, invocation: &Invocation) -> Result<Value, RawError> {
        match self {
            HandlerEntry::Describe => Ok(describe(&invocation.definition)),
            HandlerEntry::Static(value) => Ok(value.clone()),
            HandlerEntry::Native(handler) => handler.handle(invocation).await,
        }
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HandlerEntry::{}", self.kind())
    }
}

fn describe(def: &CommandDefinition) -> Value {
    json!({
        "command": def.name,
        "description": def.description,
        "usage": def.usage,
        "examples": def.examples,
        "aliases": def.aliases,
        "category": def.category,
        "parameters": def.parameters,
    })
}

/// Handlers by normalized command name, with an optional default
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, HandlerEntry>,
    default: Option<HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: impl Into<String>, entry: HandlerEntry) {
        self.entries.insert(command.into(), entry);
    }

    pub fn set_default(&mut self, entry: Option<HandlerEntry>) {
        self.default = entry;
    }

    pub fn lookup(&self, command: &str) -> Option<&HandlerEntry> {
        self.entries.get(command).or(self.default.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
