//! Shared types for the Conductor dispatch engine.
//!
//! These are the contract types transports and the engine agree on: the
//! error taxonomy, command definitions, threat findings, routing decisions
//! and the structured response shape.

pub mod command;
pub mod decision;
pub mod error;
pub mod response;
pub mod threat;

pub use command::{CallerContext, CallerRole, CommandDefinition, DispatchRequest, ParameterSpec};
pub use decision::{
    CacheStrategy, Complexity, Decision, FactorScores, ProcessingStrategy, RoutingPlan, TimeClass,
};
pub use error::{DispatchError, ErrorKind, RawError, Result, Severity};
pub use response::{
    DebugDetail, DispatchResponse, DispatchStatus, FailureReport, RecoveryOutcome,
    RecoveryStrategy,
};
pub use threat::{ThreatFinding, ThreatKind};

/// Default command prefix stripped during normalization
pub const DEFAULT_COMMAND_PREFIX: &str = "/";
