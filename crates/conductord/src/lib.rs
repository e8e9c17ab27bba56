//! Conductor daemon library - the dispatch engine and its components.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod decision;
pub mod dispatcher;
pub mod handlers;
pub mod logging;
pub mod resilience;
pub mod security;

pub use dispatcher::{DispatchOptions, Dispatcher, DispatcherBuilder};
