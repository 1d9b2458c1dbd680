//! Hive SDK
//!
//! Shared data model and error taxonomy for Hive components.
//! This crate is used by the engine and by anything embedding it.

/// Error types and handling
pub mod errors;

/// Tasks, plans, results and bus messages
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, EngineErrorExt};
pub use types::{
    AgentMessage, AgentMetadata, AgentResult, AgentType, MessageType, Plan, PlanStep, Priority,
    Task, BROADCAST,
};
