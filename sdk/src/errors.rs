//! Error types and handling
//!
//! This module provides the error taxonomy shared by every Hive component.
//! All errors implement the `EngineErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! # Propagation
//!
//! Failures that happen before an agent result exists (agent selection,
//! provider availability) are fatal to the task. Failures that happen after a
//! result exists (memory writes, message delivery) are logged and swallowed by
//! the engine; they are still represented here so they can be logged and
//! reported uniformly.

use thiserror::Error;

/// Trait for engine error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require a configuration change.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Selection**: no agent accepts the task
/// - **Model**: provider unavailable, invocation failure, timeout
/// - **Planning**: model output could not be parsed into a plan
/// - **Messaging**: recipient has no handler, handler failed
/// - **Memory**: tier writes and storage backends
/// - **Configuration**: invalid or missing configuration
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
///
/// let error = EngineError::HandlerNotFound("agent-x".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::NoSuitableAgent("task-1".to_string());
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Selection errors
    #[error("No suitable agent for task {0}")]
    NoSuitableAgent(String),

    #[error("Agent initialization failed for {agent_id}: {reason}")]
    AgentInitialization { agent_id: String, reason: String },

    // Model errors
    #[error("Model provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Model invocation failed: {0}")]
    ModelInvocationFailed(String),

    #[error("Model invocation timed out after {0}s")]
    ModelTimeout(u64),

    // Planning and execution errors
    #[error("Plan parse failure: {0}")]
    PlanParseFailure(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    // Messaging errors
    #[error("No handler registered for agent {0}")]
    HandlerNotFound(String),

    #[error("Delivery to {recipient} failed: {reason}")]
    DeliveryFailed { recipient: String, reason: String },

    // Memory errors
    #[error("Memory write failed: {0}")]
    MemoryWriteFailure(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::NoSuitableAgent(_) => "No registered agent can handle this task. Register a Director agent",
            Self::AgentInitialization { .. } => "Agent setup failed. Check the agent's dependencies",

            Self::ProviderUnavailable(_) => "Model provider unavailable. Check that it is running and reachable",
            Self::ModelInvocationFailed(_) => "The model call failed. Try again",
            Self::ModelTimeout(_) => "The model took too long to respond. Try again or raise llm.timeout_secs",

            Self::PlanParseFailure(_) => "The model returned an unusable plan",
            Self::Execution(_) => "The agent could not complete the task",

            Self::HandlerNotFound(_) => "The recipient agent is not subscribed to the bus",
            Self::DeliveryFailed { .. } => "The recipient agent failed to process the message",

            Self::MemoryWriteFailure(_) => "A memory write failed. The task result is unaffected",
            Self::Storage(_) => "Storage operation failed. Check the memory backend",

            Self::Config(_) => "Check your config.toml file for errors",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::NoSuitableAgent(_) | Self::Config(_) | Self::AgentInitialization { .. } => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
