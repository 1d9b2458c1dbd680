//! Hive Engine Library
//!
//! Multi-agent orchestration: tasks are routed to a specialized agent, which
//! plans and executes them against a language model, while a layered memory
//! learns from every outcome. Used by the `hive` binary and integration tests.

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// Per-run execution traces
pub mod trace;

/// Per-task execution context
pub mod context;

/// LLM provider abstraction layer
pub mod llm;

/// Layered memory tiers and recall
pub mod memory;

/// Agent-to-agent communication bus
pub mod bus;

/// Agent lifecycle and concrete agents
pub mod agent;

/// Agent registry and selection
pub mod registry;

/// End-to-end task orchestration
pub mod orchestrator;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

pub use sdk;
