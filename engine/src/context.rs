//! Per-task execution context
//!
//! One [`ExecutionContext`] is created per orchestrated task and threaded
//! mutably through planning, execution, and memory writes. It owns the
//! session's [`Trace`].

use sdk::types::{Plan, Task};
use serde_json::{json, Map, Value};

use crate::trace::Trace;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    pub task: Task,
    pub agent_id: Option<String>,
    pub trace: Trace,
    /// Tokens consumed by every model call in this session
    pub tokens_used: u64,
    pub plan: Option<Plan>,
    /// Patterns surfaced by recall, fed back as usage outcomes on completion
    pub recalled_pattern_ids: Vec<String>,
    /// Scratch space shared between steps
    pub shared: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(task: Task) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            task,
            agent_id: None,
            trace: Trace::new(),
            tokens_used: 0,
            plan: None,
            recalled_pattern_ids: Vec::new(),
            shared: Map::new(),
        }
    }

    pub fn add_tokens(&mut self, tokens: u64) {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
    }

    /// Remember a recalled pattern id once
    pub fn note_pattern(&mut self, pattern_id: &str) {
        if !self.recalled_pattern_ids.iter().any(|id| id == pattern_id) {
            self.recalled_pattern_ids.push(pattern_id.to_string());
        }
    }

    /// Compact JSON view stored in short-term memory after execution
    pub fn snapshot(&self) -> Value {
        json!({
            "session_id": self.session_id,
            "task_id": self.task.id,
            "agent_id": self.agent_id,
            "tokens_used": self.tokens_used,
            "plan_steps": self.plan.as_ref().map(|p| p.steps.len()).unwrap_or(0),
            "spans": self.trace.spans.len(),
            "shared": self.shared,
        })
    }
}
