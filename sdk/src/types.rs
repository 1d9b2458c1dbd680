//! Shared data model
//!
//! Tasks, agent descriptors, plans, results and bus messages. These types are
//! plain data: they carry no behaviour beyond construction helpers and
//! structural validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Reserved recipient id that addresses every subscriber on the bus
pub const BROADCAST: &str = "broadcast";

/// Task priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// A unit of work routed to an agent
///
/// Owned by the caller. The engine only reads it once dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Task {
    /// Create a task with a fresh id and medium priority
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            priority: Priority::default(),
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Title and description joined, used as the query text for recall
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }

    /// String metadata value, if present
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Kind of agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Director,
    Code,
    Research,
    #[serde(rename = "qa")]
    QA,
    General,
}

impl AgentType {
    /// Parse a free-form agent type name, falling back to `General`
    pub fn parse_lenient(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "director" => Self::Director,
            "code" | "coder" | "developer" => Self::Code,
            "research" | "researcher" => Self::Research,
            "qa" | "test" | "tester" => Self::QA,
            _ => Self::General,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentType::Director => write!(f, "director"),
            AgentType::Code => write!(f, "code"),
            AgentType::Research => write!(f, "research"),
            AgentType::QA => write!(f, "qa"),
            AgentType::General => write!(f, "general"),
        }
    }
}

/// Static description of an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Globally unique agent id
    pub id: String,
    /// Display name, also used as the span name prefix
    pub name: String,
    pub agent_type: AgentType,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent_tasks: usize,
}

impl AgentMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            agent_type,
            capabilities: BTreeSet::new(),
            max_concurrent_tasks: 1,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, limit: usize) -> Self {
        self.max_concurrent_tasks = limit;
        self
    }
}

fn default_step_kind() -> String {
    "general".to_string()
}

/// One executable unit of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub agent_type: AgentType,
    /// Executor dispatch key (e.g. "interface", "implementation")
    #[serde(default = "default_step_kind")]
    pub kind: String,
    /// Ids of earlier steps this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub expected_output: String,
}

/// Ordered, dependency-annotated breakdown of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub estimated_duration_minutes: u32,
    /// Confidence in [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Plan {
    /// Check that step ids are unique and every dependency names an earlier step.
    ///
    /// Referencing only earlier steps rules out cycles.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(format!(
                        "step '{}' depends on '{}' which is not an earlier step",
                        step.id, dep
                    ));
                }
            }
            if !seen.insert(step.id.as_str()) {
                return Err(format!("duplicate step id '{}'", step.id));
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        Ok(())
    }
}

/// Outcome of an agent's execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub output: Option<Value>,
    pub reasoning: String,
    pub tokens_used: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_results: Vec<AgentResult>,
}

impl AgentResult {
    /// Create a successful result
    pub fn success(output: Value, reasoning: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output),
            reasoning: reasoning.into(),
            tokens_used: 0,
            duration_ms: 0,
            sub_results: Vec::new(),
        }
    }

    /// Create a failed result with no output
    pub fn failure(reasoning: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            reasoning: reasoning.into(),
            tokens_used: 0,
            duration_ms: 0,
            sub_results: Vec::new(),
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_sub_results(mut self, sub_results: Vec<AgentResult>) -> Self {
        self.sub_results = sub_results;
        self
    }
}

/// Kind of bus message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskRequest,
    TaskResponse,
    StatusUpdate,
    ResourceRequest,
    ResourceResponse,
    Coordination,
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::TaskRequest => "task_request",
            MessageType::TaskResponse => "task_response",
            MessageType::StatusUpdate => "status_update",
            MessageType::ResourceRequest => "resource_request",
            MessageType::ResourceResponse => "resource_response",
            MessageType::Coordination => "coordination",
            MessageType::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Message exchanged between agents
///
/// `id` and `timestamp` are assigned by the bus when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Option<String>,
    pub from: String,
    /// Recipient agent id or [`BROADCAST`]
    pub to: String,
    pub message_type: MessageType,
    pub payload: Value,
    pub timestamp: Option<DateTime<Utc>>,
    /// Id of the request this message answers
    pub correlation_id: Option<String>,
}

impl AgentMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        payload: Value,
    ) -> Self {
        Self {
            id: None,
            from: from.into(),
            to: to.into(),
            message_type,
            payload,
            timestamp: None,
            correlation_id: None,
        }
    }

    /// Message addressed to every subscriber except the sender
    pub fn broadcast(from: impl Into<String>, message_type: MessageType, payload: Value) -> Self {
        Self::new(from, BROADCAST, message_type, payload)
    }

    /// Build a reply to this message, correlated by id
    pub fn reply(&self, message_type: MessageType, payload: Value) -> Self {
        Self {
            correlation_id: self.id.clone(),
            ..Self::new(self.to.clone(), self.from.clone(), message_type, payload)
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep {
            id: id.to_string(),
            description: format!("do {}", id),
            agent_type: AgentType::General,
            kind: default_step_kind(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            expected_output: "done".to_string(),
        }
    }

    fn plan(steps: Vec<PlanStep>) -> Plan {
        Plan {
            steps,
            estimated_duration_minutes: 10,
            confidence: 0.7,
            reasoning: String::new(),
        }
    }

    #[test]
    fn test_plan_validate_accepts_backward_dependencies() {
        let p = plan(vec![step("a", &[]), step("b", &["a"]), step("c", &["a", "b"])]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_plan_validate_rejects_forward_reference() {
        let p = plan(vec![step("a", &["b"]), step("b", &[])]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_plan_validate_rejects_self_reference_and_duplicates() {
        assert!(plan(vec![step("a", &["a"])]).validate().is_err());
        assert!(plan(vec![step("a", &[]), step("a", &[])]).validate().is_err());
    }

    #[test]
    fn test_agent_type_serde_names() {
        assert_eq!(serde_json::to_string(&AgentType::QA).unwrap(), "\"qa\"");
        assert_eq!(
            serde_json::from_str::<AgentType>("\"director\"").unwrap(),
            AgentType::Director
        );
        assert_eq!(AgentType::parse_lenient("Coder"), AgentType::Code);
        assert_eq!(AgentType::parse_lenient("unknown"), AgentType::General);
    }

    #[test]
    fn test_reply_correlates_to_request() {
        let mut request = AgentMessage::new("a", "b", MessageType::TaskRequest, json!({"x": 1}));
        request.id = Some("msg-1".to_string());

        let reply = request.reply(MessageType::TaskResponse, json!({"ok": true}));
        assert_eq!(reply.from, "b");
        assert_eq!(reply.to, "a");
        assert_eq!(reply.correlation_id.as_deref(), Some("msg-1"));
        assert!(reply.id.is_none());
    }

    #[test]
    fn test_task_text_and_metadata() {
        let task = Task::new("Build login API", "implement POST /login endpoint")
            .with_metadata("complexity", json!("high"));
        assert_eq!(task.text(), "Build login API implement POST /login endpoint");
        assert_eq!(task.metadata_str("complexity"), Some("high"));
        assert_eq!(task.priority, Priority::Medium);
    }
}
