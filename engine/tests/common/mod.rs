//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hive_engine::agent::{AgentServices, CodeAgent, DirectorAgent};
use hive_engine::bus::CommunicationBus;
use hive_engine::llm::{Completion, LLMError, LLMProvider, Message};
use hive_engine::memory::{MemoryCoordinator, MemorySettings};
use hive_engine::orchestrator::TaskOrchestrator;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One queued provider response
pub enum Reply {
    Text(String),
    Fail(LLMError),
    Hang,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }
}

/// Provider that answers from a queue, then with a default text
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    default_reply: String,
    available: AtomicBool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<Message>>>,
    /// Extra latency for calls whose prompt contains the marker
    slow_marker: Mutex<Option<(String, Duration)>>,
}

impl ScriptedProvider {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: default_reply.into(),
            available: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            slow_marker: Mutex::new(None),
        }
    }

    /// Delay every call whose messages mention `marker`
    pub fn slow_when(self, marker: impl Into<String>, delay: Duration) -> Self {
        *self.slow_marker.lock().unwrap() = Some((marker.into(), delay));
        self
    }

    pub fn with_replies(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.replies.lock().unwrap().extend(replies);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Concatenated user messages of every call so far
    pub fn user_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.role == hive_engine::llm::MessageRole::User)
                    .map(|m| m.content.clone())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        let delay = self
            .slow_marker
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(marker, _)| messages.iter().any(|m| m.content.contains(marker.as_str())))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Text(text)) => Ok(Completion::new(text)),
            Some(Reply::Fail(error)) => Err(error),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Completion::new(""))
            }
            None => Ok(Completion::new(self.default_reply.clone())),
        }
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

pub fn services(llm: Arc<ScriptedProvider>) -> AgentServices {
    AgentServices::new(
        llm,
        Arc::new(MemoryCoordinator::in_memory(MemorySettings::default())),
        Arc::new(CommunicationBus::default()),
    )
}

/// Orchestrator with the Director registered before the Code agent
pub async fn orchestrator(llm: Arc<ScriptedProvider>) -> TaskOrchestrator {
    orchestrator_with(services(llm)).await
}

pub async fn orchestrator_with(services: AgentServices) -> TaskOrchestrator {
    let orchestrator = TaskOrchestrator::new(services, 16);
    assert!(orchestrator.register(DirectorAgent::new("director").unwrap()).await);
    assert!(orchestrator.register(CodeAgent::new("code").unwrap()).await);
    orchestrator
}

pub const LOGIN_PLAN: &str = r#"Here is the plan:
```json
{
  "steps": [
    {"id": "step-1", "description": "Design the login request and response", "agentType": "code", "dependencies": [], "expectedOutput": "API contract"},
    {"id": "step-2", "description": "Implement POST /login", "agentType": "code", "dependencies": ["step-1"], "expectedOutput": "Handler"},
    {"id": "step-3", "description": "Test the login flow", "agentType": "qa", "dependencies": ["step-2"], "expectedOutput": "Tests"}
  ],
  "estimatedTotalMinutes": 45,
  "confidence": 0.8,
  "reasoning": "Contract first, then handler, then tests"
}
```"#;
