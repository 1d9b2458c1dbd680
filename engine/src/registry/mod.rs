//! Agent registry
//!
//! Holds the initialized agents in registration order and picks one per
//! task. Selection order:
//!
//! 1. the first registered Director, if it accepts the task
//! 2. otherwise the first non-Director agent whose `can_handle` accepts it
//! 3. otherwise that Director regardless, or nothing when none is registered

use sdk::types::{AgentType, Task};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::agent::Agent;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and register `agent`.
    ///
    /// An agent whose initialization fails is logged and left out; the return
    /// value says whether it was registered. Re-registering an id replaces
    /// the earlier agent in place.
    pub async fn register(&self, agent: Agent) -> bool {
        if let Err(e) = agent.initialize().await {
            error!("Agent {} excluded from registry: {}", agent.id(), e);
            return false;
        }

        let agent = Arc::new(agent);
        let mut agents = self.agents.write().await;
        match agents.iter().position(|a| a.id() == agent.id()) {
            Some(index) => agents[index] = agent,
            None => {
                info!("Registered agent {} ({})", agent.id(), agent.agent_type());
                agents.push(agent);
            }
        }
        true
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.id() == agent_id)
            .cloned()
    }

    pub async fn by_type(&self, agent_type: AgentType) -> Vec<Arc<Agent>> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|a| a.agent_type() == agent_type)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<Arc<Agent>> {
        self.agents.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Choose the agent for `task`, or `None` when nothing fits
    pub async fn select_for_task(&self, task: &Task) -> Option<Arc<Agent>> {
        let agents = self.all().await;
        let director = agents
            .iter()
            .find(|a| a.agent_type() == AgentType::Director);

        if let Some(director) = director {
            if director.can_handle(task).await {
                return Some(Arc::clone(director));
            }
        }

        for agent in agents
            .iter()
            .filter(|a| a.agent_type() != AgentType::Director)
        {
            if agent.can_handle(task).await {
                return Some(Arc::clone(agent));
            }
        }

        director.cloned()
    }

    pub async fn stats(&self) -> RegistryStats {
        let agents = self.agents.read().await;
        let mut stats = RegistryStats {
            total: agents.len(),
            ..RegistryStats::default()
        };
        for agent in agents.iter() {
            *stats.by_type.entry(agent.agent_type().to_string()).or_default() += 1;
        }
        stats
    }
}
