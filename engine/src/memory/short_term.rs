//! Short-term memory
//!
//! Ephemeral working context for running sessions: keyed JSON values with a
//! TTL, the set of agents currently executing, and a capped log of recent
//! interactions. Nothing here survives a restart.
//!
//! Expired entries are never returned. They are dropped when a read finds
//! them and swept on every write.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// One orchestrated task as seen from the outside
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interaction {
    pub session_id: String,
    pub agent_id: String,
    pub task_id: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

pub struct ShortTermMemory {
    default_ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
    /// Running tasks per agent id
    active_agents: RwLock<BTreeMap<String, usize>>,
    interactions: RwLock<VecDeque<Interaction>>,
    interaction_capacity: usize,
}

impl ShortTermMemory {
    pub fn new(default_ttl: Duration, interaction_capacity: usize) -> Self {
        Self {
            default_ttl,
            entries: RwLock::new(HashMap::new()),
            active_agents: RwLock::new(BTreeMap::new()),
            interactions: RwLock::new(VecDeque::new()),
            interaction_capacity: interaction_capacity.max(1),
        }
    }

    /// Store a value under `key` with the default TTL
    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let now = Instant::now();
        let entry = Entry {
            value,
            expires_at: now + ttl,
        };
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(key.into(), entry);
    }

    /// Value for `key`, or `None` once its TTL has passed
    pub async fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(e) if e.expires_at > now => return Some(e.value.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).map_or(false, |e| e.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Remove `key`. Returns whether a live entry was removed.
    pub async fn delete(&self, key: &str) -> bool {
        self.entries
            .write()
            .await
            .remove(key)
            .map_or(false, |e| e.expires_at > Instant::now())
    }

    /// Entries held, including expired ones not yet dropped
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Push a live entry's expiry to `ttl` from now. Expired entries stay
    /// expired; returns whether the entry was extended.
    pub async fn extend_ttl(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.write().await.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + ttl;
                true
            }
            _ => false,
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Count one more running task for `agent_id`
    pub async fn mark_active(&self, agent_id: &str) {
        *self
            .active_agents
            .write()
            .await
            .entry(agent_id.to_string())
            .or_default() += 1;
    }

    /// Count one finished task. The agent stays active while others run.
    pub async fn mark_inactive(&self, agent_id: &str) {
        let mut active = self.active_agents.write().await;
        if let Some(running) = active.get_mut(agent_id) {
            *running -= 1;
            if *running == 0 {
                active.remove(agent_id);
            }
        }
    }

    /// Agents with at least one running task, sorted
    pub async fn active_agents(&self) -> Vec<String> {
        self.active_agents.read().await.keys().cloned().collect()
    }

    /// Append an interaction, evicting the oldest past capacity
    pub async fn record_interaction(&self, interaction: Interaction) {
        let mut log = self.interactions.write().await;
        log.push_back(interaction);
        while log.len() > self.interaction_capacity {
            log.pop_front();
        }
    }

    /// Up to `limit` most recent interactions, newest first
    pub async fn recent_interactions(&self, limit: usize) -> Vec<Interaction> {
        self.interactions
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}
