//! Communication bus for agent-to-agent messaging
//!
//! Agents subscribe with a [`MessageHandler`] under their id. Messages are
//! addressed to one agent or to [`BROADCAST`]; every message sent is kept in
//! a bounded history for inspection.
//!
//! Delivery never fails at the sender's call site. A missing or failing
//! recipient produces an `Error` message routed back to the sender, and a
//! failing broadcast subscriber is logged without affecting the others.
//!
//! No lock is held while a handler runs, so handlers may send through the
//! bus themselves.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use sdk::errors::EngineError;
use sdk::types::{AgentMessage, MessageType, BROADCAST};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

/// Default number of messages kept in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Buffer size for channel subscriptions
const CHANNEL_BUFFER_SIZE: usize = 100;

/// Receives messages addressed to one agent
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: AgentMessage) -> Result<(), EngineError>;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(AgentMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), EngineError>> + Send,
{
    async fn handle(&self, message: AgentMessage) -> Result<(), EngineError> {
        (self.f)(message).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(AgentMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Forwards messages into a bounded channel.
///
/// A full inbox is a failed delivery, never a wait: one subscriber that
/// stops draining must not hold up the sender or other subscribers.
struct ChannelHandler {
    tx: mpsc::Sender<AgentMessage>,
}

#[async_trait]
impl MessageHandler for ChannelHandler {
    async fn handle(&self, message: AgentMessage) -> Result<(), EngineError> {
        let recipient = message.to.clone();
        self.tx.try_send(message).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "inbox full",
                TrySendError::Closed(_) => "receiver dropped",
            };
            EngineError::DeliveryFailed {
                recipient,
                reason: reason.to_string(),
            }
        })
    }
}

/// Result of a single `send`
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Delivered,
    /// No handler was subscribed under the recipient id
    NoHandler,
    /// The handler returned an error or panicked
    Failed(String),
    Broadcast(BroadcastReport),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// History query. Every set field must match.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub from: Option<String>,
    pub to: Option<String>,
    pub message_type: Option<MessageType>,
    pub since: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn from(mut self, sender: impl Into<String>) -> Self {
        self.from = Some(sender.into());
        self
    }

    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.to = Some(recipient.into());
        self
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, message: &AgentMessage) -> bool {
        self.from.as_ref().map_or(true, |f| &message.from == f)
            && self.to.as_ref().map_or(true, |t| &message.to == t)
            && self.message_type.map_or(true, |t| message.message_type == t)
            && self
                .since
                .map_or(true, |s| message.timestamp.map_or(false, |ts| ts >= s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusStats {
    pub history_len: usize,
    pub capacity: usize,
    pub subscribers: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_sender: BTreeMap<String, usize>,
}

pub struct CommunicationBus {
    handlers: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
    history: Mutex<VecDeque<AgentMessage>>,
    capacity: usize,
}

impl Default for CommunicationBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl CommunicationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register `handler` for `agent_id`, replacing any previous one
    pub async fn subscribe(&self, agent_id: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        let agent_id = agent_id.into();
        debug!("Bus subscription: {}", agent_id);
        self.handlers.write().await.insert(agent_id, handler);
    }

    /// Subscribe through a bounded channel instead of a handler
    pub async fn subscribe_channel(&self, agent_id: impl Into<String>) -> mpsc::Receiver<AgentMessage> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        self.subscribe(agent_id, Arc::new(ChannelHandler { tx })).await;
        rx
    }

    pub async fn unsubscribe(&self, agent_id: &str) -> bool {
        self.handlers.write().await.remove(agent_id).is_some()
    }

    /// Deliver `message` to its recipient, or to everyone for [`BROADCAST`]
    pub async fn send(&self, message: AgentMessage) -> Delivery {
        if message.is_broadcast() {
            return Delivery::Broadcast(self.broadcast(message).await);
        }

        let message = stamp(message);
        self.record(&message).await;

        let handler = self.handlers.read().await.get(&message.to).cloned();
        let Some(handler) = handler else {
            warn!("No handler subscribed for '{}'", message.to);
            let error = EngineError::HandlerNotFound(message.to.clone());
            self.report_error(&message, &error).await;
            return Delivery::NoHandler;
        };

        match invoke(handler, message.clone()).await {
            Ok(()) => Delivery::Delivered,
            Err(reason) => {
                warn!("Delivery to '{}' failed: {}", message.to, reason);
                let error = EngineError::DeliveryFailed {
                    recipient: message.to.clone(),
                    reason: reason.clone(),
                };
                self.report_error(&message, &error).await;
                Delivery::Failed(reason)
            }
        }
    }

    /// Deliver `message` concurrently to every subscriber except the sender
    pub async fn broadcast(&self, message: AgentMessage) -> BroadcastReport {
        let mut message = stamp(message);
        message.to = BROADCAST.to_string();
        self.record(&message).await;

        let targets: Vec<(String, Arc<dyn MessageHandler>)> = self
            .handlers
            .read()
            .await
            .iter()
            .filter(|(id, _)| **id != message.from)
            .map(|(id, handler)| (id.clone(), Arc::clone(handler)))
            .collect();

        let deliveries = targets.into_iter().map(|(id, handler)| {
            let message = message.clone();
            async move { (id, invoke(handler, message).await) }
        });

        let mut report = BroadcastReport::default();
        for (id, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    warn!("Broadcast delivery to '{}' failed: {}", id, reason);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Messages matching `filter`, oldest first
    pub async fn history(&self, filter: &HistoryFilter) -> Vec<AgentMessage> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect()
    }

    /// Ids with a subscribed handler, sorted
    pub async fn active_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn stats(&self) -> BusStats {
        let history = self.history.lock().await;
        let mut stats = BusStats {
            history_len: history.len(),
            capacity: self.capacity,
            subscribers: self.handlers.read().await.len(),
            ..BusStats::default()
        };
        for message in history.iter() {
            *stats.by_type.entry(message.message_type.to_string()).or_default() += 1;
            *stats.by_sender.entry(message.from.clone()).or_default() += 1;
        }
        stats
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    async fn record(&self, message: &AgentMessage) {
        let mut history = self.history.lock().await;
        history.push_back(message.clone());
        while history.len() > self.capacity {
            history.pop_front();
        }
    }

    /// Route an `Error` message back to the original sender, if subscribed
    async fn report_error(&self, original: &AgentMessage, error: &EngineError) {
        let handler = self.handlers.read().await.get(&original.from).cloned();
        let Some(handler) = handler else {
            debug!("Sender '{}' has no handler for error replies", original.from);
            return;
        };

        let reply = stamp(original.reply(
            MessageType::Error,
            json!({
                "error": error.to_string(),
                "original_type": original.message_type,
            }),
        ));
        if let Err(reason) = invoke(handler, reply).await {
            warn!("Error reply to '{}' failed: {}", original.from, reason);
        }
    }
}

/// Assign id and timestamp when absent
fn stamp(mut message: AgentMessage) -> AgentMessage {
    if message.id.is_none() {
        message.id = Some(uuid::Uuid::new_v4().to_string());
    }
    if message.timestamp.is_none() {
        message.timestamp = Some(Utc::now());
    }
    message
}

/// Run a handler, converting both errors and panics into a reason string
fn invoke(
    handler: Arc<dyn MessageHandler>,
    message: AgentMessage,
) -> BoxFuture<'static, Result<(), String>> {
    async move {
        match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("handler panicked".to_string()),
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PanickingHandler;

    #[async_trait]
    impl MessageHandler for PanickingHandler {
        async fn handle(&self, _message: AgentMessage) -> Result<(), EngineError> {
            panic!("handler bug")
        }
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        handler_fn(move |_msg| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), EngineError>(())
            }
        })
    }

    #[tokio::test]
    async fn test_send_with_no_subscribers_records_once() {
        let bus = CommunicationBus::new(10);
        let outcome = bus
            .send(AgentMessage::new("a", "b", MessageType::TaskRequest, json!({})))
            .await;

        assert_eq!(outcome, Delivery::NoHandler);
        let history = bus.history(&HistoryFilter::default()).await;
        assert_eq!(history.len(), 1);
        assert!(history[0].id.is_some());
        assert!(history[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_missing_recipient_reports_error_to_sender() {
        let bus = CommunicationBus::new(10);
        let mut inbox = bus.subscribe_channel("a").await;

        bus.send(AgentMessage::new("a", "ghost", MessageType::TaskRequest, json!({})))
            .await;

        let error = inbox.recv().await.unwrap();
        assert_eq!(error.message_type, MessageType::Error);
        assert_eq!(error.to, "a");
        assert!(error.correlation_id.is_some());
        assert!(error.payload["error"].as_str().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn test_failing_handler_reports_error() {
        let bus = CommunicationBus::new(10);
        let mut inbox = bus.subscribe_channel("a").await;
        bus.subscribe(
            "b",
            handler_fn(|_msg| async { Err::<(), _>(EngineError::Execution("boom".to_string())) }),
        )
        .await;

        let outcome = bus
            .send(AgentMessage::new("a", "b", MessageType::TaskRequest, json!({})))
            .await;

        assert!(matches!(outcome, Delivery::Failed(reason) if reason.contains("boom")));
        assert_eq!(inbox.recv().await.unwrap().message_type, MessageType::Error);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender_and_survives_failures() {
        let bus = CommunicationBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("sender", counting_handler(Arc::clone(&counter))).await;
        bus.subscribe("ok-1", counting_handler(Arc::clone(&counter))).await;
        bus.subscribe("ok-2", counting_handler(Arc::clone(&counter))).await;
        bus.subscribe("panics", Arc::new(PanickingHandler)).await;
        bus.subscribe(
            "fails",
            handler_fn(|_msg| async { Err::<(), _>(EngineError::Execution("nope".to_string())) }),
        )
        .await;

        let report = bus
            .broadcast(AgentMessage::broadcast("sender", MessageType::StatusUpdate, json!({})))
            .await;

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 2 });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(bus.history(&HistoryFilter::default()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_undrained_channel_does_not_stall_broadcast() {
        let bus = CommunicationBus::new(10);
        let counter = Arc::new(AtomicUsize::new(0));
        let _slow = bus.subscribe_channel("slow").await;
        bus.subscribe("fast", counting_handler(Arc::clone(&counter))).await;

        let total = CHANNEL_BUFFER_SIZE + 5;
        let run = async {
            let mut last = BroadcastReport::default();
            for i in 0..total {
                last = bus
                    .broadcast(AgentMessage::broadcast("director", MessageType::StatusUpdate, json!({ "seq": i })))
                    .await;
            }
            last
        };
        let last = tokio::time::timeout(std::time::Duration::from_secs(2), run)
            .await
            .expect("broadcast stalled on a full inbox");

        assert_eq!(last, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), total);
    }

    #[tokio::test]
    async fn test_send_to_full_inbox_fails_fast() {
        let bus = CommunicationBus::new(10);
        let _inbox = bus.subscribe_channel("b").await;
        for _ in 0..CHANNEL_BUFFER_SIZE {
            bus.send(AgentMessage::new("a", "b", MessageType::TaskRequest, json!({})))
                .await;
        }

        let outcome = bus
            .send(AgentMessage::new("a", "b", MessageType::TaskRequest, json!({})))
            .await;
        assert!(matches!(outcome, Delivery::Failed(reason) if reason.contains("inbox full")));
    }

    #[tokio::test]
    async fn test_history_filter_and_stats() {
        let bus = CommunicationBus::new(10);
        let _rx = bus.subscribe_channel("b").await;
        bus.send(AgentMessage::new("a", "b", MessageType::TaskRequest, json!({})))
            .await;
        bus.send(AgentMessage::new("a", "b", MessageType::StatusUpdate, json!({})))
            .await;
        bus.send(AgentMessage::new("c", "b", MessageType::TaskRequest, json!({})))
            .await;

        let from_a = bus.history(&HistoryFilter::default().from("a")).await;
        assert_eq!(from_a.len(), 2);
        let requests_from_a = bus
            .history(
                &HistoryFilter::default()
                    .from("a")
                    .message_type(MessageType::TaskRequest),
            )
            .await;
        assert_eq!(requests_from_a.len(), 1);

        let stats = bus.stats().await;
        assert_eq!(stats.history_len, 3);
        assert_eq!(stats.by_type["task_request"], 2);
        assert_eq!(stats.by_sender["a"], 2);
        assert_eq!(bus.active_agents().await, vec!["b".to_string()]);

        bus.clear_history().await;
        assert_eq!(bus.stats().await.history_len, 0);
    }
}
