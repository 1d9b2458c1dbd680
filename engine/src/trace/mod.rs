//! Execution Trace
//!
//! Append-only record of one orchestration run. A trace holds an ordered list
//! of spans; every traced operation opens a span on entry and closes it on
//! every exit path. Spans carry attributes and an ordered list of events.
//!
//! Parent linkage follows stack discipline: a new span's parent is the most
//! recently opened span that is still open. This is not a true call tree when
//! operations interleave, which is acceptable since a single run is sequential.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A discrete occurrence logged inside a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// A timed unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub parent_id: Option<String>,
    pub agent_id: String,
    pub operation: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
}

impl Span {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Elapsed milliseconds, if the span is closed
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// Trace of one orchestration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub spans: Vec<Span>,
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

impl Trace {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            spans: Vec::new(),
        }
    }

    /// Id of the most recently opened span that is still open
    pub fn current_span(&self) -> Option<String> {
        self.spans
            .iter()
            .rev()
            .find(|s| s.is_open())
            .map(|s| s.id.clone())
    }

    /// Open a span as a child of [`Trace::current_span`] and return its id
    pub fn start_span(&mut self, agent_id: &str, operation: impl Into<String>) -> String {
        let parent_id = self.current_span();

        let id = uuid::Uuid::new_v4().to_string();
        self.spans.push(Span {
            id: id.clone(),
            parent_id,
            agent_id: agent_id.to_string(),
            operation: operation.into(),
            start_time: Utc::now(),
            end_time: None,
            attributes: Map::new(),
            events: Vec::new(),
        });
        id
    }

    /// Stamp the span's end time. Closing an already closed span is a no-op.
    pub fn end_span(&mut self, span_id: &str) {
        if let Some(span) = self.span_mut(span_id) {
            if span.end_time.is_none() {
                span.end_time = Some(Utc::now());
            }
        }
    }

    /// Append an event with its own timestamp
    pub fn add_event(&mut self, span_id: &str, name: impl Into<String>, attributes: Map<String, Value>) {
        if let Some(span) = self.span_mut(span_id) {
            span.events.push(SpanEvent {
                timestamp: Utc::now(),
                name: name.into(),
                attributes,
            });
        }
    }

    pub fn set_attribute(&mut self, span_id: &str, key: impl Into<String>, value: Value) {
        if let Some(span) = self.span_mut(span_id) {
            span.attributes.insert(key.into(), value);
        }
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.id == span_id)
    }

    fn span_mut(&mut self, span_id: &str) -> Option<&mut Span> {
        self.spans.iter_mut().rev().find(|s| s.id == span_id)
    }

    /// Spans whose operation name matches exactly
    pub fn spans_named<'a>(&'a self, operation: &'a str) -> impl Iterator<Item = &'a Span> + 'a {
        self.spans.iter().filter(move |s| s.operation == operation)
    }

    pub fn open_spans(&self) -> usize {
        self.spans.iter().filter(|s| s.is_open()).count()
    }

    /// Stamp the trace end time
    pub fn finish(&mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
    }
}

/// Build an attribute map from key/value pairs
///
/// ```
/// use hive_engine::trace::attrs;
/// use serde_json::json;
///
/// let map = attrs([("step", json!("step-1")), ("ok", json!(true))]);
/// assert_eq!(map.len(), 2);
/// ```
pub fn attrs<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_span_lifecycle() {
        let mut trace = Trace::new();
        let id = trace.start_span("agent-1", "Director.plan");
        assert_eq!(trace.open_spans(), 1);

        trace.add_event(&id, "recall.miss", Map::new());
        trace.set_attribute(&id, "plan.steps", json!(3));
        trace.end_span(&id);

        let span = trace.span(&id).unwrap();
        assert!(span.end_time.is_some());
        assert_eq!(span.events.len(), 1);
        assert_eq!(span.attributes["plan.steps"], json!(3));
        assert_eq!(trace.open_spans(), 0);
    }

    #[test]
    fn test_parent_is_most_recent_open_span() {
        let mut trace = Trace::new();
        let outer = trace.start_span("a", "outer");
        let inner = trace.start_span("a", "inner");
        assert_eq!(trace.span(&inner).unwrap().parent_id.as_deref(), Some(outer.as_str()));

        trace.end_span(&inner);
        let sibling = trace.start_span("a", "sibling");
        assert_eq!(trace.span(&sibling).unwrap().parent_id.as_deref(), Some(outer.as_str()));

        trace.end_span(&sibling);
        trace.end_span(&outer);
        let root = trace.start_span("a", "root");
        assert!(trace.span(&root).unwrap().parent_id.is_none());
    }

    #[test]
    fn test_end_span_is_idempotent() {
        let mut trace = Trace::new();
        let id = trace.start_span("a", "op");
        trace.end_span(&id);
        let first = trace.span(&id).unwrap().end_time;
        trace.end_span(&id);
        assert_eq!(trace.span(&id).unwrap().end_time, first);
    }

    #[test]
    fn test_unknown_span_is_ignored() {
        let mut trace = Trace::new();
        trace.end_span("missing");
        trace.add_event("missing", "x", Map::new());
        assert!(trace.spans.is_empty());
    }

    #[test]
    fn test_spans_named() {
        let mut trace = Trace::new();
        trace.start_span("a", "Code.plan");
        trace.start_span("a", "Code.model");
        trace.start_span("a", "Code.model");
        assert_eq!(trace.spans_named("Code.model").count(), 2);
    }
}
