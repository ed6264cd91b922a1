//! Thinking and metrics tracking.
//!
//! A [`ThinkingTracker`] records a timestamped event stream for one agent
//! invocation and keeps aggregate metrics alongside it. When an [`EventSink`]
//! is attached every recorded event is also pushed out as a
//! [`TelemetryEnvelope`]; without a sink the tracker still accumulates.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// One occurrence during an agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThinkingEvent {
    /// A reasoning interval opened
    ThinkingStart {
        /// Id returned by `start_thinking`
        thought_id: String,
        /// What the agent is reasoning about
        context: String,
    },
    /// A reasoning interval closed
    ThinkingEnd {
        /// Id returned by `start_thinking`
        thought_id: String,
        /// Outcome of the interval
        result: String,
        /// Interval length
        duration_ms: u64,
    },
    /// Intermediate reasoning step
    ThoughtStep {
        /// Step text
        thought: String,
    },
    /// A tool was invoked
    ToolUse {
        /// Tool name
        tool: String,
        /// Arguments passed
        input: Value,
        /// Returned value, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        /// Call duration, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    /// A workflow changed status
    WorkflowUpdate {
        /// Workflow id
        workflow_id: String,
        /// Workflow name
        name: String,
        /// New status
        status: String,
    },
    /// A model produced output
    ModelUse {
        /// Model name
        model: String,
        /// Provider name
        provider: String,
        /// Tokens consumed
        tokens: u64,
    },
    /// Something went wrong
    Error {
        /// Error message
        message: String,
        /// Where it happened
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// An action is being retried
    Retry {
        /// Action retried
        action: String,
        /// Attempt number, starting at 1
        attempt: u32,
    },
    /// Confidence in the current answer
    Confidence {
        /// Score in `0.0..=1.0`
        score: f64,
        /// Why
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
}

impl ThinkingEvent {
    /// Variant tag as used on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ThinkingStart { .. } => "thinking_start",
            Self::ThinkingEnd { .. } => "thinking_end",
            Self::ThoughtStep { .. } => "thought_step",
            Self::ToolUse { .. } => "tool_use",
            Self::WorkflowUpdate { .. } => "workflow_update",
            Self::ModelUse { .. } => "model_use",
            Self::Error { .. } => "error",
            Self::Retry { .. } => "retry",
            Self::Confidence { .. } => "confidence",
        }
    }

    /// Variant payload without the tag
    pub fn payload(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("type");
        }
        value
    }
}

/// Event with its position and time in the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    /// Position in the stream, starting at 0
    pub sequence: u64,
    /// Recording time, never earlier than the previous event
    pub timestamp: DateTime<Utc>,
    /// The event
    #[serde(flatten)]
    pub event: ThinkingEvent,
}

/// Aggregates derived from the event stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingMetrics {
    /// Sum of closed reasoning intervals
    pub thinking_duration_ms: u64,
    /// Distinct tools in first-use order
    pub tools_used: Vec<String>,
    /// Total number of tool calls
    pub tool_calls: u64,
    /// Tokens across all model uses
    pub total_tokens: u64,
    /// Distinct models in first-use order
    pub models_used: Vec<String>,
    /// Error messages
    pub errors: Vec<String>,
    /// Number of retries
    pub retry_count: u32,
    /// Latest confidence score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Full record of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingSummary {
    /// Invocation id
    pub invocation_id: String,
    /// When the tracker was created
    pub started_at: DateTime<Utc>,
    /// Wall-clock time since creation
    pub total_duration_ms: u64,
    /// Every recorded event
    pub events: Vec<RecordedEvent>,
    /// Aggregates
    pub metrics: ThinkingMetrics,
}

impl ThinkingSummary {
    /// Events of the given wire type
    pub fn events_of_type<'a>(&'a self, event_type: &'a str) -> impl Iterator<Item = &'a RecordedEvent> + 'a {
        self.events.iter().filter(move |e| e.event.event_type() == event_type)
    }
}

/// Presentation-ready projection of a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayData {
    /// Formatted total duration
    pub total_duration: String,
    /// Formatted thinking duration
    pub thinking_duration: String,
    /// Formatted token count
    pub tokens: String,
    /// Tools with their icon keys
    pub tools: Vec<DisplayItem>,
    /// Models used
    pub models: Vec<String>,
    /// One line per event
    pub steps: Vec<DisplayItem>,
    /// Number of errors
    pub error_count: usize,
    /// Number of retries
    pub retry_count: u32,
    /// Confidence as a percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

/// Label with an icon key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayItem {
    /// Icon key understood by the renderer
    pub icon: String,
    /// Text to show
    pub label: String,
}

/// Telemetry envelope pushed to an event sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEnvelope {
    /// Always `thinking_process`
    #[serde(rename = "type")]
    pub kind: String,
    /// Event variant tag
    pub event_type: String,
    /// Variant payload
    pub data: Value,
    /// Invocation the event belongs to
    pub invocation_id: String,
    /// ISO-8601 timestamp
    pub timestamp: String,
}

impl TelemetryEnvelope {
    /// Envelope kind for tracker events
    pub const KIND: &'static str = "thinking_process";

    /// Serialize to a JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Destination for telemetry envelopes
pub trait EventSink: Send + Sync {
    /// Push an envelope; returns `false` when the sink no longer accepts events
    fn send(&self, envelope: TelemetryEnvelope) -> bool;
}

impl EventSink for mpsc::UnboundedSender<TelemetryEnvelope> {
    fn send(&self, envelope: TelemetryEnvelope) -> bool {
        mpsc::UnboundedSender::send(self, envelope).is_ok()
    }
}

impl EventSink for broadcast::Sender<TelemetryEnvelope> {
    fn send(&self, envelope: TelemetryEnvelope) -> bool {
        broadcast::Sender::send(self, envelope).is_ok()
    }
}

#[derive(Debug)]
struct TrackerState {
    events: Vec<RecordedEvent>,
    open_thoughts: HashMap<String, Instant>,
    next_thought: u64,
    last_timestamp: DateTime<Utc>,
    metrics: ThinkingMetrics,
}

/// Per-invocation event and metrics recorder
pub struct ThinkingTracker {
    invocation_id: String,
    started: Instant,
    started_at: DateTime<Utc>,
    sink: Option<Arc<dyn EventSink>>,
    state: Mutex<TrackerState>,
}

impl fmt::Debug for ThinkingTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThinkingTracker")
            .field("invocation_id", &self.invocation_id)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl ThinkingTracker {
    /// Create a tracker with no sink
    pub fn new(invocation_id: impl Into<String>) -> Self {
        let started_at = Utc::now();
        Self {
            invocation_id: invocation_id.into(),
            started: Instant::now(),
            started_at,
            sink: None,
            state: Mutex::new(TrackerState {
                events: Vec::new(),
                open_thoughts: HashMap::new(),
                next_thought: 1,
                last_timestamp: started_at,
                metrics: ThinkingMetrics::default(),
            }),
        }
    }

    /// Attach a live sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Invocation id
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Open a reasoning interval, returning its id
    pub fn start_thinking(&self, context: impl Into<String>) -> String {
        let thought_id = {
            let mut state = self.lock();
            let id = format!("thought_{}", state.next_thought);
            state.next_thought += 1;
            state.open_thoughts.insert(id.clone(), Instant::now());
            id
        };
        self.record(ThinkingEvent::ThinkingStart { thought_id: thought_id.clone(), context: context.into() });
        thought_id
    }

    /// Close a reasoning interval; `None` if the id is not open
    pub fn end_thinking(&self, thought_id: &str, result: impl Into<String>) -> Option<Duration> {
        let opened = self.lock().open_thoughts.remove(thought_id)?;
        let elapsed = opened.elapsed();
        self.record(ThinkingEvent::ThinkingEnd {
            thought_id: thought_id.to_string(),
            result: result.into(),
            duration_ms: elapsed.as_millis() as u64,
        });
        Some(elapsed)
    }

    /// Record an intermediate reasoning step
    pub fn track_thought(&self, thought: impl Into<String>) {
        self.record(ThinkingEvent::ThoughtStep { thought: thought.into() });
    }

    /// Record a tool invocation
    pub fn track_tool_use(
        &self,
        tool: impl Into<String>,
        input: Value,
        output: Option<Value>,
        duration: Option<Duration>,
    ) {
        self.record(ThinkingEvent::ToolUse {
            tool: tool.into(),
            input,
            output,
            duration_ms: duration.map(|d| d.as_millis() as u64),
        });
    }

    /// Record model output
    pub fn track_model_use(&self, model: impl Into<String>, provider: impl Into<String>, tokens: u64) {
        self.record(ThinkingEvent::ModelUse { model: model.into(), provider: provider.into(), tokens });
    }

    /// Record a workflow status change
    pub fn track_workflow(&self, workflow_id: impl Into<String>, name: impl Into<String>, status: impl Into<String>) {
        self.record(ThinkingEvent::WorkflowUpdate {
            workflow_id: workflow_id.into(),
            name: name.into(),
            status: status.into(),
        });
    }

    /// Record an error
    pub fn track_error(&self, message: impl Into<String>, context: Option<&str>) {
        self.record(ThinkingEvent::Error { message: message.into(), context: context.map(str::to_string) });
    }

    /// Record a retry
    pub fn track_retry(&self, action: impl Into<String>, attempt: u32) {
        self.record(ThinkingEvent::Retry { action: action.into(), attempt });
    }

    /// Record a confidence score, clamped to `0.0..=1.0`
    pub fn set_confidence(&self, score: f64, reasoning: Option<&str>) {
        self.record(ThinkingEvent::Confidence {
            score: score.clamp(0.0, 1.0),
            reasoning: reasoning.map(str::to_string),
        });
    }

    /// Push an arbitrary payload to the sink, if one is attached
    ///
    /// Returns whether the sink accepted it.
    pub fn emit(&self, event_type: &str, data: Value) -> bool {
        let mut state = self.lock();
        let timestamp = Utc::now().max(state.last_timestamp);
        state.last_timestamp = timestamp;
        self.emit_at(event_type, data, timestamp)
    }

    /// Events and metrics accumulated so far
    pub fn summary(&self) -> ThinkingSummary {
        let state = self.lock();
        ThinkingSummary {
            invocation_id: self.invocation_id.clone(),
            started_at: self.started_at,
            total_duration_ms: self.started.elapsed().as_millis() as u64,
            events: state.events.clone(),
            metrics: state.metrics.clone(),
        }
    }

    /// Presentation projection of [`Self::summary`]
    pub fn display_data(&self) -> DisplayData {
        display_data(&self.summary())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // The sink is called with the state lock held so it sees events in
    // sequence order; sinks must not call back into the tracker.
    fn record(&self, event: ThinkingEvent) {
        let mut state = self.lock();
        let timestamp = Utc::now().max(state.last_timestamp);
        state.last_timestamp = timestamp;
        apply_metrics(&mut state.metrics, &event);
        let recorded = RecordedEvent { sequence: state.events.len() as u64, timestamp, event };
        let (event_type, data) = (recorded.event.event_type(), recorded.event.payload());
        state.events.push(recorded);
        self.emit_at(event_type, data, timestamp);
    }

    fn emit_at(&self, event_type: &str, data: Value, timestamp: DateTime<Utc>) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        let envelope = TelemetryEnvelope {
            kind: TelemetryEnvelope::KIND.to_string(),
            event_type: event_type.to_string(),
            data,
            invocation_id: self.invocation_id.clone(),
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let accepted = sink.send(envelope);
        if !accepted {
            debug!(invocation_id = %self.invocation_id, event_type, "Event sink closed, envelope dropped");
        }
        accepted
    }
}

fn push_distinct(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

fn apply_metrics(metrics: &mut ThinkingMetrics, event: &ThinkingEvent) {
    match event {
        ThinkingEvent::ThinkingEnd { duration_ms, .. } => metrics.thinking_duration_ms += duration_ms,
        ThinkingEvent::ToolUse { tool, .. } => {
            metrics.tool_calls += 1;
            push_distinct(&mut metrics.tools_used, tool);
        }
        ThinkingEvent::ModelUse { model, tokens, .. } => {
            metrics.total_tokens += tokens;
            push_distinct(&mut metrics.models_used, model);
        }
        ThinkingEvent::Error { message, .. } => metrics.errors.push(message.clone()),
        ThinkingEvent::Retry { .. } => metrics.retry_count += 1,
        ThinkingEvent::Confidence { score, .. } => metrics.confidence = Some(*score),
        ThinkingEvent::ThinkingStart { .. }
        | ThinkingEvent::ThoughtStep { .. }
        | ThinkingEvent::WorkflowUpdate { .. } => {}
    }
}

/// Derive display data from a summary
pub fn display_data(summary: &ThinkingSummary) -> DisplayData {
    let metrics = &summary.metrics;
    DisplayData {
        total_duration: format_duration(summary.total_duration_ms),
        thinking_duration: format_duration(metrics.thinking_duration_ms),
        tokens: format_tokens(metrics.total_tokens),
        tools: metrics
            .tools_used
            .iter()
            .map(|tool| DisplayItem { icon: tool_icon(tool).to_string(), label: tool.clone() })
            .collect(),
        models: metrics.models_used.clone(),
        steps: summary.events.iter().map(|e| step_item(&e.event)).collect(),
        error_count: metrics.errors.len(),
        retry_count: metrics.retry_count,
        confidence: metrics.confidence.map(|c| format!("{:.0}%", c * 100.0)),
    }
}

fn step_item(event: &ThinkingEvent) -> DisplayItem {
    let (icon, label) = match event {
        ThinkingEvent::ThinkingStart { context, .. } => ("brain", format!("Thinking: {}", context)),
        ThinkingEvent::ThinkingEnd { duration_ms, .. } => {
            ("brain", format!("Thought for {}", format_duration(*duration_ms)))
        }
        ThinkingEvent::ThoughtStep { thought } => ("brain", thought.clone()),
        ThinkingEvent::ToolUse { tool, duration_ms, .. } => (
            tool_icon(tool),
            match duration_ms {
                Some(ms) => format!("{} ({})", tool, format_duration(*ms)),
                None => tool.clone(),
            },
        ),
        ThinkingEvent::WorkflowUpdate { name, status, .. } => ("workflow", format!("{}: {}", name, status)),
        ThinkingEvent::ModelUse { model, tokens, .. } => {
            ("cpu", format!("{} ({} tokens)", model, format_tokens(*tokens)))
        }
        ThinkingEvent::Error { message, .. } => ("alert", message.clone()),
        ThinkingEvent::Retry { action, attempt } => ("refresh", format!("Retry {} (attempt {})", action, attempt)),
        ThinkingEvent::Confidence { score, .. } => ("gauge", format!("Confidence {:.0}%", score * 100.0)),
    };
    DisplayItem { icon: icon.to_string(), label }
}

/// Icon key for a tool name
pub fn tool_icon(tool: &str) -> &'static str {
    let name = tool.to_ascii_lowercase();
    if ["mail", "message", "send"].iter().any(|k| name.contains(k)) {
        "mail"
    } else if ["calendar", "event", "meeting"].iter().any(|k| name.contains(k)) {
        "calendar"
    } else if ["search", "find", "lookup"].iter().any(|k| name.contains(k)) {
        "search"
    } else {
        "tool"
    }
}

/// `850ms`, `2.5s`, `3m 5s`
pub fn format_duration(ms: u64) -> String {
    let tenths = (ms + 50) / 100;
    if ms < 1_000 {
        format!("{}ms", ms)
    } else if tenths < 600 {
        format!("{}.{}s", tenths / 10, tenths % 10)
    } else {
        let secs = (ms + 500) / 1_000;
        format!("{}m {}s", secs / 60, secs % 60)
    }
}

/// `950`, `1.5k`, `2.3M`
pub fn format_tokens(tokens: u64) -> String {
    if tokens < 1_000 {
        tokens.to_string()
    } else if (tokens + 50) / 100 < 10_000 {
        format!("{:.1}k", tokens as f64 / 1_000.0)
    } else {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    }
}
