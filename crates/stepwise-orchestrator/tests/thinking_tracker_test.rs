//! Integration tests for the thinking tracker and its event sinks

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use stepwise_orchestrator::thinking::{format_duration, format_tokens};
use stepwise_orchestrator::{EventSink, SessionStore, TelemetryEnvelope, ThinkingTracker};
use tokio::sync::mpsc;

#[test]
fn test_single_tool_use_is_counted_once() {
    let tracker = ThinkingTracker::new("inv-1");
    tracker.track_tool_use("x", json!({"q": 1}), None, None);

    let summary = tracker.summary();
    assert_eq!(summary.events_of_type("tool_use").count(), 1);
    assert_eq!(summary.metrics.tools_used, vec!["x".to_string()]);
    assert_eq!(summary.metrics.tool_calls, 1);
}

#[test]
fn test_repeated_tool_is_listed_once() {
    let tracker = ThinkingTracker::new("inv-1");
    tracker.track_tool_use("search", json!({}), None, Some(Duration::from_millis(5)));
    tracker.track_tool_use("send_email", json!({}), None, None);
    tracker.track_tool_use("search", json!({}), None, None);

    let metrics = tracker.summary().metrics;
    assert_eq!(metrics.tools_used, vec!["search".to_string(), "send_email".to_string()]);
    assert_eq!(metrics.tool_calls, 3);
}

#[test]
fn test_sequence_numbers_are_ordered() {
    let tracker = ThinkingTracker::new("inv-1");
    let thought = tracker.start_thinking("planning");
    tracker.track_thought("two emails needed");
    tracker.track_model_use("model-a", "provider-a", 1200);
    tracker.end_thinking(&thought, "plan ready");

    let summary = tracker.summary();
    let sequences: Vec<u64> = summary.events.iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    assert!(summary.events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(summary.metrics.total_tokens, 1200);
}

#[tokio::test]
async fn test_envelopes_reach_the_session_sink() {
    let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryEnvelope>();
    let sink: Arc<dyn EventSink> = Arc::new(tx);
    let store = SessionStore::new();
    let ctx = store.open("conv-9", Some(sink)).await;

    ctx.tracker().track_tool_use("send_email", json!({"to": "a@x.com"}), Some(json!("sent")), None);

    let envelope = rx.recv().await.unwrap();
    assert_eq!(envelope.kind, TelemetryEnvelope::KIND);
    assert_eq!(envelope.event_type, "tool_use");
    assert_eq!(envelope.invocation_id, "conv-9");

    let wire: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
    assert_eq!(wire["type"], "thinking_process");
    assert_eq!(wire["eventType"], "tool_use");
    assert_eq!(wire["data"]["tool"], "send_email");
    assert!(wire["data"].get("type").is_none());
    assert!(wire["timestamp"].as_str().is_some());
}

#[test]
fn test_closed_sink_does_not_disturb_tracking() {
    let (tx, rx) = mpsc::unbounded_channel::<TelemetryEnvelope>();
    drop(rx);
    let tracker = ThinkingTracker::new("inv-1").with_sink(Arc::new(tx));

    tracker.track_error("smtp down", Some("step 2 (send_email)"));
    assert!(!tracker.emit("custom", json!({"k": "v"})));
    assert_eq!(tracker.summary().metrics.errors, vec!["smtp down".to_string()]);
}

#[test]
fn test_formatting_helpers() {
    assert_eq!(format_duration(250), "250ms");
    assert_eq!(format_duration(1500), "1.5s");
    assert_eq!(format_tokens(999), "999");
    assert_eq!(format_tokens(1500), "1.5k");
}

#[test]
fn test_sink_sees_events_in_sequence_order_under_contention() {
    let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryEnvelope>();
    let tracker = ThinkingTracker::new("inv-1").with_sink(Arc::new(tx));

    std::thread::scope(|scope| {
        for worker in 0..8u32 {
            let tracker = &tracker;
            scope.spawn(move || {
                for attempt in 0..50u32 {
                    tracker.track_retry(format!("worker-{}", worker), attempt);
                }
            });
        }
    });

    let mut delivered: Vec<Value> = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        delivered.push(envelope.data);
    }
    let recorded: Vec<Value> = tracker.summary().events.iter().map(|e| e.event.payload()).collect();
    assert_eq!(delivered.len(), 400);
    assert_eq!(delivered, recorded);
}
