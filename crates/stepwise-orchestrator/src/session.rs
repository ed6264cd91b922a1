//! Session scoping.
//!
//! Every orchestration call receives the [`SessionContext`] it belongs to, so
//! overlapping conversations never share a task plan, action history or
//! tracker. [`SessionStore`] keys open sessions by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{OrchestrationError, Result};
use crate::plan::TaskPlan;
use crate::thinking::{EventSink, ThinkingSummary, ThinkingTracker};

/// An action tool call made during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Tool name
    pub tool: String,
    /// Arguments passed
    pub arguments: Value,
    /// Output text returned
    pub output: String,
    /// Whether the call succeeded
    pub success: bool,
    /// When the call finished
    pub at: DateTime<Utc>,
}

/// Action history plus the index where the current request's actions begin
#[derive(Debug, Default)]
struct ActionLog {
    records: Vec<ActionRecord>,
    request_start: usize,
}

impl ActionLog {
    fn current(&self) -> &[ActionRecord] {
        &self.records[self.request_start.min(self.records.len())..]
    }
}

/// State of one conversation or invocation
pub struct SessionContext {
    session_id: String,
    created_at: DateTime<Utc>,
    plan: Mutex<TaskPlan>,
    request: RwLock<Option<String>>,
    actions: Mutex<ActionLog>,
    tracker: Arc<ThinkingTracker>,
    metadata: RwLock<Map<String, Value>>,
    cancel: CancellationToken,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id)
            .field("created_at", &self.created_at)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Create a session with a tracker that has no sink
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let tracker = ThinkingTracker::new(session_id.clone());
        Self::with_tracker(session_id, tracker)
    }

    /// Create a session whose tracker pushes to `sink`
    pub fn with_sink(session_id: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        let session_id = session_id.into();
        let tracker = ThinkingTracker::new(session_id.clone()).with_sink(sink);
        Self::with_tracker(session_id, tracker)
    }

    fn with_tracker(session_id: String, tracker: ThinkingTracker) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            plan: Mutex::new(TaskPlan::new()),
            request: RwLock::new(None),
            actions: Mutex::new(ActionLog::default()),
            tracker: Arc::new(tracker),
            metadata: RwLock::new(Map::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` as the session's cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Tracker for this session
    pub fn tracker(&self) -> &Arc<ThinkingTracker> {
        &self.tracker
    }

    /// Token cancelled when the session is closed or cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel in-flight work for this session
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the session was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Record the latest user-facing request
    ///
    /// Actions recorded before this call no longer count toward the new request.
    pub async fn set_request(&self, text: impl Into<String>) {
        let mut actions = self.actions.lock().await;
        actions.request_start = actions.records.len();
        *self.request.write().await = Some(text.into());
    }

    /// Latest user-facing request
    pub async fn request(&self) -> Option<String> {
        self.request.read().await.clone()
    }

    /// Lock the session's task plan
    pub async fn plan(&self) -> MutexGuard<'_, TaskPlan> {
        self.plan.lock().await
    }

    /// Append an action record
    pub async fn record_action(&self, record: ActionRecord) {
        self.actions.lock().await.records.push(record);
    }

    /// Full action history in call order
    pub async fn actions(&self) -> Vec<ActionRecord> {
        self.actions.lock().await.records.clone()
    }

    /// Actions recorded since the latest request was set
    pub async fn request_actions(&self) -> Vec<ActionRecord> {
        self.actions.lock().await.current().to_vec()
    }

    /// Successful call of `tool` with identical arguments made for the latest request
    pub async fn find_successful_action(&self, tool: &str, arguments: &Value) -> Option<ActionRecord> {
        self.actions
            .lock()
            .await
            .current()
            .iter()
            .find(|a| a.success && a.tool == tool && &a.arguments == arguments)
            .cloned()
    }

    /// Set a metadata value
    pub async fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.metadata.write().await.insert(key.into(), value);
    }

    /// Get a metadata value
    pub async fn metadata(&self, key: &str) -> Option<Value> {
        self.metadata.read().await.get(key).cloned()
    }
}

/// Open sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionContext>>>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session, or return the existing one with the same id
    pub async fn open(&self, session_id: &str, sink: Option<Arc<dyn EventSink>>) -> Arc<SessionContext> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(session_id) {
            debug!(session_id = %session_id, "Session already open");
            return Arc::clone(existing);
        }

        let ctx = Arc::new(match sink {
            Some(sink) => SessionContext::with_sink(session_id, sink),
            None => SessionContext::new(session_id),
        });
        sessions.insert(session_id.to_string(), Arc::clone(&ctx));
        info!(session_id = %session_id, "Session opened");
        ctx
    }

    /// Get an open session
    pub async fn get(&self, session_id: &str) -> Result<Arc<SessionContext>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::SessionNotFound(session_id.to_string()))
    }

    /// Close a session, cancelling its work and returning its tracker summary
    pub async fn close(&self, session_id: &str) -> Option<ThinkingSummary> {
        let ctx = self.sessions.write().await.remove(session_id)?;
        ctx.cancel();
        let summary = ctx.tracker().summary();
        info!(
            session_id = %session_id,
            events = summary.events.len(),
            "Session closed"
        );
        Some(summary)
    }

    /// Number of open sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is open
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ids of open sessions, sorted
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Task;
    use serde_json::json;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        let a = store.open("a", None).await;
        let b = store.open("b", None).await;

        a.plan().await.create_plan(vec![Task::new("t1", "Email", "send_email")]).unwrap();
        assert!(a.plan().await.is_active());
        assert!(!b.plan().await.is_active());
        assert_eq!(store.ids().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_open_returns_existing() {
        let store = SessionStore::new();
        let first = store.open("a", None).await;
        first.set_request("email a@x.com").await;
        let second = store.open("a", None).await;
        assert_eq!(second.request().await.as_deref(), Some("email a@x.com"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_cancels_and_summarizes() {
        let store = SessionStore::new();
        let ctx = store.open("a", None).await;
        ctx.tracker().track_tool_use("echo", json!({}), None, None);

        let summary = store.close("a").await.unwrap();
        assert_eq!(summary.invocation_id, "a");
        assert_eq!(summary.events.len(), 1);
        assert!(ctx.is_cancelled());
        assert!(store.close("a").await.is_none());
        assert!(matches!(store.get("a").await, Err(OrchestrationError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_find_successful_action() {
        let ctx = SessionContext::new("s1");
        let args = json!({"to": "a@x.com"});
        ctx.record_action(ActionRecord {
            tool: "send_email".to_string(),
            arguments: args.clone(),
            output: "failed".to_string(),
            success: false,
            at: Utc::now(),
        })
        .await;
        assert!(ctx.find_successful_action("send_email", &args).await.is_none());

        ctx.record_action(ActionRecord {
            tool: "send_email".to_string(),
            arguments: args.clone(),
            output: "Email sent to a@x.com".to_string(),
            success: true,
            at: Utc::now(),
        })
        .await;
        let found = ctx.find_successful_action("send_email", &args).await.unwrap();
        assert_eq!(found.output, "Email sent to a@x.com");
        assert!(ctx.find_successful_action("send_email", &json!({"to": "b@y.com"})).await.is_none());
    }

    #[tokio::test]
    async fn test_new_request_starts_fresh_action_window() {
        let ctx = SessionContext::new("s1");
        let args = json!({"to": "a@x.com"});
        ctx.set_request("email a@x.com the report").await;
        ctx.record_action(ActionRecord {
            tool: "send_email".to_string(),
            arguments: args.clone(),
            output: "Email sent to a@x.com".to_string(),
            success: true,
            at: Utc::now(),
        })
        .await;
        assert_eq!(ctx.request_actions().await.len(), 1);

        ctx.set_request("email a@x.com and b@y.com the updated report").await;
        assert!(ctx.request_actions().await.is_empty());
        assert!(ctx.find_successful_action("send_email", &args).await.is_none());
        assert_eq!(ctx.actions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_metadata() {
        let ctx = SessionContext::new("s1");
        ctx.set_metadata("user", json!("alice")).await;
        assert_eq!(ctx.metadata("user").await, Some(json!("alice")));
        assert_eq!(ctx.metadata("missing").await, None);
    }
}
