//! Workflow scheduler.
//!
//! Each accepted schedule gets one timer task. The task sleeps until the next
//! cron firing, runs the workflow under a deadline, records the outcome and
//! loops until the schedule is stopped or reaches its execution bound.
//!
//! Entry state machine: `Scheduled -> Firing -> (Scheduled | Stopped)`.
//! Stopping a schedule prevents future firings; a firing already in flight
//! runs to completion unless it exceeds the firing deadline.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cron::CronSchedule;
use super::executor::{WorkflowExecutor, WorkflowRunResult};
use super::store::{Workflow, WorkflowStore};
use crate::config::SchedulerConfig;
use crate::error::{OrchestrationError, Result};

/// Lifecycle state of a schedule entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// Waiting for the next firing
    Scheduled,
    /// Workflow is running
    Firing,
    /// Terminal
    Stopped,
}

impl ScheduleState {
    /// Checks if the entry can move to `to`
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Scheduled, Self::Firing | Self::Stopped) | (Self::Firing, Self::Scheduled | Self::Stopped)
        )
    }
}

/// Why a schedule stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reached `max_executions`
    Completed,
    /// Stopped by request
    Requested,
    /// Stopped with every other schedule
    Shutdown,
    /// The cron expression has no further firings
    Exhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Requested => write!(f, "requested"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Outcome of the most recent firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiringResult {
    /// Whether the run succeeded
    pub success: bool,
    /// Report or error message
    pub message: String,
    /// When the firing finished
    pub finished_at: DateTime<Utc>,
}

/// One active recurring trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// Generated id
    pub schedule_id: String,
    /// Workflow fired
    pub workflow_id: String,
    /// Expression as supplied
    pub cron_expression: String,
    /// IANA timezone
    pub timezone: String,
    /// Display name
    pub name: String,
    /// Bound on firings, `None` for unbounded
    pub max_executions: Option<u32>,
    /// Firings started so far
    pub execution_count: u32,
    /// When the schedule was accepted
    pub started_at: DateTime<Utc>,
    /// Lifecycle state
    pub state: ScheduleState,
    /// Start of the most recent firing
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next planned firing
    pub next_run_at: Option<DateTime<Utc>>,
    /// Outcome of the most recent firing
    pub last_result: Option<FiringResult>,
}

/// Request to schedule a workflow
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleRequest {
    /// Workflow to fire
    pub workflow_id: String,
    /// Cron expression
    pub cron_expression: String,
    /// IANA timezone, scheduler default when `None`
    pub timezone: Option<String>,
    /// Bound on firings
    pub max_executions: Option<u32>,
    /// Context merged into every firing
    pub context: Map<String, Value>,
    /// Display name, workflow name when `None`
    pub name: Option<String>,
}

impl ScheduleRequest {
    /// Request firing `workflow_id` on `cron_expression`
    pub fn new(workflow_id: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        Self { workflow_id: workflow_id.into(), cron_expression: cron_expression.into(), ..Self::default() }
    }

    /// Set the timezone
    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Set the execution bound
    #[must_use]
    pub fn with_max_executions(mut self, max: u32) -> Self {
        self.max_executions = Some(max);
        self
    }

    /// Set the caller context
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Scheduler lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleEvent {
    /// A schedule was accepted
    Scheduled {
        /// Schedule id
        schedule_id: String,
        /// Workflow id
        workflow_id: String,
        /// First planned firing
        next_run_at: Option<DateTime<Utc>>,
    },
    /// A firing finished
    Fired {
        /// Schedule id
        schedule_id: String,
        /// 1-based firing number
        execution_number: u32,
        /// Whether the run succeeded
        success: bool,
        /// Report or error message
        message: String,
    },
    /// A schedule was removed
    Stopped {
        /// Schedule id
        schedule_id: String,
        /// Firings started before removal
        execution_count: u32,
        /// Why
        reason: StopReason,
    },
}

/// Read-only snapshot of the active schedules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    /// Number of active schedules
    pub active_schedules: usize,
    /// Active entries, oldest first
    pub schedules: Vec<ScheduleEntry>,
}

struct ActiveSchedule {
    entry: ScheduleEntry,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct SchedulerInner {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<dyn WorkflowExecutor>,
    config: SchedulerConfig,
    schedules: RwLock<HashMap<String, ActiveSchedule>>,
    events: broadcast::Sender<ScheduleEvent>,
    shutdown: CancellationToken,
}

/// Cron-driven, bounded-repetition workflow trigger
#[derive(Clone)]
pub struct WorkflowScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for WorkflowScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowScheduler")
            .field("active", &self.inner.schedules.try_read().map(|s| s.len()).unwrap_or(0))
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowScheduler {
    /// Scheduler over `store` and `executor` with default settings
    pub fn new(store: Arc<dyn WorkflowStore>, executor: Arc<dyn WorkflowExecutor>) -> Self {
        Self::with_config(store, executor, SchedulerConfig::default())
    }

    /// Scheduler with explicit settings
    pub fn with_config(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn WorkflowExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                executor,
                config,
                schedules: RwLock::new(HashMap::new()),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.inner.events.subscribe()
    }

    /// Accept a schedule and start its timer; returns without waiting for a firing
    ///
    /// # Errors
    /// `InvalidSchedule` for `max_executions == 0`, `WorkflowNotFound`,
    /// `InvalidTimezone` or `InvalidCronExpression`. Nothing is registered on error.
    pub async fn schedule_workflow(&self, request: ScheduleRequest) -> Result<String> {
        if request.max_executions == Some(0) {
            return Err(OrchestrationError::InvalidSchedule("maxExecutions must be at least 1".to_string()));
        }

        let workflow = self
            .inner
            .store
            .get(&request.workflow_id)
            .await?
            .ok_or_else(|| OrchestrationError::WorkflowNotFound(request.workflow_id.clone()))?;

        let timezone = request.timezone.clone().unwrap_or_else(|| self.inner.config.default_timezone.clone());
        let cron = CronSchedule::parse(&request.cron_expression, &timezone)?;

        let now = Utc::now();
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        let schedule_id = format!("{}-{}-{}", workflow.id, now.timestamp_millis(), &uuid[..8]);
        let next_run_at = cron.next_after(now);

        let entry = ScheduleEntry {
            schedule_id: schedule_id.clone(),
            workflow_id: workflow.id.clone(),
            cron_expression: cron.expression().to_string(),
            timezone,
            name: request.name.clone().unwrap_or_else(|| workflow.name.clone()),
            max_executions: request.max_executions,
            execution_count: 0,
            started_at: now,
            state: ScheduleState::Scheduled,
            last_run_at: None,
            next_run_at,
            last_result: None,
        };

        let cancel = self.inner.shutdown.child_token();
        {
            // Insert under the lock before the timer can look itself up
            let mut schedules = self.inner.schedules.write().await;
            let handle = tokio::spawn(run_schedule(
                Arc::clone(&self.inner),
                schedule_id.clone(),
                workflow,
                cron,
                request.context,
                cancel.clone(),
            ));
            schedules.insert(schedule_id.clone(), ActiveSchedule { entry, cancel, handle: Some(handle) });
        }

        info!(
            schedule_id = %schedule_id,
            workflow_id = %request.workflow_id,
            cron = %request.cron_expression,
            max_executions = ?request.max_executions,
            "Workflow scheduled"
        );
        self.inner.emit(ScheduleEvent::Scheduled {
            schedule_id: schedule_id.clone(),
            workflow_id: request.workflow_id,
            next_run_at,
        });
        Ok(schedule_id)
    }

    /// Stop a schedule; `false` if it is not active
    pub async fn stop_schedule(&self, schedule_id: &str) -> bool {
        self.inner.remove(schedule_id, StopReason::Requested).await.is_some()
    }

    /// Stop a schedule
    ///
    /// # Errors
    /// `ScheduleNotFound` if it is not active
    pub async fn stop_schedule_strict(&self, schedule_id: &str) -> Result<()> {
        if self.stop_schedule(schedule_id).await {
            Ok(())
        } else {
            Err(OrchestrationError::ScheduleNotFound(schedule_id.to_string()))
        }
    }

    /// Stop every schedule, returning how many were active
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<String> = self.inner.schedules.read().await.keys().cloned().collect();
        let mut stopped = 0;
        for id in ids {
            if self.inner.remove(&id, StopReason::Shutdown).await.is_some() {
                stopped += 1;
            }
        }
        info!(stopped, "All schedules stopped");
        stopped
    }

    /// Stop every schedule and wait up to `grace` for in-flight firings
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut schedules = self.inner.schedules.write().await;
            schedules.values_mut().filter_map(|s| s.handle.take()).collect()
        };
        self.stop_all().await;
        if tokio::time::timeout(grace, futures::future::join_all(handles)).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "Firings still running after shutdown grace period");
        }
    }

    /// Snapshot of the active schedules
    pub async fn get_status(&self) -> SchedulerStatus {
        let mut schedules: Vec<ScheduleEntry> =
            self.inner.schedules.read().await.values().map(|s| s.entry.clone()).collect();
        schedules.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.schedule_id.cmp(&b.schedule_id)));
        SchedulerStatus { active_schedules: schedules.len(), schedules }
    }

    /// One active entry
    pub async fn schedule(&self, schedule_id: &str) -> Option<ScheduleEntry> {
        self.inner.schedules.read().await.get(schedule_id).map(|s| s.entry.clone())
    }

    /// Run a stored workflow once, immediately, under the firing deadline
    ///
    /// # Errors
    /// `WorkflowNotFound`, `Timeout`, or whatever the executor returns
    pub async fn run_now(&self, workflow_id: &str, context: Map<String, Value>) -> Result<WorkflowRunResult> {
        let workflow = self
            .inner
            .store
            .get(workflow_id)
            .await?
            .ok_or_else(|| OrchestrationError::WorkflowNotFound(workflow_id.to_string()))?;
        let deadline = self.inner.config.firing_deadline();
        let cancel = self.inner.shutdown.child_token();
        match tokio::time::timeout(deadline, self.inner.executor.execute(&workflow, &context, cancel.clone())).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(OrchestrationError::Timeout(deadline))
            }
        }
    }
}

impl SchedulerInner {
    fn emit(&self, event: ScheduleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Remove an entry and cancel its timer
    async fn remove(&self, schedule_id: &str, reason: StopReason) -> Option<ScheduleEntry> {
        let mut active = self.schedules.write().await.remove(schedule_id)?;
        active.cancel.cancel();
        active.entry.state = ScheduleState::Stopped;
        active.entry.next_run_at = None;

        info!(
            schedule_id = %schedule_id,
            execution_count = active.entry.execution_count,
            reason = %reason,
            "Schedule stopped"
        );
        self.emit(ScheduleEvent::Stopped {
            schedule_id: schedule_id.to_string(),
            execution_count: active.entry.execution_count,
            reason,
        });
        Some(active.entry)
    }

    /// Move to `Firing` and count the execution; `None` if the entry is gone
    async fn begin_firing(&self, schedule_id: &str, scheduled_at: DateTime<Utc>) -> Option<u32> {
        let mut schedules = self.schedules.write().await;
        let entry = &mut schedules.get_mut(schedule_id)?.entry;
        if !entry.state.can_transition_to(ScheduleState::Firing) {
            return None;
        }
        entry.state = ScheduleState::Firing;
        entry.execution_count += 1;
        entry.last_run_at = Some(scheduled_at);
        entry.next_run_at = None;
        Some(entry.execution_count)
    }

    /// Record the outcome; returns whether the execution bound is reached
    async fn finish_firing(
        &self,
        schedule_id: &str,
        result: FiringResult,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Option<bool> {
        let mut schedules = self.schedules.write().await;
        let entry = &mut schedules.get_mut(schedule_id)?.entry;
        entry.last_result = Some(result);
        let reached = entry.max_executions.is_some_and(|max| entry.execution_count >= max);
        if !reached && entry.state.can_transition_to(ScheduleState::Scheduled) {
            entry.state = ScheduleState::Scheduled;
            entry.next_run_at = next_run_at;
        }
        Some(reached)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn fire(
    inner: &SchedulerInner,
    schedule_id: &str,
    workflow: &Workflow,
    context: &Map<String, Value>,
) -> FiringResult {
    let deadline = inner.config.firing_deadline();
    // Shutdown reaches in-flight firings; stopping a single schedule does not
    let cancel = inner.shutdown.child_token();
    let run = AssertUnwindSafe(inner.executor.execute(workflow, context, cancel.clone())).catch_unwind();

    let (success, message) = match tokio::time::timeout(deadline, run).await {
        Ok(Ok(Ok(result))) => (result.success, result.message),
        Ok(Ok(Err(e))) => (false, e.to_string()),
        Ok(Err(panic)) => (false, format!("executor panicked: {}", panic_message(panic.as_ref()))),
        Err(_) => {
            cancel.cancel();
            warn!(
                schedule_id = %schedule_id,
                deadline_secs = deadline.as_secs(),
                "Firing exceeded deadline"
            );
            (false, OrchestrationError::Timeout(deadline).to_string())
        }
    };
    FiringResult { success, message, finished_at: Utc::now() }
}

async fn run_schedule(
    inner: Arc<SchedulerInner>,
    schedule_id: String,
    workflow: Workflow,
    cron: CronSchedule,
    context: Map<String, Value>,
    cancel: CancellationToken,
) {
    // Planned times never fall behind the clock, so firings missed while a
    // slow run was in flight are skipped rather than replayed
    let mut planned = cron.next_after(Utc::now());
    loop {
        let Some(next) = planned else {
            inner.remove(&schedule_id, StopReason::Exhausted).await;
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }

        let Some(execution_number) = inner.begin_firing(&schedule_id, next).await else {
            break;
        };
        debug!(schedule_id = %schedule_id, execution_number, "Firing workflow");

        let mut firing_context = context.clone();
        firing_context.insert("executionNumber".to_string(), Value::from(execution_number));
        firing_context.insert("scheduledAt".to_string(), Value::from(next.to_rfc3339()));
        firing_context.insert("scheduleId".to_string(), Value::from(schedule_id.clone()));

        let result = fire(&inner, &schedule_id, &workflow, &firing_context).await;
        if result.success {
            info!(schedule_id = %schedule_id, execution_number, "Scheduled workflow succeeded");
        } else {
            error!(
                schedule_id = %schedule_id,
                execution_number,
                error = %result.message,
                "Scheduled workflow failed"
            );
        }

        let event = ScheduleEvent::Fired {
            schedule_id: schedule_id.clone(),
            execution_number,
            success: result.success,
            message: result.message.clone(),
        };
        planned = cron.next_after(next.max(Utc::now()));
        let reached = inner.finish_firing(&schedule_id, result, planned).await;
        inner.emit(event);

        match reached {
            Some(true) => {
                inner.remove(&schedule_id, StopReason::Completed).await;
                break;
            }
            Some(false) => {}
            None => break,
        }
    }
}
