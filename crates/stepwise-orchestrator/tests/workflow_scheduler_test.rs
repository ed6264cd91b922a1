//! Integration tests for the workflow scheduler
//!
//! Every test uses the six-field every-second expression and bounded waits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stepwise_orchestrator::error::Result;
use stepwise_orchestrator::{
    FunctionRegistry, InMemoryWorkflowStore, MultiStepExecutor, OrchestrationError, ScheduleEvent, ScheduleRequest,
    SchedulerConfig, SessionContext, StepWorkflowExecutor, StopReason, Tool, ToolArguments, ToolHandler,
    ToolParameters, ToolResult, Workflow, WorkflowExecutor, WorkflowRunResult, WorkflowScheduler,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const EVERY_SECOND: &str = "* * * * * *";

#[derive(Default)]
struct Counting {
    runs: AtomicUsize,
}

#[async_trait]
impl WorkflowExecutor for Counting {
    async fn execute(
        &self,
        workflow: &Workflow,
        context: &Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Result<WorkflowRunResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(WorkflowRunResult {
            success: true,
            message: format!("{} run {}", workflow.name, context["executionNumber"]),
            output: Value::Null,
        })
    }
}

struct Panicking;

#[async_trait]
impl WorkflowExecutor for Panicking {
    async fn execute(
        &self,
        _workflow: &Workflow,
        _context: &Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Result<WorkflowRunResult> {
        panic!("workflow exploded");
    }
}

/// Signals when a firing starts and when it finishes
struct Slow {
    started: mpsc::UnboundedSender<u64>,
    finished: mpsc::UnboundedSender<u64>,
}

#[async_trait]
impl WorkflowExecutor for Slow {
    async fn execute(
        &self,
        _workflow: &Workflow,
        context: &Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Result<WorkflowRunResult> {
        let n = context["executionNumber"].as_u64().unwrap_or(0);
        let _ = self.started.send(n);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let _ = self.finished.send(n);
        Ok(WorkflowRunResult { success: true, message: "slow".to_string(), output: Value::Null })
    }
}

/// Never finishes unless cancelled
struct Hangs;

#[async_trait]
impl WorkflowExecutor for Hangs {
    async fn execute(
        &self,
        _workflow: &Workflow,
        _context: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRunResult> {
        cancel.cancelled().await;
        Err(OrchestrationError::Cancelled)
    }
}

/// Records when each firing was planned and when it finished
#[derive(Default)]
struct Lagging {
    runs: std::sync::Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

#[async_trait]
impl WorkflowExecutor for Lagging {
    async fn execute(
        &self,
        _workflow: &Workflow,
        context: &Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Result<WorkflowRunResult> {
        let scheduled_at = context["scheduledAt"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        self.runs.lock().unwrap().push((scheduled_at, Utc::now()));
        Ok(WorkflowRunResult { success: true, message: "lagging".to_string(), output: Value::Null })
    }
}

/// Waits for its cancellation token and counts how often that happened
struct AwaitsCancel {
    started: mpsc::UnboundedSender<u64>,
    cancelled: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkflowExecutor for AwaitsCancel {
    async fn execute(
        &self,
        _workflow: &Workflow,
        context: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRunResult> {
        let _ = self.started.send(context["executionNumber"].as_u64().unwrap_or(0));
        cancel.cancelled().await;
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        Err(OrchestrationError::Cancelled)
    }
}

fn store() -> Arc<InMemoryWorkflowStore> {
    Arc::new(InMemoryWorkflowStore::with_workflows([Workflow {
        id: "digest".to_string(),
        name: "Morning digest".to_string(),
        steps: json!([]),
        description: None,
    }]))
}

async fn next_stopped(events: &mut broadcast::Receiver<ScheduleEvent>) -> (u32, StopReason) {
    loop {
        match events.recv().await {
            Ok(ScheduleEvent::Stopped { execution_count, reason, .. }) => return (execution_count, reason),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
        }
    }
}

#[tokio::test]
async fn test_bounded_schedule_removes_itself_after_max_executions() {
    let executor = Arc::new(Counting::default());
    let scheduler = WorkflowScheduler::new(store(), Arc::clone(&executor) as Arc<dyn WorkflowExecutor>);
    let mut events = scheduler.subscribe();

    let id = scheduler
        .schedule_workflow(ScheduleRequest::new("digest", EVERY_SECOND).with_max_executions(3))
        .await
        .unwrap();
    assert_eq!(scheduler.get_status().await.active_schedules, 1);

    let (count, reason) = timeout(Duration::from_secs(10), next_stopped(&mut events)).await.unwrap();
    assert_eq!(count, 3);
    assert_eq!(reason, StopReason::Completed);
    assert_eq!(scheduler.get_status().await.active_schedules, 0);
    assert!(scheduler.schedule(&id).await.is_none());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(executor.runs.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_invalid_cron_registers_nothing() {
    let scheduler = WorkflowScheduler::new(store(), Arc::new(Counting::default()));

    let result = scheduler.schedule_workflow(ScheduleRequest::new("digest", "not-a-cron")).await;

    assert!(matches!(result, Err(OrchestrationError::InvalidCronExpression { .. })));
    assert_eq!(scheduler.get_status().await.active_schedules, 0);
}

#[tokio::test]
async fn test_fired_events_carry_execution_numbers() {
    let scheduler = WorkflowScheduler::new(store(), Arc::new(Counting::default()));
    let mut events = scheduler.subscribe();
    scheduler
        .schedule_workflow(ScheduleRequest::new("digest", EVERY_SECOND).with_max_executions(2))
        .await
        .unwrap();

    let mut fired = Vec::new();
    timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(ScheduleEvent::Fired { execution_number, success, message, .. }) => {
                    assert!(success);
                    assert_eq!(message, format!("Morning digest run {}", execution_number));
                    fired.push(execution_number);
                }
                Ok(ScheduleEvent::Stopped { .. }) => break,
                Ok(ScheduleEvent::Scheduled { .. }) | Err(_) => {}
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(fired, vec![1, 2]);
}

#[tokio::test]
async fn test_panicking_firing_does_not_kill_the_schedule() {
    let scheduler = WorkflowScheduler::new(store(), Arc::new(Panicking));
    let mut events = scheduler.subscribe();
    scheduler
        .schedule_workflow(ScheduleRequest::new("digest", EVERY_SECOND).with_max_executions(2))
        .await
        .unwrap();

    let mut failures = 0;
    let (count, reason) = timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(ScheduleEvent::Fired { success, message, .. }) => {
                    assert!(!success);
                    assert!(message.contains("workflow exploded"));
                    failures += 1;
                }
                Ok(ScheduleEvent::Stopped { execution_count, reason, .. }) => break (execution_count, reason),
                Ok(ScheduleEvent::Scheduled { .. }) | Err(_) => {}
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failures, 2);
    assert_eq!(count, 2);
    assert_eq!(reason, StopReason::Completed);
}

#[tokio::test]
async fn test_stop_lets_in_flight_firing_finish() {
    let (started_tx, mut started) = mpsc::unbounded_channel();
    let (finished_tx, mut finished) = mpsc::unbounded_channel();
    let scheduler =
        WorkflowScheduler::new(store(), Arc::new(Slow { started: started_tx, finished: finished_tx }));
    let id = scheduler.schedule_workflow(ScheduleRequest::new("digest", EVERY_SECOND)).await.unwrap();

    let first = timeout(Duration::from_secs(5), started.recv()).await.unwrap();
    assert_eq!(first, Some(1));
    assert!(scheduler.stop_schedule(&id).await);
    assert!(!scheduler.stop_schedule(&id).await);

    let done = timeout(Duration::from_secs(5), finished.recv()).await.unwrap();
    assert_eq!(done, Some(1));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(started.try_recv().is_err());
    assert_eq!(scheduler.get_status().await.active_schedules, 0);
}

#[tokio::test]
async fn test_slow_firing_skips_missed_slots() {
    let executor = Arc::new(Lagging::default());
    let scheduler = WorkflowScheduler::new(store(), Arc::clone(&executor) as Arc<dyn WorkflowExecutor>);
    let mut events = scheduler.subscribe();
    scheduler
        .schedule_workflow(ScheduleRequest::new("digest", EVERY_SECOND).with_max_executions(3))
        .await
        .unwrap();

    let (count, _) = timeout(Duration::from_secs(15), next_stopped(&mut events)).await.unwrap();
    assert_eq!(count, 3);

    let runs = executor.runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 3);
    for pair in runs.windows(2) {
        let (_, previous_finished) = pair[0];
        let (scheduled_at, _) = pair[1];
        assert!(
            scheduled_at >= previous_finished,
            "firing planned for {} although the previous one ran until {}",
            scheduled_at,
            previous_finished
        );
    }
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_firing() {
    let (started_tx, mut started) = mpsc::unbounded_channel();
    let cancelled = Arc::new(AtomicUsize::new(0));
    let executor = AwaitsCancel { started: started_tx, cancelled: Arc::clone(&cancelled) };
    let scheduler = WorkflowScheduler::new(store(), Arc::new(executor));
    scheduler.schedule_workflow(ScheduleRequest::new("digest", EVERY_SECOND)).await.unwrap();

    let first = timeout(Duration::from_secs(5), started.recv()).await.unwrap();
    assert_eq!(first, Some(1));

    timeout(Duration::from_secs(5), scheduler.shutdown(Duration::from_secs(2))).await.unwrap();
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.get_status().await.active_schedules, 0);
}

#[tokio::test]
async fn test_firing_deadline_cancels_hung_run() {
    let config = SchedulerConfig { firing_deadline_secs: 1, ..SchedulerConfig::default() };
    let scheduler = WorkflowScheduler::with_config(store(), Arc::new(Hangs), config);
    let mut events = scheduler.subscribe();
    scheduler
        .schedule_workflow(ScheduleRequest::new("digest", EVERY_SECOND).with_max_executions(1))
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(ScheduleEvent::Fired { success, message, .. }) = events.recv().await {
                assert!(!success);
                break message;
            }
        }
    })
    .await
    .unwrap();
    assert!(message.contains("Timed out"));
}

struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    async fn execute(&self, _ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
        Ok(ToolResult::success(format!("echo {}", args.args)))
    }
}

#[tokio::test]
async fn test_step_workflow_executor_runs_stored_steps() {
    let mut registry = FunctionRegistry::new();
    registry.register(Tool::new("echo", "Echo", ToolParameters::new(), Arc::new(Echo)));
    let executor = StepWorkflowExecutor::new(MultiStepExecutor::new(Arc::new(registry)));

    let store = Arc::new(InMemoryWorkflowStore::with_workflows([Workflow {
        id: "report".to_string(),
        name: "Weekly report".to_string(),
        steps: json!([
            {"stepNumber": 1, "description": "Announce", "toolToUse": "echo", "parameters": {"run": "{{executionNumber}}"}},
            {"stepNumber": 2, "description": "Note", "toolToUse": "echo", "parameters": {"who": "{{owner}}"}}
        ]),
        description: None,
    }]));
    let scheduler = WorkflowScheduler::new(store, Arc::new(executor));
    let mut events = scheduler.subscribe();

    let mut context = Map::new();
    context.insert("owner".to_string(), json!("ops"));
    scheduler
        .schedule_workflow(
            ScheduleRequest::new("report", EVERY_SECOND).with_max_executions(1).with_context(context.clone()),
        )
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(ScheduleEvent::Fired { success, message, .. }) = events.recv().await {
                assert!(success, "{}", message);
                break message;
            }
        }
    })
    .await
    .unwrap();
    assert!(message.contains("Completed 2/2 steps"));
    assert!(message.contains("{\"run\":1}"));
    assert!(message.contains("{\"who\":\"ops\"}"));

    let once = scheduler.run_now("report", context).await.unwrap();
    assert!(once.success);
}
