//! Task orchestration and scheduling core for Stepwise.
//!
//! Keeps an agent from stopping after the first of several requested actions:
//! a per-session task plan, a completion enforcer around action tools, a
//! sequential multi-step executor, a thinking tracker for observability and a
//! cron-driven workflow scheduler.

pub mod config;
pub mod error;
pub mod orchestration;
pub mod plan;
pub mod scheduler;
pub mod session;
pub mod thinking;

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub use config::{EnforcerConfig, ExecutorConfig, OrchestrationConfig, SchedulerConfig};
pub use error::{OrchestrationError, Result};
pub use orchestration::{
    CallOrigin, CompletionEnforcer, Detection, ExecutionSummary, FixedDetector, FunctionRegistry, LoggingMiddleware,
    MatchKind, MultiActionDetector, MultiStepExecutor, PatternDetector, Step, Tool, ToolArguments, ToolCall,
    ToolDefinition, ToolHandler, ToolMiddleware, ToolParameters, ToolResult,
};
pub use plan::{MarkOutcome, Remaining, Task, TaskPlan, TaskStatus};
pub use scheduler::{
    InMemoryWorkflowStore, JsonFileWorkflowStore, ScheduleEntry, ScheduleEvent, ScheduleRequest, ScheduleState,
    SchedulerStatus, StepWorkflowExecutor, StopReason, Workflow, WorkflowExecutor, WorkflowRunResult,
    WorkflowScheduler, WorkflowStore,
};
pub use session::{ActionRecord, SessionContext, SessionStore};
pub use thinking::{EventSink, TelemetryEnvelope, ThinkingEvent, ThinkingSummary, ThinkingTracker};

use orchestration::plan_tools::{self, CREATE_TASK_PLAN, MARK_TASK_COMPLETE};

/// Builder for [`Orchestrator`].
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestrationConfig,
    tools: Vec<Tool>,
    detector: Option<Arc<dyn MultiActionDetector>>,
}

impl OrchestratorBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: OrchestrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Register `tool` when the orchestrator is built.
    #[must_use]
    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Replace the pattern detector used by the enforcer.
    #[must_use]
    pub fn detector(mut self, detector: Arc<dyn MultiActionDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Build the registry with its middleware chain and the executor over it.
    ///
    /// # Errors
    /// Returns `Config` if an enforcer pattern does not compile.
    pub fn build(self) -> Result<Orchestrator> {
        let mut registry = FunctionRegistry::new()
            .with_fuzzy_margin(self.config.executor.fuzzy_margin)
            .with_middleware(Arc::new(LoggingMiddleware));

        if self.config.enforcer.enabled {
            let mut enforcer = CompletionEnforcer::from_config(&self.config.enforcer)?;
            if let Some(detector) = self.detector {
                enforcer = enforcer.with_detector(detector);
            }
            registry = registry.with_middleware(Arc::new(enforcer));
        }

        for tool in self.tools {
            registry.register(tool);
        }

        let registry = Arc::new(registry);
        let executor = MultiStepExecutor::from_config(Arc::clone(&registry), &self.config.executor);
        Ok(Orchestrator { config: self.config, registry, executor, sessions: SessionStore::new() })
    }
}

/// Entry point tying sessions, the registry and the executor together.
#[derive(Debug)]
pub struct Orchestrator {
    /// Settings the orchestrator was built from.
    config: OrchestrationConfig,
    /// Registry with middleware applied.
    registry: Arc<FunctionRegistry>,
    /// Batch executor over the registry.
    executor: MultiStepExecutor,
    /// Open sessions.
    sessions: SessionStore,
}

impl Orchestrator {
    /// Starts a builder.
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Settings in use.
    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    /// Registry with middleware applied.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Batch executor over the registry.
    pub fn executor(&self) -> &MultiStepExecutor {
        &self.executor
    }

    /// Open session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Opens a session, or returns the one already open under `session_id`.
    ///
    /// # Arguments
    /// * `session_id` - Conversation or invocation id
    /// * `sink` - Receives the session's telemetry envelopes
    pub async fn open_session(&self, session_id: &str, sink: Option<Arc<dyn EventSink>>) -> Arc<SessionContext> {
        self.sessions.open(session_id, sink).await
    }

    /// Closes a session and returns its tracker summary.
    pub async fn close_session(&self, session_id: &str) -> Option<ThinkingSummary> {
        self.sessions.close(session_id).await
    }

    /// Built-in and registered tool schemas, built-ins first.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = plan_tools::builtin_definitions(&self.config.enforcer.executor_tool);
        definitions.extend(self.registry.definitions());
        definitions
    }

    /// Prompt asking the model to keep going, while plan tasks remain.
    ///
    /// # Returns
    /// `None` when the session has no plan or every task is done.
    pub async fn continuation_prompt(&self, ctx: &SessionContext) -> Option<String> {
        orchestration::continuation_prompt(&*ctx.plan().await)
    }

    /// Routes one model tool call.
    ///
    /// Built-in planning tools are answered here; everything else resolves
    /// through the registry. Errors come back as results for the model to
    /// read, never as `Err`.
    pub async fn dispatch(&self, ctx: &SessionContext, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        debug!(session_id = %ctx.session_id(), tool = %call.name, call_id = %call.id, "Dispatching tool call");

        let outcome = match call.name.as_str() {
            CREATE_TASK_PLAN => self.create_plan(ctx, &call.arguments).await,
            MARK_TASK_COMPLETE => self.mark_task(ctx, &call.arguments).await,
            name if name == self.config.enforcer.executor_tool => {
                self.execute_batch(ctx, name, &call.arguments).await
            }
            name => self.call_tool(ctx, name, &call.arguments).await,
        };

        let result = outcome.unwrap_or_else(|e| {
            warn!(session_id = %ctx.session_id(), tool = %call.name, error = %e, "Tool call failed");
            ctx.tracker().track_error(e.to_string(), Some(call.name.as_str()));
            ToolResult::error_for_model(e.to_string())
        });
        ctx.tracker().track_tool_use(
            call.name.clone(),
            call.arguments.clone(),
            Some(result.value()),
            Some(started.elapsed()),
        );
        result
    }

    async fn create_plan(&self, ctx: &SessionContext, args: &Value) -> Result<ToolResult> {
        let tasks = plan_tools::parse_tasks(args)?;
        let listing = ctx.plan().await.create_plan(tasks)?;
        ctx.tracker().track_thought(listing.clone());
        Ok(ToolResult::success(listing))
    }

    async fn mark_task(&self, ctx: &SessionContext, args: &Value) -> Result<ToolResult> {
        let request = plan_tools::parse_mark(args)?;
        let outcome = {
            let mut plan = ctx.plan().await;
            match &request.error {
                Some(error) => plan.mark_failed(&request.task_id, error),
                None => plan.mark_complete(&request.task_id, request.result_summary.as_deref()),
            }
        };
        Ok(match outcome {
            MarkOutcome::NoActivePlan | MarkOutcome::UnknownTask(_) => ToolResult::error_for_model(outcome.to_string()),
            MarkOutcome::Next { .. } | MarkOutcome::AllDone { .. } => ToolResult::success(outcome.to_string()),
        })
    }

    async fn execute_batch(&self, ctx: &SessionContext, tool: &str, args: &Value) -> Result<ToolResult> {
        let (request, steps) = plan_tools::parse_steps(tool, args)?;
        let request = match request {
            Some(request) => request,
            None => ctx.request().await.unwrap_or_default(),
        };

        let summary = self.executor.execute(ctx, &request, steps).await?;
        let data = serde_json::to_value(&summary)?;
        let result = if summary.failure_count() == 0 && summary.all_attempted() {
            ToolResult::success(summary.to_string())
        } else {
            ToolResult::error_for_model(summary.to_string())
        };
        Ok(result.with_data(data))
    }

    async fn call_tool(&self, ctx: &SessionContext, name: &str, args: &Value) -> Result<ToolResult> {
        // Direct calls never fall back to fuzzy matching
        let tool = self.registry.find_tool(name).ok_or_else(|| OrchestrationError::UnknownTool(name.to_string()))?;

        let missing = tool.parameters.missing_required(args);
        if !missing.is_empty() {
            return Err(OrchestrationError::InvalidToolArguments {
                tool: tool.name.clone(),
                reason: format!("missing required {}", missing.join(", ")),
            });
        }

        let timeout = self.executor.step_timeout();
        match tokio::time::timeout(timeout, tool.execute(ctx, &ToolArguments::new(args.clone()))).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::Timeout(timeout)),
        }
    }
}
