//! Multi-step executor.
//!
//! Runs an explicit list of steps one at a time, in ascending step number,
//! against the function registry. A step that fails, times out or names an
//! unresolvable tool is recorded and the batch moves on; only a malformed step
//! list is rejected outright.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::tool::{ToolArguments, ToolResult};
use super::tool_registry::FunctionRegistry;
use crate::config::ExecutorConfig;
use crate::error::{OrchestrationError, Result};
use crate::session::SessionContext;

/// One step of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Position in the batch, starting at 1
    pub step_number: u32,
    /// What the step does
    pub description: String,
    /// Tool to invoke
    pub tool_to_use: String,
    /// Arguments for the tool
    #[serde(default)]
    pub parameters: Value,
}

/// Outcome of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    /// Original request, kept for audit
    pub request: String,
    /// Number of steps submitted
    pub total_steps: usize,
    /// Succeeded step numbers in execution order
    pub completed_steps: Vec<u32>,
    /// Value returned by each succeeded step
    pub results: BTreeMap<u32, Value>,
    /// Error message of each failed step
    pub errors: BTreeMap<u32, String>,
    /// Steps that never ran
    pub remaining: Vec<Step>,
    /// Whether the session was cancelled mid-batch
    pub cancelled: bool,
}

impl ExecutionSummary {
    fn new(request: &str, total_steps: usize) -> Self {
        Self {
            request: request.to_string(),
            total_steps,
            completed_steps: Vec::new(),
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
            remaining: Vec::new(),
            cancelled: false,
        }
    }

    /// Number of succeeded steps
    pub fn success_count(&self) -> usize {
        self.completed_steps.len()
    }

    /// Number of failed steps
    pub fn failure_count(&self) -> usize {
        self.errors.len()
    }

    /// Whether every step ran (successfully or not)
    pub fn all_attempted(&self) -> bool {
        self.remaining.is_empty()
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Multi-step execution for: \"{}\"", self.request)?;
        writeln!(
            f,
            "Completed {}/{} steps ({} failed).",
            self.success_count(),
            self.total_steps,
            self.failure_count()
        )?;

        let mut outcomes: BTreeMap<u32, String> = BTreeMap::new();
        for (step, value) in &self.results {
            outcomes.insert(*step, format!("✅ Step {}: {}", step, render_value(value)));
        }
        for (step, error) in &self.errors {
            outcomes.insert(*step, format!("❌ Step {}: {}", step, error));
        }
        if !outcomes.is_empty() {
            writeln!(f, "\nResults:")?;
            for line in outcomes.values() {
                writeln!(f, "{}", line)?;
            }
        }

        if self.remaining.is_empty() {
            write!(f, "\nAll steps were attempted.")
        } else {
            writeln!(f, "\nRemaining steps (not executed):")?;
            for step in &self.remaining {
                writeln!(f, "- Step {}: {} (tool: {})", step.step_number, step.description, step.tool_to_use)?;
            }
            write!(f, "Continue by executing the remaining steps above before finishing.")
        }
    }
}

/// Sequential batch runner
#[derive(Debug, Clone)]
pub struct MultiStepExecutor {
    registry: Arc<FunctionRegistry>,
    step_timeout: Duration,
}

impl MultiStepExecutor {
    /// Executor over `registry` with the default step timeout
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self::from_config(registry, &ExecutorConfig::default())
    }

    /// Executor configured from `config`
    pub fn from_config(registry: Arc<FunctionRegistry>, config: &ExecutorConfig) -> Self {
        Self { registry, step_timeout: config.step_timeout() }
    }

    /// Override the per-step deadline
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Per-step deadline
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Registry steps resolve against
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Run `steps` in ascending step number on behalf of `ctx`
    ///
    /// # Errors
    /// `PlanValidation` when the step list is empty or its numbers are not
    /// exactly `1..=N`. Failures of individual steps are reported in the
    /// summary instead.
    pub async fn execute(&self, ctx: &SessionContext, request: &str, mut steps: Vec<Step>) -> Result<ExecutionSummary> {
        validate_steps(&steps)?;
        steps.sort_by_key(|s| s.step_number);

        let mut summary = ExecutionSummary::new(request, steps.len());
        for (index, step) in steps.iter().enumerate() {
            if ctx.is_cancelled() {
                warn!(
                    session_id = %ctx.session_id(),
                    step = step.step_number,
                    "Session cancelled, leaving remaining steps"
                );
                summary.cancelled = true;
                summary.remaining = steps[index..].to_vec();
                break;
            }
            self.run_step(ctx, step, &mut summary).await;
        }

        info!(
            session_id = %ctx.session_id(),
            total = summary.total_steps,
            succeeded = summary.success_count(),
            failed = summary.failure_count(),
            remaining = summary.remaining.len(),
            "Multi-step execution finished"
        );
        Ok(summary)
    }

    async fn run_step(&self, ctx: &SessionContext, step: &Step, summary: &mut ExecutionSummary) {
        debug!(
            session_id = %ctx.session_id(),
            step = step.step_number,
            tool = %step.tool_to_use,
            "Running step"
        );

        let tool = match self.registry.resolve(&step.tool_to_use) {
            Ok(resolution) => resolution.tool,
            Err(e) => {
                record_failure(ctx, step, &step.tool_to_use, e.to_string(), summary).await;
                return;
            }
        };

        let started = Instant::now();
        let args = ToolArguments::for_step(step.parameters.clone(), step.step_number);
        let outcome = match tokio::time::timeout(self.step_timeout, tool.execute(ctx, &args)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::Timeout(self.step_timeout)),
        };

        match outcome {
            Ok(result) if result.success => {
                let value = result.value();
                ctx.tracker().track_tool_use(
                    tool.name.clone(),
                    step.parameters.clone(),
                    Some(value.clone()),
                    Some(started.elapsed()),
                );
                link_plan(ctx, &tool.name, Ok(&result)).await;
                summary.completed_steps.push(step.step_number);
                summary.results.insert(step.step_number, value);
            }
            Ok(result) => record_failure(ctx, step, &tool.name, result.output, summary).await,
            Err(e) => record_failure(ctx, step, &tool.name, e.to_string(), summary).await,
        }
    }
}

async fn record_failure(ctx: &SessionContext, step: &Step, tool_name: &str, message: String, summary: &mut ExecutionSummary) {
    warn!(
        session_id = %ctx.session_id(),
        step = step.step_number,
        tool = %tool_name,
        error = %message,
        "Step failed"
    );
    let error = OrchestrationError::StepExecution { step: step.step_number, message: message.clone() };
    ctx.tracker().track_error(error.to_string(), Some(tool_name));
    link_plan(ctx, tool_name, Err(message.as_str())).await;
    summary.errors.insert(step.step_number, message);
}

/// Mark the first pending plan task expecting `tool_name`
async fn link_plan(ctx: &SessionContext, tool_name: &str, outcome: std::result::Result<&ToolResult, &str>) {
    let mut plan = ctx.plan().await;
    let Some(task_id) = plan.task_for_tool(tool_name).map(|t| t.id.clone()) else {
        return;
    };
    match outcome {
        Ok(result) => {
            plan.mark_complete(&task_id, Some(&result.output));
        }
        Err(message) => {
            plan.mark_failed(&task_id, message);
        }
    }
}

fn validate_steps(steps: &[Step]) -> Result<()> {
    if steps.is_empty() {
        return Err(OrchestrationError::PlanValidation("no steps to execute".to_string()));
    }
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.step_number) {
            return Err(OrchestrationError::PlanValidation(format!(
                "step number {} appears more than once",
                step.step_number
            )));
        }
        if step.step_number == 0 || step.step_number as usize > steps.len() {
            return Err(OrchestrationError::PlanValidation(format!(
                "step number {} is outside 1..={}",
                step.step_number,
                steps.len()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::tool::{Tool, ToolHandler, ToolParameters};
    use crate::plan::{Task, TaskStatus};
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn execute(&self, _ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
            Ok(ToolResult::success(format!("sent {}", args.get_string("to").unwrap_or_default())))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        async fn execute(&self, _ctx: &SessionContext, _args: &ToolArguments) -> Result<ToolResult> {
            Err(OrchestrationError::ToolExecutionFailed("quota exceeded".to_string()))
        }
    }

    struct Hang;

    #[async_trait]
    impl ToolHandler for Hang {
        async fn execute(&self, _ctx: &SessionContext, _args: &ToolArguments) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolResult::success("late"))
        }
    }

    fn executor() -> MultiStepExecutor {
        let mut registry = FunctionRegistry::new();
        registry.register(Tool::new("send_email", "Send", ToolParameters::new(), Arc::new(Echo)));
        registry.register(Tool::new("create_event", "Create", ToolParameters::new(), Arc::new(Failing)));
        registry.register(Tool::new("hang", "Hang", ToolParameters::new(), Arc::new(Hang)));
        MultiStepExecutor::new(Arc::new(registry))
    }

    fn step(n: u32, tool: &str) -> Step {
        Step {
            step_number: n,
            description: format!("step {n}"),
            tool_to_use: tool.to_string(),
            parameters: json!({"to": format!("user{n}@x.com")}),
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_number_order() {
        let ctx = SessionContext::new("s1");
        let summary = executor()
            .execute(&ctx, "two emails", vec![step(2, "send_email"), step(1, "send_email")])
            .await
            .unwrap();
        assert_eq!(summary.completed_steps, vec![1, 2]);
        assert_eq!(summary.results[&1], json!("sent user1@x.com"));
    }

    #[tokio::test]
    async fn test_rejects_bad_numbering() {
        let ctx = SessionContext::new("s1");
        let exec = executor();
        assert!(matches!(
            exec.execute(&ctx, "r", vec![step(1, "send_email"), step(1, "send_email")]).await,
            Err(OrchestrationError::PlanValidation(_))
        ));
        assert!(matches!(
            exec.execute(&ctx, "r", vec![step(1, "send_email"), step(3, "send_email")]).await,
            Err(OrchestrationError::PlanValidation(_))
        ));
        assert!(matches!(exec.execute(&ctx, "r", Vec::new()).await, Err(OrchestrationError::PlanValidation(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_step_failure() {
        let ctx = SessionContext::new("s1");
        let exec = executor().with_step_timeout(Duration::from_millis(20));
        let summary = exec.execute(&ctx, "r", vec![step(1, "hang"), step(2, "send_email")]).await.unwrap();
        assert!(summary.errors[&1].contains("Timed out"));
        assert_eq!(summary.completed_steps, vec![2]);
    }

    #[tokio::test]
    async fn test_cancelled_session_leaves_remaining() {
        let ctx = SessionContext::new("s1");
        ctx.cancel();
        let summary = executor().execute(&ctx, "r", vec![step(1, "send_email"), step(2, "send_email")]).await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.remaining.len(), 2);
        let text = summary.to_string();
        assert!(text.contains("Remaining steps (not executed):"));
        assert!(text.contains("Continue by executing the remaining steps"));
    }

    #[tokio::test]
    async fn test_plan_linkage() {
        let ctx = SessionContext::new("s1");
        ctx.plan()
            .await
            .create_plan(vec![
                Task::new("t1", "Email", "send_email"),
                Task::new("t2", "Event", "create_event"),
            ])
            .unwrap();

        executor().execute(&ctx, "r", vec![step(1, "send_email"), step(2, "create_event")]).await.unwrap();

        let plan = ctx.plan().await;
        assert_eq!(plan.status("t1"), Some(TaskStatus::Completed));
        assert_eq!(plan.status("t2"), Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn test_tracker_records_steps() {
        let ctx = SessionContext::new("s1");
        executor().execute(&ctx, "r", vec![step(1, "send_email"), step(2, "create_event")]).await.unwrap();
        let metrics = ctx.tracker().summary().metrics;
        assert_eq!(metrics.tools_used, vec!["send_email".to_string()]);
        assert_eq!(metrics.errors, vec!["Step 2 failed: Tool execution failed: quota exceeded".to_string()]);
    }
}
