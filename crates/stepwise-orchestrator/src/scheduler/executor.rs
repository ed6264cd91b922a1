//! Workflow executors.
//!
//! [`StepWorkflowExecutor`] interprets a workflow's step graph as a list of
//! multi-step executor steps and runs it in a fresh session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::store::Workflow;
use crate::error::{OrchestrationError, Result};
use crate::orchestration::multi_step::{MultiStepExecutor, Step};
use crate::session::SessionContext;
use crate::thinking::EventSink;

/// Outcome of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunResult {
    /// Whether every step succeeded
    pub success: bool,
    /// Human-readable report
    pub message: String,
    /// Structured detail
    #[serde(default)]
    pub output: Value,
}

/// Runs a resolved workflow to completion
#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    /// Run `workflow` with `context`; implementations should stop early once `cancel` fires
    async fn execute(
        &self,
        workflow: &Workflow,
        context: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRunResult>;
}

/// Executor that runs a workflow's steps through the multi-step executor
///
/// String parameters of the form `{{key}}` are replaced with `context[key]`.
#[derive(Clone)]
pub struct StepWorkflowExecutor {
    executor: MultiStepExecutor,
    sink: Option<Arc<dyn EventSink>>,
}

impl fmt::Debug for StepWorkflowExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepWorkflowExecutor")
            .field("executor", &self.executor)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl StepWorkflowExecutor {
    /// Wrap `executor`
    pub fn new(executor: MultiStepExecutor) -> Self {
        Self { executor, sink: None }
    }

    /// Push every run's tracker events to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

#[async_trait]
impl WorkflowExecutor for StepWorkflowExecutor {
    async fn execute(
        &self,
        workflow: &Workflow,
        context: &Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<WorkflowRunResult> {
        let steps: Vec<Step> = serde_json::from_value(fill_placeholders(&workflow.steps, context)).map_err(|e| {
            OrchestrationError::PlanValidation(format!("workflow '{}' has malformed steps: {}", workflow.id, e))
        })?;

        let run = context.get("executionNumber").and_then(Value::as_u64).unwrap_or(0);
        let session_id = format!("workflow-{}-{}", workflow.id, run);
        let ctx = match &self.sink {
            Some(sink) => SessionContext::with_sink(session_id, Arc::clone(sink)),
            None => SessionContext::new(session_id),
        }
        .with_cancellation(cancel);
        for (key, value) in context {
            ctx.set_metadata(key.clone(), value.clone()).await;
        }
        ctx.set_request(workflow.name.clone()).await;
        ctx.tracker().track_workflow(&workflow.id, &workflow.name, "running");

        let summary = self.executor.execute(&ctx, &workflow.name, steps).await?;
        let success = summary.failure_count() == 0 && summary.all_attempted();
        ctx.tracker().track_workflow(&workflow.id, &workflow.name, if success { "completed" } else { "failed" });

        Ok(WorkflowRunResult { success, message: summary.to_string(), output: serde_json::to_value(&summary)? })
    }
}

/// Replace `{{key}}` string values with the matching context entry
fn fill_placeholders(value: &Value, context: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => s
            .strip_prefix("{{")
            .and_then(|rest| rest.strip_suffix("}}"))
            .and_then(|key| context.get(key.trim()))
            .cloned()
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|v| fill_placeholders(v, context)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), fill_placeholders(v, context))).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::tool::{Tool, ToolArguments, ToolHandler, ToolParameters, ToolResult};
    use crate::orchestration::tool_registry::FunctionRegistry;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn execute(&self, _ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
            Ok(ToolResult::success(args.args.to_string()))
        }
    }

    fn executor() -> StepWorkflowExecutor {
        let mut registry = FunctionRegistry::new();
        registry.register(Tool::new("echo", "Echo", ToolParameters::new(), Arc::new(Echo)));
        StepWorkflowExecutor::new(MultiStepExecutor::new(Arc::new(registry)))
    }

    fn workflow(steps: Value) -> Workflow {
        Workflow { id: "wf-1".to_string(), name: "Digest".to_string(), steps, description: None }
    }

    #[test]
    fn test_fill_placeholders() {
        let context: Map<String, Value> = json!({"executionNumber": 3, "to": "a@x.com"}).as_object().cloned().unwrap();
        let filled = fill_placeholders(&json!({"run": "{{executionNumber}}", "to": "{{ to }}", "keep": "{{missing}}"}), &context);
        assert_eq!(filled, json!({"run": 3, "to": "a@x.com", "keep": "{{missing}}"}));
    }

    #[tokio::test]
    async fn test_runs_steps() {
        let wf = workflow(json!([
            {"stepNumber": 1, "description": "say", "toolToUse": "echo", "parameters": {"n": "{{executionNumber}}"}}
        ]));
        let context: Map<String, Value> = json!({"executionNumber": 2}).as_object().cloned().unwrap();
        let result = executor().execute(&wf, &context, CancellationToken::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["results"]["1"], json!("{\"n\":2}"));
    }

    #[tokio::test]
    async fn test_failed_step_marks_run_failed() {
        let wf = workflow(json!([
            {"stepNumber": 1, "description": "say", "toolToUse": "echo"},
            {"stepNumber": 2, "description": "missing", "toolToUse": "post_tweet"}
        ]));
        let result = executor().execute(&wf, &Map::new(), CancellationToken::new()).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("Unknown tool 'post_tweet'"));
    }

    #[tokio::test]
    async fn test_sink_receives_workflow_updates() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<crate::thinking::TelemetryEnvelope>();
        let wf = workflow(json!([{"stepNumber": 1, "description": "say", "toolToUse": "echo"}]));
        executor().with_sink(Arc::new(tx)).execute(&wf, &Map::new(), CancellationToken::new()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, "workflow_update");
        assert_eq!(first.invocation_id, "workflow-wf-1-0");
    }

    #[tokio::test]
    async fn test_malformed_steps() {
        let wf = workflow(json!({"not": "a list"}));
        assert!(matches!(
            executor().execute(&wf, &Map::new(), CancellationToken::new()).await,
            Err(OrchestrationError::PlanValidation(_))
        ));
    }
}
