//! Built-in demonstration tools and the scheduler wiring around them.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use stepwise_orchestrator::error::Result;
use stepwise_orchestrator::{
    EventSink, JsonFileWorkflowStore, OrchestrationError, Orchestrator, SessionContext, StepWorkflowExecutor,
    TelemetryEnvelope, Tool, ToolArguments, ToolHandler, ToolParameters, ToolResult, WorkflowScheduler,
};

use crate::config::CliSettings;

/// Upper bound for a single `wait` call
const MAX_WAIT_MS: u64 = 60_000;

/// Returns its `text` argument, or the full arguments when absent
struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    async fn execute(&self, _ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
        let text = args.get_string("text").unwrap_or_else(|| args.args.to_string());
        Ok(ToolResult::success(text))
    }
}

/// Sleeps for `ms` milliseconds, stopping early when the session is cancelled
struct Wait;

#[async_trait]
impl ToolHandler for Wait {
    async fn execute(&self, ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
        let ms = args.get_u64("ms").unwrap_or(100).min(MAX_WAIT_MS);
        tokio::select! {
            () = ctx.cancellation_token().cancelled() => Err(OrchestrationError::Cancelled),
            () = tokio::time::sleep(Duration::from_millis(ms)) => Ok(ToolResult::success(format!("Waited {}ms", ms))),
        }
    }
}

/// `echo` and `wait`
pub fn builtin_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            "echo",
            "Return the given text",
            ToolParameters::new().add_property("text", "string", "Text to return", false),
            Arc::new(Echo),
        ),
        Tool::new(
            "wait",
            "Pause for a number of milliseconds",
            ToolParameters::new().add_property("ms", "integer", "Milliseconds to wait (default 100)", false),
            Arc::new(Wait),
        ),
    ]
}

/// Telemetry sink printing envelopes as JSON lines on stderr
struct StderrSink;

impl EventSink for StderrSink {
    fn send(&self, envelope: TelemetryEnvelope) -> bool {
        match envelope.to_json() {
            Ok(line) => {
                eprintln!("{}", line);
                true
            }
            Err(_) => false,
        }
    }
}

/// Scheduler over the configured workflow file, running steps against the built-in tools
pub fn build_scheduler(settings: &CliSettings) -> anyhow::Result<WorkflowScheduler> {
    let mut builder = Orchestrator::builder().config(settings.config.clone());
    for tool in builtin_tools() {
        builder = builder.tool(tool);
    }
    let orchestrator = builder.build()?;

    let mut executor = StepWorkflowExecutor::new(orchestrator.executor().clone());
    if settings.telemetry {
        executor = executor.with_sink(Arc::new(StderrSink));
    }

    let store = JsonFileWorkflowStore::new(&settings.workflows_path);
    Ok(WorkflowScheduler::with_config(Arc::new(store), Arc::new(executor), settings.config.scheduler.clone()))
}
