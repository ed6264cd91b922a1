// Built-in planning tools
//
// The orchestrator answers these itself rather than through the registry:
// they operate on the session's plan and on the executor, which in turn
// resolves against the registry.

use serde_json::Value;

use super::multi_step::Step;
use super::tool::{ToolDefinition, ToolParameters};
use crate::error::{OrchestrationError, Result};
use crate::plan::Task;

/// Declares the session's task plan
pub const CREATE_TASK_PLAN: &str = "create_task_plan";
/// Marks one plan task complete or failed
pub const MARK_TASK_COMPLETE: &str = "mark_task_complete";
/// Default name of the tool that runs a batch through the multi-step executor
pub const EXECUTE_MULTI_STEP: &str = "execute_multi_step";

/// Definitions of the built-in tools, the batch tool under `executor_tool`
pub fn builtin_definitions(executor_tool: &str) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: CREATE_TASK_PLAN.to_string(),
            description: "Declare every action the request needs before doing any of them. \
                          Replaces the current plan."
                .to_string(),
            parameters: ToolParameters::new().add_property(
                "tasks",
                "array",
                "Tasks in execution order: {id, description, toolNeeded, dependsOn?}",
                true,
            ),
        },
        ToolDefinition {
            name: MARK_TASK_COMPLETE.to_string(),
            description: "Record that a plan task finished. Returns the next task or the final summary.".to_string(),
            parameters: ToolParameters::new()
                .add_property("taskId", "string", "Id of the task", true)
                .add_property("resultSummary", "string", "Short description of the outcome", false)
                .add_property("error", "string", "Set when the task failed", false),
        },
        ToolDefinition {
            name: executor_tool.to_string(),
            description: "Run several actions in one call, strictly in step order. \
                          Use this whenever a request involves more than one action."
                .to_string(),
            parameters: ToolParameters::new()
                .add_property("request", "string", "The user's original request", false)
                .add_property(
                    "steps",
                    "array",
                    "Steps: {stepNumber, description, toolToUse, parameters}",
                    true,
                ),
        },
    ]
}

fn field<'a>(entry: &'a Value, index: usize, name: &str) -> Result<&'a str> {
    entry
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestrationError::PlanValidation(format!("task {} is missing '{}'", index + 1, name)))
}

/// Parse `create_task_plan` arguments
///
/// # Errors
/// `PlanValidation` when `tasks` is absent or an entry lacks a string field
pub fn parse_tasks(args: &Value) -> Result<Vec<Task>> {
    let entries = args
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| OrchestrationError::PlanValidation("'tasks' must be an array".to_string()))?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let mut task = Task::new(
                field(entry, index, "id")?,
                field(entry, index, "description")?,
                field(entry, index, "toolNeeded")?,
            );
            task.depends_on = entry.get("dependsOn").and_then(Value::as_str).map(str::to_string);
            Ok(task)
        })
        .collect()
}

/// Parsed `mark_task_complete` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkRequest {
    /// Task id
    pub task_id: String,
    /// Outcome summary
    pub result_summary: Option<String>,
    /// Failure message, if the task failed
    pub error: Option<String>,
}

/// Parse `mark_task_complete` arguments
///
/// # Errors
/// `InvalidToolArguments` when `taskId` is missing
pub fn parse_mark(args: &Value) -> Result<MarkRequest> {
    let task_id = args.get("taskId").and_then(Value::as_str).ok_or_else(|| {
        OrchestrationError::InvalidToolArguments {
            tool: MARK_TASK_COMPLETE.to_string(),
            reason: "missing 'taskId'".to_string(),
        }
    })?;
    let text = |key: &str| args.get(key).and_then(Value::as_str).map(str::to_string);
    Ok(MarkRequest { task_id: task_id.to_string(), result_summary: text("resultSummary"), error: text("error") })
}

/// Parse batch tool arguments into the request text and steps
///
/// # Errors
/// `InvalidToolArguments` when `steps` is missing or malformed
pub fn parse_steps(tool: &str, args: &Value) -> Result<(Option<String>, Vec<Step>)> {
    let invalid = |reason: String| OrchestrationError::InvalidToolArguments {
        tool: tool.to_string(),
        reason,
    };
    let steps = args.get("steps").cloned().ok_or_else(|| invalid("missing 'steps'".to_string()))?;
    let steps: Vec<Step> = serde_json::from_value(steps).map_err(|e| invalid(e.to_string()))?;
    let request = args.get("request").and_then(Value::as_str).map(str::to_string);
    Ok((request, steps))
}
