//! Task plans.
//!
//! A [`TaskPlan`] holds the decomposition of one in-flight request into ordered
//! tasks together with the ids that have completed or failed. Each session owns
//! exactly one plan; declaring a new plan replaces the previous one.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{OrchestrationError, Result};

/// One atomic unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Identifier, unique within a plan
    pub id: String,
    /// Human-readable intent
    pub description: String,
    /// Tool expected to satisfy the task
    pub tool_needed: String,
    /// Task that must complete first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
}

impl Task {
    /// Create a task with no dependency
    pub fn new(id: impl Into<String>, description: impl Into<String>, tool_needed: impl Into<String>) -> Self {
        Self { id: id.into(), description: description.into(), tool_needed: tool_needed.into(), depends_on: None }
    }

    /// Set the task this one depends on
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on = Some(id.into());
        self
    }
}

/// Status of a task within its plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet completed or failed
    Pending,
    /// Completed successfully
    Completed,
    /// Failed
    Failed,
}

impl TaskStatus {
    /// Marker used in plan listings
    pub fn marker(self) -> &'static str {
        match self {
            Self::Completed => "✅",
            Self::Failed => "❌",
            Self::Pending => "⏭",
        }
    }
}

/// Outcome of marking a task complete or failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// No plan has been declared
    NoActivePlan,
    /// The id does not belong to the active plan
    UnknownTask(String),
    /// Tasks remain; `next` is the one to work on
    Next {
        /// Number of tasks neither completed nor failed
        remaining: usize,
        /// Next pending task
        next: Task,
    },
    /// Nothing remains; `summary` annotates every task
    AllDone {
        /// Final listing with a marker per task
        summary: String,
    },
}

impl MarkOutcome {
    /// Whether the plan has no remaining tasks
    pub fn is_all_done(&self) -> bool {
        matches!(self, Self::AllDone { .. })
    }
}

impl fmt::Display for MarkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoActivePlan => write!(f, "No active task plan. Call create_task_plan first."),
            Self::UnknownTask(id) => write!(f, "Task '{}' is not part of the active plan.", id),
            Self::Next { remaining, next } => write!(
                f,
                "{} task(s) remaining. Next: {} (use {}, task id '{}')",
                remaining, next.description, next.tool_needed, next.id
            ),
            Self::AllDone { summary } => write!(f, "{}", summary),
        }
    }
}

/// Result of querying the tasks still to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remaining {
    /// Every task completed or failed
    Complete,
    /// Tasks still pending, in plan order
    Pending(Vec<Task>),
}

/// Decomposition of one request into ordered tasks
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    tasks: Vec<Task>,
    completed: HashSet<String>,
    /// Failed ids with their error messages
    failed: HashMap<String, String>,
    /// Result summaries supplied on completion
    summaries: HashMap<String, String>,
}

impl TaskPlan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the plan with `tasks`, resetting completion state
    ///
    /// Returns the ordered listing of the new plan. An empty task list
    /// discards the current plan, leaving no active plan.
    ///
    /// # Errors
    /// `PlanValidation` when a task is missing a field, ids repeat, a
    /// dependency is undeclared or dependencies form a cycle. The existing plan
    /// is left untouched on error.
    pub fn create_plan(&mut self, tasks: Vec<Task>) -> Result<String> {
        validate_tasks(&tasks)?;
        if tasks.is_empty() {
            self.clear();
            return Ok("Task plan cleared; there is no active plan.".to_string());
        }
        self.tasks = tasks;
        self.completed.clear();
        self.failed.clear();
        self.summaries.clear();
        Ok(self.listing())
    }

    /// Mark a task complete
    ///
    /// Calling this twice for the same id has no further effect. A task that
    /// previously failed moves to completed.
    pub fn mark_complete(&mut self, task_id: &str, result_summary: Option<&str>) -> MarkOutcome {
        if let Some(outcome) = self.check_known(task_id) {
            return outcome;
        }
        self.failed.remove(task_id);
        self.completed.insert(task_id.to_string());
        if let Some(summary) = result_summary {
            self.summaries.insert(task_id.to_string(), summary.to_string());
        }
        self.outcome()
    }

    /// Mark a task failed
    ///
    /// A completed task is never demoted to failed.
    pub fn mark_failed(&mut self, task_id: &str, error: &str) -> MarkOutcome {
        if let Some(outcome) = self.check_known(task_id) {
            return outcome;
        }
        if !self.completed.contains(task_id) {
            self.failed.insert(task_id.to_string(), error.to_string());
        }
        self.outcome()
    }

    /// Tasks neither completed nor failed
    pub fn remaining_tasks(&self) -> Remaining {
        let pending: Vec<Task> = self.pending().cloned().collect();
        if pending.is_empty() { Remaining::Complete } else { Remaining::Pending(pending) }
    }

    /// First pending task whose dependency is complete, else the first pending task
    pub fn next_pending(&self) -> Option<&Task> {
        self.pending()
            .find(|task| task.depends_on.as_ref().is_none_or(|dep| self.completed.contains(dep)))
            .or_else(|| self.pending().next())
    }

    /// First pending task that expects `tool_name`
    pub fn task_for_tool(&self, tool_name: &str) -> Option<&Task> {
        self.pending().find(|task| task.tool_needed == tool_name)
    }

    /// Status of a task, `None` if the id is not in the plan
    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        if !self.tasks.iter().any(|t| t.id == task_id) {
            return None;
        }
        Some(if self.completed.contains(task_id) {
            TaskStatus::Completed
        } else if self.failed.contains_key(task_id) {
            TaskStatus::Failed
        } else {
            TaskStatus::Pending
        })
    }

    /// Whether a plan has been declared
    pub fn is_active(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Tasks in plan order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Number of completed tasks
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Number of failed tasks
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Discard the plan
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Listing of every task annotated with its status marker
    pub fn final_summary(&self) -> String {
        let mut out = format!(
            "Task plan finished: {} completed, {} failed, {} skipped.",
            self.completed.len(),
            self.failed.len(),
            self.pending().count()
        );
        for (index, task) in self.tasks.iter().enumerate() {
            let status = self.status(&task.id).unwrap_or(TaskStatus::Pending);
            out.push_str(&format!("\n{} {}. {}", status.marker(), index + 1, task.description));
            match status {
                TaskStatus::Completed => {
                    if let Some(summary) = self.summaries.get(&task.id) {
                        out.push_str(&format!(" - {}", summary));
                    }
                }
                TaskStatus::Failed => {
                    if let Some(error) = self.failed.get(&task.id) {
                        out.push_str(&format!(" (error: {})", error));
                    }
                }
                TaskStatus::Pending => {}
            }
        }
        out
    }

    fn listing(&self) -> String {
        let mut out = format!("Task plan created with {} task(s):", self.tasks.len());
        for (index, task) in self.tasks.iter().enumerate() {
            out.push_str(&format!(
                "\n{}. [{}] {} (tool: {})",
                index + 1,
                task.id,
                task.description,
                task.tool_needed
            ));
            if let Some(dep) = &task.depends_on {
                out.push_str(&format!(" after {}", dep));
            }
        }
        out.push_str("\nExecute every task in order and call mark_task_complete after each one.");
        out
    }

    fn pending(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|task| !self.completed.contains(&task.id) && !self.failed.contains_key(&task.id))
    }

    fn check_known(&self, task_id: &str) -> Option<MarkOutcome> {
        if !self.is_active() {
            Some(MarkOutcome::NoActivePlan)
        } else if self.status(task_id).is_none() {
            Some(MarkOutcome::UnknownTask(task_id.to_string()))
        } else {
            None
        }
    }

    fn outcome(&self) -> MarkOutcome {
        let remaining = self.pending().count();
        match self.next_pending() {
            Some(next) => MarkOutcome::Next { remaining, next: next.clone() },
            None => MarkOutcome::AllDone { summary: self.final_summary() },
        }
    }
}

fn validate_tasks(tasks: &[Task]) -> Result<()> {
    let mut ids = HashSet::new();
    for (index, task) in tasks.iter().enumerate() {
        for (field, value) in [("id", &task.id), ("description", &task.description), ("toolNeeded", &task.tool_needed)] {
            if value.trim().is_empty() {
                return Err(OrchestrationError::PlanValidation(format!(
                    "task {} is missing '{}'",
                    index + 1,
                    field
                )));
            }
        }
        if !ids.insert(task.id.as_str()) {
            return Err(OrchestrationError::PlanValidation(format!("duplicate task id '{}'", task.id)));
        }
    }

    let parents: HashMap<&str, Option<&str>> =
        tasks.iter().map(|t| (t.id.as_str(), t.depends_on.as_deref())).collect();
    for task in tasks {
        if let Some(dep) = &task.depends_on {
            if !parents.contains_key(dep.as_str()) {
                return Err(OrchestrationError::PlanValidation(format!(
                    "task '{}' depends on undeclared task '{}'",
                    task.id, dep
                )));
            }
        }

        // Single predecessor per task: walking more than `len` links means a loop
        let mut cursor = task.depends_on.as_deref();
        let mut hops = 0;
        while let Some(current) = cursor {
            if current == task.id || hops > tasks.len() {
                return Err(OrchestrationError::PlanValidation(format!(
                    "dependency cycle through task '{}'",
                    task.id
                )));
            }
            cursor = parents.get(current).copied().flatten();
            hops += 1;
        }
    }
    Ok(())
}
