// Continuation checks for the agent loop
//
// When the model produces a final answer while the session's plan still has
// pending tasks, the runtime feeds the prompt built here back to the model
// instead of ending the turn.

use crate::plan::{Remaining, TaskPlan};

/// Prompt asking the model to finish the plan, or `None` if nothing remains
pub fn continuation_prompt(plan: &TaskPlan) -> Option<String> {
    if !plan.is_active() {
        return None;
    }
    let Remaining::Pending(tasks) = plan.remaining_tasks() else {
        return None;
    };

    let mut prompt = format!(
        "You stopped before finishing the plan. {} of {} task(s) are still pending:",
        tasks.len(),
        plan.tasks().len()
    );
    for (index, task) in tasks.iter().enumerate() {
        prompt.push_str(&format!(
            "\n{}. [{}] {} (use {})",
            index + 1,
            task.id,
            task.description,
            task.tool_needed
        ));
    }
    if let Some(next) = plan.next_pending() {
        prompt.push_str(&format!("\nContinue with '{}' now and call mark_task_complete after it.", next.id));
    }
    Some(prompt)
}
