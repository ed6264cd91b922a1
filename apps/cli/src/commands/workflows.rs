//! Workflows command implementation.

use colored::Colorize;
use serde_json::{Value, json};
use stepwise_orchestrator::{JsonFileWorkflowStore, WorkflowStore};

use crate::config::CliSettings;

/// Execute the workflows command.
///
/// Lists every workflow in the configured store with its step count.
pub async fn execute(settings: &CliSettings) -> anyhow::Result<()> {
    let store = JsonFileWorkflowStore::new(&settings.workflows_path);
    let workflows = store.list().await?;

    if settings.json {
        let entries: Vec<Value> = workflows
            .iter()
            .map(|w| {
                json!({
                    "id": w.id,
                    "name": w.name,
                    "steps": w.steps.as_array().map_or(0, Vec::len),
                    "description": w.description,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{}", "Workflows".bold().cyan());
    println!("  {} Store: {}", "•".dimmed(), settings.workflows_path.display().to_string().dimmed());
    println!();

    if workflows.is_empty() {
        println!("  {}", "No workflows found.".yellow());
        return Ok(());
    }

    for workflow in &workflows {
        let steps = workflow.steps.as_array().map_or(0, Vec::len);
        println!("  {} {} ({} step(s))", workflow.id.cyan(), workflow.name.bold(), steps);
        if let Some(description) = &workflow.description {
            println!("      {}", description.dimmed());
        }
    }
    println!();
    println!("  {} workflow(s)", workflows.len());
    Ok(())
}
