//! Run command implementation.
//!
//! Runs one stored workflow immediately, under the firing deadline.

use colored::Colorize;
use serde_json::json;

use super::parse_context;
use crate::config::CliSettings;
use crate::tools::build_scheduler;

/// Execute the run command.
pub async fn execute(settings: &CliSettings, workflow_id: &str, context: Option<&str>) -> anyhow::Result<()> {
    let context = parse_context(context)?;
    let scheduler = build_scheduler(settings)?;

    if !settings.json {
        println!("{}", "stepwise run".bold().cyan());
        println!("  {} Workflow: {}", "•".dimmed(), workflow_id.cyan());
        println!();
    }

    let result = scheduler.run_now(workflow_id, context).await?;

    if settings.json {
        let output = json!({
            "workflowId": workflow_id,
            "success": result.success,
            "message": result.message,
            "output": result.output,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", result.message);
        println!();
    }

    if result.success {
        if !settings.json {
            println!("{} {}", "✓".green(), "Workflow completed".bold());
        }
        Ok(())
    } else {
        anyhow::bail!("Workflow '{}' did not complete every step", workflow_id)
    }
}
