//! Schedule command implementation.
//!
//! Keeps the process in the foreground while the schedule is active. Exits
//! once the schedule stops on its own, or stops every schedule on Ctrl-C.

use colored::Colorize;
use std::time::Duration;
use stepwise_orchestrator::{ScheduleEvent, ScheduleRequest};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use super::parse_context;
use crate::config::CliSettings;
use crate::tools::build_scheduler;

/// Time given to in-flight firings after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Arguments of the schedule command
#[derive(Debug, Clone)]
pub struct ScheduleArgs {
    /// Workflow to fire
    pub workflow_id: String,
    /// Cron expression
    pub cron: String,
    /// IANA timezone
    pub timezone: Option<String>,
    /// Stop after this many firings
    pub max_executions: Option<u32>,
    /// Raw `--context` JSON
    pub context: Option<String>,
    /// Display name
    pub name: Option<String>,
}

/// Execute the schedule command.
pub async fn execute(settings: &CliSettings, args: ScheduleArgs) -> anyhow::Result<()> {
    let context = parse_context(args.context.as_deref())?;
    let scheduler = build_scheduler(settings)?;
    let mut events = scheduler.subscribe();

    let mut request = ScheduleRequest::new(&args.workflow_id, &args.cron).with_context(context);
    if let Some(timezone) = args.timezone {
        request = request.with_timezone(timezone);
    }
    if let Some(max) = args.max_executions {
        request = request.with_max_executions(max);
    }
    if let Some(name) = args.name {
        request = request.with_name(name);
    }

    let schedule_id = scheduler.schedule_workflow(request).await?;
    if !settings.json {
        println!("{}", "stepwise schedule".bold().cyan());
        println!("  {} Schedule: {}", "•".dimmed(), schedule_id.cyan());
        println!("  {} Workflow: {}", "•".dimmed(), args.workflow_id);
        println!("  {} Cron: {}", "•".dimmed(), args.cron);
        println!("  {} Press Ctrl-C to stop", "•".dimmed());
        println!();
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let stopped = scheduler.get_status().await.active_schedules;
                scheduler.shutdown(SHUTDOWN_GRACE).await;
                if !settings.json {
                    println!();
                    println!("{} Stopped {} schedule(s)", "✓".green(), stopped);
                }
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(settings.json, &event)?;
                    if matches!(event, ScheduleEvent::Stopped { .. })
                        && scheduler.get_status().await.active_schedules == 0
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped scheduler events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn print_event(json: bool, event: &ScheduleEvent) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        ScheduleEvent::Scheduled { next_run_at, .. } => {
            let next = next_run_at.map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
            println!("  {} Next firing at {}", "•".dimmed(), next);
        }
        ScheduleEvent::Fired { execution_number, success, message, .. } => {
            let marker = if *success { "✓".green() } else { "✗".red() };
            let now = chrono::Utc::now().format("%H:%M:%S");
            println!("{} [{}] Run #{}", marker, now, execution_number);
            for line in message.lines() {
                println!("    {}", line.dimmed());
            }
        }
        ScheduleEvent::Stopped { execution_count, reason, .. } => {
            println!();
            println!("{} Schedule stopped ({}) after {} run(s)", "✓".green(), reason, execution_count);
        }
    }
    Ok(())
}
