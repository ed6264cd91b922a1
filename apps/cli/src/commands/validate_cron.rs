//! Validate-cron command implementation.

use colored::Colorize;
use serde_json::json;
use stepwise_orchestrator::scheduler::CronSchedule;

use crate::config::CliSettings;

/// Execute the validate-cron command.
///
/// Fails with the parser's message when the expression or timezone is invalid.
pub fn execute(settings: &CliSettings, expression: &str, timezone: Option<&str>, count: usize) -> anyhow::Result<()> {
    let timezone = timezone.unwrap_or(&settings.config.scheduler.default_timezone);
    let schedule = CronSchedule::parse(expression, timezone)?;
    let upcoming = schedule.upcoming(count);

    if settings.json {
        let output = json!({
            "expression": schedule.expression(),
            "normalized": schedule.normalized(),
            "timezone": timezone,
            "next": upcoming.iter().map(|t| t.to_rfc3339()).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{} {}", "✓".green(), "Valid cron expression".bold());
    println!("  {} Expression: {}", "•".dimmed(), schedule.expression().cyan());
    println!("  {} Normalized: {}", "•".dimmed(), schedule.normalized());
    println!("  {} Timezone: {}", "•".dimmed(), timezone);
    println!();
    println!("{}", "Next firings:".bold());
    for time in &upcoming {
        println!("  {}", time.to_rfc3339());
    }
    Ok(())
}
