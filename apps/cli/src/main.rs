//! Stepwise CLI - scheduling front end for the Stepwise orchestration core
//!
//! Provides a `stepwise` command to inspect stored workflows, validate cron
//! expressions, run a workflow once and keep workflows on a schedule.

mod commands;
mod config;
mod tools;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{run, schedule, validate_cron, workflows};

/// Stepwise - multi-step agent task orchestration and workflow scheduling
#[derive(Parser, Debug)]
#[command(
    name = "stepwise",
    author,
    version,
    about = "Stepwise - run and schedule multi-step agent workflows"
)]
struct Args {
    /// Configuration file (defaults to ~/.stepwise/orchestration.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workflow store file (overrides scheduler.workflows_path)
    #[arg(short, long, global = true)]
    workflows: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (text, json)
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Print command output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print tracker events as JSON lines on stderr
    #[arg(long, global = true)]
    telemetry: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored workflows
    Workflows,

    /// Validate a cron expression and preview its next firings
    ///
    /// Accepts five-field (min hour dom month dow) and six- or seven-field
    /// seconds-first expressions.
    ValidateCron {
        /// Cron expression
        expression: String,

        /// IANA timezone
        #[arg(short, long)]
        timezone: Option<String>,

        /// Number of upcoming firings to show
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },

    /// Run a stored workflow once, now
    Run {
        /// Workflow ID
        #[arg(long)]
        workflow_id: String,

        /// Context object as JSON, available to steps as {{key}}
        #[arg(long)]
        context: Option<String>,
    },

    /// Fire a stored workflow on a cron schedule until it stops or Ctrl-C
    Schedule {
        /// Workflow ID
        #[arg(long)]
        workflow_id: String,

        /// Cron expression
        #[arg(long)]
        cron: String,

        /// IANA timezone (defaults to scheduler.default_timezone)
        #[arg(short, long)]
        timezone: Option<String>,

        /// Stop after this many firings
        #[arg(long)]
        max_executions: Option<u32>,

        /// Context object as JSON, merged into every firing
        #[arg(long)]
        context: Option<String>,

        /// Display name for the schedule
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder().with_max_level(level).with_writer(std::io::stderr).with_target(false);
    if args.log_format.eq_ignore_ascii_case("json") {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.without_time().finish())?;
    }

    let settings = config::CliSettings::load(args.config.as_deref(), args.workflows, args.json, args.telemetry)?;

    match args.command {
        Command::Workflows => workflows::execute(&settings).await,
        Command::ValidateCron { expression, timezone, count } => {
            validate_cron::execute(&settings, &expression, timezone.as_deref(), count)
        }
        Command::Run { workflow_id, context } => run::execute(&settings, &workflow_id, context.as_deref()).await,
        Command::Schedule { workflow_id, cron, timezone, max_executions, context, name } => {
            schedule::execute(
                &settings,
                schedule::ScheduleArgs { workflow_id, cron, timezone, max_executions, context, name },
            )
            .await
        }
    }
}
