// Scheduler module - cron-triggered workflow firings
//
// The engine owns the timers; workflows come from a WorkflowStore and run
// through a WorkflowExecutor, both injected by the caller.

pub mod cron;
pub mod engine;
pub mod executor;
pub mod store;

pub use cron::{next_fire_times, normalize_expression, parse_timezone, CronSchedule};
pub use engine::{
    FiringResult, ScheduleEntry, ScheduleEvent, ScheduleRequest, ScheduleState, SchedulerStatus, StopReason,
    WorkflowScheduler,
};
pub use executor::{StepWorkflowExecutor, WorkflowExecutor, WorkflowRunResult};
pub use store::{InMemoryWorkflowStore, JsonFileWorkflowStore, Workflow, WorkflowStore};
