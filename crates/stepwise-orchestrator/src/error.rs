// Error types for orchestration and scheduling

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Orchestration errors
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// A task or step declaration is malformed
    #[error("Invalid plan: {0}")]
    PlanValidation(String),

    /// A step references a tool that is not registered
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    /// A tool name matched several registered tools equally well
    #[error("Tool name '{requested}' is ambiguous, candidates: {}", candidates.join(", "))]
    AmbiguousTool {
        /// Name the caller asked for
        requested: String,
        /// Registered names that matched
        candidates: Vec<String>,
    },

    /// A tool raised an error while running a specific step
    #[error("Step {step} failed: {message}")]
    StepExecution {
        /// Step number
        step: u32,
        /// Error message raised by the tool
        message: String,
    },

    /// Invalid tool arguments
    #[error("Invalid tool arguments for '{tool}': {reason}")]
    InvalidToolArguments {
        /// Tool name
        tool: String,
        /// Reason why arguments are invalid
        reason: String,
    },

    /// Tool execution failed
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    /// The workflow store has no workflow with this id
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// A cron expression failed syntactic validation
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression {
        /// Expression as supplied
        expression: String,
        /// Parser message
        reason: String,
    },

    /// Unknown IANA timezone name
    #[error("Invalid timezone '{0}'")]
    InvalidTimezone(String),

    /// Schedule request rejected for a reason other than cron syntax
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No active schedule with this id
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    /// No open session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// An operation exceeded its configured deadline
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Orchestration cancelled
    #[error("Orchestration cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("Orchestration error: {0}")]
    Other(String),
}
