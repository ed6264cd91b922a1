// Orchestration module - tool contract, registry and enforcement
//
// Tools are registered once into a FunctionRegistry whose middleware chain is
// fixed at registration. The completion enforcer and the multi-step executor
// sit on top of that registry.

pub mod continuation;
pub mod detector;
pub mod enforcer;
pub mod middleware;
pub mod multi_step;
pub mod plan_tools;
pub mod tool;
pub mod tool_registry;

pub use continuation::continuation_prompt;
pub use detector::{Detection, FixedDetector, MultiActionDetector, PatternDetector};
pub use enforcer::CompletionEnforcer;
pub use middleware::{LoggingMiddleware, ToolMiddleware};
pub use multi_step::{ExecutionSummary, MultiStepExecutor, Step};
pub use tool::{
    CallOrigin, Tool, ToolArguments, ToolCall, ToolDefinition, ToolHandler, ToolParameters, ToolResult,
};
pub use tool_registry::{FunctionRegistry, MatchKind, Resolution};
