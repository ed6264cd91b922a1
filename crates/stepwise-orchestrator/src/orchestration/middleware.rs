//! Tool middleware
//!
//! Middleware wraps a [`ToolHandler`] at registration time. The registry applies
//! each middleware whose [`ToolMiddleware::applies_to`] accepts the tool name, in
//! the order the middleware was added, so the wrapping chain of every tool is
//! fixed once the registry is built.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::tool::{ToolArguments, ToolHandler, ToolResult};
use crate::error::Result;
use crate::session::SessionContext;

/// Decorator applied to tool handlers when they are registered
pub trait ToolMiddleware: Send + Sync {
    /// Short name used for introspection of wrapping chains
    fn name(&self) -> &'static str;

    /// Whether this middleware wraps the tool with the given name
    fn applies_to(&self, tool_name: &str) -> bool;

    /// Wrap `inner`, returning the handler that will be registered
    fn wrap(&self, tool_name: &str, inner: Arc<dyn ToolHandler>) -> Arc<dyn ToolHandler>;
}

/// Middleware that logs every call with its duration
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

impl ToolMiddleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn applies_to(&self, _tool_name: &str) -> bool {
        true
    }

    fn wrap(&self, tool_name: &str, inner: Arc<dyn ToolHandler>) -> Arc<dyn ToolHandler> {
        Arc::new(LoggedHandler { tool_name: tool_name.to_string(), inner })
    }
}

struct LoggedHandler {
    tool_name: String,
    inner: Arc<dyn ToolHandler>,
}

#[async_trait]
impl ToolHandler for LoggedHandler {
    async fn execute(&self, ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
        let started = Instant::now();
        let result = self.inner.execute(ctx, args).await;
        debug!(
            session_id = %ctx.session_id(),
            tool = %self.tool_name,
            origin = ?args.origin,
            ok = result.as_ref().is_ok_and(|r| r.success),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tool call finished"
        );
        result
    }
}
