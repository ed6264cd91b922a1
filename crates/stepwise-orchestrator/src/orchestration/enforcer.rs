//! Completion enforcer.
//!
//! Middleware around action tools. When the session's latest request implies
//! several actions and more than one of them is still outstanding, a direct
//! single-tool call from the model is refused with a directive to use the
//! multi-step executor instead. Work that earlier results already confirm is
//! never counted as outstanding, and an identical repeat of a successful
//! action returns the earlier confirmation rather than running again.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::detector::{Detection, MultiActionDetector, PatternDetector};
use super::middleware::ToolMiddleware;
use super::plan_tools::EXECUTE_MULTI_STEP;
use super::tool::{ToolArguments, ToolHandler, ToolResult};
use crate::config::EnforcerConfig;
use crate::error::{OrchestrationError, Result};
use crate::session::{ActionRecord, SessionContext};

const CONFIRMATION: &str = r"(?i)\b(?:sent|delivered|emailed|forwarded|created|scheduled|booked|invited|shared)\b";

/// Metadata key set on results the enforcer produced or annotated
pub const ENFORCEMENT_KEY: &str = "enforcement";

/// Middleware that keeps multi-action requests from stopping after one action
#[derive(Clone)]
pub struct CompletionEnforcer {
    action_tools: HashSet<String>,
    executor_tool: String,
    detector: Arc<dyn MultiActionDetector>,
    confirmation: Regex,
    block_duplicates: bool,
}

impl fmt::Debug for CompletionEnforcer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionEnforcer")
            .field("action_tools", &self.action_tools)
            .field("executor_tool", &self.executor_tool)
            .field("confirmation", &self.confirmation.as_str())
            .field("block_duplicates", &self.block_duplicates)
            .finish_non_exhaustive()
    }
}

impl CompletionEnforcer {
    /// Enforcer using `detector`, wrapping no tools until some are added
    pub fn new(detector: Arc<dyn MultiActionDetector>) -> Result<Self> {
        Ok(Self {
            action_tools: HashSet::new(),
            executor_tool: EXECUTE_MULTI_STEP.to_string(),
            detector,
            confirmation: Regex::new(CONFIRMATION).map_err(|e| OrchestrationError::Config(e.to_string()))?,
            block_duplicates: true,
        })
    }

    /// Enforcer with the pattern detector, built from configuration
    ///
    /// # Errors
    /// `Config` when a configured pattern does not compile
    pub fn from_config(config: &EnforcerConfig) -> Result<Self> {
        let detector = PatternDetector::new()?.with_patterns(config.compiled_extra_patterns()?);
        let mut enforcer = Self::new(Arc::new(detector))?
            .with_action_tools(config.action_tools.iter().cloned())
            .with_executor_tool(config.executor_tool.clone())
            .with_duplicate_guard(config.block_duplicate_actions);
        if let Some(confirmation) = config.compiled_confirmation_pattern()? {
            enforcer.confirmation = confirmation;
        }
        Ok(enforcer)
    }

    /// Add tools to wrap
    #[must_use]
    pub fn with_action_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.action_tools.extend(tools);
        self
    }

    /// Tool named in redirect directives
    #[must_use]
    pub fn with_executor_tool(mut self, tool: impl Into<String>) -> Self {
        self.executor_tool = tool.into();
        self
    }

    /// Override the confirmation-phrase pattern
    #[must_use]
    pub fn with_confirmation_pattern(mut self, pattern: Regex) -> Self {
        self.confirmation = pattern;
        self
    }

    /// Replace the multi-action detector
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn MultiActionDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Enable or disable the duplicate-action guard
    #[must_use]
    pub fn with_duplicate_guard(mut self, enabled: bool) -> Self {
        self.block_duplicates = enabled;
        self
    }

    /// Detected targets not yet confirmed by a successful earlier action
    pub fn outstanding(&self, detection: &Detection, actions: &[ActionRecord]) -> Vec<String> {
        let confirmations: Vec<&ActionRecord> =
            actions.iter().filter(|a| a.success && self.confirmation.is_match(&a.output)).collect();

        match detection {
            Detection::Single => Vec::new(),
            Detection::MultiRecipient(targets) => targets
                .iter()
                .filter(|target| {
                    !confirmations.iter().any(|a| a.output.to_lowercase().contains(&target.to_lowercase()))
                })
                .cloned()
                .collect(),
            Detection::RepeatedAction(occurrences) => {
                occurrences.iter().skip(confirmations.len()).cloned().collect()
            }
        }
    }

    fn directive(&self, tool_name: &str, outstanding: &[String]) -> String {
        let mut out = format!(
            "This request involves {} separate actions that are not done yet. Do not call {} for them one at a time. \
             Call {} once with one step per action (stepNumber, description, toolToUse, parameters), in order.\n\
             Outstanding:",
            outstanding.len(),
            tool_name,
            self.executor_tool
        );
        for (index, target) in outstanding.iter().enumerate() {
            out.push_str(&format!("\n{}. {}", index + 1, target));
        }
        out
    }
}

impl ToolMiddleware for CompletionEnforcer {
    fn name(&self) -> &'static str {
        "completion_enforcer"
    }

    fn applies_to(&self, tool_name: &str) -> bool {
        tool_name != self.executor_tool && self.action_tools.contains(tool_name)
    }

    fn wrap(&self, tool_name: &str, inner: Arc<dyn ToolHandler>) -> Arc<dyn ToolHandler> {
        Arc::new(EnforcedHandler { tool_name: tool_name.to_string(), inner, enforcer: self.clone() })
    }
}

struct EnforcedHandler {
    tool_name: String,
    inner: Arc<dyn ToolHandler>,
    enforcer: CompletionEnforcer,
}

impl EnforcedHandler {
    async fn run_and_record(&self, ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
        let result = self.inner.execute(ctx, args).await;
        let (output, success) = match &result {
            Ok(r) => (r.output.clone(), r.success),
            Err(e) => (e.to_string(), false),
        };
        ctx.record_action(ActionRecord {
            tool: self.tool_name.clone(),
            arguments: args.args.clone(),
            output,
            success,
            at: Utc::now(),
        })
        .await;
        result
    }
}

#[async_trait]
impl ToolHandler for EnforcedHandler {
    async fn execute(&self, ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
        if self.enforcer.block_duplicates {
            if let Some(previous) = ctx.find_successful_action(&self.tool_name, &args.args).await {
                debug!(
                    session_id = %ctx.session_id(),
                    tool = %self.tool_name,
                    "Duplicate action short-circuited"
                );
                return Ok(ToolResult::success(previous.output).with_metadata(ENFORCEMENT_KEY, "duplicate"));
            }
        }

        // Steps of a batch are already part of the multi-step plan
        if args.is_batch_step() {
            return self.run_and_record(ctx, args).await;
        }

        let request = ctx.request().await.unwrap_or_default();
        let detection = self.enforcer.detector.detect(&request);
        if !detection.is_multi_action() {
            return self.run_and_record(ctx, args).await;
        }

        let outstanding = self.enforcer.outstanding(&detection, &ctx.request_actions().await);
        if outstanding.len() > 1 {
            warn!(
                session_id = %ctx.session_id(),
                tool = %self.tool_name,
                outstanding = outstanding.len(),
                executor = %self.enforcer.executor_tool,
                "Multi-action request redirected to executor"
            );
            ctx.tracker().track_thought(format!(
                "Redirected {} to {} ({} outstanding)",
                self.tool_name,
                self.enforcer.executor_tool,
                outstanding.len()
            ));
            return Ok(ToolResult::error_for_model(self.enforcer.directive(&self.tool_name, &outstanding))
                .with_metadata(ENFORCEMENT_KEY, "redirect")
                .with_metadata("outstanding", outstanding.join(", ")));
        }

        let mut result = self.run_and_record(ctx, args).await?;
        let remaining = self.enforcer.outstanding(&detection, &ctx.request_actions().await);
        if !remaining.is_empty() {
            result.output.push_str(&format!(
                "\n\nStill outstanding from the request: {}. Complete these before finishing.",
                remaining.join(", ")
            ));
            result = result.with_metadata(ENFORCEMENT_KEY, "outstanding");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(output: &str, success: bool) -> ActionRecord {
        ActionRecord {
            tool: "send_email".to_string(),
            arguments: json!({}),
            output: output.to_string(),
            success,
            at: Utc::now(),
        }
    }

    fn enforcer() -> CompletionEnforcer {
        CompletionEnforcer::new(Arc::new(PatternDetector::new().unwrap()))
            .unwrap()
            .with_action_tools(["send_email".to_string()])
    }

    #[test]
    fn test_applies_only_to_action_tools() {
        let enforcer = enforcer().with_action_tools(["execute_multi_step".to_string()]);
        assert!(enforcer.applies_to("send_email"));
        assert!(!enforcer.applies_to("search"));
        assert!(!enforcer.applies_to("execute_multi_step"));
    }

    #[test]
    fn test_outstanding_skips_confirmed_recipients() {
        let detection = Detection::MultiRecipient(vec!["a@x.com".to_string(), "b@y.com".to_string()]);
        let actions = vec![record("Email sent to A@x.com", true), record("Failed for b@y.com", false)];
        assert_eq!(enforcer().outstanding(&detection, &actions), vec!["b@y.com".to_string()]);
    }

    #[test]
    fn test_outstanding_requires_confirmation_phrase() {
        let detection = Detection::MultiRecipient(vec!["a@x.com".to_string(), "b@y.com".to_string()]);
        let actions = vec![record("Drafted note for a@x.com", true)];
        assert_eq!(enforcer().outstanding(&detection, &actions).len(), 2);
    }

    #[test]
    fn test_outstanding_repeated_actions_count_confirmations() {
        let detection = Detection::RepeatedAction(vec![
            "schedule a meeting".to_string(),
            "schedule another meeting".to_string(),
            "schedule a meeting".to_string(),
        ]);
        let actions = vec![record("Event created: standup", true)];
        assert_eq!(enforcer().outstanding(&detection, &actions).len(), 2);
    }

    #[test]
    fn test_directive_lists_targets() {
        let text = enforcer().directive("send_email", &["a@x.com".to_string(), "b@y.com".to_string()]);
        assert!(text.contains("Call execute_multi_step once"));
        assert!(text.contains("1. a@x.com"));
        assert!(text.contains("2. b@y.com"));
    }

    #[test]
    fn test_from_config_rejects_bad_pattern() {
        let config = EnforcerConfig { confirmation_pattern: Some("(".to_string()), ..Default::default() };
        assert!(matches!(CompletionEnforcer::from_config(&config), Err(OrchestrationError::Config(_))));
    }
}
