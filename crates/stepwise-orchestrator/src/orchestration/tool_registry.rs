//! Function registry for orchestration
//!
//! Maps tool names to handlers. Lookups by the model use exact names; the
//! multi-step executor additionally tolerates small naming drift between the
//! planner's chosen name and the registered one through a scored fuzzy match.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::middleware::ToolMiddleware;
use super::tool::{Tool, ToolDefinition};
use crate::error::{OrchestrationError, Result};

/// Default minimum score gap between the best and second-best fuzzy match
pub const DEFAULT_FUZZY_MARGIN: f64 = 0.2;

/// How a requested tool name was matched
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    /// Name matched exactly
    Exact,
    /// Name matched by containment with the given similarity score (0.0-1.0]
    Fuzzy(f64),
}

/// Result of resolving a tool name
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    /// Resolved tool
    pub tool: &'a Tool,
    /// How it was matched
    pub kind: MatchKind,
}

/// Registry of callable tools
pub struct FunctionRegistry {
    /// Tools by registered name
    tools: BTreeMap<String, Tool>,
    /// Middleware applied to tools at registration
    middleware: Vec<Arc<dyn ToolMiddleware>>,
    /// Middleware names applied to each tool, innermost first
    chains: HashMap<String, Vec<&'static str>>,
    /// Minimum score gap for an unambiguous fuzzy match
    fuzzy_margin: f64,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("chains", &self.chains)
            .field("fuzzy_margin", &self.fuzzy_margin)
            .finish_non_exhaustive()
    }
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            middleware: Vec::new(),
            chains: HashMap::new(),
            fuzzy_margin: DEFAULT_FUZZY_MARGIN,
        }
    }

    /// Set the minimum score gap required to accept the best fuzzy match
    #[must_use]
    pub fn with_fuzzy_margin(mut self, margin: f64) -> Self {
        self.fuzzy_margin = margin.clamp(0.0, 1.0);
        self
    }

    /// Add middleware; it applies to tools registered afterwards
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn ToolMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Register a tool, wrapping its handler with every applicable middleware
    ///
    /// # Returns
    /// `true` if the name was new, `false` if an existing tool was replaced
    pub fn register(&mut self, mut tool: Tool) -> bool {
        let mut chain = Vec::new();
        for middleware in &self.middleware {
            if middleware.applies_to(&tool.name) {
                tool.handler = middleware.wrap(&tool.name, Arc::clone(&tool.handler));
                chain.push(middleware.name());
            }
        }

        debug!(tool = %tool.name, middleware = ?chain, "Registering tool");
        let name = tool.name.clone();
        self.chains.insert(name.clone(), chain);
        let replaced = self.tools.insert(name.clone(), tool).is_some();
        if replaced {
            warn!(tool = %name, "Tool replaced in registry");
        }
        !replaced
    }

    /// Find a tool by exact name
    pub fn find_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Middleware applied to a tool, innermost first
    pub fn middleware_chain(&self, name: &str) -> Option<&[&'static str]> {
        self.chains.get(name).map(Vec::as_slice)
    }

    /// Resolve a tool name: exact match first, then scored fuzzy fallback
    ///
    /// # Errors
    /// `UnknownTool` when nothing matches, `AmbiguousTool` when the best
    /// fuzzy candidates are too close to call.
    pub fn resolve(&self, requested: &str) -> Result<Resolution<'_>> {
        if let Some(tool) = self.tools.get(requested) {
            return Ok(Resolution { tool, kind: MatchKind::Exact });
        }

        let wanted = normalize(requested);
        if wanted.is_empty() {
            return Err(OrchestrationError::UnknownTool(requested.to_string()));
        }

        let mut scored: Vec<(f64, &Tool)> = self
            .tools
            .values()
            .filter_map(|tool| containment_score(&wanted, &normalize(&tool.name)).map(|s| (s, tool)))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));

        match scored.as_slice() {
            [] => Err(OrchestrationError::UnknownTool(requested.to_string())),
            [(score, tool)] => Ok(Resolution { tool, kind: MatchKind::Fuzzy(*score) }),
            [(best, tool), (second, _), ..] if best - second >= self.fuzzy_margin => {
                debug!(requested = %requested, resolved = %tool.name, score = best, "Fuzzy tool match");
                Ok(Resolution { tool, kind: MatchKind::Fuzzy(*best) })
            }
            [(best, _), ..] => {
                let candidates = scored
                    .iter()
                    .filter(|(score, _)| best - score < self.fuzzy_margin)
                    .map(|(_, tool)| tool.name.clone())
                    .collect();
                Err(OrchestrationError::AmbiguousTool { requested: requested.to_string(), candidates })
            }
        }
    }

    /// Definitions of all registered tools, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(Tool::definition).collect()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase alphanumerics only, so `send-email`, `Send_Email` and `sendemail` compare equal
fn normalize(name: &str) -> String {
    name.chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_lowercase()).collect()
}

/// Shorter/longer length ratio when one normalized name contains the other
fn containment_score(wanted: &str, registered: &str) -> Option<f64> {
    if registered.is_empty() {
        return None;
    }
    if registered.contains(wanted) || wanted.contains(registered) {
        let (short, long) = if wanted.len() <= registered.len() {
            (wanted.len(), registered.len())
        } else {
            (registered.len(), wanted.len())
        };
        Some(short as f64 / long as f64)
    } else {
        None
    }
}
