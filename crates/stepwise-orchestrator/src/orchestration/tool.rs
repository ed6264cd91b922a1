// Tool abstractions for orchestration
//
// Tools are the actions an agent can take (send a message, create an event, ...).
// The surrounding agent runtime owns the concrete handlers; this module defines
// the contract they are registered under.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::session::SessionContext;

/// Tool call from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Name of the tool to invoke
    pub name: String,
    /// Arguments for the tool
    pub arguments: Value,
}

impl ToolCall {
    /// Create a tool call with a generated id
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self { id: format!("call_{}", uuid::Uuid::new_v4().simple()), name: name.into(), arguments }
    }
}

/// Tool parameters schema (JSON-schema shaped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    /// Type (always "object" for function parameters)
    #[serde(rename = "type")]
    pub param_type: String,
    /// Property definitions
    pub properties: BTreeMap<String, ToolPropertySchema>,
    /// Required property names
    pub required: Vec<String>,
}

impl ToolParameters {
    /// Create a new tool parameters schema
    pub fn new() -> Self {
        Self { param_type: "object".to_string(), properties: BTreeMap::new(), required: Vec::new() }
    }

    /// Add a property to the schema
    #[must_use]
    pub fn add_property(
        mut self,
        name: impl Into<String>,
        property_type: impl Into<String>,
        description: impl Into<String>,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            ToolPropertySchema {
                property_type: property_type.into(),
                description: description.into(),
            },
        );
        if required {
            self.required.push(name);
        }
        self
    }

    /// Names of required properties missing from `args`
    pub fn missing_required(&self, args: &Value) -> Vec<String> {
        self.required
            .iter()
            .filter(|name| args.get(name.as_str()).is_none_or(Value::is_null))
            .cloned()
            .collect()
    }
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self::new()
    }
}

/// Tool property schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPropertySchema {
    /// Property type
    #[serde(rename = "type")]
    pub property_type: String,
    /// Property description
    pub description: String,
}

/// Where a tool invocation came from.
///
/// The completion enforcer only intercepts calls the model made directly;
/// calls issued by the multi-step executor are already part of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum CallOrigin {
    /// Direct function call from the model
    #[default]
    Model,
    /// Step of a multi-step batch
    Batch {
        /// Step number within the batch
        step: u32,
    },
}

/// Arguments passed to tool handler
#[derive(Debug, Clone)]
pub struct ToolArguments {
    /// Parsed arguments as JSON value
    pub args: Value,
    /// Who issued the call
    pub origin: CallOrigin,
}

impl ToolArguments {
    /// Create new tool arguments for a direct model call
    pub fn new(args: Value) -> Self {
        Self { args, origin: CallOrigin::Model }
    }

    /// Create tool arguments for a step of a multi-step batch
    pub fn for_step(args: Value, step: u32) -> Self {
        Self { args, origin: CallOrigin::Batch { step } }
    }

    /// Get argument as string
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.args.get(key)?.as_str().map(str::to_string)
    }

    /// Get argument as i64
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.args.get(key)?.as_i64()
    }

    /// Get argument as u64
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.args.get(key)?.as_u64()
    }

    /// Get argument as bool
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.args.get(key)?.as_bool()
    }

    /// Get argument as array
    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.args.get(key)?.as_array()
    }

    /// Whether this call is part of a multi-step batch
    pub fn is_batch_step(&self) -> bool {
        matches!(self.origin, CallOrigin::Batch { .. })
    }
}

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether execution succeeded
    pub success: bool,
    /// Output from the tool
    pub output: String,
    /// Whether this result is an error or directive meant to be read by the model
    #[serde(default)]
    pub is_error: bool,
    /// Structured value returned by the tool, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            is_error: false,
            data: None,
            metadata: HashMap::new(),
        }
    }

    /// Create an error result
    pub fn error(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            is_error: false,
            data: None,
            metadata: HashMap::new(),
        }
    }

    /// Create an error result that is handed back to the model for handling
    pub fn error_for_model(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            is_error: true,
            data: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach a structured value
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Add metadata to the result
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The value recorded for this result: structured data if present, else the output text
    pub fn value(&self) -> Value {
        self.data.clone().unwrap_or_else(|| Value::String(self.output.clone()))
    }
}

/// Handler for tool execution
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with given arguments on behalf of a session
    ///
    /// # Arguments
    /// * `ctx` - Session the call belongs to
    /// * `args` - Tool arguments
    ///
    /// # Returns
    /// Result of tool execution
    async fn execute(&self, ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult>;
}

/// Serializable tool description advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// Parameter schema
    pub parameters: ToolParameters,
}

/// Tool definition for orchestration
#[derive(Clone)]
pub struct Tool {
    /// Tool name (used in function calls, unique in a registry)
    pub name: String,
    /// Tool description
    pub description: String,
    /// Parameter schema
    pub parameters: ToolParameters,
    /// Handler for executing the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Create a new tool
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self { name: name.into(), description: description.into(), parameters, handler }
    }

    /// Execute this tool with given arguments
    pub async fn execute(&self, ctx: &SessionContext, args: &ToolArguments) -> Result<ToolResult> {
        self.handler.execute(ctx, args).await
    }

    /// Serializable description of this tool
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

// Arc<dyn ToolHandler> has no Debug
impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("handler", &"<handler>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_parameters_builder() {
        let params = ToolParameters::new()
            .add_property("to", "string", "Recipient address", true)
            .add_property("cc", "string", "Copy recipient", false);

        assert_eq!(params.properties.len(), 2);
        assert_eq!(params.required, vec!["to".to_string()]);
    }

    #[test]
    fn test_missing_required() {
        let params = ToolParameters::new()
            .add_property("to", "string", "Recipient", true)
            .add_property("subject", "string", "Subject", true);

        let missing = params.missing_required(&serde_json::json!({"to": "a@x.com", "subject": null}));
        assert_eq!(missing, vec!["subject".to_string()]);
    }

    #[test]
    fn test_tool_arguments_origin() {
        let direct = ToolArguments::new(serde_json::json!({"to": "a@x.com"}));
        assert!(!direct.is_batch_step());
        assert_eq!(direct.get_string("to"), Some("a@x.com".to_string()));

        let step = ToolArguments::for_step(serde_json::json!({}), 3);
        assert_eq!(step.origin, CallOrigin::Batch { step: 3 });
        assert!(step.is_batch_step());
    }

    #[test]
    fn test_tool_result_value_prefers_data() {
        let plain = ToolResult::success("sent");
        assert_eq!(plain.value(), serde_json::json!("sent"));

        let structured = ToolResult::success("sent").with_data(serde_json::json!({"id": 7}));
        assert_eq!(structured.value(), serde_json::json!({"id": 7}));
    }

    #[test]
    fn test_tool_result_error_for_model() {
        let result = ToolResult::error_for_model("Use the batch tool").with_metadata("k", "v");
        assert!(!result.success);
        assert!(result.is_error);
        assert_eq!(result.metadata.get("k"), Some(&"v".to_string()));
    }
}
