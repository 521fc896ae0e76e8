//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are how the agent reaches clinical data sources: patient records,
//! drug-interaction lookups, guideline checks, cost estimates and the
//! knowledge base. The registry is the only place tools are invoked, and
//! it never lets a failure escape as anything other than a [`ToolResult`].

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// The outcome of one tool invocation, as seen by the loop and scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Structured output, present on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Failure description, present when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock time spent inside the tool
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(data: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// Render this result as observation text for the reasoning transcript.
    pub fn to_observation(&self) -> String {
        if self.success {
            match &self.data {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => "Tool completed with no output".to_string(),
            }
        } else {
            format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("tool failed without a message")
            )
        }
    }
}

/// The core Tool trait.
///
/// Each clinical data source implements this trait and is registered in
/// the [`ToolRegistry`]. Implementations may return `Err` freely; the
/// registry converts it.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "fetch_patient").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send>>;
type ToolFn = dyn Fn(serde_json::Value) -> ToolFuture + Send + Sync;

/// A tool backed by a closure, for declaring capabilities without a
/// dedicated type.
pub struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    handler: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        (self.handler)(arguments).await
    }
}

/// A registry of available tools.
///
/// Shared across concurrent sessions behind an `Arc`; it is immutable
/// once built.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool definitions, sorted by name so prompts are reproducible.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// All registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// Never fails: unknown tools, tool errors and tool panics all come
    /// back as `ToolResult { success: false, .. }`.
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> ToolResult {
        let start = Instant::now();
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::failed(ToolError::NotFound(name.to_string()).to_string(), 0);
        };

        let outcome = AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(data)) => {
                tracing::debug!(tool = name, duration_ms, "Tool succeeded");
                ToolResult::ok(data, duration_ms)
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = name, duration_ms, error = %e, "Tool failed");
                ToolResult::failed(e.to_string(), duration_ms)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(tool = name, duration_ms, panic = %message, "Tool panicked");
                ToolResult::failed(ToolError::Panicked(message).to_string(), duration_ms)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("text is required".into()))?;
            Ok(serde_json::json!(text))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
            panic!("lookup table corrupted");
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(PanickingTool));
        registry
    }

    #[test]
    fn registry_register_and_lookup() {
        let registry = registry();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn definitions_and_names_are_sorted() {
        let registry = registry();
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "boom");
        assert_eq!(defs[1].name, "echo");
        assert_eq!(registry.names(), vec!["boom", "echo"]);
    }

    #[tokio::test]
    async fn execute_success_carries_data() {
        let result = registry().execute("echo", serde_json::json!({"text": "hello"})).await;
        assert!(result.success);
        assert_eq!(result.data, Some(serde_json::json!("hello")));
        assert_eq!(result.to_observation(), "hello");
    }

    #[tokio::test]
    async fn execute_error_becomes_failed_result() {
        let result = registry().execute("echo", serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("text is required"));
        assert!(result.to_observation().starts_with("Error:"));
    }

    #[tokio::test]
    async fn execute_panic_is_caught() {
        let result = registry().execute("boom", serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("lookup table corrupted"));
    }

    #[tokio::test]
    async fn execute_missing_tool() {
        let result = registry().execute("nonexistent", serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("nonexistent"));
    }

    #[tokio::test]
    async fn fn_tool_wraps_closure() {
        let tool = FnTool::new(
            "double",
            "Doubles a number",
            serde_json::json!({"type": "object"}),
            |args| async move {
                let n = args["n"].as_i64().unwrap_or(0);
                Ok(serde_json::json!(n * 2))
            },
        );
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(tool));
        let result = registry.execute("double", serde_json::json!({"n": 21})).await;
        assert_eq!(result.data, Some(serde_json::json!(42)));
    }
}
