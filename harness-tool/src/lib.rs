#![deny(missing_docs)]
//! Tool registry and middleware pipeline for the turn pipeline's tool-call
//! loop.
//!
//! Defines [`ToolDyn`] for object-safe tool implementations and
//! [`ToolRegistry`] for dispatching [`harness_core::ToolCall`]s against
//! them. Any tool source (local function, MCP-backed adapter) implements
//! [`ToolDyn`]; the registry turns a name + JSON arguments into a
//! [`harness_core::ToolResult`] without ever returning a bare `Err` to the
//! caller — execution failures are folded into `ToolResult.error` so the
//! pipeline can record them in conversation history and keep going.

pub mod builtin;
pub mod middleware;

use harness_core::conversation::{ToolCall, ToolResult};
use harness_core::duration::DurationMs;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

pub use middleware::{Next, ToolMiddleware};

/// Errors produced while building or resolving a tool call.
///
/// Errors raised from inside a tool's own `call` are always folded into
/// [`harness_core::ToolResult::error`] by [`ToolRegistry::execute`] — this
/// enum only surfaces where there is no `ToolResult` to attach to yet
/// (e.g. registering a malformed descriptor).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool was not found in the registry.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Tool execution failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The input provided to the tool was invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// How a tool is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// Implemented in-process.
    Local,
    /// Proxied to an MCP server via `harness-replay`'s adapter registry or
    /// a live MCP bridge (the bridge itself is out of scope for this
    /// crate).
    Mcp,
}

/// Static description of a tool, as surfaced to a provider's tool-calling
/// API and to `GetTools()` callers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    /// The tool's unique name.
    pub name: String,
    /// Human-readable description of what the tool does.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
    /// JSON Schema for the tool's output, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// How the tool is backed.
    pub mode: ToolMode,
}

/// Object-safe trait for tool implementations.
///
/// Any tool source (local function, MCP-backed adapter) implements this
/// trait. Tools are stored as `Arc<dyn ToolDyn>` in [`ToolRegistry`].
pub trait ToolDyn: Send + Sync {
    /// The tool's static descriptor.
    fn descriptor(&self) -> &ToolDescriptor;

    /// Execute the tool with the given input, returning raw JSON output.
    fn call(
        &self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>>;
}

/// Registry of tools available to a turn, with an ordered middleware chain.
///
/// The turn pipeline's tool-call loop looks up and executes tools
/// requested by the model through this registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolDyn>>,
    middleware: Vec<Arc<dyn ToolMiddleware>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolDyn>) {
        self.tools
            .insert(tool.descriptor().name.clone(), tool);
    }

    /// Append middleware to the end of the chain. Middleware runs in
    /// registration order, outermost first.
    pub fn use_middleware(&mut self, middleware: Arc<dyn ToolMiddleware>) {
        self.middleware.push(middleware);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolDyn>> {
        self.tools.get(name)
    }

    /// Iterate over all registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ToolDyn>> {
        self.tools.values()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors for every registered tool, for advertising to a
    /// provider's tool-calling API.
    pub fn get_tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|t| t.descriptor().clone())
            .collect()
    }

    /// Execute `call` through the middleware chain and the resolved tool,
    /// producing a [`ToolResult`] that carries `call.id`/`call.name`
    /// regardless of outcome.
    ///
    /// Never returns `Err` for a missing tool or a failed call — both are
    /// reported via `ToolResult.error` so the pipeline can append the
    /// result to conversation history and continue the turn.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                content: String::new(),
                error: Some(format!("tool not found: {}", call.name)),
                latency: DurationMs::since(start),
            };
        };

        let next = Next::new(tool.as_ref(), &self.middleware);
        match next.run(call).await {
            Ok(output) => ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                content: output.to_string(),
                error: None,
                latency: DurationMs::since(start),
            },
            Err(e) => ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                content: String::new(),
                error: Some(e.to_string()),
                latency: DurationMs::since(start),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn tool_dyn_is_object_safe() {
        _assert_send_sync::<Arc<dyn ToolDyn>>();
    }

    struct EchoTool(ToolDescriptor);

    impl EchoTool {
        fn new() -> Self {
            Self(ToolDescriptor {
                name: "echo".into(),
                description: "Echoes input back".into(),
                input_schema: json!({"type": "object"}),
                output_schema: None,
                mode: ToolMode::Local,
            })
        }
    }

    impl ToolDyn for EchoTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }
        fn call(
            &self,
            input: Value,
        ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
            Box::pin(async move { Ok(json!({"echoed": input})) })
        }
    }

    struct FailTool(ToolDescriptor);

    impl FailTool {
        fn new() -> Self {
            Self(ToolDescriptor {
                name: "fail".into(),
                description: "Always fails".into(),
                input_schema: json!({"type": "object"}),
                output_schema: None,
                mode: ToolMode::Local,
            })
        }
    }

    impl ToolDyn for FailTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }
        fn call(
            &self,
            _input: Value,
        ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
            Box::pin(async { Err(ToolError::ExecutionFailed("always fails".into())) })
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "call-1".into(),
            name: name.into(),
            args,
        }
    }

    #[test]
    fn registry_add_and_get() {
        let mut reg = ToolRegistry::new();
        assert!(reg.is_empty());
        reg.register(Arc::new(EchoTool::new()));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("echo").is_some());
        assert!(reg.get("nonexistent").is_none());
    }

    #[test]
    fn get_tools_returns_descriptors() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::new()));
        reg.register(Arc::new(FailTool::new()));
        let mut names: Vec<String> = reg.get_tools().into_iter().map(|d| d.name).collect();
        names.sort();
        assert_eq!(names, vec!["echo".to_string(), "fail".to_string()]);
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::new()));
        let result = reg.execute(&call("echo", json!({"msg": "hi"}))).await;
        assert_eq!(result.id, "call-1");
        assert!(result.error.is_none());
        assert!(result.content.contains("hi"));
    }

    #[tokio::test]
    async fn execute_missing_tool_reports_error_not_panic() {
        let reg = ToolRegistry::new();
        let result = reg.execute(&call("nope", json!({}))).await;
        assert!(result.error.is_some());
        assert!(result.content.is_empty());
    }

    #[tokio::test]
    async fn execute_failing_tool_reports_error() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool::new()));
        let result = reg.execute(&call("fail", json!({}))).await;
        assert_eq!(result.error.as_deref(), Some("execution failed: always fails"));
    }

    #[test]
    fn registry_overwrite() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool::new()));
        reg.register(Arc::new(EchoTool::new()));
        assert_eq!(reg.len(), 1);
    }
}
