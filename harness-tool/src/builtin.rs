//! Built-in middleware implementations.
//!
//! Auth and rate-limiting middleware are deliberately absent — both are
//! out of scope for this crate.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use harness_core::conversation::ToolCall;
use serde_json::Value;

use crate::middleware::{Next, ToolMiddleware};
use crate::{ToolError, ToolRegistry};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Middleware that truncates string fields of a tool's JSON output to a
/// maximum character length.
///
/// Long tool outputs can consume excessive tokens in the context window.
pub struct OutputFormatter {
    max_chars: usize,
}

impl OutputFormatter {
    /// Create a new output formatter with the given character limit.
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    fn truncate(&self, value: Value) -> Value {
        match value {
            Value::String(text) if text.len() > self.max_chars => {
                let mut boundary = self.max_chars;
                while boundary > 0 && !text.is_char_boundary(boundary) {
                    boundary -= 1;
                }
                Value::String(format!(
                    "{}... [truncated, {} chars total]",
                    &text[..boundary],
                    text.len()
                ))
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.truncate(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.truncate(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

impl ToolMiddleware for OutputFormatter {
    fn process<'a>(
        &'a self,
        call: &'a ToolCall,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move {
            let output = next.run(call).await?;
            Ok(self.truncate(output))
        })
    }
}

/// Middleware that validates tool call input against the tool's JSON
/// Schema before execution.
///
/// Performs lightweight structural validation: checks that the input is
/// an object, required fields are present, and property types match the
/// schema. This catches obvious input errors before the tool executes,
/// without depending on a full JSON Schema validation library.
pub struct SchemaValidator {
    schemas: HashMap<String, Value>,
}

impl SchemaValidator {
    /// Snapshot all tool input schemas from `registry` at construction
    /// time. Tools registered after this call are not validated.
    #[must_use]
    pub fn new(registry: &ToolRegistry) -> Self {
        let schemas = registry
            .iter()
            .map(|t| (t.descriptor().name.clone(), t.descriptor().input_schema.clone()))
            .collect();
        Self { schemas }
    }
}

impl ToolMiddleware for SchemaValidator {
    fn process<'a>(
        &'a self,
        call: &'a ToolCall,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move {
            if let Some(schema) = self.schemas.get(&call.name) {
                validate_input(&call.args, schema)?;
            }
            next.run(call).await
        })
    }
}

/// Validate a JSON input value against a JSON Schema object.
///
/// Performs lightweight structural checks:
/// - Input must be an object (if schema says `"type": "object"`)
/// - All `"required"` fields must be present
/// - Property types must match the schema's `"type"` declarations
fn validate_input(input: &Value, schema: &Value) -> Result<(), ToolError> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(Value::String(ty)) = schema_obj.get("type")
        && ty == "object"
        && !input.is_object()
    {
        return Err(ToolError::InvalidInput("expected object input".to_string()));
    }

    let Some(input_obj) = input.as_object() else {
        return Ok(());
    };

    if let Some(Value::Array(required)) = schema_obj.get("required") {
        for field in required {
            if let Some(field_name) = field.as_str()
                && !input_obj.contains_key(field_name)
            {
                return Err(ToolError::InvalidInput(format!(
                    "missing required field: {field_name}"
                )));
            }
        }
    }

    if let Some(Value::Object(properties)) = schema_obj.get("properties") {
        for (field_name, prop_schema) in properties {
            if let Some(value) = input_obj.get(field_name)
                && let Some(Value::String(expected_type)) = prop_schema.get("type")
                && !json_type_matches(value, expected_type)
            {
                return Err(ToolError::InvalidInput(format!(
                    "field '{field_name}' expected type '{expected_type}', got {}",
                    json_type_name(value)
                )));
            }
        }
    }

    Ok(())
}

fn json_type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Middleware that enforces a timeout on tool execution.
///
/// Wraps the downstream tool call in [`tokio::time::timeout`]. If the
/// tool does not complete within the configured duration, the call is
/// reported as failed (not panicked) so the turn pipeline can fold it
/// into the resulting `ToolResult.error`.
///
/// Per-tool overrides allow different timeouts for tools with known
/// different latency profiles.
pub struct TimeoutMiddleware {
    default_timeout: Duration,
    per_tool: HashMap<String, Duration>,
}

impl TimeoutMiddleware {
    /// Create a new timeout middleware with the given default timeout.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            per_tool: HashMap::new(),
        }
    }

    /// Set a per-tool timeout override.
    #[must_use]
    pub fn with_tool_timeout(mut self, tool_name: impl Into<String>, timeout: Duration) -> Self {
        self.per_tool.insert(tool_name.into(), timeout);
        self
    }
}

impl ToolMiddleware for TimeoutMiddleware {
    fn process<'a>(
        &'a self,
        call: &'a ToolCall,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        Box::pin(async move {
            let timeout = self.per_tool.get(&call.name).unwrap_or(&self.default_timeout);
            match tokio::time::timeout(*timeout, next.run(call)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ToolError::ExecutionFailed(format!(
                    "tool '{}' timed out after {:.1}s",
                    call.name,
                    timeout.as_secs_f64()
                ))),
            }
        })
    }
}
