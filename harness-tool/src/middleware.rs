//! Middleware types for the tool execution pipeline.
//!
//! Middleware wraps tool execution with cross-cutting concerns like
//! input validation, output formatting, and timeouts.
//!
//! The pattern is identical to axum's `from_fn` — each middleware
//! receives a `Next` that it can call to continue the chain, or
//! skip to short-circuit.

use crate::{ToolDyn, ToolError};
use harness_core::conversation::ToolCall;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Middleware that wraps tool execution.
///
/// Each middleware receives the call and a [`Next`] to continue the
/// chain. Middleware can:
/// - Inspect/modify the call before passing it on
/// - Short-circuit by returning without calling `next.run()`
/// - Inspect/modify the result after the tool executes
///
/// Uses boxed futures for dyn-compatibility (heterogeneous middleware
/// collections in [`crate::ToolRegistry`]).
pub trait ToolMiddleware: Send + Sync {
    /// Process a tool call, optionally delegating to the next
    /// middleware/tool.
    fn process<'a>(&'a self, call: &'a ToolCall, next: Next<'a>) -> BoxFuture<'a, Result<Value, ToolError>>;
}

/// The remaining middleware chain plus the underlying tool.
///
/// Consumed on call to prevent double-invoke.
pub struct Next<'a> {
    tool: &'a dyn ToolDyn,
    middleware: &'a [Arc<dyn ToolMiddleware>],
}

impl<'a> Next<'a> {
    /// Create a new `Next` from a tool and the remaining middleware slice.
    pub(crate) fn new(tool: &'a dyn ToolDyn, middleware: &'a [Arc<dyn ToolMiddleware>]) -> Self {
        Self { tool, middleware }
    }

    /// Continue the middleware chain, eventually calling the tool.
    pub async fn run(self, call: &'a ToolCall) -> Result<Value, ToolError> {
        if let Some((head, tail)) = self.middleware.split_first() {
            let next = Next::new(self.tool, tail);
            head.process(call, next).await
        } else {
            self.tool.call(call.args.clone()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ToolDescriptor, ToolMode};
    use serde_json::json;

    struct PassthroughTool(ToolDescriptor);

    impl ToolDyn for PassthroughTool {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.0
        }
        fn call(&self, input: Value) -> BoxFuture<'_, Result<Value, ToolError>> {
            Box::pin(async move { Ok(input) })
        }
    }

    struct RecordOrder {
        label: &'static str,
        log: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl ToolMiddleware for RecordOrder {
        fn process<'a>(
            &'a self,
            call: &'a ToolCall,
            next: Next<'a>,
        ) -> BoxFuture<'a, Result<Value, ToolError>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(self.label);
                next.run(call).await
            })
        }
    }

    #[tokio::test]
    async fn chain_runs_in_registration_order() {
        let tool = PassthroughTool(ToolDescriptor {
            name: "pass".into(),
            description: "".into(),
            input_schema: json!({}),
            output_schema: None,
            mode: ToolMode::Local,
        });
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = Arc::new(RecordOrder {
            label: "first",
            log: log.clone(),
        });
        let second = Arc::new(RecordOrder {
            label: "second",
            log: log.clone(),
        });
        let chain: Vec<Arc<dyn ToolMiddleware>> = vec![first, second];
        let call = ToolCall {
            id: "1".into(),
            name: "pass".into(),
            args: json!({"x": 1}),
        };
        let next = Next::new(&tool, &chain);
        let result = next.run(&call).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }
}
