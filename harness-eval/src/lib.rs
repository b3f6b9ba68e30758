#![deny(missing_docs)]
//! Built-in assertion validators and pack-eval dispatch.
//!
//! [`BuiltinValidatorFactory`] supplies the four validator types a
//! scenario can reference out of the box — `contains`, `regex`,
//! `json_path`, `tool_called` — satisfying
//! [`harness_core::assertion::ValidatorFactory`]. [`PackEvalHook`] is the
//! dual-write path: when a caller also wants declarative assertions run
//! through an external eval runtime, it dispatches the same assertions as
//! eval jobs via an [`EvalRunner`] and folds the results in alongside the
//! native ones (`harness_core::assertion::EvalResult`'s existing
//! `From`-conversion to `ConversationValidationResult` already carries the
//! `pack_eval:` prefix).
//!
//! Pack-eval dispatch invokes every registered assertion and collects all
//! results, rather than short-circuiting on the first failure, since an
//! assertion pack always wants every assertion's verdict, not just the
//! first one.

use async_trait::async_trait;
use harness_core::assertion::{
    AssertionInvocation, AssertionResult, ConversationValidationResult, EvalResult, Validator,
    ValidatorFactory,
};
use harness_core::conversation::Message;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced while dispatching assertions to an external eval
/// runtime. Validator failures themselves are never errors — they
/// produce a failing [`AssertionResult`]: an unknown assertion type
/// doesn't halt the rest of the batch, and neither does a validator
/// failure.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EvalError {
    /// The configured eval runner rejected the job outright (not the
    /// same as the job failing its assertion — that's `EvalResult.passed
    /// == false`).
    #[error("eval runner rejected job: {0}")]
    RunnerRejected(String),

    /// A lower-level error propagated from the eval runtime's transport.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Dispatches declarative assertions to an external eval runtime, on
/// either a per-turn or end-of-conversation trigger.
///
/// This crate ships no concrete implementation — an eval runtime (a
/// scoring/LLM-judge backend) is an external collaborator. Callers that
/// want pack-eval dual-write implement this trait against their own
/// eval service.
#[async_trait]
pub trait EvalRunner: Send + Sync {
    /// Run one eval job per turn, immediately after the turn-local
    /// assertions evaluate.
    async fn trigger_every_turn(
        &self,
        eval_id: &str,
        assistant_response: &str,
        messages: &[Message],
    ) -> Result<Vec<EvalResult>, EvalError>;

    /// Run the conversation-level eval jobs once, at run end.
    async fn trigger_on_conversation_complete(
        &self,
        eval_id: &str,
        messages: &[Message],
    ) -> Result<Vec<EvalResult>, EvalError>;
}

/// Wraps an optional [`EvalRunner`], converting its [`EvalResult`]s into
/// [`ConversationValidationResult`]s so they can be folded in next to
/// native assertion results without the caller needing to know an eval
/// runtime is involved at all.
pub struct PackEvalHook {
    eval_id: Option<String>,
    runner: Option<Box<dyn EvalRunner>>,
}

impl PackEvalHook {
    /// No eval runtime configured — every dispatch call is a no-op.
    pub fn disabled() -> Self {
        Self {
            eval_id: None,
            runner: None,
        }
    }

    /// Dual-write assertions for `eval_id` through `runner`.
    pub fn new(eval_id: impl Into<String>, runner: Box<dyn EvalRunner>) -> Self {
        Self {
            eval_id: Some(eval_id.into()),
            runner: Some(runner),
        }
    }

    /// Dispatch the per-turn eval jobs, if configured.
    pub async fn evaluate_turn(
        &self,
        assistant_response: &str,
        messages: &[Message],
    ) -> Result<Vec<ConversationValidationResult>, EvalError> {
        let (Some(eval_id), Some(runner)) = (&self.eval_id, &self.runner) else {
            return Ok(Vec::new());
        };
        let results = runner
            .trigger_every_turn(eval_id, assistant_response, messages)
            .await?;
        Ok(results.into_iter().map(Into::into).collect())
    }

    /// Dispatch the conversation-level eval jobs, if configured.
    pub async fn evaluate_conversation(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ConversationValidationResult>, EvalError> {
        let (Some(eval_id), Some(runner)) = (&self.eval_id, &self.runner) else {
            return Ok(Vec::new());
        };
        let results = runner
            .trigger_on_conversation_complete(eval_id, messages)
            .await?;
        Ok(results.into_iter().map(Into::into).collect())
    }
}

/// A [`ValidatorFactory`] backed by the four built-in validator types.
/// Custom validators register into the same factory map by extending
/// this with [`BuiltinValidatorFactory::with_custom`] — the factory map
/// is keyed by `type` string, not a closed enum, so new assertion types
/// can be added without touching this crate.
#[derive(Default)]
pub struct BuiltinValidatorFactory {
    custom: Vec<(String, Box<dyn Fn() -> Box<dyn Validator> + Send + Sync>)>,
}

impl BuiltinValidatorFactory {
    /// The built-ins only: `contains`, `regex`, `json_path`, `tool_called`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom validator constructor under `assertion_type`,
    /// taking precedence over a built-in of the same name.
    #[must_use]
    pub fn with_custom(
        mut self,
        assertion_type: impl Into<String>,
        make: impl Fn() -> Box<dyn Validator> + Send + Sync + 'static,
    ) -> Self {
        self.custom.push((assertion_type.into(), Box::new(make)));
        self
    }
}

impl ValidatorFactory for BuiltinValidatorFactory {
    fn create(&self, assertion_type: &str) -> Option<Box<dyn Validator>> {
        for (name, make) in &self.custom {
            if name == assertion_type {
                return Some(make());
            }
        }
        match assertion_type {
            "contains" => Some(Box::new(ContainsValidator)),
            "regex" => Some(Box::new(RegexValidator)),
            "json_path" => Some(Box::new(JsonPathValidator)),
            "tool_called" => Some(Box::new(ToolCalledValidator)),
            _ => None,
        }
    }
}

/// Evaluate a scenario's conversation-scoped assertions once, over the
/// full message sequence. Distinct from the turn-local evaluation in
/// `harness-pipeline::TurnPipeline::evaluate_assertions`, which also
/// needs to rewrite the last assistant message's `meta`.
///
/// Unlike the turn-local path this has nowhere to attach results to a
/// single message — callers fold the returned
/// [`ConversationValidationResult`]s straight into
/// `ConversationResult.conversation_assertion_results`.
pub async fn evaluate_conversation_assertions(
    factory: &dyn ValidatorFactory,
    assertions: &[harness_core::scenario::Assertion],
    messages: &[Message],
) -> Vec<ConversationValidationResult> {
    if assertions.is_empty() {
        return Vec::new();
    }
    let assistant_response = messages
        .iter()
        .rev()
        .find(|m| m.role == harness_core::conversation::Role::Assistant)
        .map(|m| m.content.clone())
        .unwrap_or_default();
    let messages_json = serde_json::to_value(messages).unwrap_or(Value::Null);

    let invocations: Vec<AssertionInvocation<'_>> = assertions
        .iter()
        .map(|a| {
            let mut params = a.params.clone();
            params.insert("assistant_response".into(), Value::String(assistant_response.clone()));
            params.insert("messages".into(), messages_json.clone());
            AssertionInvocation {
                assertion_type: &a.assertion_type,
                params: Value::Object(params.into_iter().collect()),
            }
        })
        .collect();

    harness_core::assertion::evaluate_all(factory, invocations)
        .await
        .into_iter()
        .map(assertion_result_to_conversation)
        .collect()
}

fn assertion_result_to_conversation(result: AssertionResult) -> ConversationValidationResult {
    let message = result
        .details
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default();
    ConversationValidationResult {
        assertion_type: result.assertion_type,
        passed: result.passed,
        message,
        details: result.details,
    }
}

fn assistant_response(params: &Value) -> &str {
    params
        .get("assistant_response")
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn messages_param(params: &Value) -> &[Value] {
    params
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Substring match: `{"value": "<needle>"}`.
struct ContainsValidator;

#[async_trait]
impl Validator for ContainsValidator {
    async fn validate(&self, params: &Value) -> AssertionResult {
        let Some(needle) = params.get("value").and_then(Value::as_str) else {
            return AssertionResult {
                assertion_type: "contains".to_string(),
                passed: false,
                details: serde_json::json!({"error": "missing 'value' param"}),
            };
        };
        let passed = assistant_response(params).contains(needle);
        AssertionResult {
            assertion_type: "contains".to_string(),
            passed,
            details: serde_json::json!({"needle": needle}),
        }
    }
}

/// Regex match against the assistant response: `{"pattern": "<regex>"}`.
struct RegexValidator;

#[async_trait]
impl Validator for RegexValidator {
    async fn validate(&self, params: &Value) -> AssertionResult {
        let Some(pattern) = params.get("pattern").and_then(Value::as_str) else {
            return AssertionResult {
                assertion_type: "regex".to_string(),
                passed: false,
                details: serde_json::json!({"error": "missing 'pattern' param"}),
            };
        };
        let re = match regex::Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                return AssertionResult {
                    assertion_type: "regex".to_string(),
                    passed: false,
                    details: serde_json::json!({"error": format!("invalid pattern: {e}")}),
                };
            }
        };
        let passed = re.is_match(assistant_response(params));
        AssertionResult {
            assertion_type: "regex".to_string(),
            passed,
            details: serde_json::json!({"pattern": pattern}),
        }
    }
}

/// Structured field match: parses the assistant response as JSON and
/// walks a dot-separated `path`, comparing against `equals` or just
/// checking presence if `exists: true` is set instead.
struct JsonPathValidator;

fn walk_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current.get(segment)?;
    }
    Some(current)
}

#[async_trait]
impl Validator for JsonPathValidator {
    async fn validate(&self, params: &Value) -> AssertionResult {
        let Some(path) = params.get("path").and_then(Value::as_str) else {
            return AssertionResult {
                assertion_type: "json_path".to_string(),
                passed: false,
                details: serde_json::json!({"error": "missing 'path' param"}),
            };
        };
        let parsed: Value = match serde_json::from_str(assistant_response(params)) {
            Ok(v) => v,
            Err(e) => {
                return AssertionResult {
                    assertion_type: "json_path".to_string(),
                    passed: false,
                    details: serde_json::json!({"error": format!("assistant response is not JSON: {e}")}),
                };
            }
        };
        let found = walk_path(&parsed, path);
        let passed = match (found, params.get("equals")) {
            (Some(v), Some(expected)) => v == expected,
            (Some(_), None) => params.get("exists").and_then(Value::as_bool).unwrap_or(true),
            (None, _) => false,
        };
        AssertionResult {
            assertion_type: "json_path".to_string(),
            passed,
            details: serde_json::json!({"path": path, "found": found}),
        }
    }
}

/// Asserts a named tool was invoked: `{"tool_name": "<name>"}`, checked
/// against the `messages` param's `tool_calls` entries.
struct ToolCalledValidator;

#[async_trait]
impl Validator for ToolCalledValidator {
    async fn validate(&self, params: &Value) -> AssertionResult {
        let Some(tool_name) = params.get("tool_name").and_then(Value::as_str) else {
            return AssertionResult {
                assertion_type: "tool_called".to_string(),
                passed: false,
                details: serde_json::json!({"error": "missing 'tool_name' param"}),
            };
        };
        let called = messages_param(params).iter().any(|message| {
            message
                .get("tool_calls")
                .and_then(Value::as_array)
                .is_some_and(|calls| {
                    calls
                        .iter()
                        .any(|call| call.get("name").and_then(Value::as_str) == Some(tool_name))
                })
        });
        AssertionResult {
            assertion_type: "tool_called".to_string(),
            passed: called,
            details: serde_json::json!({"tool_name": tool_name}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::assertion::evaluate_all;

    #[tokio::test]
    async fn contains_validator_matches_substring() {
        let factory = BuiltinValidatorFactory::new();
        let results = evaluate_all(
            &factory,
            vec![AssertionInvocation {
                assertion_type: "contains",
                params: serde_json::json!({"assistant_response": "hello world", "value": "world"}),
            }],
        )
        .await;
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn regex_validator_matches_pattern() {
        let factory = BuiltinValidatorFactory::new();
        let results = evaluate_all(
            &factory,
            vec![AssertionInvocation {
                assertion_type: "regex",
                params: serde_json::json!({"assistant_response": "order #1234", "pattern": r"#\d+"}),
            }],
        )
        .await;
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn regex_validator_reports_invalid_pattern() {
        let factory = BuiltinValidatorFactory::new();
        let results = evaluate_all(
            &factory,
            vec![AssertionInvocation {
                assertion_type: "regex",
                params: serde_json::json!({"assistant_response": "x", "pattern": "("}),
            }],
        )
        .await;
        assert!(!results[0].passed);
        assert!(results[0].details["error"].as_str().unwrap().contains("invalid pattern"));
    }

    #[tokio::test]
    async fn json_path_validator_matches_nested_field() {
        let factory = BuiltinValidatorFactory::new();
        let results = evaluate_all(
            &factory,
            vec![AssertionInvocation {
                assertion_type: "json_path",
                params: serde_json::json!({
                    "assistant_response": r#"{"order": {"status": "shipped"}}"#,
                    "path": "order.status",
                    "equals": "shipped",
                }),
            }],
        )
        .await;
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn tool_called_validator_finds_matching_call() {
        let factory = BuiltinValidatorFactory::new();
        let messages = serde_json::json!([
            {"role": "assistant", "tool_calls": [{"id": "1", "name": "echo", "args": {}}]}
        ]);
        let results = evaluate_all(
            &factory,
            vec![AssertionInvocation {
                assertion_type: "tool_called",
                params: serde_json::json!({"tool_name": "echo", "messages": messages}),
            }],
        )
        .await;
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn tool_called_validator_fails_when_absent() {
        let factory = BuiltinValidatorFactory::new();
        let results = evaluate_all(
            &factory,
            vec![AssertionInvocation {
                assertion_type: "tool_called",
                params: serde_json::json!({"tool_name": "echo", "messages": []}),
            }],
        )
        .await;
        assert!(!results[0].passed);
    }

    #[tokio::test]
    async fn unknown_type_falls_through_to_unknown_type_result() {
        let factory = BuiltinValidatorFactory::new();
        let results = evaluate_all(
            &factory,
            vec![AssertionInvocation {
                assertion_type: "nope",
                params: serde_json::json!({}),
            }],
        )
        .await;
        assert!(!results[0].passed);
        assert_eq!(
            results[0].details["error"],
            serde_json::json!("unknown validator type: nope")
        );
    }

    #[tokio::test]
    async fn disabled_pack_eval_hook_is_a_noop() {
        let hook = PackEvalHook::disabled();
        let results = hook.evaluate_turn("hi", &[]).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn conversation_assertions_evaluate_against_the_last_assistant_message() {
        use harness_core::conversation::{Message, Role};
        use harness_core::scenario::Assertion;
        use std::collections::HashMap;

        let factory = BuiltinValidatorFactory::new();
        let messages = vec![
            Message::text(Role::User, "hi"),
            Message::text(Role::Assistant, "the answer is 42"),
        ];
        let assertions = vec![Assertion {
            assertion_type: "contains".into(),
            params: HashMap::from([("value".to_string(), serde_json::json!("42"))]),
        }];

        let results = evaluate_conversation_assertions(&factory, &assertions, &messages).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }

    #[tokio::test]
    async fn no_conversation_assertions_configured_yields_no_results() {
        let factory = BuiltinValidatorFactory::new();
        let results = evaluate_conversation_assertions(&factory, &[], &[]).await;
        assert!(results.is_empty());
    }
}
