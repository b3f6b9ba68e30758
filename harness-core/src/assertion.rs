//! Declarative assertion evaluation — turn-local and conversation-scoped.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The outcome of evaluating one assertion against one assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssertionResult {
    /// The validator `type` string this result came from.
    #[serde(rename = "type")]
    pub assertion_type: String,
    /// Whether the assertion held.
    pub passed: bool,
    /// Validator-specific detail, e.g. `{"matched": "..."}` or
    /// `{"error": "unknown validator type: X"}`.
    pub details: serde_json::Value,
}

impl AssertionResult {
    /// The canned result for a `type` string with no registered factory.
    /// Per the assertion short-circuit invariant, this does not stop the
    /// remaining assertions in the list from running.
    pub fn unknown_type(assertion_type: impl Into<String>) -> Self {
        let assertion_type = assertion_type.into();
        Self {
            details: serde_json::json!({
                "error": format!("unknown validator type: {assertion_type}")
            }),
            assertion_type,
            passed: false,
        }
    }
}

/// The turn-local assertion summary attached to `message.meta["assertions"]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TurnAssertionSummary {
    /// One result per configured assertion, in declaration order.
    pub results: Vec<AssertionResult>,
    /// True iff every result passed.
    pub all_passed: bool,
    /// Total assertions evaluated.
    pub total: usize,
    /// Count of assertions that did not pass.
    pub failed: usize,
}

impl TurnAssertionSummary {
    /// Build a summary from a completed result list.
    pub fn from_results(results: Vec<AssertionResult>) -> Self {
        let total = results.len();
        let failed = results.iter().filter(|r| !r.passed).count();
        Self {
            all_passed: failed == 0,
            total,
            failed,
            results,
        }
    }
}

/// The outcome of a conversation-scoped assertion, evaluated once at run
/// end over the full message sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationValidationResult {
    /// The validator `type` string. Results dual-written through a
    /// `PackEvalHook` carry the `pack_eval:` prefix so renderers can tell
    /// native assertions from eval-runner assertions apart.
    #[serde(rename = "type")]
    pub assertion_type: String,
    /// Whether the assertion held.
    pub passed: bool,
    /// Human-readable explanation, shown in reporting.
    pub message: String,
    /// Validator-specific detail.
    pub details: serde_json::Value,
}

/// A single assertion, ready to run: its type and the fully-merged
/// parameter object (`{assistant_response, messages}` plus the
/// assertion's own declared `params`).
pub struct AssertionInvocation<'a> {
    /// The validator type to look up.
    pub assertion_type: &'a str,
    /// Merged parameters passed to the validator.
    pub params: serde_json::Value,
}

/// Something that checks one assistant message or one full conversation
/// against a declared expectation.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Evaluate against the given merged parameters.
    async fn validate(&self, params: &serde_json::Value) -> AssertionResult;
}

/// Looks up a [`Validator`] implementation by its declared `type` string.
/// The assertion registry is a factory map, not a fixed enum, so custom
/// validators can register alongside the built-ins (`contains`, `regex`,
/// `json_path`, `tool_called`).
pub trait ValidatorFactory: Send + Sync {
    /// Build a validator for `assertion_type`, or `None` if unregistered.
    fn create(&self, assertion_type: &str) -> Option<Box<dyn Validator>>;
}

/// Evaluate a list of assertions against merged parameters, producing one
/// [`AssertionResult`] per assertion. An unknown `type` yields
/// `AssertionResult::unknown_type` and does not stop the remaining
/// assertions from evaluating.
pub async fn evaluate_all(
    factory: &dyn ValidatorFactory,
    invocations: Vec<AssertionInvocation<'_>>,
) -> Vec<AssertionResult> {
    let mut results = Vec::with_capacity(invocations.len());
    for inv in invocations {
        let result = match factory.create(inv.assertion_type) {
            Some(validator) => validator.validate(&inv.params).await,
            None => AssertionResult::unknown_type(inv.assertion_type),
        };
        results.push(result);
    }
    results
}

/// The result of an eval-runner job, as reported by a `PackEvalHook`'s
/// underlying eval runtime. Converted into a [`ConversationValidationResult`]
/// for uniform reporting alongside native assertions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalResult {
    /// The eval pack this job belongs to.
    pub eval_id: String,
    /// Eval type, e.g. `"rubric"`, `"exact_match"`.
    #[serde(rename = "type")]
    pub eval_type: String,
    /// Whether the eval passed.
    pub passed: bool,
    /// Human-readable explanation from the eval runtime.
    pub explanation: String,
    /// Non-empty iff the eval job itself errored (distinct from failing).
    #[serde(default)]
    pub error: String,
    /// A continuous score, if the eval runtime produced one.
    pub score: Option<Decimal>,
    /// An arbitrary named metric value, if the eval runtime produced one.
    pub metric_value: Option<Decimal>,
    /// How long the eval job took.
    pub duration: crate::duration::DurationMs,
}

impl From<EvalResult> for ConversationValidationResult {
    fn from(r: EvalResult) -> Self {
        let message = if r.passed || r.error.is_empty() {
            r.explanation
        } else {
            r.error
        };
        ConversationValidationResult {
            assertion_type: format!("pack_eval:{}", r.eval_type),
            passed: r.passed,
            message,
            details: serde_json::json!({
                "eval_id": r.eval_id,
                "score": r.score,
                "metric_value": r.metric_value,
                "duration_ms": r.duration.as_millis(),
            }),
        }
    }
}
