//! Pipeline observation points — where a [`Hook`] can watch or intervene.
//!
//! These generalize the four points a turn naturally exposes: around each
//! provider call and around each tool call. `PackEvalHook` (in the `eval`
//! crate) is the first real consumer, firing assertions at `PostProviderCall`
//! and conversation end; this module only defines the observation contract.

use crate::error::HookError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where in a turn's pipeline a hook fires.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    /// Before invoking the provider.
    PreProviderCall,
    /// After the provider responds, before the tool-call loop runs.
    PostProviderCall,
    /// Before a tool is executed.
    PreToolCall,
    /// After a tool completes, before its result re-enters the conversation.
    PostToolCall,
    /// After the conversation's final assistant message is saved.
    ConversationComplete,
}

/// Read-only snapshot of pipeline state at the point a hook fires.
/// Hooks observe and decide; mutation (tool input rewrite, output redaction)
/// happens through the returned [`HookAction`], not through this struct.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    /// Which point fired.
    pub point: HookPoint,
    /// Name of the tool in play (only at `PreToolCall`/`PostToolCall`).
    pub tool_name: Option<String>,
    /// Tool input JSON (only at `PreToolCall`).
    pub tool_input: Option<serde_json::Value>,
    /// Tool result text (only at `PostToolCall`).
    pub tool_result: Option<String>,
    /// The assistant's text output, if any (only at `PostProviderCall`).
    pub model_output: Option<String>,
    /// Tokens used so far this turn.
    pub tokens_used: u64,
    /// Cost accrued so far this turn.
    pub cost: rust_decimal::Decimal,
    /// Turns completed so far this conversation.
    pub turns_completed: u32,
    /// Time elapsed since the conversation started.
    pub elapsed: crate::duration::DurationMs,
}

impl HookContext {
    /// Build a context with only the hook point set; every other field
    /// defaults to empty/zero.
    pub fn new(point: HookPoint) -> Self {
        Self {
            point,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            model_output: None,
            tokens_used: 0,
            cost: rust_decimal::Decimal::ZERO,
            turns_completed: 0,
            elapsed: crate::duration::DurationMs::ZERO,
        }
    }
}

/// What a hook decides to do after observing a [`HookContext`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HookAction {
    /// Continue normally.
    Continue,
    /// Halt the conversation. Surfaces as `ConversationResult.Failed = true`
    /// with this reason.
    Halt {
        /// Why the hook halted execution.
        reason: String,
    },
    /// Skip the tool call (only meaningful at `PreToolCall`). A synthetic
    /// "skipped by policy" result is backfilled instead of executing.
    SkipTool {
        /// Why the tool call was skipped.
        reason: String,
    },
    /// Replace the tool input before execution (only at `PreToolCall`).
    ModifyToolInput {
        /// The replacement input.
        new_input: serde_json::Value,
    },
    /// Replace the tool output before it re-enters the conversation (only
    /// at `PostToolCall`).
    ModifyToolOutput {
        /// The replacement output.
        new_output: String,
    },
}

/// Something that watches (and may intervene in) the turn pipeline.
///
/// Hooks are registered on the `Engine` and fired by the pipeline at the
/// points they subscribe to. A hook handler should return quickly — it
/// runs inline on the turn's own task.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Which points this hook fires at.
    fn points(&self) -> &[HookPoint];

    /// Called at each registered point. An `Err` is logged and treated as
    /// `HookAction::Continue` — it never halts the turn on its own.
    async fn on_event(&self, ctx: &HookContext) -> Result<HookAction, HookError>;
}
