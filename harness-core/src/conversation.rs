//! The conversation — the append-mostly log a [`crate::state::StateStore`]
//! persists per run.

use crate::id::ConversationId;
use crate::part::Part;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The system prompt, prepended once per conversation.
    System,
    /// A user turn — scripted, self-play, or duplex audio.
    User,
    /// A model response.
    Assistant,
    /// A tool's result, matched to a `ToolCall` by id.
    Tool,
}

/// A pending or executed call to a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Identifier correlating this call to its `ToolResult`.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments, as raw JSON.
    pub args: serde_json::Value,
}

/// The outcome of executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    /// Matches the originating `ToolCall.id`.
    pub id: String,
    /// Tool name, duplicated here so a `tool` message is self-describing.
    pub name: String,
    /// The tool's output, as raw bytes decoded to a string. Tools that
    /// return binary payloads externalize them and put a reference here.
    pub content: String,
    /// Set when tool execution itself failed. The content still carries
    /// whatever partial output or error text the tool produced.
    pub error: Option<String>,
    /// How long the tool took to execute.
    pub latency: crate::duration::DurationMs,
}

/// Token/cost accounting for a single message.
///
/// `input_tokens` excludes `cached_tokens` — a provider that reports 1000
/// prompt tokens with 800 served from cache records `input_tokens: 200,
/// cached_tokens: 800`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CostInfo {
    /// Non-cached prompt tokens billed.
    pub input_tokens: u64,
    /// Completion tokens billed.
    pub output_tokens: u64,
    /// Prompt tokens served from a provider-side cache.
    pub cached_tokens: u64,
    /// Cost of the input side, in USD, if the provider priced it.
    pub input_cost_usd: Option<Decimal>,
    /// Cost of the output side, in USD, if the provider priced it.
    pub output_cost_usd: Option<Decimal>,
    /// `input_cost_usd + output_cost_usd`, or zero if neither was priced.
    pub total_cost: Decimal,
}

impl CostInfo {
    /// Build from token counts and a flat per-token price, in USD.
    pub fn from_pricing(
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
        price_per_input_token: Decimal,
        price_per_output_token: Decimal,
    ) -> Self {
        let input_cost = Decimal::from(input_tokens) * price_per_input_token;
        let output_cost = Decimal::from(output_tokens) * price_per_output_token;
        Self {
            input_tokens,
            output_tokens,
            cached_tokens,
            input_cost_usd: Some(input_cost),
            output_cost_usd: Some(output_cost),
            total_cost: input_cost + output_cost,
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Who sent it.
    pub role: Role,
    /// Plain-text content, when the message is text-only. Structured
    /// content (images, audio, tool calls) lives in `parts`/`tool_calls`.
    pub content: String,
    /// Typed content parts beyond plain text.
    #[serde(default)]
    pub parts: Vec<Part>,
    /// Tool calls the assistant requested in this message.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// The tool result this message carries, when `role == Tool`.
    pub tool_result: Option<ToolResult>,
    /// Token/cost accounting, when this message came from a provider call.
    pub cost: Option<CostInfo>,
    /// Free-form metadata — `assertions` and `eval_results` are populated
    /// here by the assertion layer after this message is saved.
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl Message {
    /// A plain text message with no parts, tool calls, or cost.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_result: None,
            cost: None,
            meta: HashMap::new(),
        }
    }

    /// A `tool` message wrapping a single `ToolResult`.
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.content.clone(),
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_result: Some(result),
            cost: None,
            meta: HashMap::new(),
        }
    }
}

/// The persisted state of one conversation.
///
/// `messages` is append-mostly: once a message other than the last
/// assistant message is saved, its `content`/`parts`/`tool_calls` never
/// change. The assertion layer may still mutate the *last* assistant
/// message's `meta["assertions"]`/`meta["eval_results"]` in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    /// Equal to the owning run's `RunId` for Arena executions.
    pub id: ConversationId,
    /// The end user this conversation is attributed to, if any.
    pub user_id: String,
    /// The conversation's messages, in save order.
    pub messages: Vec<Message>,
    /// Free-form metadata: region, provider, scenario, started_at, etc.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ConversationState {
    /// An empty conversation with the given id and no messages.
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            user_id: String::new(),
            messages: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Index of the last assistant message, if any.
    pub fn last_assistant_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
    }

    /// Sum of `total_cost` over every message that carries a `CostInfo`.
    pub fn total_cost(&self) -> Decimal {
        self.messages
            .iter()
            .filter_map(|m| m.cost.as_ref())
            .map(|c| c.total_cost)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_assistant_index_finds_most_recent() {
        let mut state = ConversationState::new(ConversationId::new("c1"));
        state.messages.push(Message::text(Role::User, "hi"));
        state.messages.push(Message::text(Role::Assistant, "hello"));
        state.messages.push(Message::text(Role::User, "again"));
        assert_eq!(state.last_assistant_index(), Some(1));
    }

    #[test]
    fn total_cost_sums_only_priced_messages() {
        let mut state = ConversationState::new(ConversationId::new("c1"));
        let mut m = Message::text(Role::Assistant, "hi");
        m.cost = Some(CostInfo {
            total_cost: Decimal::new(5, 2),
            ..Default::default()
        });
        state.messages.push(Message::text(Role::User, "q"));
        state.messages.push(m);
        assert_eq!(state.total_cost(), Decimal::new(5, 2));
    }
}
