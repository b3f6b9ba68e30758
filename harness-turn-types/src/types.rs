//! Wire-level types exchanged with a [`crate::provider::Provider`].
//!
//! These sit one level below `harness_core::{Message, Part}`: the turn
//! pipeline's `ProviderStage` converts a conversation's messages into a
//! [`ProviderRequest`] (see [`crate::convert`]) and converts the provider's
//! [`ProviderResponse`] back into `harness_core` messages.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Role of a [`ProviderMessage`]'s author, in provider wire terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User turn.
    User,
    /// Model response.
    Assistant,
}

/// Where an image's bytes come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    /// Base64-encoded bytes.
    Base64 {
        /// The base64-encoded payload.
        data: String,
    },
    /// A fetchable URL.
    Url {
        /// The image URL.
        url: String,
    },
}

/// One content part within a [`ProviderMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// A tool-use request from the model.
    ToolUse {
        /// Correlates this call to its `ToolResult`.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Tool input parameters.
        input: serde_json::Value,
    },
    /// Result of a tool execution, fed back to the model.
    ToolResult {
        /// The `ToolUse.id` this result answers.
        tool_use_id: String,
        /// The result content.
        content: String,
        /// Whether the tool execution itself errored.
        is_error: bool,
    },
    /// Image content.
    Image {
        /// Where the bytes come from.
        source: ImageSource,
        /// MIME type.
        media_type: String,
    },
}

/// One message in the provider-facing conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    /// Author role.
    pub role: Role,
    /// Content parts.
    pub content: Vec<ContentPart>,
}

/// JSON-Schema description of a tool, passed to the provider so it knows
/// what it may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input.
    pub input_schema: serde_json::Value,
}

/// A request sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model override; `None` uses the provider's configured default.
    pub model: Option<String>,
    /// Conversation messages, oldest first.
    pub messages: Vec<ProviderMessage>,
    /// Tools the model may call.
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
    /// Max output tokens.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Nucleus-sampling top_p.
    pub top_p: Option<f64>,
    /// Sampling seed, if the provider honors one.
    pub seed: Option<u64>,
    /// System prompt, assembled by `PromptAssemblyStage`.
    pub system: Option<String>,
    /// Provider-specific passthrough (`ProviderSpec.additional_config`).
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Model produced a final response.
    EndTurn,
    /// Model wants to call one or more tools.
    ToolUse,
    /// Hit `max_tokens`.
    MaxTokens,
    /// Content filtered by provider-side safety.
    ContentFilter,
}

/// Token accounting from one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Non-cached prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Prompt tokens served from a provider-side cache, if reported.
    pub cached_tokens: u64,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Response content parts.
    pub content: Vec<ContentPart>,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// Token usage for this call.
    pub usage: TokenUsage,
    /// The model that actually served the request.
    pub model: String,
    /// Provider-reported cost, if the API returns one directly.
    pub cost_usd: Option<Decimal>,
    /// Raw response JSON, kept only when `ProviderSpec.include_raw_output`.
    pub raw: Option<serde_json::Value>,
}

impl ProviderResponse {
    /// Tool-use requests in this response's content, if any.
    pub fn tool_calls(&self) -> Vec<&ContentPart> {
        self.content
            .iter()
            .filter(|p| matches!(p, ContentPart::ToolUse { .. }))
            .collect()
    }

    /// Concatenated text content, ignoring tool-use parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// One chunk of a streaming provider response.
///
/// Blocking (scripted) streaming and duplex streaming share this shape;
/// `DuplexConversationExecutor` additionally inspects
/// `Metadata`-style signals carried on [`StreamChunk::EndOfStream`] to
/// decide whether a turn is complete, interrupted, or needs a tool round
/// trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamChunk {
    /// An incremental text delta.
    Delta {
        /// The text fragment.
        text: String,
    },
    /// The model is in the middle of emitting a tool call.
    ToolCallDelta {
        /// Index of the tool call within this response.
        index: usize,
        /// Tool-use id, once known.
        id: Option<String>,
        /// Tool name, once known.
        name: Option<String>,
        /// Incremental JSON-args fragment.
        args_fragment: Option<String>,
    },
    /// The stream is informational only (e.g. a duplex "interrupted"
    /// signal) — no content, no terminal state change.
    Informational {
        /// Free-form signal name, e.g. `"interrupted"`.
        signal: String,
    },
    /// The provider reported a mid-stream error. The stream ends after
    /// this chunk.
    Error {
        /// Error message.
        message: String,
    },
    /// Terminal chunk: generation has stopped for this turn.
    EndOfStream {
        /// Full accumulated text content, if any.
        content: String,
        /// Fully-assembled tool calls, if the model requested any.
        #[serde(default)]
        tool_calls: Vec<ContentPart>,
        /// Token usage for the whole turn.
        usage: TokenUsage,
        /// Why generation stopped.
        finish_reason: StopReason,
    },
}

/// Audio-specific streaming capabilities a provider can advertise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioCapabilities {
    /// The provider's preferred input sample rate, in Hz. `AudioResample`
    /// resamples scenario audio to this rate before sending it.
    pub preferred_sample_rate: u32,
}

/// Streaming capabilities advertised by a provider that supports duplex
/// (bidirectional) sessions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamingCapabilities {
    /// Audio capabilities, present iff the provider accepts audio input.
    pub audio: Option<AudioCapabilities>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serde_roundtrip() {
        for role in [Role::System, Role::User, Role::Assistant] {
            let json = serde_json::to_string(&role).unwrap();
            let back: Role = serde_json::from_str(&json).unwrap();
            assert_eq!(role, back);
        }
    }

    #[test]
    fn response_text_joins_only_text_parts() {
        let resp = ProviderResponse {
            content: vec![
                ContentPart::Text { text: "a".into() },
                ContentPart::ToolUse {
                    id: "1".into(),
                    name: "x".into(),
                    input: json!({}),
                },
                ContentPart::Text { text: "b".into() },
            ],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
            model: "m".into(),
            cost_usd: None,
            raw: None,
        };
        assert_eq!(resp.text(), "ab");
        assert_eq!(resp.tool_calls().len(), 1);
    }

    #[test]
    fn end_of_stream_roundtrips() {
        let chunk = StreamChunk::EndOfStream {
            content: "done".into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            finish_reason: StopReason::EndTurn,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["kind"], "end_of_stream");
        let back: StreamChunk = serde_json::from_value(json).unwrap();
        match back {
            StreamChunk::EndOfStream { content, .. } => assert_eq!(content, "done"),
            _ => panic!("expected EndOfStream"),
        }
    }
}
