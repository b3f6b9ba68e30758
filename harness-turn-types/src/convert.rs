//! Bidirectional conversion between `harness_core` conversation types and
//! this crate's provider wire types.

use crate::types::{ContentPart, ImageSource, ProviderMessage, Role};
use harness_core::part::{Part, PartSource};
use harness_core::{self as core, Message};

/// Convert one `harness_core::Part` to a provider `ContentPart`. Tool
/// calls/results are not parts (they're `Message` fields) and never reach
/// here — see [`message_to_provider_message`].
pub fn part_to_content_part(part: &Part) -> ContentPart {
    match part {
        Part::Text { text } => ContentPart::Text { text: text.clone() },
        Part::Image {
            media_type, source, ..
        } => ContentPart::Image {
            source: part_source_to_image_source(source),
            media_type: media_type.clone(),
        },
        // Audio/video parts have no provider-wire text representation;
        // duplex mode sends audio directly as session input, bypassing
        // ProviderMessage entirely.
        Part::Audio { .. } | Part::Video { .. } => ContentPart::Text {
            text: String::new(),
        },
    }
}

fn part_source_to_image_source(source: &PartSource) -> ImageSource {
    match source {
        PartSource::Inline { data } => ImageSource::Base64 { data: data.clone() },
        PartSource::File { path } => ImageSource::Url { url: path.clone() },
    }
}

fn core_role_to_provider_role(role: core::Role) -> Option<Role> {
    match role {
        core::Role::System => Some(Role::System),
        core::Role::User => Some(Role::User),
        core::Role::Assistant => Some(Role::Assistant),
        // Tool messages are folded into the preceding assistant message's
        // tool_use/tool_result content parts, not sent as their own role.
        core::Role::Tool => None,
    }
}

/// Convert one `harness_core::Message` to a `ProviderMessage`. Returns
/// `None` for `tool` messages — the caller folds a tool message's
/// `ToolResult` into a `ToolResult` content part on the message that
/// follows (see [`messages_to_provider_messages`]).
pub fn message_to_provider_message(message: &Message) -> Option<ProviderMessage> {
    let role = core_role_to_provider_role(message.role)?;
    let mut content = Vec::new();
    if !message.content.is_empty() {
        content.push(ContentPart::Text {
            text: message.content.clone(),
        });
    }
    for part in &message.parts {
        content.push(part_to_content_part(part));
    }
    for call in &message.tool_calls {
        content.push(ContentPart::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.args.clone(),
        });
    }
    Some(ProviderMessage { role, content })
}

/// Convert a full conversation history into provider messages, folding
/// each `tool` message's result into a `ToolResult` content part appended
/// to the *previous* provider message (which carried the matching
/// `ToolUse`). This mirrors how every provider wire format (Anthropic,
/// OpenAI, Gemini) represents a tool round trip: the assistant message
/// that issued the call and the tool outcome travel in adjacent turns,
/// not as a first-class "tool" role in the transcript sent upstream.
pub fn messages_to_provider_messages(messages: &[Message]) -> Vec<ProviderMessage> {
    let mut out: Vec<ProviderMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        if message.role == core::Role::Tool {
            if let Some(result) = &message.tool_result {
                let part = ContentPart::ToolResult {
                    tool_use_id: result.id.clone(),
                    content: result.content.clone(),
                    is_error: result.error.is_some(),
                };
                if let Some(last) = out.last_mut() {
                    last.content.push(part);
                    continue;
                }
            }
            continue;
        }
        if let Some(converted) = message_to_provider_message(message) {
            out.push(converted);
        }
    }
    out
}

/// Convert provider `ContentPart`s from a response into a plain-text
/// `content` string plus any `harness_core::ToolCall`s, ready to build an
/// assistant [`Message`].
pub fn response_parts_to_message_fields(
    parts: &[ContentPart],
) -> (String, Vec<core::conversation::ToolCall>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text: t } => text.push_str(t),
            ContentPart::ToolUse { id, name, input } => {
                tool_calls.push(core::conversation::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    args: input.clone(),
                });
            }
            ContentPart::ToolResult { .. } | ContentPart::Image { .. } => {}
        }
    }
    (text, tool_calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::conversation::ToolCall;

    #[test]
    fn tool_message_folds_into_previous_assistant() {
        let messages = vec![
            Message {
                tool_calls: vec![ToolCall {
                    id: "t1".into(),
                    name: "echo".into(),
                    args: serde_json::json!({}),
                }],
                ..Message::text(core::Role::Assistant, "")
            },
            Message::tool_result(core::ToolResult {
                id: "t1".into(),
                name: "echo".into(),
                content: "ok".into(),
                error: None,
                latency: harness_core::DurationMs::ZERO,
            }),
        ];
        let converted = messages_to_provider_messages(&messages);
        assert_eq!(converted.len(), 1);
        assert!(converted[0]
            .content
            .iter()
            .any(|p| matches!(p, ContentPart::ToolResult { .. })));
    }

    #[test]
    fn response_parts_split_text_and_tool_calls() {
        let parts = vec![
            ContentPart::Text { text: "hi".into() },
            ContentPart::ToolUse {
                id: "1".into(),
                name: "x".into(),
                input: serde_json::json!({}),
            },
        ];
        let (text, calls) = response_parts_to_message_fields(&parts);
        assert_eq!(text, "hi");
        assert_eq!(calls.len(), 1);
    }
}
