#![deny(missing_docs)]
//! Anthropic Messages API adapter for the [`harness_turn_types::Provider`] trait.

mod types;

use async_trait::async_trait;
use harness_core::CostInfo;
use harness_turn_types::{
    ContentPart, ImageSource, Provider, ProviderError, ProviderRequest, ProviderResponse, Role,
    StopReason, StreamChunk, TokenUsage,
};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use types::*;

/// Anthropic API provider.
pub struct AnthropicProvider {
    id: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
    api_url: String,
    api_version: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the given id, default model, and API key.
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            api_url: "https://api.anthropic.com/v1/messages".into(),
            api_version: "2023-06-01".into(),
        }
    }

    /// Override the API URL (for testing or proxies).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn build_request(&self, request: &ProviderRequest, stream: bool) -> AnthropicRequest {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let max_tokens = request.max_tokens.unwrap_or(4096);

        let messages: Vec<AnthropicMessage> = request
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "user".into(),
                },
                content: parts_to_anthropic_content(&m.content),
            })
            .collect();

        let tools: Vec<AnthropicTool> = request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        AnthropicRequest {
            model,
            max_tokens,
            messages,
            system: request.system.clone(),
            tools,
            stream,
        }
    }

    fn parse_response(
        &self,
        response: AnthropicResponse,
        include_raw: bool,
        raw: Option<serde_json::Value>,
    ) -> ProviderResponse {
        let content: Vec<ContentPart> = response
            .content
            .iter()
            .map(anthropic_block_to_content_part)
            .collect();

        let stop_reason = match response.stop_reason.as_str() {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };

        let cached_tokens = response.usage.cache_read_input_tokens.unwrap_or(0);
        let usage = TokenUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            cached_tokens,
        };

        let cost = self.calculate_cost(usage.input_tokens, usage.output_tokens, usage.cached_tokens);

        ProviderResponse {
            content,
            stop_reason,
            usage,
            model: response.model,
            cost_usd: Some(cost.total_cost),
            raw: if include_raw { raw } else { None },
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn predict(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let api_request = self.build_request(&request, false);
        let http_response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let body = http_response.text().await.unwrap_or_default();
            return Err(ProviderError::AuthFailed(body));
        }
        if !status.is_success() {
            let body = http_response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "HTTP {status}: {body}"
            )));
        }

        let body = http_response
            .text()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let api_response: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let raw: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();

        Ok(self.parse_response(api_response, true, Some(raw)))
    }

    async fn predict_stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let api_request = self.build_request(&request, true);
        let http_response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if !status.is_success() {
            let body = http_response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(format!(
                "HTTP {status}: {body}"
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            use futures::StreamExt;

            let mut byte_stream = http_response.bytes_stream();
            let mut buf = String::new();
            let mut text = String::new();
            let mut pending_tool: Option<(String, String, String)> = None;
            let mut tool_calls: Vec<ContentPart> = Vec::new();
            let mut usage = TokenUsage::default();
            let mut stop_reason = StopReason::EndTurn;

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(StreamChunk::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim_end_matches('\r').to_string();
                    buf.drain(..=pos);
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };
                    match event["type"].as_str().unwrap_or("") {
                        "content_block_start" => {
                            if event["content_block"]["type"].as_str() == Some("tool_use") {
                                let id = event["content_block"]["id"].as_str().unwrap_or("").to_string();
                                let name = event["content_block"]["name"].as_str().unwrap_or("").to_string();
                                pending_tool = Some((id, name, String::new()));
                            }
                        }
                        "content_block_delta" => {
                            if let Some(delta_text) = event["delta"]["text"].as_str() {
                                text.push_str(delta_text);
                                let _ = tx
                                    .send(StreamChunk::Delta {
                                        text: delta_text.to_string(),
                                    })
                                    .await;
                            }
                            if let Some(partial) = event["delta"]["partial_json"].as_str() {
                                if let Some((id, name, args)) = pending_tool.as_mut() {
                                    args.push_str(partial);
                                    let _ = tx
                                        .send(StreamChunk::ToolCallDelta {
                                            index: 0,
                                            id: Some(id.clone()),
                                            name: Some(name.clone()),
                                            args_fragment: Some(partial.to_string()),
                                        })
                                        .await;
                                }
                            }
                        }
                        "content_block_stop" => {
                            if let Some((id, name, args)) = pending_tool.take() {
                                let input: serde_json::Value =
                                    serde_json::from_str(&args).unwrap_or_default();
                                tool_calls.push(ContentPart::ToolUse { id, name, input });
                            }
                        }
                        "message_delta" => {
                            if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                                stop_reason = match reason {
                                    "tool_use" => StopReason::ToolUse,
                                    "max_tokens" => StopReason::MaxTokens,
                                    _ => StopReason::EndTurn,
                                };
                            }
                            if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                                usage.output_tokens = out;
                            }
                        }
                        "message_start" => {
                            if let Some(inp) = event["message"]["usage"]["input_tokens"].as_u64() {
                                usage.input_tokens = inp;
                            }
                        }
                        _ => {}
                    }
                }
            }

            let _ = tx
                .send(StreamChunk::EndOfStream {
                    content: text,
                    tool_calls,
                    usage,
                    finish_reason: stop_reason,
                })
                .await;
        });

        Ok(rx)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn calculate_cost(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
    ) -> CostInfo {
        // claude-haiku pricing: $0.25/MTok input, $1.25/MTok output.
        CostInfo::from_pricing(
            input_tokens,
            output_tokens,
            cached_tokens,
            Decimal::new(25, 8),
            Decimal::new(125, 8),
        )
    }
}

fn parts_to_anthropic_content(parts: &[ContentPart]) -> AnthropicContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return AnthropicContent::Text(text.clone());
        }
    }
    AnthropicContent::Blocks(parts.iter().map(content_part_to_anthropic_block).collect())
}

fn content_part_to_anthropic_block(part: &ContentPart) -> AnthropicContentBlock {
    match part {
        ContentPart::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
        ContentPart::ToolUse { id, name, input } => AnthropicContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => AnthropicContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
        ContentPart::Image { source, media_type } => AnthropicContentBlock::Image {
            source: match source {
                ImageSource::Base64 { data } => AnthropicImageSource::Base64 { data: data.clone() },
                ImageSource::Url { url } => AnthropicImageSource::Url { url: url.clone() },
            },
            media_type: media_type.clone(),
        },
    }
}

fn anthropic_block_to_content_part(block: &AnthropicContentBlock) -> ContentPart {
    match block {
        AnthropicContentBlock::Text { text } => ContentPart::Text { text: text.clone() },
        AnthropicContentBlock::ToolUse { id, name, input } => ContentPart::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentPart::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
        AnthropicContentBlock::Image { source, media_type } => ContentPart::Image {
            source: match source {
                AnthropicImageSource::Base64 { data } => ImageSource::Base64 { data: data.clone() },
                AnthropicImageSource::Url { url } => ImageSource::Url { url: url.clone() },
            },
            media_type: media_type.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new("anthropic-default", "claude-haiku-4-5-20251001", "test-key")
    }

    fn base_request() -> ProviderRequest {
        ProviderRequest {
            model: None,
            messages: vec![],
            tools: vec![],
            max_tokens: None,
            temperature: None,
            top_p: None,
            seed: None,
            system: None,
            extra: json!(null),
        }
    }

    #[test]
    fn build_simple_request() {
        let provider = provider();
        let mut request = base_request();
        request.model = Some("claude-haiku-4-5-20251001".into());
        request.max_tokens = Some(256);
        request.system = Some("Be helpful.".into());
        request.messages = vec![harness_turn_types::ProviderMessage {
            role: Role::User,
            content: vec![ContentPart::Text {
                text: "Hello".into(),
            }],
        }];

        let api_request = provider.build_request(&request, false);
        assert_eq!(api_request.model, "claude-haiku-4-5-20251001");
        assert_eq!(api_request.max_tokens, 256);
        assert_eq!(api_request.messages.len(), 1);
        assert_eq!(api_request.messages[0].role, "user");
        assert_eq!(api_request.system, Some("Be helpful.".into()));
    }

    #[test]
    fn default_max_tokens_is_4096() {
        let provider = provider();
        let api_request = provider.build_request(&base_request(), false);
        assert_eq!(api_request.max_tokens, 4096);
    }

    #[test]
    fn parse_simple_response() {
        let provider = provider();
        let api_response = AnthropicResponse {
            content: vec![AnthropicContentBlock::Text {
                text: "Hello!".into(),
            }],
            model: "claude-haiku-4-5-20251001".into(),
            stop_reason: "end_turn".into(),
            usage: AnthropicUsage {
                input_tokens: 10,
                output_tokens: 5,
                cache_read_input_tokens: None,
                cache_creation_input_tokens: None,
            },
        };

        let response = provider.parse_response(api_response, false, None);
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 5);
        assert!(response.cost_usd.is_some());
    }

    #[test]
    fn parse_tool_use_response() {
        let provider = provider();
        let api_response = AnthropicResponse {
            content: vec![AnthropicContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "bash".into(),
                input: json!({"command": "ls"}),
            }],
            model: "claude-haiku-4-5-20251001".into(),
            stop_reason: "tool_use".into(),
            usage: AnthropicUsage {
                input_tokens: 20,
                output_tokens: 30,
                cache_read_input_tokens: None,
                cache_creation_input_tokens: None,
            },
        };

        let response = provider.parse_response(api_response, false, None);
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        match &response.content[0] {
            ContentPart::ToolUse { name, .. } => assert_eq!(name, "bash"),
            _ => panic!("expected ToolUse"),
        }
    }

    #[test]
    fn parse_cache_tokens() {
        let provider = provider();
        let api_response = AnthropicResponse {
            content: vec![AnthropicContentBlock::Text {
                text: "Cached.".into(),
            }],
            model: "claude-haiku-4-5-20251001".into(),
            stop_reason: "end_turn".into(),
            usage: AnthropicUsage {
                input_tokens: 100,
                output_tokens: 10,
                cache_read_input_tokens: Some(50),
                cache_creation_input_tokens: Some(25),
            },
        };

        let response = provider.parse_response(api_response, false, None);
        assert_eq!(response.usage.cached_tokens, 50);
    }

    #[test]
    fn with_url_overrides_api_url() {
        let provider = provider().with_url("https://proxy.example.com/v1/messages");
        assert_eq!(provider.api_url, "https://proxy.example.com/v1/messages");
    }
}
