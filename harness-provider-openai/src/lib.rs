#![deny(missing_docs)]
//! OpenAI Chat Completions adapter for the [`harness_turn_types::Provider`] trait.

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

/// OpenAI API provider.
pub struct OpenAIProvider {
    id: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
    api_url: String,
    org_id: Option<String>,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with the given id, default model, and API key.
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
            api_url: "https://api.openai.com/v1/chat/completions".into(),
            org_id: None,
        }
    }

    /// Override the API URL (for testing or proxies).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set the OpenAI-Organization header for multi-org accounts.
    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    fn build_request(&self, request: &ProviderRequest, stream: bool) -> OpenAIRequest {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let max_tokens = request.max_tokens;

        let mut messages: Vec<OpenAIMessage> = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(OpenAIMessage {
                role: "system".into(),
                content: Some(OpenAIContent::Text(system.clone())),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for m in &request.messages {
            match m.role {
                Role::System => {
                    let text = extract_text(&m.content);
                    messages.push(OpenAIMessage {
                        role: "system".into(),
                        content: Some(OpenAIContent::Text(text)),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
                Role::User => {
                    let mut tool_results = Vec::new();
                    let mut other_parts = Vec::new();
                    for part in &m.content {
                        match part {
                            ContentPart::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => {
                                tool_results.push((tool_use_id.clone(), content.clone()));
                            }
                            _ => other_parts.push(part.clone()),
                        }
                    }

                    for (tool_call_id, content) in tool_results {
                        messages.push(OpenAIMessage {
                            role: "tool".into(),
                            content: Some(OpenAIContent::Text(content)),
                            tool_calls: None,
                            tool_call_id: Some(tool_call_id),
                        });
                    }

                    if !other_parts.is_empty() {
                        messages.push(OpenAIMessage {
                            role: "user".into(),
                            content: Some(parts_to_openai_content(&other_parts)),
                            tool_calls: None,
                            tool_call_id: None,
                        });
                    }
                }
                Role::Assistant => {
                    let mut tool_calls = Vec::new();
                    let mut text_parts = Vec::new();
                    for part in &m.content {
                        match part {
                            ContentPart::ToolUse { id, name, input } => {
                                tool_calls.push(OpenAIToolCall {
                                    id: id.clone(),
                                    call_type: "function".into(),
                                    function: OpenAIFunctionCall {
                                        name: name.clone(),
                                        arguments: serde_json::to_string(input)
                                            .unwrap_or_default(),
                                    },
                                });
                            }
                            _ => text_parts.push(part.clone()),
                        }
                    }

                    let content = if text_parts.is_empty() {
                        None
                    } else {
                        Some(parts_to_openai_content(&text_parts))
                    };

                    let tool_calls_field = if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    };

                    messages.push(OpenAIMessage {
                        role: "assistant".into(),
                        content,
                        tool_calls: tool_calls_field,
                        tool_call_id: None,
                    });
                }
            }
        }

        let tools: Vec<OpenAITool> = request
            .tools
            .iter()
            .map(|t| OpenAITool {
                tool_type: "function".into(),
                function: OpenAIFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect();

        let service_tier = request
            .extra
            .get("service_tier")
            .and_then(|v| v.as_str())
            .map(String::from);
        let reasoning_effort = request
            .extra
            .get("reasoning_effort")
            .and_then(|v| v.as_str())
            .map(String::from);
        let parallel_tool_calls = request.extra.get("parallel_tool_calls").and_then(|v| v.as_bool());

        OpenAIRequest {
            model,
            messages,
            max_tokens,
            temperature: request.temperature,
            tools,
            parallel_tool_calls,
            service_tier,
            reasoning_effort,
            stream,
        }
    }

    fn parse_response(
        &self,
        response: OpenAIResponse,
        include_raw: bool,
        raw: Option<serde_json::Value>,
    ) -> Result<ProviderResponse, ProviderError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".into()))?;

        let mut content: Vec<ContentPart> = Vec::new();

        if let Some(msg_content) = choice.message.content {
            match msg_content {
                OpenAIContent::Text(text) => {
                    if !text.is_empty() {
                        content.push(ContentPart::Text { text });
                    }
                }
                OpenAIContent::Parts(parts) => {
                    for part in parts {
                        match part {
                            OpenAIContentPart::Text { text } => {
                                content.push(ContentPart::Text { text });
                            }
                            OpenAIContentPart::ImageUrl { image_url } => {
                                content.push(ContentPart::Image {
                                    source: ImageSource::Url { url: image_url.url },
                                    media_type: "image/png".into(),
                                });
                            }
                        }
                    }
                }
            }
        }

        if let Some(tool_calls) = choice.message.tool_calls {
            for tc in tool_calls {
                let input: serde_json::Value =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                content.push(ContentPart::ToolUse {
                    id: tc.id,
                    name: tc.function.name,
                    input,
                });
            }
        }

        let stop_reason = match choice.finish_reason.as_str() {
            "stop" => StopReason::EndTurn,
            "tool_calls" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            "content_filter" => StopReason::ContentFilter,
            _ => StopReason::EndTurn,
        };

        let cached_tokens = response
            .usage
            .prompt_tokens_details
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0);
        let usage = TokenUsage {
            input_tokens: response.usage.prompt_tokens.saturating_sub(cached_tokens),
            output_tokens: response.usage.completion_tokens,
            cached_tokens,
        };

        let cost = self.calculate_cost(usage.input_tokens, usage.output_tokens, usage.cached_tokens);

        Ok(ProviderResponse {
            content,
            stop_reason,
            usage,
            model: response.model,
            cost_usd: Some(cost.total_cost),
            raw: if include_raw { raw } else { None },
        })
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn predict(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let api_request = self.build_request(&request, false);
        let mut http_request = self
            .client
            .post(&self.api_url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");

        if let Some(ref org_id) = self.org_id {
            http_request = http_request.header("openai-organization", org_id);
        }

        let http_response = http_request
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
        let api_response: OpenAIResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let raw: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();

        self.parse_response(api_response, true, Some(raw))
    }

    async fn predict_stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let api_request = self.build_request(&request, true);
        let mut http_request = self
            .client
            .post(&self.api_url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");
        if let Some(ref org_id) = self.org_id {
            http_request = http_request.header("openai-organization", org_id);
        }

        let http_response = http_request
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
            let mut tool_calls: Vec<OpenAIToolCall> = Vec::new();
            let mut finish_reason = "stop".to_string();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error {
                            message: e.to_string(),
                        }).await;
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
                    if data == "[DONE]" {
                        continue;
                    }
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
                        continue;
                    };
                    let Some(choice) = event["choices"].get(0) else {
                        continue;
                    };
                    if let Some(delta_text) = choice["delta"]["content"].as_str() {
                        text.push_str(delta_text);
                        let _ = tx
                            .send(StreamChunk::Delta {
                                text: delta_text.to_string(),
                            })
                            .await;
                    }
                    if let Some(deltas) = choice["delta"]["tool_calls"].as_array() {
                        for d in deltas {
                            let index = d["index"].as_u64().unwrap_or(0) as usize;
                            while tool_calls.len() <= index {
                                tool_calls.push(OpenAIToolCall {
                                    id: String::new(),
                                    call_type: "function".into(),
                                    function: OpenAIFunctionCall {
                                        name: String::new(),
                                        arguments: String::new(),
                                    },
                                });
                            }
                            if let Some(id) = d["id"].as_str() {
                                tool_calls[index].id = id.to_string();
                            }
                            if let Some(name) = d["function"]["name"].as_str() {
                                tool_calls[index].function.name.push_str(name);
                            }
                            if let Some(args) = d["function"]["arguments"].as_str() {
                                tool_calls[index].function.arguments.push_str(args);
                            }
                            let _ = tx
                                .send(StreamChunk::ToolCallDelta {
                                    index,
                                    id: d["id"].as_str().map(String::from),
                                    name: d["function"]["name"].as_str().map(String::from),
                                    args_fragment: d["function"]["arguments"]
                                        .as_str()
                                        .map(String::from),
                                })
                                .await;
                        }
                    }
                    if let Some(fr) = choice["finish_reason"].as_str() {
                        finish_reason = fr.to_string();
                    }
                }
            }

            let content = if text.is_empty() {
                String::new()
            } else {
                text
            };
            let mut end_content = Vec::new();
            for tc in &tool_calls {
                let input: serde_json::Value =
                    serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                end_content.push(ContentPart::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
            let stop_reason = match finish_reason.as_str() {
                "stop" => StopReason::EndTurn,
                "tool_calls" => StopReason::ToolUse,
                "length" => StopReason::MaxTokens,
                "content_filter" => StopReason::ContentFilter,
                _ => StopReason::EndTurn,
            };

            let _ = tx
                .send(StreamChunk::EndOfStream {
                    content,
                    tool_calls: end_content,
                    usage: TokenUsage::default(),
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
        // gpt-4o-mini pricing: $0.15/MTok input, $0.60/MTok output.
        CostInfo::from_pricing(
            input_tokens,
            output_tokens,
            cached_tokens,
            Decimal::new(15, 8),
            Decimal::new(60, 8),
        )
    }
}

fn extract_text(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parts_to_openai_content(parts: &[ContentPart]) -> OpenAIContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return OpenAIContent::Text(text.clone());
        }
    }
    OpenAIContent::Parts(parts.iter().filter_map(content_part_to_openai_part).collect())
}

fn content_part_to_openai_part(part: &ContentPart) -> Option<OpenAIContentPart> {
    match part {
        ContentPart::Text { text } => Some(OpenAIContentPart::Text { text: text.clone() }),
        ContentPart::Image { source, .. } => {
            let url = match source {
                ImageSource::Url { url } => url.clone(),
                ImageSource::Base64 { data } => format!("data:image/png;base64,{data}"),
            };
            Some(OpenAIContentPart::ImageUrl {
                image_url: OpenAIImageUrl { url },
            })
        }
        _ => None,
    }
}
