#![deny(missing_docs)]
//! Gemini `generateContent` adapter for the [`harness_turn_types::Provider`] trait.

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

/// Gemini API provider.
pub struct GeminiProvider {
    id: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider with the given id, default model, and API key.
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
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
        }
    }

    /// Override the API base URL (for testing or proxies).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    fn build_request(&self, request: &ProviderRequest) -> (String, GeminiRequest) {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());

        let system_instruction = request.system.as_ref().map(|s| GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(s.clone())],
        });

        let contents: Vec<GeminiContent> = request
            .messages
            .iter()
            .map(|m| GeminiContent {
                role: Some(match m.role {
                    Role::User | Role::System => "user".into(),
                    Role::Assistant => "model".into(),
                }),
                parts: m.content.iter().map(content_part_to_gemini_part).collect(),
            })
            .collect();

        let tools: Vec<GeminiToolDecl> = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GeminiToolDecl {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|t| GeminiFunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    })
                    .collect(),
            }]
        };

        let generation_config = if request.max_tokens.is_some()
            || request.temperature.is_some()
            || request.top_p.is_some()
        {
            Some(GeminiGenerationConfig {
                max_output_tokens: request.max_tokens,
                temperature: request.temperature,
                top_p: request.top_p,
            })
        } else {
            None
        };

        (
            model,
            GeminiRequest {
                contents,
                system_instruction,
                tools,
                generation_config,
            },
        )
    }

    fn parse_response(
        &self,
        response: GeminiResponse,
        include_raw: bool,
        raw: Option<serde_json::Value>,
    ) -> Result<ProviderResponse, ProviderError> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no candidates in response".into()))?;

        let content: Vec<ContentPart> = candidate
            .content
            .map(|c| c.parts.iter().map(gemini_part_to_content_part).collect())
            .unwrap_or_default();

        let stop_reason = match candidate.finish_reason.as_deref() {
            Some("STOP") => {
                if content.iter().any(|p| matches!(p, ContentPart::ToolUse { .. })) {
                    StopReason::ToolUse
                } else {
                    StopReason::EndTurn
                }
            }
            Some("MAX_TOKENS") => StopReason::MaxTokens,
            Some("SAFETY") | Some("RECITATION") => StopReason::ContentFilter,
            _ => StopReason::EndTurn,
        };

        let cached_tokens = response.usage_metadata.cached_content_token_count;
        let usage = TokenUsage {
            input_tokens: response
                .usage_metadata
                .prompt_token_count
                .saturating_sub(cached_tokens),
            output_tokens: response.usage_metadata.candidates_token_count,
            cached_tokens,
        };

        let cost = self.calculate_cost(usage.input_tokens, usage.output_tokens, usage.cached_tokens);

        Ok(ProviderResponse {
            content,
            stop_reason,
            usage,
            model: response
                .model_version
                .unwrap_or_else(|| self.model.clone()),
            cost_usd: Some(cost.total_cost),
            raw: if include_raw { raw } else { None },
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn predict(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let (model, api_request) = self.build_request(&request);
        let url = self.endpoint(&model, "generateContent");

        let http_response = self
            .client
            .post(&url)
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
        let api_response: GeminiResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let raw: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();

        self.parse_response(api_response, true, Some(raw))
    }

    async fn predict_stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let (model, api_request) = self.build_request(&request);
        let url = format!("{}&alt=sse", self.endpoint(&model, "streamGenerateContent"));

        let http_response = self
            .client
            .post(&url)
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
            let mut tool_calls: Vec<ContentPart> = Vec::new();
            let mut usage = TokenUsage::default();
            let mut finish_reason = StopReason::EndTurn;

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
                    let Ok(event) = serde_json::from_str::<GeminiResponse>(data) else {
                        continue;
                    };
                    if let Some(candidate) = event.candidates.into_iter().next() {
                        if let Some(content) = candidate.content {
                            for part in &content.parts {
                                if let Some(t) = &part.text {
                                    text.push_str(t);
                                    let _ = tx
                                        .send(StreamChunk::Delta { text: t.clone() })
                                        .await;
                                }
                                if let Some(fc) = &part.function_call {
                                    let id = format!("call_{}", tool_calls.len());
                                    let _ = tx
                                        .send(StreamChunk::ToolCallDelta {
                                            index: tool_calls.len(),
                                            id: Some(id.clone()),
                                            name: Some(fc.name.clone()),
                                            args_fragment: serde_json::to_string(&fc.args).ok(),
                                        })
                                        .await;
                                    tool_calls.push(ContentPart::ToolUse {
                                        id,
                                        name: fc.name.clone(),
                                        input: fc.args.clone(),
                                    });
                                }
                            }
                        }
                        finish_reason = match candidate.finish_reason.as_deref() {
                            Some("STOP") if !tool_calls.is_empty() => StopReason::ToolUse,
                            Some("STOP") => StopReason::EndTurn,
                            Some("MAX_TOKENS") => StopReason::MaxTokens,
                            Some("SAFETY") | Some("RECITATION") => StopReason::ContentFilter,
                            _ => finish_reason,
                        };
                    }
                    if event.usage_metadata.prompt_token_count > 0 {
                        let cached = event.usage_metadata.cached_content_token_count;
                        usage = TokenUsage {
                            input_tokens: event
                                .usage_metadata
                                .prompt_token_count
                                .saturating_sub(cached),
                            output_tokens: event.usage_metadata.candidates_token_count,
                            cached_tokens: cached,
                        };
                    }
                }
            }

            let _ = tx
                .send(StreamChunk::EndOfStream {
                    content: text,
                    tool_calls,
                    usage,
                    finish_reason,
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
        // gemini-2.0-flash pricing: $0.10/MTok input, $0.40/MTok output.
        CostInfo::from_pricing(
            input_tokens,
            output_tokens,
            cached_tokens,
            Decimal::new(10, 8),
            Decimal::new(40, 8),
        )
    }
}

fn content_part_to_gemini_part(part: &ContentPart) -> GeminiPart {
    match part {
        ContentPart::Text { text } => GeminiPart::text(text.clone()),
        ContentPart::ToolUse { name, input, .. } => GeminiPart {
            function_call: Some(GeminiFunctionCall {
                name: name.clone(),
                args: input.clone(),
            }),
            ..Default::default()
        },
        ContentPart::ToolResult { content, .. } => GeminiPart {
            function_response: Some(GeminiFunctionResponse {
                name: String::new(),
                response: serde_json::json!({ "result": content }),
            }),
            ..Default::default()
        },
        ContentPart::Image { source, media_type } => {
            let data = match source {
                ImageSource::Base64 { data } => data.clone(),
                ImageSource::Url { url } => url.clone(),
            };
            GeminiPart {
                inline_data: Some(GeminiInlineData {
                    mime_type: media_type.clone(),
                    data,
                }),
                ..Default::default()
            }
        }
    }
}

fn gemini_part_to_content_part(part: &GeminiPart) -> ContentPart {
    if let Some(fc) = &part.function_call {
        return ContentPart::ToolUse {
            id: format!("call_{}", fc.name),
            name: fc.name.clone(),
            input: fc.args.clone(),
        };
    }
    ContentPart::Text {
        text: part.text.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> GeminiProvider {
        GeminiProvider::new("gemini-default", "gemini-2.0-flash", "test-key")
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
    fn build_simple_request_maps_roles() {
        let provider = provider();
        let mut request = base_request();
        request.system = Some("Be helpful.".into());
        request.messages = vec![
            harness_turn_types::ProviderMessage {
                role: Role::User,
                content: vec![ContentPart::Text {
                    text: "Hello".into(),
                }],
            },
            harness_turn_types::ProviderMessage {
                role: Role::Assistant,
                content: vec![ContentPart::Text {
                    text: "Hi there".into(),
                }],
            },
        ];

        let (model, api_request) = provider.build_request(&request);
        assert_eq!(model, "gemini-2.0-flash");
        assert!(api_request.system_instruction.is_some());
        assert_eq!(api_request.contents[0].role.as_deref(), Some("user"));
        assert_eq!(api_request.contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn parse_simple_response() {
        let provider = provider();
        let api_response = GeminiResponse {
            candidates: vec![GeminiCandidate {
                content: Some(GeminiContent {
                    role: Some("model".into()),
                    parts: vec![GeminiPart::text("Hello!")],
                }),
                finish_reason: Some("STOP".into()),
            }],
            usage_metadata: GeminiUsageMetadata {
                prompt_token_count: 10,
                candidates_token_count: 5,
                cached_content_token_count: 0,
            },
            model_version: Some("gemini-2.0-flash".into()),
        };

        let response = provider.parse_response(api_response, false, None).unwrap();
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.input_tokens, 10);
        assert_eq!(response.usage.output_tokens, 5);
        assert!(response.cost_usd.is_some());
    }

    #[test]
    fn parse_tool_call_response() {
        let provider = provider();
        let api_response = GeminiResponse {
            candidates: vec![GeminiCandidate {
                content: Some(GeminiContent {
                    role: Some("model".into()),
                    parts: vec![GeminiPart {
                        function_call: Some(GeminiFunctionCall {
                            name: "bash".into(),
                            args: json!({"command": "ls"}),
                        }),
                        ..Default::default()
                    }],
                }),
                finish_reason: Some("STOP".into()),
            }],
            usage_metadata: GeminiUsageMetadata {
                prompt_token_count: 20,
                candidates_token_count: 8,
                cached_content_token_count: 0,
            },
            model_version: None,
        };

        let response = provider.parse_response(api_response, false, None).unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        match &response.content[0] {
            ContentPart::ToolUse { name, .. } => assert_eq!(name, "bash"),
            _ => panic!("expected ToolUse"),
        }
    }

    #[test]
    fn cached_tokens_excluded_from_input_total() {
        let provider = provider();
        let api_response = GeminiResponse {
            candidates: vec![GeminiCandidate {
                content: Some(GeminiContent {
                    role: Some("model".into()),
                    parts: vec![GeminiPart::text("hi")],
                }),
                finish_reason: Some("STOP".into()),
            }],
            usage_metadata: GeminiUsageMetadata {
                prompt_token_count: 1000,
                candidates_token_count: 5,
                cached_content_token_count: 800,
            },
            model_version: None,
        };

        let response = provider.parse_response(api_response, false, None).unwrap();
        assert_eq!(response.usage.cached_tokens, 800);
        assert_eq!(response.usage.input_tokens, 200);
    }
}
