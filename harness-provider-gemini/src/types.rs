//! Gemini `generateContent`/`streamGenerateContent` request/response types.

use serde::{Deserialize, Serialize};

/// Gemini API request body.
#[derive(Debug, Serialize)]
pub struct GeminiRequest {
    /// Conversation turns.
    pub contents: Vec<GeminiContent>,
    /// System instruction, sent out-of-band from `contents`.
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
    pub system_instruction: Option<GeminiContent>,
    /// Function (tool) declarations, wrapped in the API's single-element array shape.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GeminiToolDecl>,
    /// Sampling and output-length configuration.
    #[serde(skip_serializing_if = "Option::is_none", rename = "generationConfig")]
    pub generation_config: Option<GeminiGenerationConfig>,
}

/// One function-declarations block.
#[derive(Debug, Serialize)]
pub struct GeminiToolDecl {
    /// The declared functions.
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<GeminiFunctionDeclaration>,
}

/// A single callable function's schema.
#[derive(Debug, Serialize)]
pub struct GeminiFunctionDeclaration {
    /// Function name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the function's parameters.
    pub parameters: serde_json::Value,
}

/// Sampling/output configuration.
#[derive(Debug, Serialize, Default)]
pub struct GeminiGenerationConfig {
    /// Max output tokens.
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus-sampling top_p.
    #[serde(skip_serializing_if = "Option::is_none", rename = "topP")]
    pub top_p: Option<f64>,
}

/// One turn's content: a role plus a list of parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    /// `"user"` or `"model"`. Absent on `systemInstruction`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts.
    pub parts: Vec<GeminiPart>,
}

/// One part within a [`GeminiContent`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeminiPart {
    /// Plain text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// A function call the model is requesting.
    #[serde(skip_serializing_if = "Option::is_none", rename = "functionCall")]
    pub function_call: Option<GeminiFunctionCall>,
    /// A function's result, fed back to the model.
    #[serde(skip_serializing_if = "Option::is_none", rename = "functionResponse")]
    pub function_response: Option<GeminiFunctionResponse>,
    /// Inline binary data (e.g. an image).
    #[serde(skip_serializing_if = "Option::is_none", rename = "inlineData")]
    pub inline_data: Option<GeminiInlineData>,
}

impl GeminiPart {
    /// A plain-text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

/// A model-requested function call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionCall {
    /// Function name.
    pub name: String,
    /// Arguments, as a JSON object.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A function's result, sent back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionResponse {
    /// Name of the function this responds to.
    pub name: String,
    /// The function's result, wrapped in a JSON object (Gemini requires an object here).
    pub response: serde_json::Value,
}

/// Inline binary data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiInlineData {
    /// MIME type.
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

/// Gemini API response body.
#[derive(Debug, Deserialize, Default)]
pub struct GeminiResponse {
    /// Candidate completions; the first is used.
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    /// Token usage accounting.
    #[serde(rename = "usageMetadata", default)]
    pub usage_metadata: GeminiUsageMetadata,
    /// Model version that actually served the request.
    #[serde(rename = "modelVersion", default)]
    pub model_version: Option<String>,
}

/// One candidate completion.
#[derive(Debug, Deserialize)]
pub struct GeminiCandidate {
    /// The candidate's content.
    pub content: Option<GeminiContent>,
    /// Why generation stopped.
    #[serde(rename = "finishReason", default)]
    pub finish_reason: Option<String>,
}

/// Token usage reported by the Gemini API.
#[derive(Debug, Deserialize, Default)]
pub struct GeminiUsageMetadata {
    /// Total prompt tokens, including cached ones.
    #[serde(rename = "promptTokenCount", default)]
    pub prompt_token_count: u64,
    /// Completion tokens.
    #[serde(rename = "candidatesTokenCount", default)]
    pub candidates_token_count: u64,
    /// Prompt tokens served from the context cache.
    #[serde(rename = "cachedContentTokenCount", default)]
    pub cached_content_token_count: u64,
}
