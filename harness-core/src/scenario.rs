//! Scenarios — the declarative test specifications a `RunPlan` expands over.

use crate::id::{PersonaId, ProviderId, ScenarioId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A declarative test specification. One scenario, crossed with a region
/// and provider, produces one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique scenario identifier.
    pub id: ScenarioId,
    /// Selects which prompt template `PromptAssemblyStage` resolves.
    pub task_type: String,
    /// Provider allow-list. Empty means every registered provider is
    /// eligible (subject to the plan's own provider filter).
    #[serde(default)]
    pub providers: Vec<ProviderId>,
    /// The turn sequence to drive, in scripted/duplex mode.
    #[serde(default)]
    pub turns: Vec<ScenarioTurn>,
    /// Whether turns stream provider deltas back as they arrive.
    #[serde(default)]
    pub streaming: bool,
    /// Present iff this scenario runs through `DuplexConversationExecutor`.
    pub duplex: Option<DuplexConfig>,
    /// Present iff this scenario runs through `EvalConversationExecutor`.
    pub eval: Option<EvalConfig>,
    /// Assertions evaluated once at run end over the full message sequence.
    #[serde(default)]
    pub conversation_assertions: Vec<Assertion>,
}

impl Scenario {
    /// True if this turn index should stream, given the scenario's
    /// `streaming` flag. All turns stream together in this implementation —
    /// per-turn overrides are not part of the data model.
    pub fn should_stream_turn(&self, _turn_index: usize) -> bool {
        self.streaming
    }
}

/// One turn in a scripted or duplex scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTurn {
    /// `"user"` for a scripted turn, or a self-play role name.
    pub role: String,
    /// Verbatim user content for a scripted turn. Ignored for self-play
    /// turns, which generate their content from the persona provider.
    #[serde(default)]
    pub content: String,
    /// Persona to use when this turn is driven by self-play.
    pub persona: Option<PersonaId>,
    /// Assertions validating the *subsequent* assistant response.
    /// Assertions on a non-assistant turn are never evaluated directly.
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    /// Scenario-provided audio input for this turn, in duplex mode.
    /// Ignored by the scripted/self-play executor, which only reads
    /// `content`.
    #[serde(default)]
    pub audio: Option<TurnAudio>,
}

/// One turn's worth of scenario-scripted audio input, for duplex scenarios
/// that don't generate audio via self-play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnAudio {
    /// Base64-encoded mono PCM16 samples.
    pub pcm16_base64: String,
    /// The sample rate `pcm16_base64` was captured at. `AudioResample`
    /// converts this to the provider's preferred rate before sending.
    pub sample_rate: u32,
}

/// Resolved configuration for one registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider identifier, as referenced by scenarios and run filters.
    pub id: ProviderId,
    /// Which adapter this provider uses, e.g. `"openai"`, `"anthropic"`.
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Model name passed through to the backend API.
    pub model: String,
    /// Override base URL, for self-hosted or proxy endpoints.
    pub base_url: Option<String>,
    /// Whether to keep the provider's raw response JSON on the message.
    #[serde(default)]
    pub include_raw_output: bool,
    /// Sampling and pricing defaults for this provider.
    #[serde(default)]
    pub defaults: ProviderDefaults,
    /// Adapter-specific passthrough configuration.
    #[serde(default)]
    pub additional_config: HashMap<String, serde_json::Value>,
}

/// Sampling and pricing defaults for a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderDefaults {
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Nucleus-sampling top_p.
    pub top_p: Option<f64>,
    /// Max output tokens.
    pub max_tokens: Option<u32>,
    /// Per-token USD pricing, used to compute `CostInfo` when the
    /// provider's API doesn't report cost directly.
    pub pricing: Option<Pricing>,
}

/// Flat per-token USD pricing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pricing {
    /// USD per input token.
    pub input_per_token: Decimal,
    /// USD per output token.
    pub output_per_token: Decimal,
    /// USD per cached input token, if the provider discounts cache reads.
    pub cached_per_token: Option<Decimal>,
}

/// Duplex-mode configuration subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplexConfig {
    /// Client-side turn detection settings.
    pub turn_detection: Option<TurnDetection>,
    /// Retry/partial-success policy for the long-lived session.
    #[serde(default)]
    pub resilience: DuplexResilience,
    /// Overall session timeout; defaults to 10 minutes, unlike the
    /// non-duplex pipeline's 30s default.
    pub timeout: Option<crate::duration::DurationMs>,
}

/// Voice-activity-detection based turn detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    /// VAD parameters.
    pub vad: VadConfig,
}

/// Voice-activity-detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Silence duration, in ms, that ends a turn.
    pub silence_threshold_ms: u32,
    /// Minimum speech duration, in ms, to count as a turn at all.
    pub min_speech_ms: u32,
    /// Hard cap on a single turn's duration, in seconds.
    pub max_turn_duration_s: u32,
}

/// Retry and partial-success policy for duplex sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplexResilience {
    /// Maximum number of session rebuild attempts after a recoverable error.
    #[serde(default)]
    pub max_retries: u32,
    /// Delay before a retry attempt, in ms.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Minimum turns completed before a terminal "session ended" still
    /// counts as success.
    #[serde(default = "default_partial_success_min_turns")]
    pub partial_success_min_turns: u32,
    /// If true, a "session ended" on the scenario's final turn is not
    /// treated as a retriable failure at all.
    #[serde(default)]
    pub ignore_last_turn_session_end: bool,
}

impl Default for DuplexResilience {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: default_retry_delay_ms(),
            partial_success_min_turns: default_partial_success_min_turns(),
            ignore_last_turn_session_end: false,
        }
    }
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_partial_success_min_turns() -> u32 {
    1
}

/// Eval/replay mode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// The recording to replay instead of calling a provider.
    pub recording: Recording,
}

/// A reference to a previously captured conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// Path (or adapter-specific locator) to the recording.
    pub path: String,
    /// Adapter type string, looked up in the `RecordingAdapter` registry.
    #[serde(rename = "type")]
    pub recording_type: String,
}

/// A declarative assertion: a validator `type` plus its parameters.
///
/// At evaluation time `{assistant_response, messages}` is merged into
/// `params` before the validator factory is invoked — see
/// `crate::assertion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    /// Validator type string, looked up in the assertion registry.
    #[serde(rename = "type")]
    pub assertion_type: String,
    /// Validator-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}
