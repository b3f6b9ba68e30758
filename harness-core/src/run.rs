//! Run combinations, plans, and the RunID derivation scheme.

use crate::duration::DurationMs;
use crate::id::{ConversationId, PersonaId, ProviderId, Region, RunId, ScenarioId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// One `(region, scenario, provider)` triple, plus an optional eval pack,
/// to be dispatched as a single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunCombination {
    /// Deployment/locale region.
    pub region: Region,
    /// Scenario to execute.
    pub scenario_id: ScenarioId,
    /// Provider to execute it against.
    pub provider_id: ProviderId,
    /// Eval pack to dual-write assertion results through, if configured.
    pub eval_id: Option<crate::id::EvalId>,
}

/// An ordered, pre-expanded sequence of run combinations. Pure value — the
/// scheduler iterates it, it has no behavior of its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunPlan {
    /// The combinations to execute, in dispatch order.
    pub combinations: Vec<RunCombination>,
}

impl RunPlan {
    /// Number of combinations in the plan.
    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    /// True if the plan has no combinations.
    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }
}

/// Derive a RunID from `(timestamp-minute, provider, region, scenario,
/// hash4(region||scenario||provider))`.
///
/// Stable enough to correlate logs/events/recordings produced within one
/// scheduler invocation; not a UUID, and not intended to be globally
/// unique across invocations that happen to land in the same minute with
/// the same triple — callers that need that guarantee should dedupe on
/// `(minute, triple)` themselves.
pub fn generate_run_id(timestamp_minute: u64, combo: &RunCombination) -> RunId {
    let mut hasher = Sha256::new();
    hasher.update(combo.region.as_str().as_bytes());
    hasher.update(combo.scenario_id.as_str().as_bytes());
    hasher.update(combo.provider_id.as_str().as_bytes());
    let digest = hasher.finalize();
    let hash4 = hex::encode(&digest[..2]);

    RunId::new(format!(
        "{timestamp_minute}-{}-{}-{}-{hash4}",
        combo.provider_id, combo.region, combo.scenario_id
    ))
}

/// The current Unix time, truncated to whole minutes. Split out so tests
/// and property tests can pass a fixed value instead of depending on
/// wall-clock time.
pub fn current_timestamp_minute() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() / 60)
        .unwrap_or(0)
}

/// Arena-only metadata recorded once per run, alongside its
/// `ConversationState`, under the same `RunId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// The run this metadata describes.
    pub run_id: RunId,
    /// Doubles as the conversation id for Arena executions.
    pub conversation_id: ConversationId,
    /// Region the run executed under.
    pub region: Region,
    /// Scenario that was executed.
    pub scenario_id: ScenarioId,
    /// Provider the run executed against.
    pub provider_id: ProviderId,
    /// Wall-clock start time, milliseconds since Unix epoch.
    pub start_time_ms: u64,
    /// Wall-clock end time, milliseconds since Unix epoch. `None` while
    /// the run is still in flight.
    pub end_time_ms: Option<u64>,
    /// Wall-clock duration, once the run has ended.
    pub duration: Option<DurationMs>,
    /// Non-empty iff the run failed. Empty string means success —
    /// matching the source system's "error string, not a bool" convention
    /// so a half-populated struct serializes the same way either way.
    pub error: String,
    /// Path to this run's JSONL recording, if recording was enabled.
    pub recording_path: Option<String>,
    /// Conversation-level assertion results, if any were configured.
    #[serde(default)]
    pub conversation_assertion_results: Vec<crate::assertion::ConversationValidationResult>,
    /// True if any turn in this run used a self-play role.
    pub self_play: bool,
    /// The persona used, if `self_play` and a persona was resolved.
    pub persona_id: Option<PersonaId>,
}

impl RunMetadata {
    /// A freshly-started run with no end time, no error, and no results yet.
    pub fn started(run_id: RunId, combo: &RunCombination, start_time_ms: u64) -> Self {
        Self {
            run_id: run_id.clone(),
            conversation_id: ConversationId::new(run_id.as_str()),
            region: combo.region.clone(),
            scenario_id: combo.scenario_id.clone(),
            provider_id: combo.provider_id.clone(),
            start_time_ms,
            end_time_ms: None,
            duration: None,
            error: String::new(),
            recording_path: None,
            conversation_assertion_results: Vec::new(),
            self_play: false,
            persona_id: None,
        }
    }

    /// True iff `error` is non-empty.
    pub fn failed(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Filters applied during `GenerateRunPlan`. Empty vectors mean
/// "unfiltered" — see `crate::run`'s expansion semantics doc on
/// `RunPlanConfig::expand`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunFilter {
    /// Regions to include; empty means `["default"]`.
    pub regions: Vec<String>,
    /// Scenario IDs to include; empty means all loaded scenarios.
    pub scenarios: Vec<String>,
    /// Provider IDs to include; empty means no filtering by provider.
    pub providers: Vec<String>,
    /// Eval pack ID to dual-write through, if any.
    pub eval: Option<String>,
}

/// Top-level configuration document: state-store selection, sampling
/// defaults, self-play roles/personas, MCP server declarations, and
/// duplex resilience knobs. Loaded via `serde_json::from_str` — no
/// implicit environment overlay beyond `RUST_LOG` for logging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPlanConfig {
    /// State-store backend selection and connection info.
    #[serde(default)]
    pub state_store: StateStoreConfig,
    /// Sampling and output defaults applied when a scenario/provider
    /// doesn't override them.
    #[serde(default)]
    pub defaults: Defaults,
    /// Self-play role/persona configuration.
    #[serde(default)]
    pub self_play: SelfPlayConfig,
    /// MCP server declarations. Carried as opaque passthrough — the tool
    /// runtime that spawns these processes is an external collaborator.
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

/// `StateStore.Type` and backend-specific connection info.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// Process-local, in-memory backend. The default.
    Memory,
    /// Redis-backed, with TTL and key-prefix configuration.
    Redis {
        /// `host:port` or a `redis://` URL.
        address: String,
        /// Password, if auth is enabled.
        password: Option<String>,
        /// Logical database index.
        #[serde(default)]
        database: i64,
        /// Key TTL, e.g. `"24h"`. `None` means keys never expire.
        ttl: Option<String>,
        /// Key prefix; keys are stored as `{prefix}:{id}`.
        #[serde(default = "default_redis_prefix")]
        prefix: String,
    },
}

fn default_redis_prefix() -> String {
    "arena".to_string()
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Sampling and output defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Default sampling temperature.
    pub temperature: Option<f64>,
    /// Default nucleus-sampling top_p.
    pub top_p: Option<f64>,
    /// Default max output tokens.
    pub max_tokens: Option<u32>,
    /// Default seed for reproducible sampling, if the provider honors it.
    pub seed: Option<u64>,
    /// Verbose logging toggle.
    #[serde(default)]
    pub verbose: bool,
    /// Where run artifacts are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Recording configuration.
    #[serde(default)]
    pub recording: RecordingConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            max_tokens: None,
            seed: None,
            verbose: false,
            output_dir: default_output_dir(),
            recording: RecordingConfig::default(),
        }
    }
}

fn default_output_dir() -> String {
    "out".to_string()
}

/// Session recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Whether per-session JSONL recording is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Directory recordings are written under.
    #[serde(default = "default_recording_dir")]
    pub dir: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_recording_dir(),
        }
    }
}

fn default_recording_dir() -> String {
    "recordings".to_string()
}

/// Self-play role and persona configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelfPlayConfig {
    /// Whether self-play roles are honored at all.
    #[serde(default)]
    pub enabled: bool,
    /// Roles that, when a turn's `role` matches, are driven by a second
    /// provider instead of scenario-scripted content.
    #[serde(default)]
    pub roles: Vec<SelfPlayRole>,
    /// Named personas self-play roles can reference.
    #[serde(default)]
    pub personas: HashMap<String, serde_json::Value>,
}

/// One self-play role: a role name mapped to the provider that drives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfPlayRole {
    /// The scenario turn role this applies to, e.g. `"customer"`.
    pub id: String,
    /// The provider id that generates this role's turns.
    pub provider: ProviderId,
}

/// An MCP server declaration, spawned as a subprocess that provides tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Logical name for this server.
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the subprocess.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo(region: &str, scenario: &str, provider: &str) -> RunCombination {
        RunCombination {
            region: Region::new(region),
            scenario_id: ScenarioId::new(scenario),
            provider_id: ProviderId::new(provider),
            eval_id: None,
        }
    }

    #[test]
    fn run_id_is_idempotent_within_the_same_minute() {
        let c = combo("default", "s", "p");
        let a = generate_run_id(1000, &c);
        let b = generate_run_id(1000, &c);
        assert_eq!(a, b);
    }

    #[test]
    fn run_id_changes_when_the_minute_changes() {
        let c = combo("default", "s", "p");
        let a = generate_run_id(1000, &c);
        let b = generate_run_id(1001, &c);
        assert_ne!(a, b);
        assert!(b.as_str().starts_with("1001-"));
    }

    #[test]
    fn run_id_differs_across_distinct_triples() {
        let a = generate_run_id(1000, &combo("default", "s1", "p"));
        let b = generate_run_id(1000, &combo("default", "s2", "p"));
        assert_ne!(a, b);
    }
}
