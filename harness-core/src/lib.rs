//! # harness-core — data model and protocol traits for the arena benchmark harness
//!
//! This crate defines the shapes and trait boundaries every other
//! `harness-*` crate builds on: the conversation/run data model (§3), the
//! state-store boundary, the assertion/eval vocabulary, the event bus, and
//! the recording-adapter contract used by replay mode.
//!
//! ## Layout
//!
//! | Module | What it owns |
//! |---|---|
//! | [`id`] | Typed id newtypes (`RunId`, `ConversationId`, ...) |
//! | [`duration`] | `DurationMs`, the stable wire-format duration |
//! | [`part`] | Typed message content (text/image/audio/video) |
//! | [`conversation`] | `ConversationState`, `Message`, `CostInfo` |
//! | [`run`] | `RunCombination`, `RunPlan`, `RunMetadata`, RunID derivation |
//! | [`scenario`] | `Scenario` and its declarative subtrees |
//! | [`assertion`] | Validator trait, assertion/eval result shapes |
//! | [`state`] | `StateStore` / `ArenaStateStore` traits |
//! | [`events`] | `EventBus` trait and the typed `Event` vocabulary |
//! | [`recording`] | `RecordingAdapter` trait, for eval/replay mode |
//! | [`hook`] | Pipeline observation points (`Hook`, `HookPoint`) |
//! | [`lifecycle`] | Cost/budget event vocabulary |
//! | [`error`] | Errors owned by this crate's own traits |
//!
//! Provider, tool-registry, and prompt-registry traits are intentionally
//! *not* defined here — they live in their own crates (`harness-turn-types`,
//! `harness-tool`) the same way the data-model crate this one is built from
//! never depended on its own turn/tool crates.

#![deny(missing_docs)]

pub mod assertion;
pub mod conversation;
pub mod duration;
pub mod error;
pub mod events;
pub mod hook;
pub mod id;
pub mod lifecycle;
pub mod part;
pub mod recording;
pub mod run;
pub mod scenario;
pub mod state;

pub use assertion::{
    AssertionInvocation, AssertionResult, ConversationValidationResult, EvalResult,
    TurnAssertionSummary, Validator, ValidatorFactory,
};
pub use conversation::{ConversationState, CostInfo, Message, Role, ToolCall, ToolResult};
pub use duration::DurationMs;
pub use error::{ConfigError, HookError, StateError};
pub use events::{Event, EventBus, EventSubscription};
pub use hook::{Hook, HookAction, HookContext, HookPoint};
pub use id::{ConversationId, EvalId, PersonaId, ProviderId, Region, RunId, ScenarioId};
pub use lifecycle::CostEvent;
pub use part::{Part, PartSource};
pub use recording::{LoadedRecording, RecordingAdapter, RecordingRef};
pub use run::{
    current_timestamp_minute, generate_run_id, Defaults, McpServerConfig, RecordingConfig,
    RunCombination, RunFilter, RunMetadata, RunPlan, RunPlanConfig, SelfPlayConfig, SelfPlayRole,
    StateStoreConfig,
};
pub use scenario::{
    Assertion, DuplexConfig, DuplexResilience, EvalConfig, Pricing, ProviderDefaults,
    ProviderSpec, Recording, Scenario, ScenarioTurn, TurnDetection, VadConfig,
};
pub use state::{ArenaStateStore, StateStore};
