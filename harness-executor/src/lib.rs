#![deny(missing_docs)]
//! # harness-executor — conversation-level orchestration
//!
//! A [`ConversationExecutor`] drives one run's whole conversation, not just
//! a single turn — it decides how many turns to run, who speaks on each
//! one (a scripted user line, a self-play persona, or a replayed
//! recording), and assembles the [`ConversationResult`] the scheduler
//! persists as `RunMetadata`. [`TurnPipeline`] (in `harness-pipeline`)
//! still owns everything *within* one turn; this crate owns the loop
//! around it.
//!
//! Four executors cover the supported conversation modes:
//! [`DefaultConversationExecutor`] for scripted/self-play turns,
//! [`duplex::DuplexConversationExecutor`] for long-lived bidirectional
//! sessions, [`eval::EvalConversationExecutor`] for replay-only scoring
//! runs, and [`composite::CompositeConversationExecutor`] which routes a
//! run to whichever of the three its scenario configures.
//!
//! The "what runs, in what order, with what result shape" policy lives
//! here, above a single per-turn call; the per-step mechanics live in
//! `harness-pipeline`. "Which executor runs" is narrowed to the four
//! fixed modes above rather than an open extension point.

pub mod composite;
pub mod default_executor;
pub mod duplex;
pub mod eval;

pub use composite::CompositeConversationExecutor;
pub use default_executor::DefaultConversationExecutor;
pub use duplex::DuplexConversationExecutor;
pub use eval::EvalConversationExecutor;

use async_trait::async_trait;
use harness_core::assertion::ConversationValidationResult;
use harness_core::error::StateError;
use harness_core::id::{ConversationId, PersonaId, Region, RunId};
use harness_core::scenario::Scenario;
use harness_eval::EvalError;
use harness_pipeline::PipelineError;
use harness_turn_types::Provider;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// One self-play role a scenario's turns can invoke: a role name, the
/// provider that drives it, and the persona prompt resolved ahead of time
/// by the caller (the scheduler reads `RunPlanConfig.self_play` — this
/// crate only consumes the resolved result, it never parses configuration
/// itself).
#[derive(Clone)]
pub struct SelfPlayRole {
    /// The `ScenarioTurn.role` this applies to, e.g. `"customer"`.
    pub role: String,
    /// Provider generating this role's turns.
    pub provider: Arc<dyn Provider>,
    /// System prompt describing the persona this role plays.
    pub persona_prompt: String,
    /// The persona id, recorded onto `RunMetadata.persona_id`.
    pub persona_id: Option<PersonaId>,
}

/// Everything a [`ConversationExecutor`] needs to drive one run's whole
/// conversation.
pub struct ConversationRequest {
    /// Doubles as the conversation id persisted to the state store.
    pub run_id: RunId,
    /// The scenario being executed.
    pub scenario: Arc<Scenario>,
    /// The provider under test for this run.
    pub provider: Arc<dyn Provider>,
    /// Deployment region, for region-scoped prompt overrides.
    pub region: Region,
    /// Self-play roles available to this run's turns, if self-play is
    /// enabled. Empty means every non-`"user"` turn role is unsupported.
    pub self_play_roles: Vec<SelfPlayRole>,
    /// Dual-writes turn/conversation assertions to an external eval
    /// runtime, if an eval pack is configured for this run.
    pub eval_hook: Option<Arc<harness_eval::PackEvalHook>>,
}

/// Per-tool invocation counts accumulated over a whole conversation.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ToolStats {
    /// Total tool calls across every turn.
    pub total_calls: u64,
    /// Calls broken down by tool name.
    pub by_tool: HashMap<String, u64>,
}

impl ToolStats {
    /// Fold one turn's appended messages into the running totals.
    pub fn record_turn(&mut self, messages: &[harness_core::Message]) {
        for message in messages {
            for call in &message.tool_calls {
                self.total_calls += 1;
                *self.by_tool.entry(call.name.clone()).or_insert(0) += 1;
            }
        }
    }
}

/// The outcome of driving a whole conversation, ready for the scheduler to
/// fold into `RunMetadata`.
pub struct ConversationResult {
    /// The conversation's final message log.
    pub messages: Vec<harness_core::Message>,
    /// Sum of every turn's `CostInfo.total_cost`.
    pub total_cost: Decimal,
    /// Tool-call counts across the whole conversation.
    pub tool_stats: ToolStats,
    /// Number of assistant turns completed.
    pub turns_completed: u32,
    /// True if any turn was driven by a self-play role rather than a
    /// scripted `"user"` line.
    pub self_play: bool,
    /// The persona used, if `self_play` and a persona was resolved.
    pub persona_id: Option<PersonaId>,
    /// Conversation-scoped assertion/eval results, evaluated once at run
    /// end over the full message sequence.
    pub conversation_assertion_results: Vec<ConversationValidationResult>,
    /// True if the run failed outright (a hook halted it, an unsupported
    /// role was scripted, a duplex session exhausted its retries). Not
    /// the same as a failing assertion — those are recorded in
    /// `conversation_assertion_results` without failing the run itself,
    /// unless the executor's own mode promotes them (see
    /// `duplex::DuplexConversationExecutor`'s partial-success policy and
    /// this crate's `DESIGN.md` entry on workflow-mode promotion).
    pub failed: bool,
    /// Non-empty iff `failed`.
    pub error: String,
}

/// A chunk of a streaming conversation: provider deltas tagged with the
/// turn they belong to, or a terminal completion/failure signal.
#[derive(Debug, Clone)]
pub enum ConversationStreamChunk {
    /// One provider-level stream chunk from the given turn.
    Turn {
        /// Index into `scenario.turns`.
        turn_index: usize,
        /// The underlying chunk.
        chunk: harness_turn_types::StreamChunk,
    },
    /// `turn_index` finished (its assistant message was saved).
    TurnCompleted {
        /// Index into `scenario.turns`.
        turn_index: usize,
    },
    /// The whole conversation finished; carries the same result
    /// `execute_conversation` would have returned.
    ConversationCompleted {
        /// The final result.
        result: Box<ConversationResult>,
    },
}

/// Errors raised while driving a whole conversation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A turn failed inside the pipeline.
    #[error("turn pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),

    /// Reading or writing conversation/run state failed.
    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// A scenario turn named a role with no matching self-play
    /// configuration and no scripted content.
    #[error("unsupported turn role: {0}")]
    UnsupportedRole(String),

    /// This executor isn't wired up to handle the scenario's configured
    /// mode (e.g. `CompositeConversationExecutor` routed to eval mode but
    /// no `EvalConversationExecutor` was registered).
    #[error("executor not configured for this scenario: {0}")]
    NotConfigured(String),

    /// Dispatching an assertion to the external eval runtime failed.
    #[error("eval dispatch failed: {0}")]
    Eval(#[from] EvalError),

    /// Loading or validating a replay recording failed.
    #[error("replay failed: {0}")]
    Replay(String),
}

/// Drives one run's whole conversation to completion.
///
/// Implementations: [`DefaultConversationExecutor`] (scripted/self-play
/// turns through the turn pipeline), [`duplex::DuplexConversationExecutor`]
/// (long-lived bidirectional sessions), [`eval::EvalConversationExecutor`]
/// (replay without a live provider call), and
/// [`composite::CompositeConversationExecutor`] (routes to one of the
/// above by scenario configuration).
#[async_trait]
pub trait ConversationExecutor: Send + Sync {
    /// Run the conversation to completion and return its result.
    async fn execute_conversation(
        &self,
        req: ConversationRequest,
    ) -> Result<ConversationResult, ExecutorError>;

    /// Run the conversation, forwarding provider-level stream chunks to
    /// `chunks` as they arrive, in addition to returning the same result
    /// [`Self::execute_conversation`] would have.
    ///
    /// The default implementation runs non-streaming and only emits the
    /// terminal [`ConversationStreamChunk::ConversationCompleted`] — the
    /// right behavior for executors with no meaningful per-turn delta
    /// stream (eval replay, composite dispatch to one of those).
    async fn execute_conversation_stream(
        &self,
        req: ConversationRequest,
        chunks: mpsc::Sender<ConversationStreamChunk>,
    ) -> Result<ConversationResult, ExecutorError> {
        let result = self.execute_conversation(req).await?;
        let _ = chunks
            .send(ConversationStreamChunk::ConversationCompleted {
                result: Box::new(ConversationResult {
                    messages: result.messages.clone(),
                    total_cost: result.total_cost,
                    tool_stats: result.tool_stats.clone(),
                    turns_completed: result.turns_completed,
                    self_play: result.self_play,
                    persona_id: result.persona_id.clone(),
                    conversation_assertion_results: result.conversation_assertion_results.clone(),
                    failed: result.failed,
                    error: result.error.clone(),
                }),
            })
            .await;
        Ok(result)
    }
}
