//! [`CompositeConversationExecutor`] — routes a run to whichever
//! executor its scenario configures.
//!
//! Holds a map of named executors and looks one up per dispatch rather
//! than hard-coding a single executor type, narrowed to the three fixed
//! routes below instead of an open string-keyed map.

use crate::{ConversationExecutor, ConversationRequest, ConversationResult, ConversationStreamChunk, ExecutorError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Dispatches to [`crate::DefaultConversationExecutor`],
/// [`crate::DuplexConversationExecutor`], or
/// [`crate::EvalConversationExecutor`] by inspecting
/// `scenario.eval`/`scenario.duplex`: `eval` takes precedence over
/// `duplex`, which takes precedence over the default scripted/self-play
/// path.
///
/// A scenario that requires a mode this instance wasn't wired with is a
/// configuration bug, not a run failure — it comes back as a
/// `ConversationResult { failed: true, .. }` rather than an `Err`, so the
/// scheduler still persists `RunMetadata` for it.
pub struct CompositeConversationExecutor {
    default: Option<Arc<dyn ConversationExecutor>>,
    duplex: Option<Arc<dyn ConversationExecutor>>,
    eval: Option<Arc<dyn ConversationExecutor>>,
}

impl CompositeConversationExecutor {
    /// Start with nothing wired — every scenario routes to a
    /// `NotConfigured` result until the relevant `with_*` builder is
    /// called.
    pub fn new() -> Self {
        Self {
            default: None,
            duplex: None,
            eval: None,
        }
    }

    /// Wire the scripted/self-play executor for scenarios with no
    /// `eval`/`duplex` configuration.
    #[must_use]
    pub fn with_default(mut self, executor: Arc<dyn ConversationExecutor>) -> Self {
        self.default = Some(executor);
        self
    }

    /// Wire the executor for scenarios with `scenario.duplex` set.
    #[must_use]
    pub fn with_duplex(mut self, executor: Arc<dyn ConversationExecutor>) -> Self {
        self.duplex = Some(executor);
        self
    }

    /// Wire the executor for scenarios with `scenario.eval` set.
    #[must_use]
    pub fn with_eval(mut self, executor: Arc<dyn ConversationExecutor>) -> Self {
        self.eval = Some(executor);
        self
    }

    fn route(&self, req: &ConversationRequest) -> Result<Arc<dyn ConversationExecutor>, ConversationResult> {
        if req.scenario.eval.is_some() {
            return self.eval.clone().ok_or_else(|| not_configured("eval"));
        }
        if req.scenario.duplex.is_some() {
            return self.duplex.clone().ok_or_else(|| not_configured("duplex"));
        }
        self.default.clone().ok_or_else(|| not_configured("default"))
    }
}

impl Default for CompositeConversationExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn not_configured(mode: &str) -> ConversationResult {
    ConversationResult {
        messages: Vec::new(),
        total_cost: rust_decimal::Decimal::ZERO,
        tool_stats: crate::ToolStats::default(),
        turns_completed: 0,
        self_play: false,
        persona_id: None,
        conversation_assertion_results: Vec::new(),
        failed: true,
        error: format!("{mode} executor not configured"),
    }
}

#[async_trait]
impl ConversationExecutor for CompositeConversationExecutor {
    async fn execute_conversation(&self, req: ConversationRequest) -> Result<ConversationResult, ExecutorError> {
        match self.route(&req) {
            Ok(executor) => executor.execute_conversation(req).await,
            Err(result) => Ok(result),
        }
    }

    async fn execute_conversation_stream(
        &self,
        req: ConversationRequest,
        chunks: mpsc::Sender<ConversationStreamChunk>,
    ) -> Result<ConversationResult, ExecutorError> {
        match self.route(&req) {
            Ok(executor) => executor.execute_conversation_stream(req, chunks).await,
            Err(result) => {
                let _ = chunks
                    .send(ConversationStreamChunk::ConversationCompleted { result: Box::new(clone_result(&result)) })
                    .await;
                Ok(result)
            }
        }
    }
}

fn clone_result(result: &ConversationResult) -> ConversationResult {
    ConversationResult {
        messages: result.messages.clone(),
        total_cost: result.total_cost,
        tool_stats: result.tool_stats.clone(),
        turns_completed: result.turns_completed,
        self_play: result.self_play,
        persona_id: result.persona_id.clone(),
        conversation_assertion_results: result.conversation_assertion_results.clone(),
        failed: result.failed,
        error: result.error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::id::{Region, RunId};
    use harness_core::scenario::{EvalConfig, Recording, Scenario};
    use harness_core::id::ScenarioId;
    use harness_provider_mock::MockProvider;
    use harness_turn_types::Provider;

    struct StubExecutor {
        failed: bool,
    }

    #[async_trait]
    impl ConversationExecutor for StubExecutor {
        async fn execute_conversation(&self, _req: ConversationRequest) -> Result<ConversationResult, ExecutorError> {
            Ok(ConversationResult {
                messages: Vec::new(),
                total_cost: rust_decimal::Decimal::ZERO,
                tool_stats: crate::ToolStats::default(),
                turns_completed: 1,
                self_play: false,
                persona_id: None,
                conversation_assertion_results: Vec::new(),
                failed: self.failed,
                error: String::new(),
            })
        }
    }

    fn scenario(eval: Option<EvalConfig>) -> Arc<Scenario> {
        Arc::new(Scenario {
            id: ScenarioId::new("s"),
            task_type: "assist".into(),
            providers: Vec::new(),
            turns: Vec::new(),
            streaming: false,
            duplex: None,
            eval,
            conversation_assertions: Vec::new(),
        })
    }

    fn request(scenario: Arc<Scenario>) -> ConversationRequest {
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::new("p", "m"));
        ConversationRequest {
            run_id: RunId::new("r"),
            scenario,
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        }
    }

    #[tokio::test]
    async fn routes_to_default_when_no_eval_or_duplex_configured() {
        let composite = CompositeConversationExecutor::new().with_default(Arc::new(StubExecutor { failed: false }));
        let result = composite.execute_conversation(request(scenario(None))).await.unwrap();
        assert!(!result.failed);
    }

    #[tokio::test]
    async fn routes_to_eval_when_scenario_has_eval_config() {
        let composite = CompositeConversationExecutor::new()
            .with_default(Arc::new(StubExecutor { failed: true }))
            .with_eval(Arc::new(StubExecutor { failed: false }));
        let eval_scenario = scenario(Some(EvalConfig {
            recording: Recording { path: "r.json".into(), recording_type: "fs_json".into() },
        }));
        let result = composite.execute_conversation(request(eval_scenario)).await.unwrap();
        assert!(!result.failed);
    }

    #[tokio::test]
    async fn unwired_mode_is_a_failed_result_not_an_error() {
        let composite = CompositeConversationExecutor::new();
        let result = composite.execute_conversation(request(scenario(None))).await.unwrap();
        assert!(result.failed);
        assert!(result.error.contains("not configured"));
    }
}
