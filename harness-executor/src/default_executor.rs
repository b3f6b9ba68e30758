//! [`DefaultConversationExecutor`] — scripted and self-play turns driven
//! through [`TurnPipeline`].
//!
//! The turn-by-turn drive loop (iterate, call the pipeline, stop on first
//! failure) folds `harness-context::ScenarioContext`'s cross-turn
//! variable carry-forward into this executor's own loop rather than a
//! separate pipeline stage, since `TurnPipeline` models a turn as a
//! sequence of methods, not a stage graph (see `harness-pipeline`'s own
//! module doc comment).

use crate::{ConversationRequest, ConversationResult, ConversationStreamChunk, ExecutorError, SelfPlayRole, ToolStats};
use async_trait::async_trait;
use harness_context::{PromptRegistry, ScenarioContext};
use harness_core::conversation::{ConversationState, Message, Role as CoreRole};
use harness_core::error::StateError;
use harness_core::id::{ConversationId, PersonaId};
use harness_core::scenario::ScenarioTurn;
use harness_core::state::ArenaStateStore;
use harness_core::assertion::ValidatorFactory;
use harness_pipeline::{PipelineError, TurnPipeline, TurnRequest};
use harness_turn_types::{ContentPart, Provider, ProviderRequest, Role as WireRole, ProviderMessage};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Drives a scenario's scripted/self-play turns through a single
/// [`TurnPipeline`], one turn at a time, stopping at the first turn that
/// fails or names an unsupported role.
pub struct DefaultConversationExecutor {
    pipeline: TurnPipeline,
    prompt_registry: Arc<dyn PromptRegistry>,
    state_store: Arc<dyn ArenaStateStore>,
    validator_factory: Arc<dyn ValidatorFactory>,
}

impl DefaultConversationExecutor {
    /// Build an executor around a fully-configured [`TurnPipeline`].
    /// `state_store` and `validator_factory` should be the same instances
    /// the pipeline itself was built with — this executor needs its own
    /// handle to both since `TurnPipeline` doesn't expose either.
    pub fn new(
        pipeline: TurnPipeline,
        prompt_registry: Arc<dyn PromptRegistry>,
        state_store: Arc<dyn ArenaStateStore>,
        validator_factory: Arc<dyn ValidatorFactory>,
    ) -> Self {
        Self {
            pipeline,
            prompt_registry,
            state_store,
            validator_factory,
        }
    }

    async fn load_state_or_empty(&self, id: &ConversationId) -> Result<ConversationState, ExecutorError> {
        match self.state_store.load(id).await {
            Ok(state) => Ok(state),
            Err(StateError::NotFound(_)) => Ok(ConversationState::new(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn generate_persona_content(
        &self,
        role: &SelfPlayRole,
        state: &ConversationState,
    ) -> Result<String, ExecutorError> {
        let request = ProviderRequest {
            model: Some(role.provider.model().to_string()),
            messages: persona_view(&state.messages),
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            seed: None,
            system: Some(role.persona_prompt.clone()),
            extra: Value::Null,
        };
        let response = role
            .provider
            .predict(request)
            .await
            .map_err(PipelineError::from)?;
        Ok(response.text())
    }

    async fn build_result(
        &self,
        conversation_id: &ConversationId,
        turns_completed: u32,
        self_play: bool,
        persona_id: Option<PersonaId>,
        failed: bool,
        error: String,
    ) -> Result<ConversationResult, ExecutorError> {
        let state = self.load_state_or_empty(conversation_id).await?;
        let total_cost = state.total_cost();
        let mut tool_stats = ToolStats::default();
        tool_stats.record_turn(&state.messages);
        Ok(ConversationResult {
            messages: state.messages,
            total_cost,
            tool_stats,
            turns_completed,
            self_play,
            persona_id,
            conversation_assertion_results: Vec::new(),
            failed,
            error,
        })
    }

    /// Drive every turn in `req.scenario.turns`, optionally forwarding
    /// per-turn provider deltas to `chunk_sink`. Shared by
    /// [`ConversationExecutor::execute_conversation`] (no sink) and
    /// [`ConversationExecutor::execute_conversation_stream`] (sink
    /// present).
    async fn execute_turns(
        &self,
        req: ConversationRequest,
        chunk_sink: Option<mpsc::Sender<ConversationStreamChunk>>,
    ) -> Result<ConversationResult, ExecutorError> {
        let conversation_id = ConversationId::new(req.run_id.as_str());
        let mut turns_completed = 0u32;
        let mut self_play = false;
        let mut persona_id: Option<PersonaId> = None;
        let mut context = ScenarioContext::new();

        for (index, turn) in req.scenario.turns.iter().enumerate() {
            let user_content = match self.resolve_turn_content(&req, turn, &conversation_id).await {
                Ok(ResolvedTurn::Content { content, role }) => {
                    if let SelfPlayRoleMatch::SelfPlay(id) = role {
                        self_play = true;
                        persona_id = persona_id.or(id);
                    }
                    content
                }
                Ok(ResolvedTurn::Unsupported(role_name)) => {
                    return self
                        .build_result(
                            &conversation_id,
                            turns_completed,
                            self_play,
                            persona_id,
                            true,
                            format!("unsupported role: {role_name}"),
                        )
                        .await;
                }
                Err(e) => {
                    return self
                        .build_result(&conversation_id, turns_completed, self_play, persona_id, true, e.to_string())
                        .await;
                }
            };

            let turn_req = TurnRequest {
                conversation_id: conversation_id.clone(),
                task_type: &req.scenario.task_type,
                provider: req.provider.clone(),
                region: req.region.clone(),
                user_content,
                template_vars: context.vars().clone(),
                assertions: &turn.assertions,
            };

            let outcome = if req.scenario.streaming && req.scenario.should_stream_turn(index) {
                let (tx, mut rx) = mpsc::channel(32);
                let forward_sink = chunk_sink.clone();
                let drain = tokio::spawn(async move {
                    while let Some(chunk) = rx.recv().await {
                        if let Some(sink) = &forward_sink {
                            if sink
                                .send(ConversationStreamChunk::Turn { turn_index: index, chunk })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                });
                let result = self
                    .pipeline
                    .run_turn_stream(self.prompt_registry.as_ref(), turn_req, tx)
                    .await;
                let _ = drain.await;
                result
            } else {
                self.pipeline.run_turn(self.prompt_registry.as_ref(), turn_req).await
            };

            match outcome {
                Ok(outcome) => {
                    for message in &outcome.appended_messages {
                        context.extract_from_message(message);
                    }
                    turns_completed += 1;
                    if let Some(sink) = &chunk_sink {
                        let _ = sink.send(ConversationStreamChunk::TurnCompleted { turn_index: index }).await;
                    }
                }
                Err(e) => {
                    return self
                        .build_result(&conversation_id, turns_completed, self_play, persona_id, true, e.to_string())
                        .await;
                }
            }
        }

        let mut result = self
            .build_result(&conversation_id, turns_completed, self_play, persona_id, false, String::new())
            .await?;

        let native = harness_eval::evaluate_conversation_assertions(
            self.validator_factory.as_ref(),
            &req.scenario.conversation_assertions,
            &result.messages,
        )
        .await;
        result.conversation_assertion_results.extend(native);

        if let Some(hook) = &req.eval_hook {
            let dual_written = hook.evaluate_conversation(&result.messages).await?;
            result.conversation_assertion_results.extend(dual_written);
        }

        Ok(result)
    }

    async fn resolve_turn_content(
        &self,
        req: &ConversationRequest,
        turn: &ScenarioTurn,
        conversation_id: &ConversationId,
    ) -> Result<ResolvedTurn, ExecutorError> {
        if let Some(role) = req.self_play_roles.iter().find(|r| r.role == turn.role) {
            let state = self.load_state_or_empty(conversation_id).await?;
            let content = self.generate_persona_content(role, &state).await?;
            let persona_id = turn.persona.clone().or_else(|| role.persona_id.clone());
            return Ok(ResolvedTurn::Content {
                content,
                role: SelfPlayRoleMatch::SelfPlay(persona_id),
            });
        }
        if turn.role == "user" {
            return Ok(ResolvedTurn::Content {
                content: turn.content.clone(),
                role: SelfPlayRoleMatch::Scripted,
            });
        }
        Ok(ResolvedTurn::Unsupported(turn.role.clone()))
    }
}

enum ResolvedTurn {
    Content { content: String, role: SelfPlayRoleMatch },
    Unsupported(String),
}

enum SelfPlayRoleMatch {
    SelfPlay(Option<PersonaId>),
    Scripted,
}

/// Render a conversation's messages from a self-play persona's point of
/// view: the persona's own past lines were saved as `Role::User` (they
/// stand in for the scripted user), so they become `Assistant` turns from
/// its perspective, and vice versa. System/tool messages carry no
/// meaning for the persona and are dropped — it gets its own system
/// prompt instead.
fn persona_view(messages: &[Message]) -> Vec<ProviderMessage> {
    messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                CoreRole::User => WireRole::Assistant,
                CoreRole::Assistant => WireRole::User,
                CoreRole::System | CoreRole::Tool => return None,
            };
            Some(ProviderMessage {
                role,
                content: vec![ContentPart::Text { text: m.content.clone() }],
            })
        })
        .collect()
}

#[async_trait]
impl crate::ConversationExecutor for DefaultConversationExecutor {
    async fn execute_conversation(&self, req: ConversationRequest) -> Result<ConversationResult, ExecutorError> {
        self.execute_turns(req, None).await
    }

    async fn execute_conversation_stream(
        &self,
        req: ConversationRequest,
        chunks: mpsc::Sender<ConversationStreamChunk>,
    ) -> Result<ConversationResult, ExecutorError> {
        let result = self.execute_turns(req, Some(chunks.clone())).await?;
        let _ = chunks
            .send(ConversationStreamChunk::ConversationCompleted { result: Box::new(clone_result(&result)) })
            .await;
        Ok(result)
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
    use crate::ConversationExecutor;
    use harness_context::TemplateRegistry;
    use harness_core::id::{Region, RunId};
    use harness_core::scenario::{Assertion, Scenario};
    use harness_eval::BuiltinValidatorFactory;
    use harness_provider_mock::MockProvider;
    use harness_state_memory::MemoryStore;
    use harness_tool::ToolRegistry;
    use harness_turn_types::{ProviderResponse, StopReason, TokenUsage};
    use std::collections::HashMap as Map;

    fn prompts() -> TemplateRegistry {
        let mut r = TemplateRegistry::new();
        r.register("assist", "You are helpful.").unwrap();
        r
    }

    fn scenario(turns: Vec<ScenarioTurn>) -> Arc<Scenario> {
        Arc::new(Scenario {
            id: harness_core::id::ScenarioId::new("s"),
            task_type: "assist".into(),
            providers: Vec::new(),
            turns,
            streaming: false,
            duplex: None,
            eval: None,
            conversation_assertions: Vec::new(),
        })
    }

    fn user_turn(content: &str) -> ScenarioTurn {
        ScenarioTurn {
            role: "user".into(),
            content: content.into(),
            persona: None,
            assertions: Vec::new(),
            audio: None,
        }
    }

    #[tokio::test]
    async fn happy_path_one_scripted_turn() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let validators: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        let pipeline = TurnPipeline::new(tools, validators.clone(), store.clone());
        let executor = DefaultConversationExecutor::new(pipeline, Arc::new(prompts()), store, validators);

        let provider: Arc<dyn Provider> = Arc::new(MockProvider::echoing("p", "model", "pong"));
        let req = ConversationRequest {
            run_id: RunId::new("r1"),
            scenario: scenario(vec![user_turn("hi")]),
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        };

        let result = executor.execute_conversation(req).await.unwrap();
        assert!(!result.failed);
        assert_eq!(result.turns_completed, 1);
        assert_eq!(result.messages.last().unwrap().content, "pong");
        assert!(result.total_cost > rust_decimal::Decimal::ZERO);
    }

    #[tokio::test]
    async fn unsupported_role_fails_the_turn_without_attempting_more() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let validators: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        let pipeline = TurnPipeline::new(tools, validators.clone(), store.clone());
        let executor = DefaultConversationExecutor::new(pipeline, Arc::new(prompts()), store, validators);

        let provider: Arc<dyn Provider> = Arc::new(MockProvider::echoing("p", "model", "pong"));
        let req = ConversationRequest {
            run_id: RunId::new("r2"),
            scenario: scenario(vec![ScenarioTurn {
                role: "mystery".into(),
                content: String::new(),
                persona: None,
                assertions: Vec::new(),
                audio: None,
            }]),
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        };

        let result = executor.execute_conversation(req).await.unwrap();
        assert!(result.failed);
        assert!(result.error.contains("unsupported role"));
        assert_eq!(result.turns_completed, 0);
    }

    #[tokio::test]
    async fn provider_failure_mid_turn_retains_prior_turns() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let validators: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        let pipeline = TurnPipeline::new(tools, validators.clone(), store.clone());
        let executor = DefaultConversationExecutor::new(pipeline, Arc::new(prompts()), store, validators);

        let mut mock = MockProvider::new("p", "model");
        mock.push_response(ProviderResponse {
            content: vec![ContentPart::Text { text: "first".into() }],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage { input_tokens: 1, output_tokens: 1, cached_tokens: 0 },
            model: "model".into(),
            cost_usd: None,
            raw: None,
        });
        mock.push_error(harness_turn_types::ProviderError::RequestFailed("boom".into()));
        let provider: Arc<dyn Provider> = Arc::new(mock);

        let req = ConversationRequest {
            run_id: RunId::new("r3"),
            scenario: scenario(vec![user_turn("first"), user_turn("second")]),
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        };

        let result = executor.execute_conversation(req).await.unwrap();
        assert!(result.failed);
        assert_eq!(result.turns_completed, 1);
        assert!(result.messages.iter().any(|m| m.content == "first"));
        assert!(!result.messages.iter().any(|m| m.content == "second"));
    }

    #[tokio::test]
    async fn conversation_level_assertions_are_evaluated_once_at_the_end() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let validators: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        let pipeline = TurnPipeline::new(tools, validators.clone(), store.clone());
        let executor = DefaultConversationExecutor::new(pipeline, Arc::new(prompts()), store, validators);

        let provider: Arc<dyn Provider> = Arc::new(MockProvider::echoing("p", "model", "the answer is 42"));
        let mut scen = (*scenario(vec![user_turn("hi")])).clone();
        scen.conversation_assertions = vec![Assertion {
            assertion_type: "contains".into(),
            params: Map::from([("value".to_string(), serde_json::json!("42"))]),
        }];

        let req = ConversationRequest {
            run_id: RunId::new("r4"),
            scenario: Arc::new(scen),
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        };

        let result = executor.execute_conversation(req).await.unwrap();
        assert!(!result.failed);
        assert_eq!(result.conversation_assertion_results.len(), 1);
        assert!(result.conversation_assertion_results[0].passed);
    }
}
