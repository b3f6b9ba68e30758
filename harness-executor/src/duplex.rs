//! [`DuplexConversationExecutor`] — long-lived bidirectional sessions.
//!
//! Turns here don't go through `TurnPipeline` at all: a duplex run opens
//! one [`harness_turn_types::provider::DuplexSession`] and multiplexes
//! every scripted turn's input/output across it, instead of issuing a
//! fresh provider call per turn. This executor owns the pieces
//! `TurnPipeline` would otherwise own for a single turn — prompt
//! assembly, the tool-call round trip, turn-local assertion evaluation,
//! state-store saves — re-derived here because the session is long-lived
//! and stateful in a way `TurnPipeline::run_turn` isn't.
//!
//! Uses `harness-pipeline::audio` for resampling/VAD and mirrors
//! `harness-pipeline::lib::evaluate_assertions`'s shape for turn-local
//! assertion evaluation (merge `{assistant_response, messages}` into each
//! assertion's params, then write the summary into the last assistant
//! message's `meta` via `ArenaStateStore::update_last_assistant_message`).

use crate::{ConversationRequest, ConversationResult, ExecutorError, ToolStats};
use async_trait::async_trait;
use harness_context::PromptRegistry;
use harness_core::assertion::{evaluate_all, AssertionInvocation, TurnAssertionSummary, ValidatorFactory};
use harness_core::conversation::{ConversationState, Message, Role as CoreRole, ToolCall};
use harness_core::events::{Event, EventBus};
use harness_core::id::{ConversationId, PersonaId};
use harness_core::scenario::{DuplexResilience, ScenarioTurn};
use harness_core::state::ArenaStateStore;
use harness_pipeline::audio::resample;
use harness_tool::ToolRegistry;
use harness_turn_types::provider::{is_recoverable_error_text, DuplexInput, DuplexSession, ProviderError};
use harness_turn_types::types::{ContentPart, ProviderRequest, StreamChunk};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Drives a duplex scenario's turns across one long-lived
/// [`DuplexSession`], retrying the whole session on a recoverable error
/// per the scenario's [`DuplexResilience`] policy.
pub struct DuplexConversationExecutor {
    state_store: Arc<dyn ArenaStateStore>,
    tool_registry: Arc<ToolRegistry>,
    prompt_registry: Arc<dyn PromptRegistry>,
    validator_factory: Arc<dyn ValidatorFactory>,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl DuplexConversationExecutor {
    /// Build an executor. `state_store` should be the same instance any
    /// sibling [`crate::DefaultConversationExecutor`] in the same
    /// deployment uses, so the two modes agree on one conversation's
    /// state if a run ever crossed between them (the composite router
    /// never does this mid-run, but both read/write the same backend).
    pub fn new(
        state_store: Arc<dyn ArenaStateStore>,
        tool_registry: Arc<ToolRegistry>,
        prompt_registry: Arc<dyn PromptRegistry>,
        validator_factory: Arc<dyn ValidatorFactory>,
    ) -> Self {
        Self {
            state_store,
            tool_registry,
            prompt_registry,
            validator_factory,
            event_bus: None,
        }
    }

    /// Attach an event bus; `arena.duplex.*` events publish through it.
    /// Without one, this executor runs silently.
    #[must_use]
    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event).await;
        }
    }

    async fn load_state_or_empty(&self, id: &ConversationId) -> Result<ConversationState, ExecutorError> {
        match self.state_store.load(id).await {
            Ok(state) => Ok(state),
            Err(harness_core::StateError::NotFound(_)) => Ok(ConversationState::new(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn generate_persona_content(
        &self,
        role: &crate::SelfPlayRole,
        state: &ConversationState,
    ) -> Result<String, String> {
        let request = ProviderRequest {
            model: Some(role.provider.model().to_string()),
            messages: persona_view(&state.messages),
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            seed: None,
            system: Some(role.persona_prompt.clone()),
            extra: serde_json::Value::Null,
        };
        let response = role.provider.predict(request).await.map_err(|e| e.to_string())?;
        Ok(response.text())
    }

    async fn build_turn_input(
        &self,
        req: &ConversationRequest,
        turn: &ScenarioTurn,
        state: &ConversationState,
        preferred_sample_rate: u32,
    ) -> Result<(TurnInput, Option<PersonaId>), String> {
        if let Some(audio) = &turn.audio {
            let bytes = decode_base64(&audio.pcm16_base64)?;
            let samples = pcm16_bytes_to_f32(&bytes);
            let resampled = resample(&samples, audio.sample_rate, preferred_sample_rate)?;
            return Ok((TurnInput::Audio(f32_to_pcm16_bytes(&resampled)), None));
        }
        if let Some(role) = req.self_play_roles.iter().find(|r| r.role == turn.role) {
            let content = self.generate_persona_content(role, state).await?;
            let persona_id = turn.persona.clone().or_else(|| role.persona_id.clone());
            return Ok((TurnInput::Text(content), persona_id));
        }
        if turn.role == "user" {
            return Ok((TurnInput::Text(turn.content.clone()), None));
        }
        Err(format!("unsupported turn role: {}", turn.role))
    }

    async fn evaluate_turn_assertions(
        &self,
        conversation_id: &ConversationId,
        state: &ConversationState,
        assertions: &[harness_core::scenario::Assertion],
    ) -> Result<(), ExecutorError> {
        if assertions.is_empty() {
            return Ok(());
        }
        let Some(index) = state.last_assistant_index() else {
            return Ok(());
        };
        let assistant_response = state.messages[index].content.clone();
        let messages_json = serde_json::to_value(&state.messages).unwrap_or(serde_json::Value::Null);

        let invocations = assertions
            .iter()
            .map(|a| {
                let mut params = a.params.clone();
                params.insert("assistant_response".into(), serde_json::Value::String(assistant_response.clone()));
                params.insert("messages".into(), messages_json.clone());
                AssertionInvocation {
                    assertion_type: &a.assertion_type,
                    params: serde_json::Value::Object(params.into_iter().collect()),
                }
            })
            .collect();

        let results = evaluate_all(self.validator_factory.as_ref(), invocations).await;
        let summary = TurnAssertionSummary::from_results(results);

        let mut updated = state.messages[index].clone();
        updated
            .meta
            .insert("assertions".into(), serde_json::to_value(&summary).unwrap_or(serde_json::Value::Null));
        self.state_store.update_last_assistant_message(conversation_id, updated).await?;
        Ok(())
    }

    fn classify_provider_error(&self, turn_index: usize, err: &ProviderError, turns_completed: u32) -> AttemptFailure {
        let text = err.to_string();
        AttemptFailure {
            turn_index,
            error: text.clone(),
            recoverable: err.is_duplex_recoverable() || is_recoverable_error_text(&text),
            is_session_ended: matches!(err, ProviderError::SessionEnded) || text.to_lowercase().contains("session ended"),
            turns_completed,
        }
    }

    /// Drain response elements for one turn until it completes or fails,
    /// executing any tool round trips along the way.
    async fn drain_turn(
        &self,
        session: &mut dyn DuplexSession,
        req: &ConversationRequest,
        state: &mut ConversationState,
        turn_index: usize,
        turns_completed: u32,
    ) -> Result<(), AttemptFailure> {
        loop {
            let Some(chunk) = session.recv().await else {
                return Err(AttemptFailure {
                    turn_index,
                    error: "output channel closed unexpectedly".into(),
                    recoverable: true,
                    is_session_ended: false,
                    turns_completed,
                });
            };

            match chunk {
                StreamChunk::Informational { signal } if signal == "interrupted" || signal == "interrupted_turn_complete" => {
                    continue;
                }
                StreamChunk::Informational { .. } | StreamChunk::Delta { .. } | StreamChunk::ToolCallDelta { .. } => {
                    continue;
                }
                StreamChunk::Error { message } => {
                    let recoverable = is_recoverable_error_text(&message);
                    return Err(AttemptFailure {
                        turn_index,
                        error: message,
                        recoverable,
                        is_session_ended: false,
                        turns_completed,
                    });
                }
                StreamChunk::EndOfStream { content, tool_calls, usage, .. } => {
                    if content.is_empty() && tool_calls.is_empty() {
                        return Err(AttemptFailure {
                            turn_index,
                            error: "empty response, likely interrupted".into(),
                            recoverable: true,
                            is_session_ended: false,
                            turns_completed,
                        });
                    }

                    let fail = |e: String| AttemptFailure {
                        turn_index,
                        error: e,
                        recoverable: false,
                        is_session_ended: false,
                        turns_completed,
                    };

                    if !tool_calls.is_empty() {
                        let calls: Vec<ToolCall> = tool_calls
                            .iter()
                            .filter_map(|p| match p {
                                ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                                    id: id.clone(),
                                    name: name.clone(),
                                    args: input.clone(),
                                }),
                                _ => None,
                            })
                            .collect();

                        let mut assistant = Message::text(CoreRole::Assistant, content);
                        assistant.tool_calls = calls.clone();
                        assistant.cost =
                            Some(req.provider.calculate_cost(usage.input_tokens, usage.output_tokens, usage.cached_tokens));
                        state.messages.push(assistant);

                        let mut results = Vec::with_capacity(calls.len());
                        for call in &calls {
                            let result = self.tool_registry.execute(call).await;
                            state.messages.push(Message::tool_result(result.clone()));
                            results.push(result);
                        }
                        self.state_store.save(state).await.map_err(|e| fail(e.to_string()))?;

                        session
                            .send(DuplexInput::ToolResponses(results))
                            .await
                            .map_err(|e| self.classify_provider_error(turn_index, &e, turns_completed))?;
                        continue;
                    }

                    let mut assistant = Message::text(CoreRole::Assistant, content);
                    assistant.cost =
                        Some(req.provider.calculate_cost(usage.input_tokens, usage.output_tokens, usage.cached_tokens));
                    state.messages.push(assistant);
                    self.state_store.save(state).await.map_err(|e| fail(e.to_string()))?;
                    return Ok(());
                }
            }
        }
    }

    /// Drive every turn across one freshly opened session. Returns the
    /// turns completed so far even on failure, so the retry loop can
    /// apply the partial-success policy.
    async fn run_attempt(
        &self,
        req: &ConversationRequest,
        conversation_id: &ConversationId,
        preferred_sample_rate: u32,
    ) -> Result<AttemptOutcome, AttemptFailure> {
        let fail0 = |e: String| AttemptFailure {
            turn_index: 0,
            error: e,
            recoverable: false,
            is_session_ended: false,
            turns_completed: 0,
        };

        let mut state = self.load_state_or_empty(conversation_id).await.map_err(|e| fail0(e.to_string()))?;

        let prompt = self
            .prompt_registry
            .load_with_vars(&req.scenario.task_type, HashMap::new(), &req.region)
            .await
            .map_err(|e| fail0(e.to_string()))?;

        state.messages.push(Message::text(CoreRole::System, prompt.system_prompt.clone()));
        self.state_store.save(&state).await.map_err(|e| fail0(e.to_string()))?;

        let mut session = req
            .provider
            .open_duplex_session(&prompt.system_prompt)
            .await
            .map_err(|e| self.classify_provider_error(0, &e, 0))?;

        let mut turns_completed = 0u32;
        let mut self_play = false;
        let mut persona_id: Option<PersonaId> = None;

        for (index, turn) in req.scenario.turns.iter().enumerate() {
            self.emit(Event::DuplexTurnStarted { run_id: req.run_id.clone(), turn_index: index }).await;

            let (input, resolved_persona) = match self.build_turn_input(req, turn, &state, preferred_sample_rate).await {
                Ok(v) => v,
                Err(e) => {
                    let _ = session.close().await;
                    return Err(AttemptFailure {
                        turn_index: index,
                        error: e,
                        recoverable: false,
                        is_session_ended: false,
                        turns_completed,
                    });
                }
            };
            if req.self_play_roles.iter().any(|r| r.role == turn.role) {
                self_play = true;
                persona_id = persona_id.or(resolved_persona);
            }

            let user_text = match &input {
                TurnInput::Audio(_) => turn.content.clone(),
                TurnInput::Text(text) => text.clone(),
            };
            state.messages.push(Message::text(CoreRole::User, user_text));
            if let Err(e) = self.state_store.save(&state).await {
                let _ = session.close().await;
                return Err(AttemptFailure {
                    turn_index: index,
                    error: e.to_string(),
                    recoverable: false,
                    is_session_ended: false,
                    turns_completed,
                });
            }

            let send_result = match input {
                TurnInput::Audio(bytes) => session.send(DuplexInput::Audio(bytes)).await,
                TurnInput::Text(text) => session.send(DuplexInput::Text(text)).await,
            };
            if let Err(e) = send_result {
                let _ = session.close().await;
                return Err(self.classify_provider_error(index, &e, turns_completed));
            }

            if let Err(failure) = self.drain_turn(&mut *session, req, &mut state, index, turns_completed).await {
                let _ = session.close().await;
                return Err(failure);
            }
            turns_completed += 1;

            if let Err(e) = self.evaluate_turn_assertions(conversation_id, &state, &turn.assertions).await {
                let _ = session.close().await;
                return Err(AttemptFailure {
                    turn_index: index,
                    error: e.to_string(),
                    recoverable: false,
                    is_session_ended: false,
                    turns_completed,
                });
            }

            self.emit(Event::DuplexTurnCompleted { run_id: req.run_id.clone(), turn_index: index }).await;

            if index + 1 < req.scenario.turns.len() {
                let delay_ms = if self_play { 1000 } else { 500 };
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        let _ = session.close().await;
        Ok(AttemptOutcome { turns_completed, self_play, persona_id })
    }
}

/// One turn's resolved input, ready to push into an open session.
enum TurnInput {
    /// PCM16 mono bytes, already resampled to the session's rate.
    Audio(Vec<u8>),
    /// Text input, for text-only duplex scenarios or self-play turns
    /// (no audio self-play generator is wired in this workspace).
    Text(String),
}

/// What one attempt at driving the whole scenario across a session
/// produced, before the retry loop decides the run's final outcome.
struct AttemptOutcome {
    turns_completed: u32,
    self_play: bool,
    persona_id: Option<PersonaId>,
}

/// Why one attempt failed, carrying enough to classify and retry it.
struct AttemptFailure {
    turn_index: usize,
    error: String,
    recoverable: bool,
    is_session_ended: bool,
    turns_completed: u32,
}

#[async_trait]
impl crate::ConversationExecutor for DuplexConversationExecutor {
    async fn execute_conversation(&self, req: ConversationRequest) -> Result<ConversationResult, ExecutorError> {
        let conversation_id = ConversationId::new(req.run_id.as_str());
        let Some(duplex) = req.scenario.duplex.clone() else {
            return Err(ExecutorError::NotConfigured("scenario has no duplex configuration".into()));
        };
        let resilience: DuplexResilience = duplex.resilience;

        self.emit(Event::DuplexSessionStarted { run_id: req.run_id.clone() }).await;

        let preferred_sample_rate = req
            .provider
            .streaming_capabilities()
            .and_then(|c| c.audio)
            .map(|a| a.preferred_sample_rate)
            .unwrap_or(16_000);

        let max_attempts = resilience.max_retries + 1;
        let mut outcome: Option<AttemptOutcome> = None;
        let mut last_error = String::new();
        let mut last_turns_completed = 0u32;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                self.state_store.delete(&conversation_id).await?;
                sleep(Duration::from_millis(resilience.retry_delay_ms)).await;
            }

            match self.run_attempt(&req, &conversation_id, preferred_sample_rate).await {
                Ok(o) => {
                    outcome = Some(o);
                    break;
                }
                Err(failure) => {
                    last_error = failure.error.clone();
                    last_turns_completed = failure.turns_completed;
                    self.emit(Event::DuplexTurnFailed {
                        run_id: req.run_id.clone(),
                        turn_index: failure.turn_index,
                        error: failure.error.clone(),
                    })
                    .await;

                    let is_last_turn = failure.turn_index + 1 == req.scenario.turns.len();
                    if is_last_turn && resilience.ignore_last_turn_session_end && failure.is_session_ended {
                        outcome = Some(AttemptOutcome {
                            turns_completed: failure.turns_completed,
                            self_play: false,
                            persona_id: None,
                        });
                        break;
                    }

                    if !failure.recoverable {
                        warn!(error = %failure.error, "duplex session failed with a non-recoverable error");
                        break;
                    }

                    if failure.is_session_ended && failure.turns_completed >= resilience.partial_success_min_turns {
                        outcome = Some(AttemptOutcome {
                            turns_completed: failure.turns_completed,
                            self_play: false,
                            persona_id: None,
                        });
                        break;
                    }

                    if attempt + 1 >= max_attempts {
                        if failure.turns_completed >= resilience.partial_success_min_turns {
                            outcome = Some(AttemptOutcome {
                                turns_completed: failure.turns_completed,
                                self_play: false,
                                persona_id: None,
                            });
                        }
                        break;
                    }
                    // Retries remain and the error is recoverable: loop
                    // around, clearing state and rebuilding the session.
                }
            }
        }

        let final_state = self.load_state_or_empty(&conversation_id).await?;
        let total_cost = final_state.total_cost();
        let mut tool_stats = ToolStats::default();
        tool_stats.record_turn(&final_state.messages);

        let (turns_completed, self_play, persona_id, failed, error) = match outcome {
            Some(o) => (o.turns_completed, o.self_play, o.persona_id, false, String::new()),
            None => {
                let error = if last_error.is_empty() { "duplex session failed".to_string() } else { last_error };
                (last_turns_completed, false, None, true, error)
            }
        };

        let mut conversation_assertion_results = Vec::new();
        if !failed {
            let native = harness_eval::evaluate_conversation_assertions(
                self.validator_factory.as_ref(),
                &req.scenario.conversation_assertions,
                &final_state.messages,
            )
            .await;
            conversation_assertion_results.extend(native);

            if let Some(hook) = &req.eval_hook {
                let dual_written = hook.evaluate_conversation(&final_state.messages).await?;
                conversation_assertion_results.extend(dual_written);
            }
        }

        if failed {
            self.emit(Event::DuplexSessionError { run_id: req.run_id.clone(), error: error.clone() }).await;
        } else {
            self.emit(Event::DuplexSessionCompleted { run_id: req.run_id.clone() }).await;
        }

        Ok(ConversationResult {
            messages: final_state.messages,
            total_cost,
            tool_stats,
            turns_completed,
            self_play,
            persona_id,
            conversation_assertion_results,
            failed,
            error,
        })
    }
}

/// Render a conversation's messages from a self-play persona's point of
/// view, the same perspective flip `default_executor::persona_view` does
/// — the persona's own past lines come back as `Role::User` in the saved
/// state, so they read as `Assistant` from its own point of view.
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

use harness_turn_types::types::{ProviderMessage, Role as WireRole};

/// Decode `ScenarioTurn.audio.pcm16_base64` into raw bytes.
fn decode_base64(input: &str) -> Result<Vec<u8>, String> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.decode(input).map_err(|e| e.to_string())
}

/// Little-endian mono PCM16 bytes to `[-1.0, 1.0]`-normalized `f32` samples.
fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}

/// Inverse of [`pcm16_bytes_to_f32`].
fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let v = (clamped * 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConversationExecutor;
    use harness_context::TemplateRegistry;
    use harness_core::id::{Region, RunId};
    use harness_core::scenario::{DuplexConfig, DuplexResilience, Scenario};
    use harness_eval::BuiltinValidatorFactory;
    use harness_provider_mock::MockProvider;
    use harness_state_memory::MemoryStore;
    use harness_turn_types::types::{StopReason, TokenUsage};

    fn prompts() -> TemplateRegistry {
        let mut r = TemplateRegistry::new();
        r.register("assist", "You are a voice assistant.").unwrap();
        r
    }

    fn scenario(turns: Vec<ScenarioTurn>, resilience: DuplexResilience) -> Arc<Scenario> {
        Arc::new(Scenario {
            id: harness_core::id::ScenarioId::new("s"),
            task_type: "assist".into(),
            providers: Vec::new(),
            turns,
            streaming: false,
            duplex: Some(DuplexConfig { turn_detection: None, resilience, timeout: None }),
            eval: None,
            conversation_assertions: Vec::new(),
        })
    }

    fn user_turn(content: &str) -> ScenarioTurn {
        ScenarioTurn { role: "user".into(), content: content.into(), persona: None, assertions: Vec::new(), audio: None }
    }

    fn end_of_stream(text: &str) -> StreamChunk {
        StreamChunk::EndOfStream {
            content: text.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage { input_tokens: 1, output_tokens: 1, cached_tokens: 0 },
            finish_reason: StopReason::EndTurn,
        }
    }

    fn executor(store: Arc<MemoryStore>) -> DuplexConversationExecutor {
        let tools = Arc::new(harness_tool::ToolRegistry::new());
        let validators: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        DuplexConversationExecutor::new(store, tools, Arc::new(prompts()), validators)
    }

    #[tokio::test]
    async fn happy_path_one_turn() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(store);

        let mut provider = MockProvider::new("p", "model");
        provider.push_duplex_session(vec![end_of_stream("hello there")]);
        let provider: Arc<dyn harness_turn_types::Provider> = Arc::new(provider);

        let req = ConversationRequest {
            run_id: RunId::new("d1"),
            scenario: scenario(vec![user_turn("hi")], DuplexResilience::default()),
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        };

        let result = exec.execute_conversation(req).await.unwrap();
        assert!(!result.failed);
        assert_eq!(result.turns_completed, 1);
        assert!(result.messages.iter().any(|m| m.content == "hello there"));
    }

    #[tokio::test]
    async fn empty_response_retries_and_then_succeeds() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(store);

        let mut provider = MockProvider::new("p", "model");
        provider.push_duplex_session(vec![end_of_stream("")]);
        provider.push_duplex_session(vec![end_of_stream("second try")]);
        let provider: Arc<dyn harness_turn_types::Provider> = Arc::new(provider);

        let mut resilience = DuplexResilience::default();
        resilience.max_retries = 1;

        let req = ConversationRequest {
            run_id: RunId::new("d2"),
            scenario: scenario(vec![user_turn("hi")], resilience),
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        };

        let result = exec.execute_conversation(req).await.unwrap();
        assert!(!result.failed);
        assert_eq!(result.turns_completed, 1);
        let assistant_count = result.messages.iter().filter(|m| m.role == CoreRole::Assistant).count();
        assert_eq!(assistant_count, 1);
        assert_eq!(result.messages.last().unwrap().content, "second try");
    }

    #[tokio::test]
    async fn non_recoverable_error_does_not_retry() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(store);

        let mut provider = MockProvider::new("p", "model");
        provider.push_duplex_session(vec![StreamChunk::Error { message: "auth failed: bad key".into() }]);
        let provider: Arc<dyn harness_turn_types::Provider> = Arc::new(provider);

        let mut resilience = DuplexResilience::default();
        resilience.max_retries = 3;

        let req = ConversationRequest {
            run_id: RunId::new("d3"),
            scenario: scenario(vec![user_turn("hi")], resilience),
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        };

        let result = exec.execute_conversation(req).await.unwrap();
        assert!(result.failed);
        assert_eq!(result.turns_completed, 0);
    }

    #[tokio::test]
    async fn partial_success_on_session_ended_after_min_turns() {
        let store = Arc::new(MemoryStore::new());
        let exec = executor(store);

        let mut provider = MockProvider::new("p", "model");
        provider.push_duplex_session(vec![
            end_of_stream("first"),
            StreamChunk::Error { message: "session ended".into() },
        ]);
        let provider: Arc<dyn harness_turn_types::Provider> = Arc::new(provider);

        let mut resilience = DuplexResilience::default();
        resilience.partial_success_min_turns = 1;

        let req = ConversationRequest {
            run_id: RunId::new("d4"),
            scenario: scenario(vec![user_turn("hi"), user_turn("again")], resilience),
            provider,
            region: Region::default(),
            self_play_roles: Vec::new(),
            eval_hook: None,
        };

        let result = exec.execute_conversation(req).await.unwrap();
        assert!(!result.failed);
        assert_eq!(result.turns_completed, 1);
    }

    #[test]
    fn pcm16_roundtrips_through_f32() {
        let samples = vec![0.5f32, -0.5, 0.0];
        let bytes = f32_to_pcm16_bytes(&samples);
        let back = pcm16_bytes_to_f32(&bytes);
        for (a, b) in samples.iter().zip(back.iter()) {
            assert!((a - b).abs() < 0.01);
        }
    }

    #[test]
    fn base64_decodes_known_value() {
        let decoded = decode_base64("aGVsbG8=").unwrap();
        assert_eq!(decoded, b"hello");
    }

}
