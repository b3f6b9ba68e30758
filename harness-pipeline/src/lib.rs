#![deny(missing_docs)]
//! # harness-pipeline — the per-turn dataflow
//!
//! [`TurnPipeline`] drives one scripted or self-play turn through a
//! fixed stage sequence: prompt assembly, template expansion, provider
//! invocation, the tool-call loop, media externalization, and the
//! state-store save. [`audio`] and [`media`] hold the duplex-only and
//! media-externalization pieces that don't fit naturally as stages on
//! the main struct.
//!
//! A single stateful driver type generalized over a `Provider`, running
//! a generate-then-maybe-call-tools loop with hook dispatch around each
//! provider and tool call, with object-safe collaborators injected by
//! `Arc`.
//!
//! This crate models the pipeline as a sequence of async methods on one
//! struct rather than a literal graph of channel-connected transformer
//! trait objects. Streaming could be modeled as a DAG of transformers,
//! but for the concrete stage list named here — a short, fixed, linear
//! sequence with one branch point (the tool-call loop) — a generic DAG
//! runtime would add a layer of indirection with no caller that needs
//! it. This is a deliberate scope decision, recorded in this workspace's
//! design notes.

pub mod audio;
pub mod media;

use harness_core::assertion::{evaluate_all, AssertionInvocation, TurnAssertionSummary};
use harness_core::assertion::ValidatorFactory;
use harness_core::conversation::{ConversationState, Message, Role, ToolResult};
use harness_core::error::StateError;
use harness_core::hook::{Hook, HookAction, HookContext, HookPoint};
use harness_core::id::{ConversationId, Region};
use harness_core::part::{Part, PartSource};
use harness_core::scenario::Assertion;
use harness_core::state::ArenaStateStore;
use harness_context::{render_template, ContextError, PromptRegistry};
use harness_tool::ToolRegistry;
use harness_turn_types::convert::{messages_to_provider_messages, response_parts_to_message_fields};
use harness_turn_types::{
    ContentPart, ImageSource, Provider, ProviderError, ProviderRequest, StreamChunk, ToolSchema,
};
use media::MediaExternalizer;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Hard cap on tool-call round trips within a single turn.
///
/// Bounds a model/tool back-and-forth that could otherwise run forever
/// on a misbehaving model. 25 matches the default iteration cap used
/// elsewhere in this workspace for the same shape of problem.
pub const MAX_TOOL_ITERATIONS: usize = 25;

/// Errors produced while driving one turn through the pipeline.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Prompt template resolution failed.
    #[error("prompt assembly failed: {0}")]
    PromptAssembly(#[from] ContextError),

    /// The provider call itself failed.
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    /// Reading or writing conversation/run state failed.
    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// A hook halted the turn.
    #[error("halted by hook: {0}")]
    Halted(String),

    /// The tool-call loop exceeded [`MAX_TOOL_ITERATIONS`] without the
    /// model producing a tool-call-free response.
    #[error("tool-call loop exceeded {0} iterations without converging")]
    ToolLoopExceeded(usize),
}

/// Everything [`TurnPipeline::run_turn`] needs to drive one turn.
pub struct TurnRequest<'a> {
    /// Conversation this turn belongs to. Doubles as the run id for
    /// Arena executions, per `RunMetadata::started`.
    pub conversation_id: ConversationId,
    /// Selects which prompt template `PromptAssemblyStage` resolves.
    pub task_type: &'a str,
    /// The provider driving this turn.
    pub provider: Arc<dyn Provider>,
    /// Deployment region, for region-scoped prompt overrides.
    pub region: Region,
    /// Verbatim or templated user content for this turn.
    pub user_content: String,
    /// Template variables merged over the registry's base vars (region,
    /// cross-turn carry-forward vars from `ScenarioContext`, etc).
    pub template_vars: HashMap<String, Value>,
    /// Assertions validating this turn's assistant response.
    pub assertions: &'a [Assertion],
}

/// The result of driving one turn through the pipeline.
pub struct TurnOutcome {
    /// The final assistant message, after assertions were attached to
    /// its `meta`.
    pub assistant_message: Message,
    /// Every message appended to the conversation this turn — system
    /// prompt (first turn only), user message, assistant message(s), and
    /// any tool messages from the tool-call loop, in save order.
    pub appended_messages: Vec<Message>,
    /// Turn-local assertion results, if any were configured.
    pub assertions: Option<TurnAssertionSummary>,
}

/// Drives scripted and self-play turns through prompt assembly, template
/// expansion, provider invocation, the tool-call loop, media
/// externalization, and the state-store save.
///
/// Duplex turns don't go through this type — `DuplexConversationExecutor`
/// (in `harness-executor`) talks to `Provider::open_duplex_session`
/// directly, since a duplex session has no discrete provider-call
/// boundary to stage around. [`audio::VoiceActivityDetector`] and
/// [`audio::resample`] are the pieces duplex mode borrows from this
/// crate.
pub struct TurnPipeline {
    tool_registry: Arc<ToolRegistry>,
    validator_factory: Arc<dyn ValidatorFactory>,
    state_store: Arc<dyn ArenaStateStore>,
    hooks: Vec<Arc<dyn Hook>>,
    media_externalizer: Option<Arc<dyn MediaExternalizer>>,
}

impl TurnPipeline {
    /// Build a pipeline with no hooks and no media externalizer
    /// configured. Use [`Self::with_hook`] / [`Self::with_media_externalizer`]
    /// to add them.
    pub fn new(
        tool_registry: Arc<ToolRegistry>,
        validator_factory: Arc<dyn ValidatorFactory>,
        state_store: Arc<dyn ArenaStateStore>,
    ) -> Self {
        Self {
            tool_registry,
            validator_factory,
            state_store,
            hooks: Vec::new(),
            media_externalizer: None,
        }
    }

    /// Register a hook, fired at the points it declares via
    /// [`Hook::points`].
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Externalize response media parts above the configured threshold
    /// instead of leaving them inline in conversation history.
    #[must_use]
    pub fn with_media_externalizer(mut self, externalizer: Arc<dyn MediaExternalizer>) -> Self {
        self.media_externalizer = Some(externalizer);
        self
    }

    /// Drive one turn to completion: assemble the prompt, expand
    /// templates, call the provider, run the tool-call loop until the
    /// model stops requesting tools, externalize any large media parts,
    /// save the updated conversation, and evaluate this turn's
    /// assertions.
    pub async fn run_turn(
        &self,
        prompt_registry: &dyn PromptRegistry,
        req: TurnRequest<'_>,
    ) -> Result<TurnOutcome, PipelineError> {
        let mut state = match self.state_store.load(&req.conversation_id).await {
            Ok(state) => state,
            Err(StateError::NotFound(_)) => ConversationState::new(req.conversation_id.clone()),
            Err(e) => return Err(e.into()),
        };
        let is_new_conversation = state.messages.is_empty();
        let base_len = state.messages.len();

        let assembled = prompt_registry
            .load_with_vars(req.task_type, req.template_vars.clone(), &req.region)
            .await?;
        let rendered_user = render_template(&req.user_content, &assembled.vars);

        let mut working: Vec<Message> = std::mem::take(&mut state.messages);
        if is_new_conversation {
            working.push(Message::text(Role::System, assembled.system_prompt.clone()));
        }
        working.push(Message::text(Role::User, rendered_user));

        let tool_schemas = tool_schemas(&self.tool_registry);
        let mut turns_completed = 0u32;
        let mut iterations = 0usize;

        loop {
            iterations += 1;
            if iterations > MAX_TOOL_ITERATIONS {
                return Err(PipelineError::ToolLoopExceeded(MAX_TOOL_ITERATIONS));
            }

            let pre_action = self
                .dispatch(HookPoint::PreProviderCall, HookContext::new(HookPoint::PreProviderCall))
                .await;
            if let HookAction::Halt { reason } = pre_action {
                return Err(PipelineError::Halted(reason));
            }

            let request = ProviderRequest {
                model: Some(req.provider.model().to_string()),
                messages: messages_to_provider_messages(&working),
                tools: tool_schemas.clone(),
                max_tokens: None,
                temperature: None,
                top_p: None,
                seed: None,
                system: Some(assembled.system_prompt.clone()),
                extra: Value::Null,
            };
            let response = req.provider.predict(request).await?;
            let (text, tool_calls) = response_parts_to_message_fields(&response.content);
            let cost = req.provider.calculate_cost(
                response.usage.input_tokens,
                response.usage.output_tokens,
                response.usage.cached_tokens,
            );

            let mut post_ctx = HookContext::new(HookPoint::PostProviderCall);
            post_ctx.model_output = Some(text.clone());
            post_ctx.tokens_used = response.usage.input_tokens + response.usage.output_tokens;
            post_ctx.cost = cost.total_cost;
            post_ctx.turns_completed = turns_completed;
            let post_action = self.dispatch(HookPoint::PostProviderCall, post_ctx).await;
            if let HookAction::Halt { reason } = post_action {
                return Err(PipelineError::Halted(reason));
            }

            let mut assistant_message = Message {
                role: Role::Assistant,
                content: text,
                parts: extract_image_parts(&response.content),
                tool_calls: tool_calls.clone(),
                tool_result: None,
                cost: Some(cost),
                meta: HashMap::new(),
            };
            turns_completed += 1;

            if tool_calls.is_empty() {
                self.externalize_media(&mut assistant_message).await?;
                working.push(assistant_message);
                break;
            }

            working.push(assistant_message);
            for call in &tool_calls {
                let mut pre_tool = HookContext::new(HookPoint::PreToolCall);
                pre_tool.tool_name = Some(call.name.clone());
                pre_tool.tool_input = Some(call.args.clone());
                let action = self.dispatch(HookPoint::PreToolCall, pre_tool).await;

                let mut result = match action {
                    HookAction::Halt { reason } => return Err(PipelineError::Halted(reason)),
                    HookAction::SkipTool { reason } => ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        content: String::new(),
                        error: Some(format!("skipped by policy: {reason}")),
                        latency: harness_core::DurationMs::ZERO,
                    },
                    HookAction::ModifyToolInput { new_input } => {
                        let mut modified = call.clone();
                        modified.args = new_input;
                        self.tool_registry.execute(&modified).await
                    }
                    _ => self.tool_registry.execute(call).await,
                };

                let mut post_tool = HookContext::new(HookPoint::PostToolCall);
                post_tool.tool_name = Some(call.name.clone());
                post_tool.tool_result = Some(result.content.clone());
                match self.dispatch(HookPoint::PostToolCall, post_tool).await {
                    HookAction::Halt { reason } => return Err(PipelineError::Halted(reason)),
                    HookAction::ModifyToolOutput { new_output } => result.content = new_output,
                    _ => {}
                }

                working.push(Message::tool_result(result));
            }
        }

        state.messages = working;
        self.state_store.save(&state).await?;

        let assertions = self.evaluate_assertions(&state, req.assertions).await?;

        let assistant_message = state
            .messages
            .last()
            .expect("tool loop always appends an assistant message before breaking")
            .clone();
        let appended_messages = state.messages[base_len..].to_vec();

        Ok(TurnOutcome {
            assistant_message,
            appended_messages,
            assertions,
        })
    }

    /// Drive one turn the same way [`Self::run_turn`] does, but forward the
    /// provider's token-level deltas to `chunks` as they arrive instead of
    /// only returning the assembled result.
    ///
    /// Only the first provider call of the turn streams: once the model
    /// requests tool calls, the remaining round trips inside the tool-call
    /// loop fall back to [`Provider::predict`] — streaming only needs to
    /// cover deltas arriving for the turn's initial response, not every
    /// tool round trip re-streaming. A provider that
    /// doesn't advertise `supports_streaming` gets its single `predict`
    /// response forwarded as one synthetic `Delta` plus the terminal
    /// `EndOfStream`, so callers can treat every turn uniformly as a stream.
    pub async fn run_turn_stream(
        &self,
        prompt_registry: &dyn PromptRegistry,
        req: TurnRequest<'_>,
        chunks: mpsc::Sender<StreamChunk>,
    ) -> Result<TurnOutcome, PipelineError> {
        let mut state = match self.state_store.load(&req.conversation_id).await {
            Ok(state) => state,
            Err(StateError::NotFound(_)) => ConversationState::new(req.conversation_id.clone()),
            Err(e) => return Err(e.into()),
        };
        let is_new_conversation = state.messages.is_empty();
        let base_len = state.messages.len();

        let assembled = prompt_registry
            .load_with_vars(req.task_type, req.template_vars.clone(), &req.region)
            .await?;
        let rendered_user = render_template(&req.user_content, &assembled.vars);

        let mut working: Vec<Message> = std::mem::take(&mut state.messages);
        if is_new_conversation {
            working.push(Message::text(Role::System, assembled.system_prompt.clone()));
        }
        working.push(Message::text(Role::User, rendered_user));

        let tool_schemas = tool_schemas(&self.tool_registry);
        let mut turns_completed = 0u32;
        let mut iterations = 0usize;
        let mut streamed_first_call = false;

        loop {
            iterations += 1;
            if iterations > MAX_TOOL_ITERATIONS {
                return Err(PipelineError::ToolLoopExceeded(MAX_TOOL_ITERATIONS));
            }

            let pre_action = self
                .dispatch(HookPoint::PreProviderCall, HookContext::new(HookPoint::PreProviderCall))
                .await;
            if let HookAction::Halt { reason } = pre_action {
                return Err(PipelineError::Halted(reason));
            }

            let request = ProviderRequest {
                model: Some(req.provider.model().to_string()),
                messages: messages_to_provider_messages(&working),
                tools: tool_schemas.clone(),
                max_tokens: None,
                temperature: None,
                top_p: None,
                seed: None,
                system: Some(assembled.system_prompt.clone()),
                extra: Value::Null,
            };

            let (text, tool_call_parts, usage) = if !streamed_first_call && req.provider.supports_streaming() {
                streamed_first_call = true;
                let mut rx = req.provider.predict_stream(request).await?;
                let mut text = String::new();
                let mut tool_call_parts = Vec::new();
                let mut usage = harness_turn_types::TokenUsage::default();
                while let Some(chunk) = rx.recv().await {
                    let forward = chunk.clone();
                    match chunk {
                        StreamChunk::EndOfStream {
                            content,
                            tool_calls,
                            usage: final_usage,
                            ..
                        } => {
                            text = content;
                            tool_call_parts = tool_calls;
                            usage = final_usage;
                        }
                        StreamChunk::Error { message } => {
                            let _ = chunks.send(forward).await;
                            return Err(PipelineError::Provider(ProviderError::Transport(message)));
                        }
                        _ => {}
                    }
                    if chunks.send(forward).await.is_err() {
                        break;
                    }
                }
                (text, tool_call_parts, usage)
            } else {
                let response = req.provider.predict(request).await?;
                let _ = chunks
                    .send(StreamChunk::Delta { text: response.text() })
                    .await;
                let _ = chunks
                    .send(StreamChunk::EndOfStream {
                        content: response.text(),
                        tool_calls: response.tool_calls().into_iter().cloned().collect(),
                        usage: response.usage,
                        finish_reason: response.stop_reason.clone(),
                    })
                    .await;
                (response.text(), response.tool_calls().into_iter().cloned().collect(), response.usage)
            };

            let (_, tool_calls) = response_parts_to_message_fields(&tool_call_parts);
            let cost = req.provider.calculate_cost(usage.input_tokens, usage.output_tokens, usage.cached_tokens);

            let mut post_ctx = HookContext::new(HookPoint::PostProviderCall);
            post_ctx.model_output = Some(text.clone());
            post_ctx.tokens_used = usage.input_tokens + usage.output_tokens;
            post_ctx.cost = cost.total_cost;
            post_ctx.turns_completed = turns_completed;
            let post_action = self.dispatch(HookPoint::PostProviderCall, post_ctx).await;
            if let HookAction::Halt { reason } = post_action {
                return Err(PipelineError::Halted(reason));
            }

            let mut assistant_message = Message {
                role: Role::Assistant,
                content: text,
                parts: Vec::new(),
                tool_calls: tool_calls.clone(),
                tool_result: None,
                cost: Some(cost),
                meta: HashMap::new(),
            };
            turns_completed += 1;

            if tool_calls.is_empty() {
                self.externalize_media(&mut assistant_message).await?;
                working.push(assistant_message);
                break;
            }

            working.push(assistant_message);
            for call in &tool_calls {
                let mut pre_tool = HookContext::new(HookPoint::PreToolCall);
                pre_tool.tool_name = Some(call.name.clone());
                pre_tool.tool_input = Some(call.args.clone());
                let action = self.dispatch(HookPoint::PreToolCall, pre_tool).await;

                let mut result = match action {
                    HookAction::Halt { reason } => return Err(PipelineError::Halted(reason)),
                    HookAction::SkipTool { reason } => ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        content: String::new(),
                        error: Some(format!("skipped by policy: {reason}")),
                        latency: harness_core::DurationMs::ZERO,
                    },
                    HookAction::ModifyToolInput { new_input } => {
                        let mut modified = call.clone();
                        modified.args = new_input;
                        self.tool_registry.execute(&modified).await
                    }
                    _ => self.tool_registry.execute(call).await,
                };

                let mut post_tool = HookContext::new(HookPoint::PostToolCall);
                post_tool.tool_name = Some(call.name.clone());
                post_tool.tool_result = Some(result.content.clone());
                match self.dispatch(HookPoint::PostToolCall, post_tool).await {
                    HookAction::Halt { reason } => return Err(PipelineError::Halted(reason)),
                    HookAction::ModifyToolOutput { new_output } => result.content = new_output,
                    _ => {}
                }

                working.push(Message::tool_result(result));
            }
        }

        state.messages = working;
        self.state_store.save(&state).await?;

        let assertions = self.evaluate_assertions(&state, req.assertions).await?;

        let assistant_message = state
            .messages
            .last()
            .expect("tool loop always appends an assistant message before breaking")
            .clone();
        let appended_messages = state.messages[base_len..].to_vec();

        Ok(TurnOutcome {
            assistant_message,
            appended_messages,
            assertions,
        })
    }

    async fn evaluate_assertions(
        &self,
        state: &ConversationState,
        assertions: &[Assertion],
    ) -> Result<Option<TurnAssertionSummary>, PipelineError> {
        if assertions.is_empty() {
            return Ok(None);
        }
        let Some(index) = state.last_assistant_index() else {
            return Ok(None);
        };
        let assistant_response = state.messages[index].content.clone();
        let messages_json = serde_json::to_value(&state.messages).unwrap_or(Value::Null);

        let invocations = assertions
            .iter()
            .map(|a| {
                let mut params = a.params.clone();
                params.insert("assistant_response".into(), Value::String(assistant_response.clone()));
                params.insert("messages".into(), messages_json.clone());
                AssertionInvocation {
                    assertion_type: &a.assertion_type,
                    params: Value::Object(params.into_iter().collect()),
                }
            })
            .collect();

        let results = evaluate_all(self.validator_factory.as_ref(), invocations).await;
        let summary = TurnAssertionSummary::from_results(results);

        let mut updated = state.messages[index].clone();
        updated
            .meta
            .insert("assertions".into(), serde_json::to_value(&summary).unwrap_or(Value::Null));
        self.state_store
            .update_last_assistant_message(&state.id, updated)
            .await?;

        Ok(Some(summary))
    }

    async fn externalize_media(&self, message: &mut Message) -> Result<(), PipelineError> {
        let Some(externalizer) = &self.media_externalizer else {
            return Ok(());
        };
        for part in &mut message.parts {
            let should = part.source().is_some() && part.inline_byte_len() > media::DEFAULT_EXTERNALIZE_THRESHOLD_BYTES;
            if !should {
                continue;
            }
            match externalizer.externalize(part).await {
                Ok(path) => part.externalize_to(path),
                Err(e) => tracing::warn!(error = %e, "media externalization failed, leaving part inline"),
            }
        }
        Ok(())
    }

    async fn dispatch(&self, point: HookPoint, ctx: HookContext) -> HookAction {
        for hook in &self.hooks {
            if !hook.points().contains(&point) {
                continue;
            }
            match hook.on_event(&ctx).await {
                Ok(HookAction::Continue) => continue,
                Ok(action) => return action,
                Err(e) => {
                    tracing::warn!(error = %e, ?point, "hook errored, treating as continue");
                }
            }
        }
        HookAction::Continue
    }
}

fn tool_schemas(registry: &ToolRegistry) -> Vec<ToolSchema> {
    registry
        .get_tools()
        .into_iter()
        .map(|d| ToolSchema {
            name: d.name,
            description: d.description,
            input_schema: d.input_schema,
        })
        .collect()
}

/// Pull image content out of a provider response into `harness_core`
/// parts, ready for [`TurnPipeline::externalize_media`] to inspect.
/// Audio/video never arrive this way — duplex sessions carry those
/// directly, bypassing `ProviderResponse` entirely.
fn extract_image_parts(content: &[ContentPart]) -> Vec<Part> {
    content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Image { source, media_type } => Some(Part::Image {
                media_type: media_type.clone(),
                source: match source {
                    ImageSource::Base64 { data } => PartSource::Inline { data: data.clone() },
                    ImageSource::Url { url } => PartSource::File { path: url.clone() },
                },
                width: None,
                height: None,
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use harness_context::TemplateRegistry;
    use harness_core::conversation::ToolCall;
    use harness_eval::BuiltinValidatorFactory;
    use harness_provider_mock::MockProvider;
    use harness_state_memory::MemoryStore;
    use harness_tool::{ToolDescriptor, ToolDyn, ToolError, ToolMode};
    use harness_turn_types::{ProviderResponse, StopReason, TokenUsage};
    use serde_json::json;
    use std::future::Future;
    use std::pin::Pin;

    fn registry_with_prompt() -> TemplateRegistry {
        let mut registry = TemplateRegistry::new();
        registry.register("assist", "You are helpful.").unwrap();
        registry
    }

    fn pipeline(store: Arc<MemoryStore>, tools: Arc<ToolRegistry>) -> TurnPipeline {
        TurnPipeline::new(tools, Arc::new(BuiltinValidatorFactory::new()), store)
    }

    fn request<'a>(
        conversation_id: &str,
        provider: Arc<dyn Provider>,
        assertions: &'a [Assertion],
    ) -> TurnRequest<'a> {
        TurnRequest {
            conversation_id: ConversationId::new(conversation_id),
            task_type: "assist",
            provider,
            region: Region::default(),
            user_content: "hello".into(),
            template_vars: HashMap::new(),
            assertions,
        }
    }

    #[tokio::test]
    async fn first_turn_prepends_system_message() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let pipe = pipeline(store.clone(), tools);
        let prompts = registry_with_prompt();
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::echoing("m", "model", "hi there"));

        let outcome = pipe
            .run_turn(&prompts, request("c1", provider, &[]))
            .await
            .unwrap();

        assert_eq!(outcome.appended_messages[0].role, Role::System);
        assert_eq!(outcome.appended_messages[1].role, Role::User);
        assert_eq!(outcome.assistant_message.content, "hi there");
    }

    #[tokio::test]
    async fn second_turn_does_not_duplicate_the_system_message() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let prompts = registry_with_prompt();

        let mut provider1 = MockProvider::echoing("m", "model", "first");
        provider1.push_response(ProviderResponse {
            content: vec![ContentPart::Text { text: "second".into() }],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage { input_tokens: 1, output_tokens: 1, cached_tokens: 0 },
            model: "model".into(),
            cost_usd: None,
            raw: None,
        });
        let provider: Arc<dyn Provider> = Arc::new(provider1);

        let pipe = pipeline(store.clone(), tools);
        pipe.run_turn(&prompts, request("c2", provider.clone(), &[])).await.unwrap();
        let outcome = pipe.run_turn(&prompts, request("c2", provider, &[])).await.unwrap();

        assert!(outcome.appended_messages.iter().all(|m| m.role != Role::System));
        let state = store.load(&ConversationId::new("c2")).await.unwrap();
        assert_eq!(state.messages.iter().filter(|m| m.role == Role::System).count(), 1);
    }

    struct EchoArgsTool;
    impl ToolDyn for EchoArgsTool {
        fn descriptor(&self) -> &ToolDescriptor {
            static D: std::sync::OnceLock<ToolDescriptor> = std::sync::OnceLock::new();
            D.get_or_init(|| ToolDescriptor {
                name: "echo_args".into(),
                description: "echoes its input".into(),
                input_schema: json!({"type": "object"}),
                output_schema: None,
                mode: ToolMode::Local,
            })
        }
        fn call(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
            Box::pin(async move { Ok(input) })
        }
    }

    #[tokio::test]
    async fn tool_call_loop_runs_until_a_tool_free_response() {
        let store = Arc::new(MemoryStore::new());
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoArgsTool));
        let tools = Arc::new(tools);
        let prompts = registry_with_prompt();

        let mut mock = MockProvider::new("m", "model");
        mock.push_response(ProviderResponse {
            content: vec![ContentPart::ToolUse {
                id: "call-1".into(),
                name: "echo_args".into(),
                input: json!({"x": 1}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage { input_tokens: 1, output_tokens: 1, cached_tokens: 0 },
            model: "model".into(),
            cost_usd: None,
            raw: None,
        });
        mock.push_response(ProviderResponse {
            content: vec![ContentPart::Text { text: "done".into() }],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage { input_tokens: 1, output_tokens: 1, cached_tokens: 0 },
            model: "model".into(),
            cost_usd: None,
            raw: None,
        });
        let provider: Arc<dyn Provider> = Arc::new(mock);

        let pipe = pipeline(store.clone(), tools);
        let outcome = pipe.run_turn(&prompts, request("c3", provider, &[])).await.unwrap();

        assert_eq!(outcome.assistant_message.content, "done");
        assert!(outcome
            .appended_messages
            .iter()
            .any(|m| m.role == Role::Tool && m.tool_result.as_ref().unwrap().content == "{\"x\":1}"));
    }

    #[tokio::test]
    async fn exceeding_the_iteration_cap_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoArgsTool));
        let tools = Arc::new(tools);
        let prompts = registry_with_prompt();

        let mut mock = MockProvider::new("m", "model");
        for i in 0..MAX_TOOL_ITERATIONS + 1 {
            mock.push_response(ProviderResponse {
                content: vec![ContentPart::ToolUse {
                    id: format!("call-{i}"),
                    name: "echo_args".into(),
                    input: json!({}),
                }],
                stop_reason: StopReason::ToolUse,
                usage: TokenUsage::default(),
                model: "model".into(),
                cost_usd: None,
                raw: None,
            });
        }
        let provider: Arc<dyn Provider> = Arc::new(mock);

        let pipe = pipeline(store.clone(), tools);
        let err = pipe.run_turn(&prompts, request("c4", provider, &[])).await.unwrap_err();
        assert!(matches!(err, PipelineError::ToolLoopExceeded(n) if n == MAX_TOOL_ITERATIONS));
    }

    #[tokio::test]
    async fn turn_assertions_are_evaluated_and_attached() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let prompts = registry_with_prompt();
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::echoing("m", "model", "the answer is 42"));

        let assertions = vec![Assertion {
            assertion_type: "contains".into(),
            params: HashMap::from([("value".to_string(), json!("42"))]),
        }];

        let pipe = pipeline(store.clone(), tools);
        let outcome = pipe
            .run_turn(&prompts, request("c5", provider, &assertions))
            .await
            .unwrap();

        let summary = outcome.assertions.expect("assertions configured");
        assert!(summary.all_passed);
        assert!(outcome.assistant_message.meta.contains_key("assertions"));
    }

    #[tokio::test]
    async fn unknown_assertion_type_does_not_abort_the_turn() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let prompts = registry_with_prompt();
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::echoing("m", "model", "hi"));

        let assertions = vec![
            Assertion { assertion_type: "bogus".into(), params: HashMap::new() },
            Assertion {
                assertion_type: "contains".into(),
                params: HashMap::from([("value".to_string(), json!("hi"))]),
            },
        ];

        let pipe = pipeline(store.clone(), tools);
        let outcome = pipe
            .run_turn(&prompts, request("c6", provider, &assertions))
            .await
            .unwrap();
        let summary = outcome.assertions.unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_passed);
    }

    struct HaltingHook;
    #[async_trait]
    impl Hook for HaltingHook {
        fn points(&self) -> &[HookPoint] {
            &[HookPoint::PostProviderCall]
        }
        async fn on_event(&self, _ctx: &HookContext) -> Result<HookAction, harness_core::error::HookError> {
            Ok(HookAction::Halt { reason: "policy violation".into() })
        }
    }

    #[tokio::test]
    async fn a_halting_hook_stops_the_turn() {
        let store = Arc::new(MemoryStore::new());
        let tools = Arc::new(ToolRegistry::new());
        let prompts = registry_with_prompt();
        let provider: Arc<dyn Provider> = Arc::new(MockProvider::echoing("m", "model", "hi"));

        let pipe = TurnPipeline::new(tools, Arc::new(BuiltinValidatorFactory::new()), store)
            .with_hook(Arc::new(HaltingHook));
        let err = pipe.run_turn(&prompts, request("c7", provider, &[])).await.unwrap_err();
        assert!(matches!(err, PipelineError::Halted(reason) if reason == "policy violation"));
    }

    fn _assert_tool_call_debug(c: &ToolCall) -> String {
        format!("{c:?}")
    }
}
