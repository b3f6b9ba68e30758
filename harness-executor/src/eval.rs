//! [`EvalConversationExecutor`] — scores a previously captured
//! conversation without calling a provider.
//!
//! Uses `harness-replay::RecordingAdapterRegistry` for the load
//! side and on `harness-pipeline::TurnPipeline`'s turn-assertion
//! attachment shape (merge `{assistant_response, messages}` into each
//! assertion's params, build a `TurnAssertionSummary`, write it to
//! `message.meta["assertions"]`) for the scoring side — reimplemented
//! here rather than shared, since this executor has no state store round
//! trip to call back into.

use crate::{ConversationRequest, ConversationResult, ExecutorError, ToolStats};
use async_trait::async_trait;
use harness_core::assertion::{AssertionInvocation, TurnAssertionSummary, ValidatorFactory};
use harness_core::conversation::{Message, Role};
use harness_core::recording::RecordingRef;
use harness_replay::RecordingAdapterRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Replays a recording through the assertion/eval layer instead of
/// driving a live conversation.
pub struct EvalConversationExecutor {
    adapters: Arc<RecordingAdapterRegistry>,
    validator_factory: Arc<dyn ValidatorFactory>,
}

impl EvalConversationExecutor {
    /// Build an executor around a registry of recording adapters and the
    /// validator factory used to score the replayed turns.
    pub fn new(adapters: Arc<RecordingAdapterRegistry>, validator_factory: Arc<dyn ValidatorFactory>) -> Self {
        Self { adapters, validator_factory }
    }

    fn failed(&self, error: impl Into<String>) -> ConversationResult {
        ConversationResult {
            messages: Vec::new(),
            total_cost: rust_decimal::Decimal::ZERO,
            tool_stats: ToolStats::default(),
            turns_completed: 0,
            self_play: false,
            persona_id: None,
            conversation_assertion_results: Vec::new(),
            failed: true,
            error: error.into(),
        }
    }

    async fn score_turn(&self, assertions: &[harness_core::scenario::Assertion], assistant_response: &str, messages: &[Message]) -> TurnAssertionSummary {
        if assertions.is_empty() {
            return TurnAssertionSummary::default();
        }
        let messages_json = serde_json::to_value(messages).unwrap_or(Value::Null);
        let invocations: Vec<AssertionInvocation<'_>> = assertions
            .iter()
            .map(|a| {
                let mut params = a.params.clone();
                params.insert("assistant_response".into(), Value::String(assistant_response.to_string()));
                params.insert("messages".into(), messages_json.clone());
                AssertionInvocation { assertion_type: &a.assertion_type, params: Value::Object(params.into_iter().collect()) }
            })
            .collect();
        let results = harness_core::assertion::evaluate_all(self.validator_factory.as_ref(), invocations).await;
        TurnAssertionSummary::from_results(results)
    }
}

#[async_trait]
impl crate::ConversationExecutor for EvalConversationExecutor {
    async fn execute_conversation(&self, req: ConversationRequest) -> Result<ConversationResult, ExecutorError> {
        let Some(eval_config) = &req.scenario.eval else {
            return Err(ExecutorError::NotConfigured("scenario has no eval configuration".into()));
        };
        if eval_config.recording.path.is_empty() {
            return Ok(self.failed("recording path is empty"));
        }

        let reference = RecordingRef {
            path: eval_config.recording.path.clone(),
            recording_type: eval_config.recording.recording_type.clone(),
        };
        let loaded = match self.adapters.load(&reference).await {
            Ok(loaded) => loaded,
            Err(e) => return Ok(self.failed(e.to_string())),
        };
        let mut messages = loaded.messages;

        let assistant_indices: Vec<usize> =
            messages.iter().enumerate().filter(|(_, m)| m.role == Role::Assistant).map(|(i, _)| i).collect();

        for (turn_index, turn) in req.scenario.turns.iter().enumerate() {
            let Some(&message_index) = assistant_indices.get(turn_index) else {
                break;
            };
            if turn.assertions.is_empty() {
                continue;
            }
            let assistant_response = messages[message_index].content.clone();
            let summary = self.score_turn(&turn.assertions, &assistant_response, &messages).await;
            messages[message_index]
                .meta
                .insert("assertions".to_string(), serde_json::to_value(&summary).unwrap_or(Value::Null));

            if let Some(hook) = &req.eval_hook {
                let dual_written = hook.evaluate_turn(&assistant_response, &messages).await?;
                messages[message_index]
                    .meta
                    .insert("eval_results".to_string(), serde_json::to_value(&dual_written).unwrap_or(Value::Null));
            }
        }

        let mut conversation_assertion_results = harness_eval::evaluate_conversation_assertions(
            self.validator_factory.as_ref(),
            &req.scenario.conversation_assertions,
            &messages,
        )
        .await;
        if let Some(hook) = &req.eval_hook {
            conversation_assertion_results.extend(hook.evaluate_conversation(&messages).await?);
        }

        let mut tool_stats = ToolStats::default();
        tool_stats.record_turn(&messages);
        let total_cost = messages.iter().filter_map(|m| m.cost.as_ref()).map(|c| c.total_cost).sum();

        Ok(ConversationResult {
            messages,
            total_cost,
            tool_stats,
            turns_completed: assistant_indices.len().min(req.scenario.turns.len()) as u32,
            self_play: false,
            persona_id: None,
            conversation_assertion_results,
            failed: false,
            error: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::conversation::Message;
    use harness_core::id::{Region, RunId, ScenarioId};
    use harness_core::recording::LoadedRecording;
    use harness_core::scenario::{Assertion, EvalConfig, Recording, Scenario, ScenarioTurn};
    use harness_eval::BuiltinValidatorFactory;
    use harness_provider_mock::MockProvider;
    use harness_replay::FsJsonRecordingAdapter;
    use harness_turn_types::Provider;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_recording(dir: &std::path::Path, name: &str, messages: Vec<Message>) -> String {
        let path = dir.join(name);
        let recording = LoadedRecording { messages, metadata: Default::default() };
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(serde_json::to_vec(&recording).unwrap().as_slice()).unwrap();
        path.to_string_lossy().to_string()
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
    async fn replays_a_recording_and_scores_its_turns() {
        let dir = tempdir();
        let messages = vec![
            Message::text(Role::User, "hi"),
            Message::text(Role::Assistant, "the answer is 42"),
        ];
        let path = write_recording(dir.path(), "rec.json", messages);

        let mut registry = RecordingAdapterRegistry::new();
        registry.register("fs_json", Arc::new(FsJsonRecordingAdapter));
        let validators: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        let executor = EvalConversationExecutor::new(Arc::new(registry), validators);

        let scenario = Arc::new(Scenario {
            id: ScenarioId::new("s"),
            task_type: "assist".into(),
            providers: Vec::new(),
            turns: vec![ScenarioTurn {
                role: "user".into(),
                content: String::new(),
                persona: None,
                assertions: vec![Assertion {
                    assertion_type: "contains".into(),
                    params: HashMap::from([("value".to_string(), serde_json::json!("42"))]),
                }],
                audio: None,
            }],
            streaming: false,
            duplex: None,
            eval: Some(EvalConfig { recording: Recording { path, recording_type: "fs_json".into() } }),
            conversation_assertions: Vec::new(),
        });

        let result = executor.execute_conversation(request(scenario)).await.unwrap();
        assert!(!result.failed);
        assert_eq!(result.turns_completed, 1);
        let summary = result.messages[1].meta.get("assertions").unwrap();
        assert_eq!(summary["all_passed"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn missing_recording_path_is_a_failed_result_not_an_error() {
        let registry = RecordingAdapterRegistry::new();
        let validators: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        let executor = EvalConversationExecutor::new(Arc::new(registry), validators);

        let scenario = Arc::new(Scenario {
            id: ScenarioId::new("s"),
            task_type: "assist".into(),
            providers: Vec::new(),
            turns: Vec::new(),
            streaming: false,
            duplex: None,
            eval: Some(EvalConfig { recording: Recording { path: String::new(), recording_type: "fs_json".into() } }),
            conversation_assertions: Vec::new(),
        });

        let result = executor.execute_conversation(request(scenario)).await.unwrap();
        assert!(result.failed);
        assert!(result.error.contains("path is empty"));
    }

    #[tokio::test]
    async fn unregistered_adapter_type_is_a_failed_result() {
        let registry = RecordingAdapterRegistry::new();
        let validators: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        let executor = EvalConversationExecutor::new(Arc::new(registry), validators);

        let scenario = Arc::new(Scenario {
            id: ScenarioId::new("s"),
            task_type: "assist".into(),
            providers: Vec::new(),
            turns: Vec::new(),
            streaming: false,
            duplex: None,
            eval: Some(EvalConfig {
                recording: Recording { path: "whatever.json".into(), recording_type: "unknown_type".into() },
            }),
            conversation_assertions: Vec::new(),
        });

        let result = executor.execute_conversation(request(scenario)).await.unwrap();
        assert!(result.failed);
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
