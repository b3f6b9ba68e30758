#![deny(missing_docs)]
//! # harness-scheduler — run-plan expansion and dispatch
//!
//! [`Engine`] is the aggregate that holds the registries (scenarios,
//! providers, self-play roles, eval hooks) and the collaborators
//! (`ConversationExecutor`, `ArenaStateStore`, `EventBus`) a run needs,
//! and owns the two operations a CLI front-end calls: `generate_run_plan`
//! (pure filter expansion) and `execute_runs` (bounded-concurrency
//! dispatch).
//!
//! `execute_runs` spawns one task per combination and collects results
//! into an order-preserving slice, bounding true parallelism with a
//! semaphore sized by the caller's `concurrency` argument, and narrows
//! "dispatch" to "execute one `RunCombination` through a
//! `ConversationExecutor`".

use harness_core::error::ConfigError;
use harness_core::events::{Event, EventBus};
use harness_core::id::{EvalId, PersonaId, ProviderId, Region, ScenarioId};
use harness_core::run::{current_timestamp_minute, generate_run_id, RunCombination, RunFilter, RunMetadata, RunPlan};
use harness_core::scenario::Scenario;
use harness_core::state::ArenaStateStore;
use harness_executor::{ConversationExecutor, ConversationRequest, SelfPlayRole};
use harness_turn_types::Provider;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub use harness_core::id::RunId;
pub use harness_core::run::{RunPlanConfig, SelfPlayConfig};

/// Everything one scheduler dispatch needs: the scenario/provider
/// registries, the self-play and eval-pack configuration, and the
/// collaborators each run is executed against.
///
/// Built with the `register_*`/`set_*` methods, then wrapped in an `Arc`
/// by the caller so [`Engine::execute_runs`] can hand clones of the `Arc`
/// to spawned tasks rather than cloning the engine itself.
pub struct Engine {
    scenarios: HashMap<String, Arc<Scenario>>,
    providers: HashMap<String, Arc<dyn Provider>>,
    executor: Arc<dyn ConversationExecutor>,
    state_store: Arc<dyn ArenaStateStore>,
    event_bus: Option<Arc<dyn EventBus>>,
    self_play: SelfPlayConfig,
    eval_hooks: HashMap<String, Arc<harness_eval::PackEvalHook>>,
    recording_dir: Option<String>,
}

impl Engine {
    /// Build an engine with no scenarios, providers, or self-play roles
    /// registered yet, driving runs through `executor` and persisting
    /// state/metadata to `state_store`.
    pub fn new(executor: Arc<dyn ConversationExecutor>, state_store: Arc<dyn ArenaStateStore>) -> Self {
        Self {
            scenarios: HashMap::new(),
            providers: HashMap::new(),
            executor,
            state_store,
            event_bus: None,
            self_play: SelfPlayConfig::default(),
            eval_hooks: HashMap::new(),
            recording_dir: None,
        }
    }

    /// Register (or overwrite) a scenario by its own id.
    pub fn register_scenario(&mut self, scenario: Scenario) {
        self.scenarios.insert(scenario.id.as_str().to_string(), Arc::new(scenario));
    }

    /// Register (or overwrite) a provider by its own id.
    pub fn register_provider(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// Register an eval-pack dual-write hook under the eval id run filters
    /// and scenarios reference.
    pub fn register_eval_hook(&mut self, eval_id: impl Into<String>, hook: Arc<harness_eval::PackEvalHook>) {
        self.eval_hooks.insert(eval_id.into(), hook);
    }

    /// Wire an event bus; every run publishes its lifecycle events to it.
    /// Without one, runs still execute, just silently.
    pub fn set_event_bus(&mut self, bus: Arc<dyn EventBus>) {
        self.event_bus = Some(bus);
    }

    /// Configure self-play roles and personas (`RunPlanConfig.self_play`).
    pub fn set_self_play(&mut self, config: SelfPlayConfig) {
        self.self_play = config;
    }

    /// Directory `RunMetadata.recording_path` is computed against, if
    /// session recording is enabled. Recording itself happens out of
    /// band — a `SessionRecorder` subscribed to the same event bus — this
    /// only determines the path string stamped onto the metadata.
    pub fn set_recording_dir(&mut self, dir: Option<String>) {
        self.recording_dir = dir;
    }

    /// Read back previously persisted `RunMetadata`, for callers (tests,
    /// a CLI summary) that only hold the `Engine`, not its state store.
    pub async fn run_result(&self, run_id: &RunId) -> Result<RunMetadata, harness_core::error::StateError> {
        self.state_store.get_run_result(run_id).await
    }

    /// Expand `filter` into an ordered, concrete `RunPlan`. Pure —
    /// touches no collaborator, returns an error only for an unknown
    /// scenario named in `filter.scenarios`.
    pub fn generate_run_plan(&self, filter: &RunFilter) -> Result<RunPlan, ConfigError> {
        let regions: Vec<String> = if filter.regions.is_empty() {
            vec![Region::default().to_string()]
        } else {
            filter.regions.clone()
        };

        let scenario_ids: Vec<String> = if filter.scenarios.is_empty() {
            let mut ids: Vec<String> = self.scenarios.keys().cloned().collect();
            ids.sort();
            ids
        } else {
            for id in &filter.scenarios {
                if !self.scenarios.contains_key(id.as_str()) {
                    return Err(ConfigError::UnknownScenario(id.clone()));
                }
            }
            filter.scenarios.clone()
        };

        let mut combinations = Vec::new();
        for region in &regions {
            for scenario_id in &scenario_ids {
                let scenario = self
                    .scenarios
                    .get(scenario_id)
                    .expect("scenario_ids only contains known scenarios");
                for provider_id in self.resolve_providers(scenario, &filter.providers) {
                    combinations.push(RunCombination {
                        region: Region::new(region.clone()),
                        scenario_id: ScenarioId::new(scenario_id.clone()),
                        provider_id: ProviderId::new(provider_id),
                        eval_id: filter.eval.clone().map(EvalId::new),
                    });
                }
            }
        }
        Ok(RunPlan { combinations })
    }

    /// Provider set = `scenario.providers` if non-empty else every
    /// registered provider; intersected with `filter` when the scenario
    /// declared providers and the filter is non-empty; a bare filter with
    /// no scenario-declared providers is used as-is.
    fn resolve_providers(&self, scenario: &Scenario, filter: &[String]) -> Vec<String> {
        let declared: Vec<String> = scenario.providers.iter().map(|p| p.as_str().to_string()).collect();
        if !declared.is_empty() {
            if filter.is_empty() {
                declared
            } else {
                declared.into_iter().filter(|p| filter.contains(p)).collect()
            }
        } else if !filter.is_empty() {
            filter.to_vec()
        } else {
            let mut all: Vec<String> = self.providers.keys().cloned().collect();
            all.sort();
            all
        }
    }

    /// Dispatch every combination in `plan` through a pool bounded to
    /// `concurrency` runs in flight at once, returning their `RunId`s in
    /// plan order regardless of which run finishes first.
    ///
    /// Never returns a hard error: a run that fails to resolve its
    /// scenario/provider, or whose conversation fails outright, is still
    /// issued a `RunId` and has its failure recorded in `RunMetadata`.
    pub async fn execute_runs(self: &Arc<Self>, plan: &RunPlan, concurrency: usize) -> Vec<RunId> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::with_capacity(plan.combinations.len());
        for combo in plan.combinations.clone() {
            let engine = Arc::clone(self);
            let permit = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore is never closed");
                engine.execute_run(combo).await
            }));
        }

        let mut run_ids = Vec::with_capacity(handles.len());
        for (combo, handle) in plan.combinations.iter().zip(handles) {
            match handle.await {
                Ok(run_id) => run_ids.push(run_id),
                Err(join_error) => {
                    tracing::error!("run dispatch task panicked: {join_error}");
                    run_ids.push(generate_run_id(current_timestamp_minute(), combo));
                }
            }
        }
        run_ids
    }

    async fn execute_run(&self, combo: RunCombination) -> RunId {
        let run_id = generate_run_id(current_timestamp_minute(), &combo);
        self.publish(Event::RunStarted {
            run_id: run_id.clone(),
            region: combo.region.clone(),
            scenario_id: combo.scenario_id.clone(),
            provider_id: combo.provider_id.clone(),
        })
        .await;

        let mut metadata = RunMetadata::started(run_id.clone(), &combo, current_timestamp_ms());
        if let Some(dir) = &self.recording_dir {
            metadata.recording_path = Some(format!("{dir}/{run_id}.jsonl"));
        }

        let scenario = match self.scenarios.get(combo.scenario_id.as_str()) {
            Some(s) => Arc::clone(s),
            None => {
                metadata.error = format!("scenario not found: {}", combo.scenario_id);
                self.finish_run(metadata).await;
                return run_id;
            }
        };
        let provider = match self.providers.get(combo.provider_id.as_str()) {
            Some(p) => Arc::clone(p),
            None => {
                metadata.error = format!("provider not found: {}", combo.provider_id);
                self.finish_run(metadata).await;
                return run_id;
            }
        };

        let eval_hook = combo.eval_id.as_ref().and_then(|id| self.eval_hooks.get(id.as_str())).cloned();

        let request = ConversationRequest {
            run_id: run_id.clone(),
            scenario,
            provider,
            region: combo.region.clone(),
            self_play_roles: self.resolve_self_play_roles(),
            eval_hook,
        };

        match self.executor.execute_conversation(request).await {
            Ok(result) => {
                let end_time_ms = current_timestamp_ms();
                metadata.end_time_ms = Some(end_time_ms);
                metadata.duration = Some(harness_core::DurationMs::from_millis(
                    end_time_ms.saturating_sub(metadata.start_time_ms),
                ));
                metadata.error = result.error;
                metadata.self_play = result.self_play;
                metadata.persona_id = result.persona_id;
                metadata.conversation_assertion_results = result.conversation_assertion_results;
                self.finish_run_with_cost(metadata, result.total_cost).await;
            }
            Err(e) => {
                let end_time_ms = current_timestamp_ms();
                metadata.end_time_ms = Some(end_time_ms);
                metadata.duration = Some(harness_core::DurationMs::from_millis(
                    end_time_ms.saturating_sub(metadata.start_time_ms),
                ));
                metadata.error = e.to_string();
                self.finish_run(metadata).await;
            }
        }
        run_id
    }

    /// Self-play roles resolved from `RunPlanConfig.self_play`: each
    /// configured role id maps to a registered provider and a persona
    /// prompt looked up from `personas[role.id]` (a plain string, or an
    /// object with a `prompt` field) — the config data model binds one
    /// persona per role rather than per scenario turn, so a turn's own
    /// `persona` id (if set) only overrides which `PersonaId` is recorded
    /// on the result, not which prompt text is used (see DESIGN.md).
    fn resolve_self_play_roles(&self) -> Vec<SelfPlayRole> {
        if !self.self_play.enabled {
            return Vec::new();
        }
        self.self_play
            .roles
            .iter()
            .filter_map(|role| {
                let provider = self.providers.get(role.provider.as_str())?.clone();
                let persona_prompt = self
                    .self_play
                    .personas
                    .get(&role.id)
                    .map(persona_prompt_text)
                    .unwrap_or_default();
                Some(SelfPlayRole {
                    role: role.id.clone(),
                    provider,
                    persona_prompt,
                    persona_id: Some(PersonaId::new(role.id.clone())),
                })
            })
            .collect()
    }

    async fn finish_run(&self, metadata: RunMetadata) {
        self.finish_run_with_cost(metadata, Decimal::ZERO).await;
    }

    async fn finish_run_with_cost(&self, metadata: RunMetadata, cost: Decimal) {
        let run_id = metadata.run_id.clone();
        let duration = metadata.duration.unwrap_or_default();
        let failed = metadata.failed();
        let error = metadata.error.clone();
        if let Err(e) = self.state_store.save_metadata(&metadata).await {
            tracing::error!("failed to persist run metadata for {run_id}: {e}");
        }
        if failed {
            self.publish(Event::RunFailed { run_id, error }).await;
        } else {
            self.publish(Event::RunCompleted { run_id, duration, cost }).await;
        }
    }

    async fn publish(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event).await;
        }
    }
}

fn persona_prompt_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map.get("prompt").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        _ => String::new(),
    }
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_context::{PromptRegistry, TemplateRegistry};
    use harness_core::assertion::ValidatorFactory;
    use harness_core::scenario::ScenarioTurn;
    use harness_eval::BuiltinValidatorFactory;
    use harness_executor::{CompositeConversationExecutor, DefaultConversationExecutor};
    use harness_pipeline::TurnPipeline;
    use harness_provider_mock::MockProvider;
    use harness_state_memory::MemoryStore;
    use harness_tool::ToolRegistry;

    fn scenario(id: &str, providers: Vec<&str>) -> Scenario {
        Scenario {
            id: ScenarioId::new(id),
            task_type: "assist".to_string(),
            providers: providers.into_iter().map(ProviderId::new).collect(),
            turns: vec![ScenarioTurn {
                role: "user".to_string(),
                content: "hi".to_string(),
                persona: None,
                assertions: Vec::new(),
                audio: None,
            }],
            streaming: false,
            duplex: None,
            eval: None,
            conversation_assertions: Vec::new(),
        }
    }

    fn build_engine() -> Arc<Engine> {
        let tool_registry = Arc::new(ToolRegistry::new());
        let validator_factory: Arc<dyn ValidatorFactory> = Arc::new(BuiltinValidatorFactory::new());
        let state_store = Arc::new(MemoryStore::new());
        let prompts: Arc<dyn PromptRegistry> = Arc::new(TemplateRegistry::new());

        let pipeline = TurnPipeline::new(tool_registry, validator_factory.clone(), state_store.clone());
        let default_executor = Arc::new(DefaultConversationExecutor::new(
            pipeline,
            prompts,
            state_store.clone(),
            validator_factory,
        ));
        let composite = Arc::new(CompositeConversationExecutor::new().with_default(default_executor));

        let mut engine = Engine::new(composite, state_store);
        engine.register_scenario(scenario("s", vec![]));
        engine.register_provider(Arc::new(MockProvider::echoing("p", "mock-1", "pong")));
        Arc::new(engine)
    }

    #[test]
    fn plan_expansion_defaults_region_to_default_and_providers_to_registered() {
        let engine = build_engine();
        let filter = RunFilter::default();
        let plan = engine.generate_run_plan(&filter).unwrap();
        assert_eq!(plan.combinations.len(), 1);
        let combo = &plan.combinations[0];
        assert_eq!(combo.region.as_str(), "default");
        assert_eq!(combo.scenario_id.as_str(), "s");
        assert_eq!(combo.provider_id.as_str(), "p");
    }

    #[test]
    fn plan_expansion_rejects_unknown_scenario_filter() {
        let engine = build_engine();
        let filter = RunFilter {
            scenarios: vec!["missing".to_string()],
            ..Default::default()
        };
        let err = engine.generate_run_plan(&filter).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownScenario(s) if s == "missing"));
    }

    #[test]
    fn plan_expansion_intersects_declared_providers_with_filter() {
        let mut engine_raw = Engine::new(Arc::new(CompositeConversationExecutor::new()), Arc::new(MemoryStore::new()));
        engine_raw.register_scenario(scenario("s", vec!["a", "b"]));
        let engine = Arc::new(engine_raw);
        let filter = RunFilter {
            providers: vec!["b".to_string(), "c".to_string()],
            ..Default::default()
        };
        let plan = engine.generate_run_plan(&filter).unwrap();
        assert_eq!(plan.combinations.len(), 1);
        assert_eq!(plan.combinations[0].provider_id.as_str(), "b");
    }

    #[tokio::test]
    async fn execute_runs_returns_run_ids_in_plan_order() {
        let engine = build_engine();
        let plan = RunPlan {
            combinations: vec![
                RunCombination {
                    region: Region::new("default"),
                    scenario_id: ScenarioId::new("s"),
                    provider_id: ProviderId::new("p"),
                    eval_id: None,
                };
                8
            ],
        };
        let run_ids = engine.execute_runs(&plan, 3).await;
        assert_eq!(run_ids.len(), 8);
        let expected = generate_run_id(current_timestamp_minute(), &plan.combinations[0]);
        assert!(run_ids.iter().all(|id| *id == expected));
    }

    #[tokio::test]
    async fn unknown_scenario_is_recorded_not_returned_as_an_error() {
        let engine = build_engine();
        let combo = RunCombination {
            region: Region::new("default"),
            scenario_id: ScenarioId::new("missing"),
            provider_id: ProviderId::new("p"),
            eval_id: None,
        };
        let plan = RunPlan { combinations: vec![combo] };
        let run_ids = engine.execute_runs(&plan, 1).await;
        assert_eq!(run_ids.len(), 1);
        let metadata = engine.run_result(&run_ids[0]).await.unwrap();
        assert_eq!(metadata.error, "scenario not found: missing");
    }

    #[tokio::test]
    async fn happy_path_run_persists_successful_metadata() {
        let engine = build_engine();
        let filter = RunFilter::default();
        let plan = engine.generate_run_plan(&filter).unwrap();
        let run_ids = engine.execute_runs(&plan, 1).await;
        assert_eq!(run_ids.len(), 1);
        let metadata = engine.run_result(&run_ids[0]).await.unwrap();
        assert!(!metadata.failed(), "expected success, got error: {}", metadata.error);
        assert!(metadata.end_time_ms.is_some());
    }

    #[test]
    fn self_play_role_resolution_reads_prompt_from_object_persona() {
        let mut engine = Engine::new(Arc::new(CompositeConversationExecutor::new()), Arc::new(MemoryStore::new()));
        engine.register_provider(Arc::new(MockProvider::echoing("p", "mock-1", "x")));
        let mut personas = HashMap::new();
        personas.insert("customer".to_string(), serde_json::json!({"prompt": "be difficult"}));
        engine.set_self_play(SelfPlayConfig {
            enabled: true,
            roles: vec![harness_core::run::SelfPlayRole {
                id: "customer".to_string(),
                provider: ProviderId::new("p"),
            }],
            personas,
        });
        let roles = engine.resolve_self_play_roles();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].persona_prompt, "be difficult");
        assert_eq!(roles[0].role, "customer");
    }
}
