//! `harness` — runs a configured set of scenarios against a set of
//! providers and reports pass/fail per run.
//!
//! A flat, hand-rolled flag loop over `std::env::args` (no `clap`), a
//! JSON config document loaded from `--config` (or a default path) and
//! overridden by flags, then one dispatch through the scheduler. There is
//! no `mcp serve` subcommand — MCP server declarations are accepted as
//! opaque passthrough (`McpServerConfig`) but nothing in this crate spawns
//! them.

use harness_core::run::{RunFilter, RunPlanConfig};
use harness_core::scenario::{ProviderSpec, Scenario};
use harness_core::state::ArenaStateStore;
use harness_eval::BuiltinValidatorFactory;
use harness_events::BroadcastEventBus;
use harness_executor::{
    CompositeConversationExecutor, DefaultConversationExecutor, DuplexConversationExecutor,
    EvalConversationExecutor,
};
use harness_pipeline::TurnPipeline;
use harness_replay::RecordingAdapterRegistry;
use harness_scheduler::Engine;
use harness_state_memory::MemoryStore;
use harness_state_redis::RedisStateStore;
use harness_tool::ToolRegistry;
use harness_turn_types::Provider;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("harness error: {err}");
        std::process::exit(1);
    }
}

/// Errors surfaced to the process boundary. Everything a run itself can
/// fail at is recorded on `RunMetadata.error` instead — this enum is only
/// for failures that prevent runs from being attempted at all.
#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Scheduler(#[from] harness_core::error::ConfigError),
    #[error(transparent)]
    State(#[from] harness_core::error::StateError),
}

async fn run_cli() -> Result<(), CliError> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config_path: Option<PathBuf> = None;
    let mut region: Option<String> = None;
    let mut provider_filter: Vec<String> = Vec::new();
    let mut scenario_filter: Vec<String> = Vec::new();
    let mut eval: Option<String> = None;
    let mut concurrency: usize = 4;
    let mut recording_dir: Option<String> = None;
    let mut mock_providers = false;

    let mut remaining: Vec<String> = std::mem::take(&mut args);
    while let Some(flag) = remaining.first().cloned() {
        remaining.remove(0);
        match flag.as_str() {
            "--config" => config_path = Some(PathBuf::from(take_arg("--config", &mut remaining)?)),
            "--region" => region = Some(take_arg("--region", &mut remaining)?),
            "--provider" => provider_filter.push(take_arg("--provider", &mut remaining)?),
            "--scenario" => scenario_filter.push(take_arg("--scenario", &mut remaining)?),
            "--eval" => eval = Some(take_arg("--eval", &mut remaining)?),
            "--concurrency" => {
                let raw = take_arg("--concurrency", &mut remaining)?;
                concurrency = raw
                    .parse()
                    .map_err(|_| CliError::Config(format!("invalid --concurrency: {raw}")))?;
            }
            "--recording-dir" => recording_dir = Some(take_arg("--recording-dir", &mut remaining)?),
            "--mock-providers" => mock_providers = true,
            other => return Err(CliError::Config(format!("unknown flag: {other}"))),
        }
    }

    let config = load_config(config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let state_store = build_state_store(&config.run.state_store).await?;
    let tool_registry = Arc::new(ToolRegistry::new());
    let validator_factory = Arc::new(BuiltinValidatorFactory::new());
    let prompt_registry = Arc::new(build_prompt_registry(&config)?);
    let event_bus = Arc::new(BroadcastEventBus::new(256));

    let pipeline = TurnPipeline::new(tool_registry.clone(), validator_factory.clone(), state_store.clone());
    let default_executor = Arc::new(DefaultConversationExecutor::new(
        pipeline,
        prompt_registry.clone(),
        state_store.clone(),
        validator_factory.clone(),
    ));
    let duplex_executor = Arc::new(
        DuplexConversationExecutor::new(
            state_store.clone(),
            tool_registry.clone(),
            prompt_registry.clone(),
            validator_factory.clone(),
        )
        .with_event_bus(event_bus.clone()),
    );
    let eval_executor = Arc::new(EvalConversationExecutor::new(
        Arc::new(RecordingAdapterRegistry::new()),
        validator_factory.clone(),
    ));

    let executor = Arc::new(
        CompositeConversationExecutor::new()
            .with_default(default_executor)
            .with_duplex(duplex_executor)
            .with_eval(eval_executor),
    );

    let mut engine = Engine::new(executor, state_store);
    for scenario in config.scenarios {
        engine.register_scenario(scenario);
    }
    for spec in &config.providers {
        let provider = build_provider(spec, mock_providers)?;
        engine.register_provider(provider);
    }
    engine.set_event_bus(event_bus);
    engine.set_self_play(config.run.self_play.clone());
    let recording_dir = recording_dir.or_else(|| {
        if config.run.defaults.recording.enabled {
            Some(config.run.defaults.recording.dir.clone())
        } else {
            None
        }
    });
    engine.set_recording_dir(recording_dir);

    let filter = RunFilter {
        regions: region.map(|r| vec![r]).unwrap_or_default(),
        scenarios: scenario_filter,
        providers: provider_filter,
        eval,
    };

    let plan = engine.generate_run_plan(&filter)?;
    let engine = Arc::new(engine);
    let run_ids = engine.execute_runs(&plan, concurrency.max(1)).await;

    let mut any_failed = false;
    for run_id in &run_ids {
        let metadata = engine.run_result(run_id).await?;
        if metadata.failed() {
            any_failed = true;
            eprintln!("{}: FAILED: {}", run_id, metadata.error);
        } else {
            println!("{}: ok", run_id);
        }
    }

    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Resolved configuration document. Combines the engine's own
/// `RunPlanConfig` with the scenario/provider/prompt data a run needs,
/// all loaded from one JSON file.
#[derive(Debug, Default, Deserialize)]
struct HarnessConfig {
    #[serde(flatten)]
    run: RunPlanConfig,
    #[serde(default)]
    scenarios: Vec<Scenario>,
    #[serde(default)]
    providers: Vec<ProviderSpec>,
    /// `task_type -> {{var}}`-templated system prompt.
    #[serde(default)]
    prompts: HashMap<String, String>,
    /// Per-region overrides: `task_type -> region -> template`.
    #[serde(default)]
    prompt_region_overrides: HashMap<String, HashMap<String, String>>,
}

fn load_config(path: Option<PathBuf>) -> Result<HarnessConfig, CliError> {
    let path = path.unwrap_or_else(|| PathBuf::from("harness.json"));
    if !path.exists() {
        return Ok(HarnessConfig::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn build_prompt_registry(config: &HarnessConfig) -> Result<harness_context::TemplateRegistry, CliError> {
    let mut registry = harness_context::TemplateRegistry::new();
    for (task_type, template) in &config.prompts {
        registry
            .register(task_type.clone(), template.clone())
            .map_err(|e| CliError::Config(e.to_string()))?;
    }
    for (task_type, regions) in &config.prompt_region_overrides {
        for (region, template) in regions {
            registry.register_region_override(task_type.clone(), region.clone(), template.clone());
        }
    }
    Ok(registry)
}

async fn build_state_store(config: &harness_core::run::StateStoreConfig) -> Result<Arc<dyn ArenaStateStore>, CliError> {
    use harness_core::run::StateStoreConfig;
    match config {
        StateStoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StateStoreConfig::Redis {
            address,
            password,
            database,
            ttl,
            prefix,
        } => {
            let ttl = ttl
                .as_deref()
                .map(parse_duration)
                .transpose()
                .map_err(CliError::Config)?;
            let store = RedisStateStore::connect(address, password.as_deref(), *database, ttl, prefix.clone()).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Parses a plain suffix duration (`"500ms"`, `"30s"`, `"10m"`, `"24h"`).
/// No fractional values, no combined units — matches the one shape
/// `RunPlanConfig`'s doc comment promises callers.
fn parse_duration(raw: &str) -> Result<std::time::Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = if let Some(d) = raw.strip_suffix("ms") {
        (d, "ms")
    } else if let Some(d) = raw.strip_suffix('s') {
        (d, "s")
    } else if let Some(d) = raw.strip_suffix('m') {
        (d, "m")
    } else if let Some(d) = raw.strip_suffix('h') {
        (d, "h")
    } else {
        return Err(format!("invalid duration: {raw}"));
    };
    let value: u64 = digits.parse().map_err(|_| format!("invalid duration: {raw}"))?;
    Ok(match unit {
        "ms" => std::time::Duration::from_millis(value),
        "s" => std::time::Duration::from_secs(value),
        "m" => std::time::Duration::from_secs(value * 60),
        "h" => std::time::Duration::from_secs(value * 3600),
        _ => unreachable!(),
    })
}

/// Builds the concrete provider adapter named by `spec.provider_type`.
/// API keys are read from the environment variable named by
/// `additional_config.api_key_env`, falling back to `{TYPE}_API_KEY`.
fn build_provider(spec: &ProviderSpec, force_mock: bool) -> Result<Arc<dyn Provider>, CliError> {
    let provider_type = if force_mock { "mock" } else { spec.provider_type.as_str() };
    let provider: Arc<dyn Provider> = match provider_type {
        "mock" => Arc::new(harness_provider_mock::MockProvider::echoing(spec.id.as_str(), spec.model.clone(), "ok")),
        "openai" => {
            let key = api_key(spec, "OPENAI_API_KEY")?;
            let p = harness_provider_openai::OpenAIProvider::new(spec.id.as_str(), spec.model.clone(), key);
            let p = match &spec.base_url {
                Some(url) => p.with_url(url.clone()),
                None => p,
            };
            Arc::new(p)
        }
        "anthropic" => {
            let key = api_key(spec, "ANTHROPIC_API_KEY")?;
            let p = harness_provider_anthropic::AnthropicProvider::new(spec.id.as_str(), spec.model.clone(), key);
            let p = match &spec.base_url {
                Some(url) => p.with_url(url.clone()),
                None => p,
            };
            Arc::new(p)
        }
        "gemini" => {
            let key = api_key(spec, "GEMINI_API_KEY")?;
            let p = harness_provider_gemini::GeminiProvider::new(spec.id.as_str(), spec.model.clone(), key);
            let p = match &spec.base_url {
                Some(url) => p.with_url(url.clone()),
                None => p,
            };
            Arc::new(p)
        }
        other => return Err(CliError::Config(format!("unknown provider type: {other}"))),
    };
    Ok(provider)
}

fn api_key(spec: &ProviderSpec, default_env: &str) -> Result<String, CliError> {
    let env_name = spec
        .additional_config
        .get("api_key_env")
        .and_then(|v| v.as_str())
        .unwrap_or(default_env);
    std::env::var(env_name).map_err(|_| CliError::Config(format!("missing environment variable {env_name} for provider {}", spec.id)))
}

fn take_arg(flag: &str, remaining: &mut Vec<String>) -> Result<String, CliError> {
    if remaining.is_empty() {
        return Err(CliError::Config(format!("missing value for {flag}")));
    }
    Ok(remaining.remove(0))
}

fn print_usage() {
    println!(
        "harness [--config harness.json] [--region NAME] [--provider ID]... [--scenario ID]...\n\
         \x20       [--eval ID] [--concurrency N] [--recording-dir PATH] [--mock-providers]"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_each_unit() {
        assert_eq!(parse_duration("500ms").unwrap(), std::time::Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), std::time::Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), std::time::Duration::from_secs(600));
        assert_eq!(parse_duration("24h").unwrap(), std::time::Duration::from_secs(86400));
    }

    #[test]
    fn parse_duration_rejects_missing_unit() {
        assert!(parse_duration("500").is_err());
    }

    #[test]
    fn take_arg_errors_on_missing_value() {
        let mut remaining: Vec<String> = Vec::new();
        assert!(take_arg("--config", &mut remaining).is_err());
    }

    #[test]
    fn take_arg_consumes_the_front_value() {
        let mut remaining = vec!["value".to_string(), "rest".to_string()];
        let taken = take_arg("--config", &mut remaining).unwrap();
        assert_eq!(taken, "value");
        assert_eq!(remaining, vec!["rest".to_string()]);
    }
}
