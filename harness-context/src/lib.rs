#![deny(missing_docs)]
//! # harness-context — prompt registry and cross-turn context assembly
//!
//! `PromptAssemblyStage` (in `harness-pipeline`) resolves a scenario's
//! `task_type` against a [`PromptRegistry`] to render the system prompt;
//! `ScenarioContextExtractionStage` uses [`ScenarioContext`] to carry
//! cross-turn variables (the last user/assistant turn, turn index) forward
//! into later turns' template expansion.
//!
//! Narrowed from general-purpose sliding-window/summarization compaction
//! to the two things the turn pipeline actually needs — prompt template
//! resolution and cross-turn variable carry-forward — rather than a
//! general "context assembly" layer.

use harness_core::id::Region;
use harness_core::Message;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while resolving or rendering a prompt template.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ContextError {
    /// No template is registered for the given `task_type`.
    #[error("unknown task_type: {0}")]
    UnknownTaskType(String),

    /// Two templates were registered under the same `task_type`.
    #[error("duplicate task_type: {0}")]
    DuplicateTaskType(String),
}

/// The result of resolving a scenario's `task_type` against a
/// [`PromptRegistry`]: a rendered system prompt plus the variables it was
/// rendered with, for stages further down the pipeline to reuse.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledPrompt {
    /// The rendered system prompt, ready to attach to a provider request.
    pub system_prompt: String,
    /// The variables the template was rendered with (region, scenario vars,
    /// base vars), so `TemplateStage` can reuse the same set for the
    /// user-turn content without re-deriving it.
    pub vars: HashMap<String, Value>,
}

/// Resolves a scenario's `task_type` to a system prompt template and
/// renders it.
///
/// This crate does not implement a remote/file-backed registry — only the
/// in-memory [`TemplateRegistry`], which is enough for scenarios whose
/// prompts are authored alongside the run-plan configuration. A caller
/// that loads prompts from an external prompt-management service
/// implements this trait itself.
#[async_trait::async_trait]
pub trait PromptRegistry: Send + Sync {
    /// Resolve `task_type` with no additional variables beyond the
    /// registry's own base vars.
    async fn load(&self, task_type: &str) -> Result<AssembledPrompt, ContextError> {
        self.load_with_vars(task_type, HashMap::new(), &Region::default())
            .await
    }

    /// Resolve `task_type` and render its template with `vars` merged over
    /// the registry's base variables (region, etc.), region-scoped.
    async fn load_with_vars(
        &self,
        task_type: &str,
        vars: HashMap<String, Value>,
        region: &Region,
    ) -> Result<AssembledPrompt, ContextError>;
}

/// A simple in-memory [`PromptRegistry`]: one `{{var}}`-templated system
/// prompt string per `task_type`, optionally overridden per region.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
    region_overrides: HashMap<(String, String), String>,
}

impl TemplateRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template for `task_type`. Errors if one is already
    /// registered — task types must be unique across the loaded scenario
    /// set.
    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        template: impl Into<String>,
    ) -> Result<(), ContextError> {
        let task_type = task_type.into();
        if self.templates.contains_key(&task_type) {
            return Err(ContextError::DuplicateTaskType(task_type));
        }
        self.templates.insert(task_type, template.into());
        Ok(())
    }

    /// Override a template for one `(task_type, region)` pair, taking
    /// precedence over the default template for that task type.
    pub fn register_region_override(
        &mut self,
        task_type: impl Into<String>,
        region: impl Into<String>,
        template: impl Into<String>,
    ) {
        self.region_overrides
            .insert((task_type.into(), region.into()), template.into());
    }
}

#[async_trait::async_trait]
impl PromptRegistry for TemplateRegistry {
    async fn load_with_vars(
        &self,
        task_type: &str,
        vars: HashMap<String, Value>,
        region: &Region,
    ) -> Result<AssembledPrompt, ContextError> {
        let template = self
            .region_overrides
            .get(&(task_type.to_string(), region.as_str().to_string()))
            .or_else(|| self.templates.get(task_type))
            .ok_or_else(|| ContextError::UnknownTaskType(task_type.to_string()))?;

        let mut merged = base_vars(region);
        merged.extend(vars);
        let system_prompt = render_template(template, &merged);
        Ok(AssembledPrompt {
            system_prompt,
            vars: merged,
        })
    }
}

/// The variables every rendered template can rely on regardless of
/// scenario-supplied vars: `region` today, extended here as more base
/// variables become needed.
pub fn base_vars(region: &Region) -> HashMap<String, Value> {
    let mut vars = HashMap::new();
    vars.insert("region".to_string(), Value::String(region.to_string()));
    vars
}

/// Expand `{{key}}` placeholders in `template` using `vars`. A placeholder
/// with no matching key is left untouched — a missing scenario var is a
/// configuration gap worth seeing in output, not a silent empty string.
pub fn render_template(template: &str, vars: &HashMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                match after.find("}}") {
                    None => {
                        // Unterminated placeholder: emit verbatim.
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let key = after[..end].trim();
                        match vars.get(key) {
                            Some(Value::String(s)) => out.push_str(s),
                            Some(other) => out.push_str(&value_to_display(other)),
                            None => {
                                out.push_str("{{");
                                out.push_str(key);
                                out.push_str("}}");
                            }
                        }
                        rest = &after[end + 2..];
                    }
                }
            }
        }
    }
    out
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cross-turn context the pipeline carries forward between scripted turns
/// (`ScenarioContextExtractionStage`, non-duplex only).
///
/// Duplex mode doesn't use this: its turns share one long-lived session
/// where the provider itself retains context, so there is nothing to
/// re-inject per turn.
#[derive(Debug, Default, Clone)]
pub struct ScenarioContext {
    turn_index: u32,
    vars: HashMap<String, Value>,
}

impl ScenarioContext {
    /// A fresh context at turn 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message's content, updating `last_user_message` /
    /// `last_assistant_message` and advancing the turn counter on
    /// assistant messages (one assistant message closes one turn).
    pub fn extract_from_message(&mut self, message: &Message) {
        use harness_core::Role;
        match message.role {
            Role::User => {
                self.vars.insert(
                    "last_user_message".to_string(),
                    Value::String(message.content.clone()),
                );
            }
            Role::Assistant => {
                self.vars.insert(
                    "last_assistant_message".to_string(),
                    Value::String(message.content.clone()),
                );
                self.turn_index += 1;
                self.vars
                    .insert("turn_index".to_string(), Value::from(self.turn_index));
            }
            Role::System | Role::Tool => {}
        }
    }

    /// The accumulated variables, ready to merge into the next turn's
    /// template vars.
    pub fn vars(&self) -> &HashMap<String, Value> {
        &self.vars
    }

    /// How many assistant turns have completed so far.
    pub fn turn_index(&self) -> u32 {
        self.turn_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::Role;

    #[tokio::test]
    async fn load_renders_registered_template() {
        let mut registry = TemplateRegistry::new();
        registry
            .register("assist", "You are a {{region}} assistant. {{tone}}")
            .unwrap();
        let prompt = registry
            .load_with_vars(
                "assist",
                HashMap::from([("tone".to_string(), Value::String("Be terse.".to_string()))]),
                &Region::new("eu"),
            )
            .await
            .unwrap();
        assert_eq!(prompt.system_prompt, "You are a eu assistant. Be terse.");
    }

    #[tokio::test]
    async fn load_unknown_task_type_errors() {
        let registry = TemplateRegistry::new();
        let err = registry.load("missing").await.unwrap_err();
        assert!(matches!(err, ContextError::UnknownTaskType(t) if t == "missing"));
    }

    #[test]
    fn register_duplicate_task_type_errors() {
        let mut registry = TemplateRegistry::new();
        registry.register("assist", "a").unwrap();
        let err = registry.register("assist", "b").unwrap_err();
        assert!(matches!(err, ContextError::DuplicateTaskType(t) if t == "assist"));
    }

    #[tokio::test]
    async fn region_override_takes_precedence() {
        let mut registry = TemplateRegistry::new();
        registry.register("assist", "default").unwrap();
        registry.register_region_override("assist", "jp", "konnichiwa");
        let prompt = registry
            .load_with_vars("assist", HashMap::new(), &Region::new("jp"))
            .await
            .unwrap();
        assert_eq!(prompt.system_prompt, "konnichiwa");

        let default_prompt = registry
            .load_with_vars("assist", HashMap::new(), &Region::new("us"))
            .await
            .unwrap();
        assert_eq!(default_prompt.system_prompt, "default");
    }

    #[test]
    fn render_template_leaves_unknown_placeholders_untouched() {
        let vars = HashMap::from([("known".to_string(), Value::String("x".to_string()))]);
        assert_eq!(render_template("{{known}} {{unknown}}", &vars), "x {{unknown}}");
    }

    #[test]
    fn scenario_context_tracks_last_turn_and_index() {
        let mut ctx = ScenarioContext::new();
        ctx.extract_from_message(&Message::text(Role::User, "hi"));
        ctx.extract_from_message(&Message::text(Role::Assistant, "hello"));
        assert_eq!(ctx.turn_index(), 1);
        assert_eq!(
            ctx.vars().get("last_user_message"),
            Some(&Value::String("hi".to_string()))
        );
        assert_eq!(
            ctx.vars().get("last_assistant_message"),
            Some(&Value::String("hello".to_string()))
        );
    }
}
