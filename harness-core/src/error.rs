//! Error types owned by this crate's own protocol boundaries.
//!
//! Errors scoped to a single downstream crate (`ProviderError`,
//! `ToolError`, `PipelineError`, `ExecutorError`, `SchedulerError`,
//! `EvalError`) live in that crate, not here — this crate only owns the
//! errors raised by the traits it defines itself: state persistence,
//! hooks, and configuration parsing.

use thiserror::Error;

/// Errors from a [`crate::state::StateStore`] implementation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StateError {
    /// No conversation or run metadata exists under the given id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write (save, fork, delete) failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Serialization or deserialization of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend itself is unreachable or misconfigured (e.g. Redis
    /// connection refused). This is a fatal error per the error taxonomy —
    /// it halts the run rather than being swallowed into `RunMetadata.Error`.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Catch-all for backend-specific failures that don't fit above.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors raised while parsing or validating a [`crate::run::RunPlanConfig`].
///
/// Configuration errors are the one error kind allowed to escape
/// `ExecuteRuns` as a hard error — everything else becomes a recorded
/// `RunMetadata.Error`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document failed to parse as JSON.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),

    /// A scenario filter named a scenario ID that no loaded scenario has.
    #[error("unknown scenario in filter: {0}")]
    UnknownScenario(String),

    /// Two scenarios (or two prompt templates) declared the same `task_type`.
    #[error("duplicate task_type: {0}")]
    DuplicateTaskType(String),

    /// A Redis TTL string failed to parse as a duration.
    #[error("invalid TTL: {0}")]
    InvalidTtl(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors a [`crate::hook::Hook`] implementation can raise.
///
/// Hook errors are logged and the pipeline continues — they never halt a
/// turn. Use `HookAction::Halt` from inside the hook to halt deliberately.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook's own logic failed.
    #[error("hook failed: {0}")]
    Failed(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
