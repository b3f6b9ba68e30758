//! Typed pub/sub events the scheduler and duplex executor emit.

use crate::duration::DurationMs;
use crate::id::{ProviderId, Region, RunId, ScenarioId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One occurrence on the event bus. Variant names map onto the
/// `arena.run.*` / `arena.duplex.*` event-type strings; `Custom` covers
/// everything `Emitter::emit_custom` publishes that doesn't have a typed
/// shape here.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// `arena.run.started`
    #[serde(rename = "arena.run.started")]
    RunStarted {
        /// The run starting.
        run_id: RunId,
        /// Region it runs under.
        region: Region,
        /// Scenario being executed.
        scenario_id: ScenarioId,
        /// Provider being called.
        provider_id: ProviderId,
    },
    /// `arena.run.completed`
    #[serde(rename = "arena.run.completed")]
    RunCompleted {
        /// The run that completed.
        run_id: RunId,
        /// Wall-clock duration.
        duration: DurationMs,
        /// Total cost incurred.
        cost: Decimal,
    },
    /// `arena.run.failed`
    #[serde(rename = "arena.run.failed")]
    RunFailed {
        /// The run that failed.
        run_id: RunId,
        /// The recorded error string.
        error: String,
    },
    /// `arena.duplex.session.started`
    #[serde(rename = "arena.duplex.session.started")]
    DuplexSessionStarted {
        /// The run whose duplex session started.
        run_id: RunId,
    },
    /// `arena.duplex.session.completed`
    #[serde(rename = "arena.duplex.session.completed")]
    DuplexSessionCompleted {
        /// The run whose duplex session completed.
        run_id: RunId,
    },
    /// `arena.duplex.session.error`
    #[serde(rename = "arena.duplex.session.error")]
    DuplexSessionError {
        /// The run whose duplex session errored.
        run_id: RunId,
        /// The error encountered.
        error: String,
    },
    /// `arena.duplex.turn.started`
    #[serde(rename = "arena.duplex.turn.started")]
    DuplexTurnStarted {
        /// The owning run.
        run_id: RunId,
        /// Index into `scenario.turns`.
        turn_index: usize,
    },
    /// `arena.duplex.turn.completed`
    #[serde(rename = "arena.duplex.turn.completed")]
    DuplexTurnCompleted {
        /// The owning run.
        run_id: RunId,
        /// Index into `scenario.turns`.
        turn_index: usize,
    },
    /// `arena.duplex.turn.failed`
    #[serde(rename = "arena.duplex.turn.failed")]
    DuplexTurnFailed {
        /// The owning run.
        run_id: RunId,
        /// Index into `scenario.turns`.
        turn_index: usize,
        /// The error encountered.
        error: String,
    },
    /// A caller-defined event published through `Emitter::emit_custom`.
    Custom {
        /// Namespaced event type string, e.g. `"arena.tool.invoked"`.
        event_type: String,
        /// Free-form producer identifier.
        producer: String,
        /// Free-form event name.
        name: String,
        /// Event payload.
        payload: serde_json::Value,
        /// Optional human-readable message.
        message: Option<String>,
    },
}

impl Event {
    /// The `arena.*` event-type string this event corresponds to.
    pub fn event_type(&self) -> &str {
        match self {
            Event::RunStarted { .. } => "arena.run.started",
            Event::RunCompleted { .. } => "arena.run.completed",
            Event::RunFailed { .. } => "arena.run.failed",
            Event::DuplexSessionStarted { .. } => "arena.duplex.session.started",
            Event::DuplexSessionCompleted { .. } => "arena.duplex.session.completed",
            Event::DuplexSessionError { .. } => "arena.duplex.session.error",
            Event::DuplexTurnStarted { .. } => "arena.duplex.turn.started",
            Event::DuplexTurnCompleted { .. } => "arena.duplex.turn.completed",
            Event::DuplexTurnFailed { .. } => "arena.duplex.turn.failed",
            Event::Custom { event_type, .. } => event_type,
        }
    }

    /// The run this event is tagged with, when session recording needs to
    /// know which `<recording-dir>/<run_id>.jsonl` to append to.
    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Event::RunStarted { run_id, .. }
            | Event::RunCompleted { run_id, .. }
            | Event::RunFailed { run_id, .. }
            | Event::DuplexSessionStarted { run_id }
            | Event::DuplexSessionCompleted { run_id }
            | Event::DuplexSessionError { run_id, .. }
            | Event::DuplexTurnStarted { run_id, .. }
            | Event::DuplexTurnCompleted { run_id, .. }
            | Event::DuplexTurnFailed { run_id, .. } => Some(run_id),
            Event::Custom { .. } => None,
        }
    }
}

/// One subscriber's view onto the bus. Delivery is FIFO within a single
/// subscription; there is no ordering guarantee across subscriptions.
#[async_trait]
pub trait EventSubscription: Send {
    /// Await the next event, or `None` once the bus has shut down.
    ///
    /// A subscriber that falls behind a bounded bus may miss events that
    /// were dropped to bound memory use; implementations document their
    /// own lag behavior rather than silently losing events unremarked.
    async fn recv(&mut self) -> Option<Event>;
}

/// Typed topic pub/sub with an optional per-session persistent log.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event. Returns once the event has been handed to the
    /// bus — delivery to subscribers happens asynchronously.
    async fn publish(&self, event: Event);

    /// Register a new subscription. Each subscriber receives every event
    /// published after it subscribes.
    fn subscribe(&self) -> Box<dyn EventSubscription>;
}
