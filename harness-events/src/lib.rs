#![deny(missing_docs)]
//! Broadcast event bus and JSONL session recording for run/turn/duplex
//! lifecycle events.
//!
//! A dispatch-to-many-subscribers shape, adapted from ordered fan-out to
//! pub/sub broadcast, plus the cost/budget event vocabulary reused
//! verbatim as [`harness_core::lifecycle::CostEvent`]. [`BroadcastEventBus`]
//! is the one production implementation of [`harness_core::events::EventBus`]
//! in this workspace; [`SessionRecorder`] subscribes to it to persist a
//! JSONL transcript per run, sitting downstream of the bus rather than
//! inside it.

use async_trait::async_trait;
use harness_core::events::{Event, EventBus, EventSubscription};
use harness_core::id::RunId;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::warn;

/// Errors raised by [`SessionRecorder`] while persisting events to disk.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The JSONL file could not be opened or written to.
    #[error("failed to write recording to {path}: {source}")]
    Io {
        /// The file path being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The event could not be serialized to JSON.
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The default channel capacity for [`BroadcastEventBus`]. Chosen generously
/// since a lagging subscriber only loses its own oldest events, not the
/// whole bus — see [`BroadcastEventBus::new`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// An [`EventBus`] backed by [`tokio::sync::broadcast`].
///
/// Every subscriber gets its own bounded queue fed from the same sender.
/// A subscriber that falls behind the bus's capacity misses its oldest
/// unread events rather than blocking publishers or other subscribers —
/// this is `tokio::sync::broadcast`'s lagging-receiver behavior, and it is
/// intentional here: event delivery to an eval/observability consumer
/// must never throttle run execution.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    /// Create a new bus with the given channel capacity (how many events
    /// a subscriber can lag behind before it starts dropping the oldest).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Current number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: Event) {
        // No subscribers is the common case for a run with no attached
        // observers — `send` erroring just means "nobody is listening".
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> Box<dyn EventSubscription> {
        Box::new(BroadcastSubscription {
            receiver: self.sender.subscribe(),
        })
    }
}

/// An [`EventSubscription`] backed by a [`tokio::sync::broadcast::Receiver`].
pub struct BroadcastSubscription {
    receiver: broadcast::Receiver<Event>,
}

#[async_trait]
impl EventSubscription for BroadcastSubscription {
    async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, dropped oldest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Convenience wrapper around an [`EventBus`] handle for call sites that
/// only ever publish (the scheduler, the executors, the pipeline) and
/// shouldn't need to hold onto the subscribe half of the trait.
#[derive(Clone)]
pub struct Emitter {
    bus: Arc<dyn EventBus>,
}

impl Emitter {
    /// Wrap a shared event bus handle.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Publish one event.
    pub async fn emit(&self, event: Event) {
        self.bus.publish(event).await;
    }
}

/// Subscribes to an [`EventBus`] and appends every event concerning one
/// run to a JSONL file, one JSON object per line.
///
/// This is the recording mechanism behind `Defaults.recording` /
/// `Scenario.eval.recording`: a duplex or eval run whose
/// scenario enables recording gets a full event transcript, not just the
/// conversation messages, so a later eval pass can replay tool calls and
/// provider errors as well as text.
pub struct SessionRecorder {
    run_id: RunId,
    path: PathBuf,
}

impl SessionRecorder {
    /// Prepare a recorder for `run_id` that will write to `path`
    /// (typically `{recording_dir}/{run_id}.jsonl`).
    pub fn new(run_id: RunId, path: impl Into<PathBuf>) -> Self {
        Self {
            run_id,
            path: path.into(),
        }
    }

    /// The path this recorder writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe to `bus` and drive the recording loop until a terminal
    /// event for this run arrives (`RunCompleted`/`RunFailed`), the bus
    /// closes, or an unrecoverable I/O error occurs. Events for other runs
    /// are filtered out. Intended to be spawned as a background task
    /// alongside the run it records — the recorder owns the subscription
    /// and exits on its own once the run it watches is done, rather than
    /// depending on the whole bus shutting down.
    pub async fn record(self, bus: &dyn EventBus) -> Result<(), RecorderError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| RecorderError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        }
        let mut file = tokio::fs::File::create(&self.path)
            .await
            .map_err(|source| RecorderError::Io {
                path: self.path.clone(),
                source,
            })?;

        let mut subscription = bus.subscribe();
        while let Some(event) = subscription.recv().await {
            if event.run_id() != Some(&self.run_id) {
                continue;
            }
            let is_terminal = matches!(
                event,
                Event::RunCompleted { .. } | Event::RunFailed { .. }
            );
            let mut line = serde_json::to_vec(&event)?;
            line.push(b'\n');
            file.write_all(&line)
                .await
                .map_err(|source| RecorderError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            if is_terminal {
                break;
            }
        }
        file.flush().await.map_err(|source| RecorderError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::id::{ProviderId, Region, ScenarioId};
    use std::time::Duration;

    fn run_id() -> RunId {
        RunId::new("run-1")
    }

    fn started(run_id: RunId) -> Event {
        Event::RunStarted {
            run_id,
            region: Region::default(),
            scenario_id: ScenarioId::new("s"),
            provider_id: ProviderId::new("p"),
        }
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = BroadcastEventBus::default();
        bus.publish(started(run_id())).await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = BroadcastEventBus::default();
        let mut sub = bus.subscribe();
        bus.publish(started(run_id())).await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event.run_id(), Some(&run_id()));
    }

    #[tokio::test]
    async fn two_subscribers_each_get_a_copy() {
        let bus = BroadcastEventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(Event::RunFailed {
            run_id: run_id(),
            error: "boom".into(),
        })
        .await;

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest_but_keeps_receiving() {
        let bus = BroadcastEventBus::new(2);
        let mut sub = bus.subscribe();
        for _ in 0..5 {
            bus.publish(started(run_id())).await;
        }
        // The receiver is behind by more than its capacity; recv() skips
        // the lag and still returns an event rather than blocking forever.
        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("recv should not hang")
            .expect("bus is still open");
        assert_eq!(event.run_id(), Some(&run_id()));
    }

    #[tokio::test]
    async fn session_recorder_writes_jsonl_for_matching_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run-1.jsonl");
        let bus = Arc::new(BroadcastEventBus::default());
        let recorder = SessionRecorder::new(run_id(), path.clone());

        let bus_for_task: Arc<dyn EventBus> = bus.clone();
        let handle = tokio::spawn(async move { recorder.record(bus_for_task.as_ref()).await });

        // Give the spawned task a moment to open the file and subscribe
        // before we publish.
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(started(run_id())).await;
        bus.publish(started(RunId::new("other-run"))).await;
        bus.publish(Event::RunCompleted {
            run_id: run_id(),
            duration: harness_core::duration::DurationMs::from_millis(10),
            cost: rust_decimal::Decimal::ZERO,
        })
        .await;

        handle.await.unwrap().unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains("run-1") && !l.contains("other-run")));
        assert!(lines[1].contains("arena.run.completed"));
    }
}
