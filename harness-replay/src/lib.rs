#![deny(missing_docs)]
//! Recording adapter registry: the `EvalConversationExecutor`'s only
//! dependency for turning a `Scenario.Eval.Recording{path, type}`
//! reference into messages and metadata without invoking a provider.
//!
//! A registry keyed by a type string, dispatching to whichever
//! registered backend can handle the request.
//! [`RecordingAdapterRegistry`] holds that map; [`FsJsonRecordingAdapter`]
//! is the one concrete backend this workspace ships, reading recordings
//! written by `harness-events::SessionRecorder`'s sibling snapshot
//! format.

use async_trait::async_trait;
use harness_core::error::StateError;
use harness_core::recording::{LoadedRecording, RecordingAdapter, RecordingRef};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Looks up a [`RecordingAdapter`] by `recording_type`, falling back to
/// asking every registered adapter whether it `can_handle` a given
/// `(source, recording_type)` pair if no exact type match is registered.
///
/// Mirrors `ToolRegistry`'s flat map-plus-iteration lookup shape: most
/// calls hit the type-keyed fast path, and `can_handle` exists for
/// adapters that serve more than one type string (e.g. a cloud-storage
/// adapter that handles both `"s3"` and `"gcs"`).
#[derive(Default)]
pub struct RecordingAdapterRegistry {
    adapters: Vec<(String, Arc<dyn RecordingAdapter>)>,
}

impl RecordingAdapterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` under `recording_type`.
    pub fn register(&mut self, recording_type: impl Into<String>, adapter: Arc<dyn RecordingAdapter>) {
        self.adapters.push((recording_type.into(), adapter));
    }

    /// Find the adapter registered for `recording_type`, if any.
    pub fn get(&self, recording_type: &str) -> Option<&Arc<dyn RecordingAdapter>> {
        self.adapters
            .iter()
            .find(|(ty, _)| ty == recording_type)
            .map(|(_, adapter)| adapter)
    }

    /// Find an adapter willing to handle `(source, recording_type)`,
    /// trying the type-keyed entry first and then falling back to
    /// `can_handle` across every registered adapter.
    pub fn resolve(&self, source: &str, recording_type: &str) -> Option<&Arc<dyn RecordingAdapter>> {
        self.get(recording_type).or_else(|| {
            self.adapters
                .iter()
                .find(|(_, adapter)| adapter.can_handle(source, recording_type))
                .map(|(_, adapter)| adapter)
        })
    }

    /// List every recording `source` makes available under `recording_type`.
    pub async fn enumerate(
        &self,
        source: &str,
        recording_type: &str,
    ) -> Result<Vec<RecordingRef>, StateError> {
        let adapter = self.resolve(source, recording_type).ok_or_else(|| {
            StateError::NotFound(format!("no recording adapter for type: {recording_type}"))
        })?;
        adapter.enumerate(source).await
    }

    /// Load one recording, resolving its adapter by `reference.recording_type`.
    pub async fn load(&self, reference: &RecordingRef) -> Result<LoadedRecording, StateError> {
        let adapter = self.get(&reference.recording_type).ok_or_else(|| {
            StateError::NotFound(format!(
                "no recording adapter for type: {}",
                reference.recording_type
            ))
        })?;
        adapter.load(reference).await
    }
}

/// A [`RecordingAdapter`] reading recordings from the local filesystem:
/// each recording is one JSON file (not JSONL — this is a conversation
/// snapshot, distinct from `harness-events`'s per-event JSONL transcript)
/// deserializing directly to [`LoadedRecording`]. `recording_type` is
/// `"fs_json"`.
pub struct FsJsonRecordingAdapter;

/// The `recording_type` string this adapter registers itself under.
pub const FS_JSON_RECORDING_TYPE: &str = "fs_json";

#[async_trait]
impl RecordingAdapter for FsJsonRecordingAdapter {
    fn can_handle(&self, _source: &str, recording_type: &str) -> bool {
        recording_type == FS_JSON_RECORDING_TYPE
    }

    async fn enumerate(&self, source: &str) -> Result<Vec<RecordingRef>, StateError> {
        let dir = PathBuf::from(source);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StateError::BackendUnavailable(format!("{}: {e}", dir.display())))?;
        let mut refs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StateError::BackendUnavailable(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                refs.push(RecordingRef {
                    path: path.display().to_string(),
                    recording_type: FS_JSON_RECORDING_TYPE.to_string(),
                });
            }
        }
        refs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(refs)
    }

    async fn load(&self, reference: &RecordingRef) -> Result<LoadedRecording, StateError> {
        if reference.path.is_empty() {
            return Err(StateError::Other(Box::<dyn std::error::Error + Send + Sync>::from(
                "recording reference has an empty path",
            )));
        }
        let path = Path::new(&reference.path);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StateError::NotFound(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&bytes).map_err(|e| StateError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::conversation::{Message, Role};

    #[tokio::test]
    async fn registry_resolves_by_exact_type() {
        let mut registry = RecordingAdapterRegistry::new();
        registry.register(FS_JSON_RECORDING_TYPE, Arc::new(FsJsonRecordingAdapter));
        assert!(registry.get(FS_JSON_RECORDING_TYPE).is_some());
        assert!(registry.get("unregistered").is_none());
    }

    #[tokio::test]
    async fn unregistered_type_errors_on_load() {
        let registry = RecordingAdapterRegistry::new();
        let err = registry
            .load(&RecordingRef {
                path: "x".into(),
                recording_type: "nope".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn fs_json_adapter_round_trips_a_recording() {
        let dir = tempfile::tempdir().unwrap();
        let recording = LoadedRecording {
            messages: vec![Message::text(Role::User, "hi"), Message::text(Role::Assistant, "pong")],
            metadata: Default::default(),
        };
        let path = dir.path().join("r1.json");
        tokio::fs::write(&path, serde_json::to_vec(&recording).unwrap())
            .await
            .unwrap();

        let mut registry = RecordingAdapterRegistry::new();
        registry.register(FS_JSON_RECORDING_TYPE, Arc::new(FsJsonRecordingAdapter));

        let refs = registry
            .enumerate(dir.path().to_str().unwrap(), FS_JSON_RECORDING_TYPE)
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);

        let loaded = registry.load(&refs[0]).await.unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].content, "pong");
    }

    #[tokio::test]
    async fn missing_recording_path_errors_before_load() {
        let adapter = FsJsonRecordingAdapter;
        let err = adapter
            .load(&RecordingRef {
                path: String::new(),
                recording_type: FS_JSON_RECORDING_TYPE.to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::Other(_)));
    }
}
