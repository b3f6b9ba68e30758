//! Recording adapters — loading a previously captured conversation for
//! replay evaluation.

use crate::conversation::Message;
use crate::error::StateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A locator for one recorded conversation, as returned by
/// [`RecordingAdapter::enumerate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingRef {
    /// Adapter-specific locator string (path, URL, object key, ...).
    pub path: String,
    /// The adapter type string this ref belongs to.
    pub recording_type: String,
}

/// Loads a previously captured conversation without invoking a provider.
///
/// Implementations are looked up by `recording_type` from an adapter
/// registry (see `harness-replay`); this crate only defines the contract.
#[async_trait]
pub trait RecordingAdapter: Send + Sync {
    /// Whether this adapter can load recordings of the given `source`
    /// (an opaque locator root, e.g. a directory or bucket) and `recording_type`.
    fn can_handle(&self, source: &str, recording_type: &str) -> bool;

    /// List the recordings available under `source`.
    async fn enumerate(&self, source: &str) -> Result<Vec<RecordingRef>, StateError>;

    /// Load one recording's messages and metadata.
    async fn load(&self, reference: &RecordingRef) -> Result<LoadedRecording, StateError>;
}

/// The result of loading a recording: its messages and free-form metadata,
/// in the same shape a live `ConversationState` would carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedRecording {
    /// The recorded messages, in original order.
    pub messages: Vec<Message>,
    /// Free-form metadata captured alongside the recording.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}
