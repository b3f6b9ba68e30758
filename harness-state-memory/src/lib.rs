#![deny(missing_docs)]
//! In-memory implementation of [`harness_core::StateStore`] and
//! [`harness_core::ArenaStateStore`].
//!
//! Uses a `HashMap` behind an `RwLock` for concurrent access — the default
//! backend, suitable for testing and single-process use.
//! `fork` clones the base conversation's messages so subsequent writes to
//! either id never alias the other's `Vec`.

use async_trait::async_trait;
use harness_core::conversation::{ConversationState, Message};
use harness_core::error::StateError;
use harness_core::id::{ConversationId, RunId};
use harness_core::run::RunMetadata;
use harness_core::state::{ArenaStateStore, StateStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory state store backed by a `HashMap` behind an `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, ConversationState>>,
    run_metadata: RwLock<HashMap<String, RunMetadata>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, state: &ConversationState) -> Result<(), StateError> {
        let mut data = self.conversations.write().await;
        data.insert(state.id.as_str().to_string(), state.clone());
        Ok(())
    }

    async fn load(&self, id: &ConversationId) -> Result<ConversationState, StateError> {
        let data = self.conversations.read().await;
        data.get(id.as_str())
            .cloned()
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    async fn fork(
        &self,
        base_id: &ConversationId,
        new_id: &ConversationId,
    ) -> Result<(), StateError> {
        let mut data = self.conversations.write().await;
        let base = data
            .get(base_id.as_str())
            .cloned()
            .ok_or_else(|| StateError::NotFound(base_id.to_string()))?;
        let forked = ConversationState {
            id: new_id.clone(),
            ..base
        };
        data.insert(new_id.as_str().to_string(), forked);
        Ok(())
    }
}

#[async_trait]
impl ArenaStateStore for MemoryStore {
    async fn save_metadata(&self, metadata: &RunMetadata) -> Result<(), StateError> {
        let mut data = self.run_metadata.write().await;
        data.insert(metadata.run_id.as_str().to_string(), metadata.clone());
        Ok(())
    }

    async fn get_run_result(&self, run_id: &RunId) -> Result<RunMetadata, StateError> {
        let data = self.run_metadata.read().await;
        data.get(run_id.as_str())
            .cloned()
            .ok_or_else(|| StateError::NotFound(run_id.to_string()))
    }

    async fn update_last_assistant_message(
        &self,
        id: &ConversationId,
        updated: Message,
    ) -> Result<(), StateError> {
        let mut data = self.conversations.write().await;
        let state = data
            .get_mut(id.as_str())
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        let index = state
            .last_assistant_index()
            .ok_or_else(|| StateError::NotFound(format!("{id}: no assistant message")))?;
        state.messages[index] = updated;
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<(), StateError> {
        let mut conversations = self.conversations.write().await;
        conversations.remove(id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::conversation::Role;

    fn state(id: &str) -> ConversationState {
        let mut s = ConversationState::new(ConversationId::new(id));
        s.messages.push(Message::text(Role::User, "hi"));
        s
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let store = MemoryStore::new();
        store.save(&state("c1")).await.unwrap();
        let loaded = store.load(&ConversationId::new("c1")).await.unwrap();
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.load(&ConversationId::new("missing")).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn fork_copies_without_aliasing() {
        let store = MemoryStore::new();
        store.save(&state("base")).await.unwrap();
        store
            .fork(&ConversationId::new("base"), &ConversationId::new("forked"))
            .await
            .unwrap();

        let mut forked = store.load(&ConversationId::new("forked")).await.unwrap();
        forked.messages.push(Message::text(Role::User, "extra"));
        store.save(&forked).await.unwrap();

        let base = store.load(&ConversationId::new("base")).await.unwrap();
        assert_eq!(base.messages.len(), 1);
    }

    #[tokio::test]
    async fn update_last_assistant_message_rewrites_in_place() {
        let store = MemoryStore::new();
        let mut s = state("c1");
        s.messages.push(Message::text(Role::Assistant, "hello"));
        store.save(&s).await.unwrap();

        let mut updated = s.messages[1].clone();
        updated
            .meta
            .insert("assertions".into(), serde_json::json!({"all_passed": true}));
        store
            .update_last_assistant_message(&ConversationId::new("c1"), updated)
            .await
            .unwrap();

        let loaded = store.load(&ConversationId::new("c1")).await.unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert!(loaded.messages[1].meta.contains_key("assertions"));
    }

    #[tokio::test]
    async fn update_last_assistant_message_without_one_is_not_found() {
        let store = MemoryStore::new();
        store.save(&state("c1")).await.unwrap();
        let err = store
            .update_last_assistant_message(&ConversationId::new("c1"), Message::text(Role::Assistant, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_noop_on_missing_id() {
        let store = MemoryStore::new();
        store.delete(&ConversationId::new("nope")).await.unwrap();
    }

    #[tokio::test]
    async fn run_metadata_roundtrips() {
        use harness_core::run::RunCombination;
        use harness_core::id::{ProviderId, Region, ScenarioId};

        let store = MemoryStore::new();
        let combo = RunCombination {
            region: Region::default(),
            scenario_id: ScenarioId::new("s"),
            provider_id: ProviderId::new("p"),
            eval_id: None,
        };
        let run_id = RunId::new("r1");
        let metadata = RunMetadata::started(run_id.clone(), &combo, 0);
        store.save_metadata(&metadata).await.unwrap();
        let loaded = store.get_run_result(&run_id).await.unwrap();
        assert_eq!(loaded.run_id, run_id);
    }
}
