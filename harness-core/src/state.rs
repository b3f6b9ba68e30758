//! The state-store boundary — how conversations persist across turns.

use crate::conversation::{ConversationState, Message};
use crate::error::StateError;
use crate::id::{ConversationId, RunId};
use crate::run::RunMetadata;
use async_trait::async_trait;

/// Persists and retrieves [`ConversationState`] by [`ConversationId`].
///
/// Implementations: an in-memory map (the default, safe for concurrent
/// access) and a Redis-backed store (TTL- and prefix-configurable). Both
/// preserve message order and surface write failures — there is no silent
/// drop.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upsert by `state.id`.
    async fn save(&self, state: &ConversationState) -> Result<(), StateError>;

    /// Load by id. Returns `StateError::NotFound` for unknown ids.
    async fn load(&self, id: &ConversationId) -> Result<ConversationState, StateError>;

    /// Copy-on-write: `new_id` becomes an independent conversation whose
    /// initial messages equal `base_id`'s. Subsequent saves to `new_id`
    /// must not affect `base_id`.
    async fn fork(&self, base_id: &ConversationId, new_id: &ConversationId) -> Result<(), StateError>;
}

/// The Arena-specific extension a [`StateStore`] backend additionally
/// implements: per-run metadata keyed by [`RunId`], plus the two mutating
/// operations the pipeline and duplex retry loop need beyond plain
/// save/load.
#[async_trait]
pub trait ArenaStateStore: StateStore {
    /// Persist `RunMetadata`, upserting by `metadata.run_id`.
    async fn save_metadata(&self, metadata: &RunMetadata) -> Result<(), StateError>;

    /// Fetch previously saved `RunMetadata` for `run_id`.
    async fn get_run_result(&self, run_id: &RunId) -> Result<RunMetadata, StateError>;

    /// Rewrite the conversation's last assistant message in place, without
    /// appending a new message. Used by the assertion layer to attach
    /// `meta["assertions"]`/`meta["eval_results"]` after evaluation.
    ///
    /// Returns `StateError::NotFound` if the conversation has no assistant
    /// message yet.
    async fn update_last_assistant_message(
        &self,
        id: &ConversationId,
        updated: Message,
    ) -> Result<(), StateError>;

    /// Remove a conversation's state entirely. Used by the duplex retry
    /// loop to clear a conversation before rebuilding the session from
    /// scratch. A no-op (not an error) if the id doesn't exist.
    async fn delete(&self, id: &ConversationId) -> Result<(), StateError>;
}
