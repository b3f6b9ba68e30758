#![deny(missing_docs)]
//! Redis-backed implementation of [`harness_core::StateStore`] and
//! [`harness_core::ArenaStateStore`].
//!
//! Keys are namespaced `{prefix}:{id}` for conversations and
//! `{prefix}:run:{run_id}` for [`RunMetadata`]. Values are JSON-encoded.
//! TTL, when configured, is applied on every write via `SET ... EX`.

use async_trait::async_trait;
use harness_core::conversation::{ConversationState, Message};
use harness_core::error::StateError;
use harness_core::id::{ConversationId, RunId};
use harness_core::run::RunMetadata;
use harness_core::state::{ArenaStateStore, StateStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// A Redis-backed [`StateStore`]/[`ArenaStateStore`].
pub struct RedisStateStore {
    conn: ConnectionManager,
    prefix: String,
    ttl: Option<Duration>,
}

impl RedisStateStore {
    /// Connect to `address` (a `redis://...` URL or bare `host:port`),
    /// optionally authenticating with `password` and selecting a logical
    /// `database`. `ttl`, if set, is applied to every write.
    pub async fn connect(
        address: &str,
        password: Option<&str>,
        database: i64,
        ttl: Option<Duration>,
        prefix: impl Into<String>,
    ) -> Result<Self, StateError> {
        let url = build_redis_url(address, password, database);
        let client =
            redis::Client::open(url).map_err(|e| StateError::BackendUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StateError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
            ttl,
        })
    }

    fn conversation_key(&self, id: &str) -> String {
        format!("{}:{id}", self.prefix)
    }

    fn metadata_key(&self, run_id: &str) -> String {
        format!("{}:run:{run_id}", self.prefix)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StateError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StateError::BackendUnavailable(e.to_string()))?;
        match raw {
            Some(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| StateError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StateError> {
        let payload =
            serde_json::to_string(value).map_err(|e| StateError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        let result = match self.ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, payload, ttl.as_secs().max(1))
                    .await
            }
            None => conn.set::<_, _, ()>(key, payload).await,
        };
        result.map_err(|e| StateError::WriteFailed(e.to_string()))
    }
}

fn build_redis_url(address: &str, password: Option<&str>, database: i64) -> String {
    if address.starts_with("redis://") || address.starts_with("rediss://") {
        return address.to_string();
    }
    match password {
        Some(pw) => format!("redis://:{pw}@{address}/{database}"),
        None => format!("redis://{address}/{database}"),
    }
}

/// Parse a Redis TTL string (e.g. `"24h"`, `"30m"`, `"45s"`, or a bare
/// integer meaning seconds) into a `Duration`. Used when loading
/// `StateStoreConfig::Redis { ttl, .. }` from configuration.
pub fn parse_ttl(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let (number, unit) = raw.split_at(raw.len() - 1);
    let value: u64 = number.parse().map_err(|_| format!("invalid TTL: {raw}"))?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86400,
        _ => return Err(format!("invalid TTL unit in: {raw}")),
    };
    Ok(Duration::from_secs(secs))
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn save(&self, state: &ConversationState) -> Result<(), StateError> {
        self.set_json(&self.conversation_key(state.id.as_str()), state)
            .await
    }

    async fn load(&self, id: &ConversationId) -> Result<ConversationState, StateError> {
        self.get_json(&self.conversation_key(id.as_str()))
            .await?
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    async fn fork(
        &self,
        base_id: &ConversationId,
        new_id: &ConversationId,
    ) -> Result<(), StateError> {
        // GET + SET, not a Lua-script transaction: a concurrent write to
        // `base_id` between the GET and this SET would not be reflected
        // in the fork. Best-effort, not linearizable.
        let base: ConversationState = self
            .get_json(&self.conversation_key(base_id.as_str()))
            .await?
            .ok_or_else(|| StateError::NotFound(base_id.to_string()))?;
        let forked = ConversationState {
            id: new_id.clone(),
            ..base
        };
        self.save(&forked).await
    }
}

#[async_trait]
impl ArenaStateStore for RedisStateStore {
    async fn save_metadata(&self, metadata: &RunMetadata) -> Result<(), StateError> {
        self.set_json(&self.metadata_key(metadata.run_id.as_str()), metadata)
            .await
    }

    async fn get_run_result(&self, run_id: &RunId) -> Result<RunMetadata, StateError> {
        self.get_json(&self.metadata_key(run_id.as_str()))
            .await?
            .ok_or_else(|| StateError::NotFound(run_id.to_string()))
    }

    async fn update_last_assistant_message(
        &self,
        id: &ConversationId,
        updated: Message,
    ) -> Result<(), StateError> {
        let mut state = self.load(id).await?;
        let index = state
            .last_assistant_index()
            .ok_or_else(|| StateError::NotFound(format!("{id}: no assistant message")))?;
        state.messages[index] = updated;
        self.save(&state).await
    }

    async fn delete(&self, id: &ConversationId) -> Result<(), StateError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(self.conversation_key(id.as_str()))
            .await
            .map_err(|e| StateError::WriteFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ttl_supports_suffixed_units() {
        assert_eq!(parse_ttl("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_ttl("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_ttl("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_ttl("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn parse_ttl_supports_bare_seconds() {
        assert_eq!(parse_ttl("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn parse_ttl_rejects_garbage() {
        assert!(parse_ttl("soon").is_err());
    }

    #[test]
    fn build_url_passes_through_existing_scheme() {
        assert_eq!(
            build_redis_url("redis://host:6379", None, 0),
            "redis://host:6379"
        );
    }

    #[test]
    fn build_url_adds_scheme_password_and_db() {
        assert_eq!(
            build_redis_url("host:6379", Some("secret"), 2),
            "redis://:secret@host:6379/2"
        );
    }
}
