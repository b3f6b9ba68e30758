//! The [`Provider`] trait — the single consumed interface to a model
//! backend.
//!
//! Object-safe by construction: the scheduler holds a registry of
//! `Arc<dyn Provider>` keyed by `ProviderId`, registered once at startup
//! and reused across runs, so it must be usable behind a trait object.

use crate::types::{ProviderRequest, ProviderResponse, StreamChunk, StreamingCapabilities};
use async_trait::async_trait;
use harness_core::CostInfo;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from a provider backend.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The HTTP/network request itself failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The provider rate-limited the request.
    #[error("rate limited")]
    RateLimited,

    /// Authentication/authorization failed.
    #[error("auth failed: {0}")]
    AuthFailed(String),

    /// The provider's response could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A duplex session ended (gracefully or otherwise). Carried as a
    /// typed sentinel rather than forcing callers back to
    /// substring-matching error text.
    #[error("session ended")]
    SessionEnded,

    /// A duplex session was interrupted before producing content.
    #[error("interrupted")]
    Interrupted,

    /// A transport-level failure (socket reset, timeout, broken pipe).
    #[error("transport error: {0}")]
    Transport(String),

    /// This provider does not support the requested mode (e.g. duplex).
    #[error("not supported: {0}")]
    Unsupported(String),

    /// Catch-all for backend-specific failures.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    /// Whether retrying the same request might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited
                | ProviderError::RequestFailed(_)
                | ProviderError::Transport(_)
        )
    }

    /// Whether this is one of the duplex-recoverable sentinels:
    /// `SessionEnded`, `Interrupted`, `Transport`, `RequestFailed`.
    /// The substring table over raw provider error text is the fallback
    /// for errors that didn't originate as one of these typed variants.
    pub fn is_duplex_recoverable(&self) -> bool {
        matches!(
            self,
            ProviderError::SessionEnded
                | ProviderError::Interrupted
                | ProviderError::Transport(_)
                | ProviderError::RequestFailed(_)
        )
    }
}

/// Substring table used as a last-resort fallback when a raw provider
/// error string hasn't been classified into a [`ProviderError`] sentinel.
pub const RECOVERABLE_ERROR_SUBSTRINGS: &[&str] = &[
    "output channel closed unexpectedly",
    "session ended",
    "websocket",
    "connection reset",
    "connection refused",
    "timeout",
    "eof",
    "broken pipe",
    "interrupted",
    "empty response",
];

/// True if `text` (case-insensitively) contains one of
/// [`RECOVERABLE_ERROR_SUBSTRINGS`].
pub fn is_recoverable_error_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    RECOVERABLE_ERROR_SUBSTRINGS
        .iter()
        .any(|needle| lower.contains(needle))
}

/// A registered model-provider backend.
///
/// Instances are created once at startup, registered into the scheduler's
/// provider registry, reused across every run that targets them, and
/// `close`d exactly once on engine teardown.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, as referenced by scenarios and run filters.
    fn id(&self) -> &str;

    /// The model name this provider instance calls.
    fn model(&self) -> &str;

    /// Blocking (non-streaming) completion.
    async fn predict(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Streaming completion. The returned receiver yields chunks in issue
    /// order and is closed after a terminal `EndOfStream`/`Error` chunk.
    async fn predict_stream(
        &self,
        request: ProviderRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError>;

    /// Whether this provider instance supports `predict_stream`.
    fn supports_streaming(&self) -> bool;

    /// Release any held resources (connections, subprocess handles).
    /// Called exactly once, at engine teardown.
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Compute [`CostInfo`] from token counts, using this provider's
    /// pricing. Providers that get cost back directly from the API still
    /// implement this for cases the API omits it.
    fn calculate_cost(&self, input_tokens: u64, output_tokens: u64, cached_tokens: u64)
    -> CostInfo;

    /// Duplex (bidirectional streaming) capabilities, if any. `None` means
    /// this provider cannot be used in duplex mode; present with
    /// `audio: None` means duplex text-only.
    fn streaming_capabilities(&self) -> Option<StreamingCapabilities> {
        None
    }

    /// Open a long-lived duplex session. Only called on providers whose
    /// [`Provider::streaming_capabilities`] returns `Some`.
    async fn open_duplex_session(
        &self,
        _system_prompt: &str,
    ) -> Result<Box<dyn DuplexSession>, ProviderError> {
        Err(ProviderError::Unsupported(
            "duplex sessions not implemented".into(),
        ))
    }
}

/// A message sent into an open [`DuplexSession`].
#[derive(Debug, Clone)]
pub enum DuplexInput {
    /// Raw audio frames (PCM16 mono), already resampled to the session's
    /// preferred rate.
    Audio(Vec<u8>),
    /// Text input, for text-only duplex scenarios.
    Text(String),
    /// Tool results produced after an `EndOfStream { tool_calls, .. }`
    /// round trip, sent back as a single input element.
    ToolResponses(Vec<harness_core::ToolResult>),
}

/// A long-lived bidirectional streaming session, as opened by
/// [`Provider::open_duplex_session`].
#[async_trait]
pub trait DuplexSession: Send {
    /// Push one input element into the session.
    async fn send(&mut self, input: DuplexInput) -> Result<(), ProviderError>;

    /// Await the next response element, or `None` once the session's
    /// output side has closed.
    async fn recv(&mut self) -> Option<StreamChunk>;

    /// Tear the session down. Idempotent.
    async fn close(&mut self) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ProviderError::RateLimited.is_retryable());
        assert!(ProviderError::Transport("reset".into()).is_retryable());
        assert!(!ProviderError::AuthFailed("bad key".into()).is_retryable());
    }

    #[test]
    fn duplex_recoverable_kinds() {
        assert!(ProviderError::SessionEnded.is_duplex_recoverable());
        assert!(ProviderError::Interrupted.is_duplex_recoverable());
        assert!(!ProviderError::AuthFailed("x".into()).is_duplex_recoverable());
    }

    #[test]
    fn recoverable_substring_match_is_case_insensitive() {
        assert!(is_recoverable_error_text("Connection RESET by peer"));
        assert!(is_recoverable_error_text("got an EOF"));
        assert!(!is_recoverable_error_text("invalid api key"));
    }
}
