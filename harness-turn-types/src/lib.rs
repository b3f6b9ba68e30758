#![deny(missing_docs)]
//! Provider wire types and the `Provider`/`DuplexSession` contract
//! consumed by the turn pipeline.
//!
//! This crate does not implement a provider — `harness-provider-{mock,
//! openai,anthropic,gemini}` do — it only defines the boundary they
//! implement against and `harness-pipeline` calls through.

pub mod convert;
pub mod provider;
pub mod types;

pub use provider::{
    is_recoverable_error_text, DuplexInput, DuplexSession, Provider, ProviderError,
    RECOVERABLE_ERROR_SUBSTRINGS,
};
pub use types::{
    AudioCapabilities, ContentPart, ImageSource, ProviderMessage, ProviderRequest,
    ProviderResponse, Role, StopReason, StreamChunk, StreamingCapabilities, TokenUsage,
    ToolSchema,
};
