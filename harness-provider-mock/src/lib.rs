#![deny(missing_docs)]
//! Deterministic, scripted [`Provider`] used by the test suite and by
//! `--mock-providers` runs.
//!
//! A minimal, predictable stand-in that proves the surrounding trait
//! machinery works without talking to a real backend. This version is
//! scriptable: callers queue up the exact responses, stream chunks,
//! duplex transcripts, or errors each successive call should produce, so
//! end-to-end tests can assert on exact message sequences.

use async_trait::async_trait;
use harness_core::CostInfo;
use harness_turn_types::{
    DuplexInput, DuplexSession, Provider, ProviderError, StreamChunk, StreamingCapabilities,
    TokenUsage,
};
use harness_turn_types::{ContentPart, ProviderRequest, ProviderResponse, StopReason};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted outcome for a [`MockProvider::predict`] call.
pub enum ScriptedCall {
    /// Return this response.
    Respond(ProviderResponse),
    /// Fail with this error.
    Fail(ProviderError),
}

/// A scripted, scriptable [`Provider`] implementation.
///
/// Each call consumes the next entry from the relevant queue. Calling
/// past the end of a queue is a test-authoring bug and panics — a silent
/// fallback would let a miscounted scenario pass accidentally.
pub struct MockProvider {
    id: String,
    model: String,
    predict_script: Mutex<VecDeque<ScriptedCall>>,
    stream_script: Mutex<VecDeque<Result<Vec<StreamChunk>, ProviderError>>>,
    duplex_script: Mutex<VecDeque<VecDeque<StreamChunk>>>,
    predict_calls: AtomicUsize,
    streaming_capabilities: Option<StreamingCapabilities>,
    price_per_input_token: Decimal,
    price_per_output_token: Decimal,
}

impl MockProvider {
    /// Create a provider with no scripted behavior yet. Use the
    /// `with_*` builders to queue responses before registering it.
    #[must_use]
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            predict_script: Mutex::new(VecDeque::new()),
            stream_script: Mutex::new(VecDeque::new()),
            duplex_script: Mutex::new(VecDeque::new()),
            predict_calls: AtomicUsize::new(0),
            streaming_capabilities: None,
            price_per_input_token: Decimal::new(1, 6), // $0.000001/token
            price_per_output_token: Decimal::new(2, 6),
        }
    }

    /// Convenience constructor for a single-turn reference scenario:
    /// echoes `reply` back with 1 input / 1 output token on every
    /// `predict` call.
    #[must_use]
    pub fn echoing(id: impl Into<String>, model: impl Into<String>, reply: impl Into<String>) -> Self {
        let mut provider = Self::new(id, model);
        provider.push_response(ProviderResponse {
            content: vec![ContentPart::Text { text: reply.into() }],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage {
                input_tokens: 1,
                output_tokens: 1,
                cached_tokens: 0,
            },
            model: provider.model.clone(),
            cost_usd: None,
            raw: None,
        });
        provider
    }

    /// Queue a successful response for the next `predict` call.
    pub fn push_response(&mut self, response: ProviderResponse) {
        self.predict_script
            .get_mut()
            .unwrap()
            .push_back(ScriptedCall::Respond(response));
    }

    /// Queue a failure for the next `predict` call.
    pub fn push_error(&mut self, error: ProviderError) {
        self.predict_script
            .get_mut()
            .unwrap()
            .push_back(ScriptedCall::Fail(error));
    }

    /// Queue a successful streamed response for the next
    /// `predict_stream` call.
    pub fn push_stream(&mut self, chunks: Vec<StreamChunk>) {
        self.stream_script.get_mut().unwrap().push_back(Ok(chunks));
    }

    /// Queue a duplex session transcript: the chunks `recv()` yields, in
    /// order, for the next `open_duplex_session` call.
    pub fn push_duplex_session(&mut self, chunks: Vec<StreamChunk>) {
        self.duplex_script
            .get_mut()
            .unwrap()
            .push_back(chunks.into_iter().collect());
    }

    /// Advertise duplex streaming capabilities (audio or text-only).
    #[must_use]
    pub fn with_streaming_capabilities(mut self, capabilities: StreamingCapabilities) -> Self {
        self.streaming_capabilities = Some(capabilities);
        self
    }

    /// Number of `predict` calls made so far.
    pub fn predict_call_count(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn predict(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .predict_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("MockProvider {}: predict() called with an empty script", self.id));
        match next {
            ScriptedCall::Respond(response) => Ok(response),
            ScriptedCall::Fail(error) => Err(error),
        }
    }

    async fn predict_stream(
        &self,
        _request: ProviderRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ProviderError> {
        let next = self
            .stream_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("MockProvider {}: predict_stream() called with an empty script", self.id));
        let chunks = next?;
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn calculate_cost(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
    ) -> CostInfo {
        CostInfo::from_pricing(
            input_tokens,
            output_tokens,
            cached_tokens,
            self.price_per_input_token,
            self.price_per_output_token,
        )
    }

    fn streaming_capabilities(&self) -> Option<StreamingCapabilities> {
        self.streaming_capabilities
    }

    async fn open_duplex_session(
        &self,
        _system_prompt: &str,
    ) -> Result<Box<dyn DuplexSession>, ProviderError> {
        let chunks = self.duplex_script.lock().unwrap().pop_front().unwrap_or_else(|| {
            panic!(
                "MockProvider {}: open_duplex_session() called with an empty script",
                self.id
            )
        });
        Ok(Box::new(MockDuplexSession {
            pending: chunks,
            sent: Vec::new(),
        }))
    }
}

/// A scripted [`DuplexSession`] that replays a fixed transcript of
/// [`StreamChunk`]s and records every [`DuplexInput`] sent into it.
struct MockDuplexSession {
    pending: VecDeque<StreamChunk>,
    sent: Vec<DuplexInput>,
}

#[async_trait]
impl DuplexSession for MockDuplexSession {
    async fn send(&mut self, input: DuplexInput) -> Result<(), ProviderError> {
        self.sent.push(input);
        Ok(())
    }

    async fn recv(&mut self) -> Option<StreamChunk> {
        self.pending.pop_front()
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_turn_types::{Role, ProviderMessage};

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: None,
            messages: vec![ProviderMessage {
                role: Role::User,
                content: vec![ContentPart::Text { text: "hi".into() }],
            }],
            tools: Vec::new(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            seed: None,
            system: None,
            extra: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn echoing_provider_returns_configured_reply() {
        let provider = MockProvider::echoing("p", "mock-1", "pong");
        let response = provider.predict(request()).await.unwrap();
        assert_eq!(response.text(), "pong");
        assert_eq!(response.usage.input_tokens, 1);
        assert_eq!(response.usage.output_tokens, 1);
        let cost = provider.calculate_cost(1, 1, 0);
        assert!(cost.total_cost > Decimal::ZERO);
    }

    #[tokio::test]
    async fn second_call_fails_when_scripted() {
        let mut provider = MockProvider::new("p", "mock-1");
        provider.push_response(ProviderResponse {
            content: vec![ContentPart::Text { text: "first".into() }],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
            model: "mock-1".into(),
            cost_usd: None,
            raw: None,
        });
        provider.push_error(ProviderError::RequestFailed("boom".into()));

        assert!(provider.predict(request()).await.is_ok());
        let err = provider.predict(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed(_)));
        assert_eq!(provider.predict_call_count(), 2);
    }

    #[tokio::test]
    async fn streaming_deltas_arrive_in_order() {
        let mut provider = MockProvider::new("p", "mock-1");
        provider.push_stream(vec![
            StreamChunk::Delta { text: "Hel".into() },
            StreamChunk::Delta { text: "lo".into() },
            StreamChunk::Delta { text: " world".into() },
            StreamChunk::EndOfStream {
                content: "Hello world".into(),
                tool_calls: Vec::new(),
                usage: TokenUsage::default(),
                finish_reason: StopReason::EndTurn,
            },
        ]);

        let mut rx = provider.predict_stream(request()).await.unwrap();
        let mut deltas = String::new();
        let mut saw_end = false;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::Delta { text } => deltas.push_str(&text),
                StreamChunk::EndOfStream { content, .. } => {
                    assert_eq!(content, "Hello world");
                    saw_end = true;
                }
                _ => {}
            }
        }
        assert_eq!(deltas, "Hello world");
        assert!(saw_end);
    }

    #[tokio::test]
    async fn duplex_session_replays_scripted_transcript() {
        let mut provider = MockProvider::new("p", "mock-1")
            .with_streaming_capabilities(StreamingCapabilities::default());
        provider.push_duplex_session(vec![StreamChunk::EndOfStream {
            content: String::new(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            finish_reason: StopReason::EndTurn,
        }]);
        provider.push_duplex_session(vec![StreamChunk::EndOfStream {
            content: "hello".into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            finish_reason: StopReason::EndTurn,
        }]);

        let mut first = provider.open_duplex_session("sys").await.unwrap();
        let first_chunk = first.recv().await.unwrap();
        assert!(matches!(first_chunk, StreamChunk::EndOfStream { ref content, .. } if content.is_empty()));

        let mut second = provider.open_duplex_session("sys").await.unwrap();
        second.send(DuplexInput::Text("retry".into())).await.unwrap();
        let second_chunk = second.recv().await.unwrap();
        assert!(matches!(second_chunk, StreamChunk::EndOfStream { ref content, .. } if content == "hello"));
    }
}
