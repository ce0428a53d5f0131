//! CompletionProvider trait — the abstraction over the completion service.
//!
//! A provider knows how to send a context window to a completion model and
//! get text back, either as a complete response or as a stream of
//! fragments.
//!
//! Implementations: OpenAI-compatible HTTP client, deterministic stub.
//! Which one serves a given process is decided once, at construction time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::window::WindowTurn;

/// A single completion request: the assembled window plus model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-3.5-turbo").
    pub model: String,

    /// The window entries, in submission order.
    pub turns: Vec<WindowTurn>,

    /// Sampling temperature.
    pub temperature: f32,

    /// Maximum tokens the model may generate for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Token usage reported by the completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text.
    pub text: String,

    /// Token usage, when the service reports it.
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested).
    pub model: String,
}

/// A single fragment of a streaming response.
///
/// The fragment sequence is finite and not restartable: after the chunk
/// with `done == true` no further fragments arrive, and no fragment is
/// ever re-delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Partial text delta.
    #[serde(default)]
    pub delta: Option<String>,

    /// Whether this is the terminal chunk.
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only on the terminal chunk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The completion-service capability.
///
/// The orchestrator calls `complete()` or `stream()` without knowing which
/// implementation is behind the trait — pure polymorphism.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "stub").
    fn name(&self) -> &str;

    /// Send a request and get the complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError>;

    /// Send a request and get a stream of response fragments.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single terminal chunk.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<CompletionChunk, ProviderError>>,
        ProviderError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(CompletionChunk {
                delta: Some(response.text),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }
}
