//! Deterministic stub provider — no network, no keys, no cost.
//!
//! Serves development and tests. Replies come from a scripted queue; when
//! the queue is empty the stub echoes the last user entry of the window.
//! Identical inputs always produce identical outputs, so anything built on
//! top of it stays reproducible.

use async_trait::async_trait;
use parlor_core::error::ProviderError;
use parlor_core::provider::{Completion, CompletionChunk, CompletionProvider, CompletionRequest, Usage};
use parlor_core::window::WireRole;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A scripted outcome for one `complete`/`stream` call.
enum ScriptedOutcome {
    Reply(String),
    Fail(ProviderError),
}

/// The deterministic completion stub.
pub struct StubProvider {
    script: Mutex<VecDeque<ScriptedOutcome>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self { script: Mutex::new(VecDeque::new()) }
    }

    /// Queue a reply for the next unscripted call.
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(ScriptedOutcome::Reply(text.into()));
        self
    }

    /// Queue a failure for the next unscripted call.
    pub fn with_failure(self, error: ProviderError) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(ScriptedOutcome::Fail(error));
        self
    }

    /// Rough token estimate for stub usage accounting (~4 chars/token).
    fn estimate(text: &str) -> u32 {
        (text.len().div_ceil(4)) as u32
    }

    fn next_outcome(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let scripted = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        match scripted {
            Some(ScriptedOutcome::Reply(text)) => Ok(text),
            Some(ScriptedOutcome::Fail(error)) => Err(error),
            None => {
                let last_user = request
                    .turns
                    .iter()
                    .rev()
                    .find(|t| t.role == WireRole::User)
                    .map(|t| t.text.as_str())
                    .unwrap_or("");
                Ok(format!("You said: {last_user}"))
            }
        }
    }

    fn usage_for(request: &CompletionRequest, reply: &str) -> Usage {
        let prompt_tokens: u32 = request.turns.iter().map(|t| Self::estimate(&t.text)).sum();
        let completion_tokens = Self::estimate(reply);
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let text = self.next_outcome(&request)?;
        let usage = Self::usage_for(&request, &text);
        Ok(Completion { text, usage: Some(usage), model: request.model })
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<CompletionChunk, ProviderError>>,
        ProviderError,
    > {
        let text = self.next_outcome(&request)?;
        let usage = Self::usage_for(&request, &text);

        // Word-granular fragments, then the terminal chunk with usage.
        let fragments: Vec<String> =
            text.split_inclusive(' ').map(str::to_string).collect();

        let (tx, rx) = tokio::sync::mpsc::channel(fragments.len().max(1) + 1);
        tokio::spawn(async move {
            for fragment in fragments {
                if tx
                    .send(Ok(CompletionChunk { delta: Some(fragment), done: false, usage: None }))
                    .await
                    .is_err()
                {
                    return; // receiver dropped
                }
            }
            let _ = tx
                .send(Ok(CompletionChunk { delta: None, done: true, usage: Some(usage) }))
                .await;
        });

        Ok(rx)
    }
}
