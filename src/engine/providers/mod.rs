// vaultchat Engine — AI Provider Interface
// Every configured provider speaks the OpenAI-compatible wire format; they
// differ only in base URL, auth header and model-list shape. `AiProvider`
// is the seam the chat session calls through, so tests can substitute it.

pub mod models;
pub mod openai;
pub mod sse;

pub use openai::CompletionClient;

use crate::atoms::error::ProviderError;
use crate::atoms::types::{ChatCompletion, ChatMessage, LlmProvider, SamplingParams};
use crate::engine::state::AbortSignal;
use async_trait::async_trait;

/// Per-chunk callback: `(text, done)`. Called with `("", true)` exactly once
/// when a stream completes.
pub type ChunkCallback<'a> = &'a mut (dyn FnMut(&str, bool) + Send);

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Streamed chat completion.
    async fn stream_chat(
        &self,
        provider: &LlmProvider,
        model: &str,
        messages: &[ChatMessage],
        sampling: SamplingParams,
        on_chunk: ChunkCallback<'_>,
        abort: &AbortSignal,
    ) -> Result<ChatCompletion, ProviderError>;

    /// Non-streaming completion, used for background extraction.
    /// `abort` cancels the request and any retry wait.
    async fn complete(
        &self,
        provider: &LlmProvider,
        model: &str,
        messages: &[ChatMessage],
        sampling: SamplingParams,
        abort: &AbortSignal,
    ) -> Result<ChatCompletion, ProviderError>;

    /// Model ids the provider offers, sorted and de-duplicated.
    async fn list_models(&self, provider: &LlmProvider, abort: &AbortSignal) -> Result<Vec<String>, ProviderError>;
}

/// `{base}/{path}` with exactly one slash between.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
