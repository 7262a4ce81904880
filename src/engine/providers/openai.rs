// vaultchat Engine — OpenAI-Compatible Completion Client
// Handles OpenAI, OpenRouter, Ollama, LM Studio, Azure, Gemini's OpenAI
// endpoint and any other `/chat/completions` API. Implements AiProvider.

use crate::atoms::error::ProviderError;
use crate::atoms::types::{ChatCompletion, ChatMessage, LlmProvider, SamplingParams};
use crate::engine::http::{build_client, is_retryable_status, parse_retry_after, truncate_utf8, RetryPolicy};
use crate::engine::providers::sse::{self, parse_usage};
use crate::engine::providers::{endpoint, models, AiProvider, ChunkCallback};
use crate::engine::routing::auth_headers;
use crate::engine::state::{AbortSignal, CompletionState};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};

pub struct CompletionClient {
    client: Client,
    retry: RetryPolicy,
}

impl Default for CompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionClient {
    pub fn new() -> Self {
        CompletionClient { client: build_client(), retry: RetryPolicy::default() }
    }

    /// Same client with a different retry schedule for `complete`.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect()
    }

    /// Request body for `/chat/completions`.
    pub fn build_body(model: &str, messages: &[ChatMessage], sampling: SamplingParams, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": Self::format_messages(messages),
            "stream": stream,
            "temperature": sampling.temperature,
            "top_p": sampling.top_p,
        });
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    fn post(&self, provider: &LlmProvider, body: &Value) -> RequestBuilder {
        let url = endpoint(&provider.base_url, "chat/completions");
        let mut req = self.client.post(&url).header("Content-Type", "application/json");
        for (name, value) in auth_headers(provider.auth_header, &provider.api_key) {
            req = req.header(name, value);
        }
        req.json(body)
    }

    /// Consume a non-2xx response into the matching error.
    async fn error_from(provider: &LlmProvider, response: Response) -> ProviderError {
        let status = response.status().as_u16();
        let body_text = response.text().await.unwrap_or_default();
        error!("[engine] {} error {}: {}", provider.id, status, truncate_utf8(&body_text, 500));
        ProviderError::from_status(status, body_text)
    }
}

fn advance(state: &mut CompletionState, next: CompletionState, provider_id: &str) {
    debug_assert!(!state.is_terminal() && state.can_advance_to(next), "{:?} → {:?}", state, next);
    debug!("[engine] {} {:?} → {:?}", provider_id, state, next);
    *state = next;
}

#[async_trait]
impl AiProvider for CompletionClient {
    async fn stream_chat(
        &self,
        provider: &LlmProvider,
        model: &str,
        messages: &[ChatMessage],
        sampling: SamplingParams,
        on_chunk: ChunkCallback<'_>,
        abort: &AbortSignal,
    ) -> Result<ChatCompletion, ProviderError> {
        let mut state = CompletionState::Idle;
        if abort.is_aborted() {
            advance(&mut state, CompletionState::Cancelled, &provider.id);
            return Err(ProviderError::Cancelled);
        }

        let body = Self::build_body(model, messages, sampling, true);
        info!("[engine] Streaming {} model={} messages={}", provider.id, model, messages.len());
        advance(&mut state, CompletionState::Sent, &provider.id);

        let response = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                advance(&mut state, CompletionState::Cancelled, &provider.id);
                return Err(ProviderError::Cancelled);
            }
            sent = self.post(provider, &body).send() => match sent {
                Ok(r) => r,
                Err(e) => {
                    advance(&mut state, CompletionState::Failed, &provider.id);
                    error!("[engine] {} request failed: {}", provider.id, e);
                    return Err(ProviderError::Network(e.to_string()));
                }
            },
        };

        if !response.status().is_success() {
            advance(&mut state, CompletionState::Failed, &provider.id);
            return Err(Self::error_from(provider, response).await);
        }

        advance(&mut state, CompletionState::Streaming, &provider.id);
        match sse::read_stream(response.bytes_stream(), on_chunk, abort).await {
            Ok(done) => {
                advance(&mut state, CompletionState::Completed, &provider.id);
                info!(
                    "[engine] {} finished: {} chars, usage={:?}",
                    provider.id,
                    done.content.len(),
                    done.usage
                );
                Ok(done)
            }
            Err(e) => {
                let next = if e.is_cancelled() { CompletionState::Cancelled } else { CompletionState::Failed };
                advance(&mut state, next, &provider.id);
                if !e.is_cancelled() {
                    error!("[engine] {} stream failed: {}", provider.id, e);
                }
                Err(e)
            }
        }
    }

    /// Retries transient statuses with backoff; nothing has been shown to
    /// the user yet, so a retry is invisible. `abort` ends both the request
    /// and the wait between attempts.
    async fn complete(
        &self,
        provider: &LlmProvider,
        model: &str,
        messages: &[ChatMessage],
        sampling: SamplingParams,
        abort: &AbortSignal,
    ) -> Result<ChatCompletion, ProviderError> {
        let body = Self::build_body(model, messages, sampling, false);
        info!("[engine] Completing {} model={} (non-streaming)", provider.id, model);

        let mut attempt = 0;
        let response = loop {
            let response = tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(ProviderError::Cancelled),
                sent = self.post(provider, &body).send() => sent?,
            };
            let status = response.status().as_u16();
            if response.status().is_success() {
                break response;
            }
            if !is_retryable_status(status) || !self.retry.allows(attempt) {
                return Err(Self::error_from(provider, response).await);
            }
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let Some(delay) = self.retry.wait(attempt, retry_after, abort).await else {
                debug!("[engine] {} retry abandoned: aborted", provider.id);
                return Err(ProviderError::Cancelled);
            };
            attempt += 1;
            warn!(
                "[engine] {} returned {}, retry {}/{} after {}ms",
                provider.id,
                status,
                attempt,
                self.retry.max_retries,
                delay.as_millis()
            );
        };

        let v: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Protocol(format!("Response is not JSON: {}", e)))?;
        let content = v["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Protocol("Response has no choices[0].message.content".into()))?
            .to_string();

        Ok(ChatCompletion { content, usage: parse_usage(&v) })
    }

    async fn list_models(&self, provider: &LlmProvider, abort: &AbortSignal) -> Result<Vec<String>, ProviderError> {
        models::list_models(&self.client, provider, abort).await
    }
}
