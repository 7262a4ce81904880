// vaultchat Engine — SSE Stream Reader
//
// Turns an OpenAI-compatible `text/event-stream` body into content deltas.
// Lines are split on raw bytes before UTF-8 decoding, so a multi-byte
// character split across network chunks is reassembled intact.
//
// Frame rules:
//   • only `data:` lines matter; blank lines, `event:`, `id:` and `:` comments are ignored
//   • `[DONE]` ends the stream
//   • a `usage` object overwrites the running usage (last write wins)
//   • non-empty `choices[0].delta.content` is appended and forwarded
//   • malformed JSON is skipped

use crate::atoms::error::ProviderError;
use crate::atoms::types::{ChatCompletion, TokenUsage};
use crate::engine::http::truncate_utf8;
use crate::engine::state::AbortSignal;
use futures::{Stream, StreamExt};
use log::debug;
use serde_json::Value;
use std::fmt::Display;
use std::pin::pin;

// ── Line buffer ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and drain every complete line (without the terminator).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left after the body closes without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).to_string();
        self.pending.clear();
        Some(rest)
    }
}

// ── Frame parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Data { delta: Option<String>, usage: Option<TokenUsage> },
    Done,
    Malformed,
}

/// Parse one line. `None` for lines that carry no data payload.
pub fn parse_line(line: &str) -> Option<SseFrame> {
    let payload = line.trim().strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        return Some(SseFrame::Done);
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(v) => Some(SseFrame::Data {
            delta: v["choices"][0]["delta"]["content"].as_str().map(str::to_string),
            usage: parse_usage(&v),
        }),
        Err(e) => {
            debug!("[engine] Skipping malformed SSE frame ({}): {}", e, truncate_utf8(payload, 120));
            Some(SseFrame::Malformed)
        }
    }
}

/// `usage` from a streaming frame or a full response. Null or absent → None.
pub fn parse_usage(v: &Value) -> Option<TokenUsage> {
    let u = v.get("usage").filter(|u| u.is_object())?;
    let prompt = u["prompt_tokens"].as_u64().unwrap_or(0);
    let completion = u["completion_tokens"].as_u64().unwrap_or(0);
    Some(TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: u["total_tokens"].as_u64().unwrap_or(prompt + completion),
    })
}

// ── Accumulator ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StreamAccumulator {
    content: String,
    usage: Option<TokenUsage>,
}

impl StreamAccumulator {
    /// Apply one frame. Returns true when the stream is finished.
    pub fn apply(&mut self, frame: SseFrame, on_chunk: &mut (dyn FnMut(&str, bool) + Send)) -> bool {
        match frame {
            SseFrame::Done => true,
            SseFrame::Malformed => false,
            SseFrame::Data { delta, usage } => {
                if usage.is_some() {
                    self.usage = usage;
                }
                if let Some(text) = delta.filter(|t| !t.is_empty()) {
                    self.content.push_str(&text);
                    on_chunk(&text, false);
                }
                false
            }
        }
    }

    /// Emit the terminal `("", true)` callback and hand back the result.
    pub fn finish(self, on_chunk: &mut (dyn FnMut(&str, bool) + Send)) -> ChatCompletion {
        on_chunk("", true);
        ChatCompletion { content: self.content, usage: self.usage }
    }
}

// ── Stream driver ──────────────────────────────────────────────────────────

/// Read `body` to completion, forwarding deltas to `on_chunk`.
/// Aborting drops the body and returns `Cancelled`; deltas already
/// forwarded stay delivered.
pub async fn read_stream<S, B, E>(
    body: S,
    on_chunk: &mut (dyn FnMut(&str, bool) + Send),
    abort: &AbortSignal,
) -> Result<ChatCompletion, ProviderError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = pin!(body);
    let mut lines = LineBuffer::default();
    let mut acc = StreamAccumulator::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                debug!("[engine] Stream aborted after {} chars", acc.content.len());
                return Err(ProviderError::Cancelled);
            }
            item = body.next() => item,
        };

        let bytes = match next {
            None => break,
            Some(Err(e)) => return Err(ProviderError::Network(format!("Stream read error: {}", e))),
            Some(Ok(bytes)) => bytes,
        };

        for line in lines.push(bytes.as_ref()) {
            if let Some(frame) = parse_line(&line) {
                if acc.apply(frame, on_chunk) {
                    return Ok(acc.finish(on_chunk));
                }
            }
        }
    }

    // Body closed without [DONE]; a trailing unterminated line still counts.
    if let Some(frame) = lines.finish().as_deref().and_then(parse_line) {
        acc.apply(frame, on_chunk);
    }
    Ok(acc.finish(on_chunk))
}
