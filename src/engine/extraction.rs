// vaultchat Engine — Memory Extraction
//
// After each completed assistant turn, ask the extraction-class model for
// durable facts as a JSON array and append them to the character's memory
// store. Runs detached: failures are logged and dropped, and never touch
// the chat that triggered them.

use crate::atoms::constants::{DEFAULT_IMPORTANCE, EXTRACTION_TEMPERATURE};
use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChatMessage, MemoryEntry, MemoryType, ModelClass, SamplingParams, Settings};
use crate::engine::memory::MemoryStore;
use crate::engine::providers::AiProvider;
use crate::engine::routing::resolve_provider;
use crate::engine::state::AbortSignal;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

const EXTRACTION_PROMPT: &str = "You extract long-term memories from a roleplay conversation. \
Read the latest exchange and list facts worth remembering in future scenes: stable facts about \
the characters or world, notable events, preferences, and relationship changes. Skip small talk \
and anything already obvious from the character description.\n\n\
Reply with ONLY a JSON array, no prose. Each item:\n\
{\"content\": \"one short sentence\", \"type\": \"fact|event|preference|relationship\", \
\"importance\": 0.0-1.0, \"keywords\": [\"word\", ...]}\n\
Reply with [] if nothing is worth remembering.";

/// One completed exchange to mine for memories.
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub character_name: String,
    pub user_text: String,
    pub assistant_text: String,
    /// Recorded as `sourceMessageId` on every extracted memory.
    pub assistant_message_id: String,
}

pub fn build_extraction_messages(input: &ExtractionInput) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(EXTRACTION_PROMPT),
        ChatMessage::user(format!(
            "Character: {}\n\nUser: {}\n\n{}: {}",
            input.character_name, input.user_text, input.character_name, input.assistant_text
        )),
    ]
}

/// The JSON payload of a reply that may wrap it in a fenced block or prose.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    if text.starts_with('[') || text.starts_with('{') {
        return text;
    }

    // Prose around a bare array: take the outermost brackets.
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            return &text[start..=end];
        }
    }

    text
}

fn importance_of(v: &Value) -> f64 {
    let raw = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.filter(|x| x.is_finite()).unwrap_or(DEFAULT_IMPORTANCE).clamp(0.0, 1.0)
}

fn keywords_of(v: &Value) -> BTreeSet<String> {
    let words: Vec<String> = match v {
        Value::Array(items) => items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => vec![],
    };
    words
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Lenient parse of the model's reply. Unknown types become `fact`,
/// importance is clamped, items without content are dropped. Accepts a
/// bare array or `{"memories": [...]}`.
pub fn parse_extracted(reply: &str, source_message_id: &str) -> Vec<MemoryEntry> {
    let parsed: Value = match serde_json::from_str(extract_json(reply)) {
        Ok(v) => v,
        Err(e) => {
            warn!("[extract] Reply is not JSON ({}), nothing stored", e);
            return vec![];
        }
    };
    let items = match &parsed {
        Value::Array(items) => items.as_slice(),
        Value::Object(_) => parsed["memories"].as_array().map(|a| a.as_slice()).unwrap_or(&[]),
        _ => &[],
    };

    items
        .iter()
        .filter_map(|item| {
            let content = item["content"].as_str()?.trim();
            if content.is_empty() {
                return None;
            }
            Some(MemoryEntry::new(
                content,
                MemoryType::parse_lenient(item["type"].as_str().unwrap_or("fact")),
                importance_of(&item["importance"]),
                source_message_id,
                keywords_of(&item["keywords"]),
            ))
        })
        .collect()
}

/// One non-streaming call against the extraction-class provider.
pub async fn extract_memories(
    ai: &dyn AiProvider,
    settings: &Settings,
    input: &ExtractionInput,
    abort: &AbortSignal,
) -> EngineResult<Vec<MemoryEntry>> {
    let resolved = resolve_provider(settings, ModelClass::Extraction, None)?;
    let sampling = SamplingParams { temperature: EXTRACTION_TEMPERATURE, top_p: settings.top_p };
    let reply = ai
        .complete(&resolved.provider, &resolved.model, &build_extraction_messages(input), sampling, abort)
        .await?;
    let entries = parse_extracted(&reply.content, &input.assistant_message_id);
    debug!("[extract] {} → {} candidate memories", resolved.provider_id, entries.len());
    Ok(entries)
}

/// Fire-and-forget extraction + append. The handle is only useful to tests.
/// Aborting `abort` drops the extraction without touching the store.
pub fn spawn_extraction(
    ai: Arc<dyn AiProvider>,
    settings: Settings,
    store: Arc<MemoryStore>,
    input: ExtractionInput,
    abort: AbortSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let entries = match extract_memories(ai.as_ref(), &settings, &input, &abort).await {
            Ok(entries) => entries,
            Err(e) if e.is_cancelled() => {
                debug!("[extract] Extraction for {} cancelled", input.assistant_message_id);
                return;
            }
            Err(e) => {
                warn!("[extract] Extraction for {} failed: {}", input.assistant_message_id, e);
                return;
            }
        };
        if entries.is_empty() {
            debug!("[extract] Nothing worth remembering in {}", input.assistant_message_id);
            return;
        }
        match store.add_memories(entries).await {
            Ok(total) => info!("[extract] Memory store {} now holds {}", store.path(), total),
            Err(e) => warn!("[extract] Could not store memories: {}", e),
        }
    })
}
