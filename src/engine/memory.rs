// vaultchat Engine — Memory Store
//
// Append-only list of extracted facts for one character, persisted as a
// JSON array in the vault. Every search re-reads the file and builds a fresh
// BM25 index, so concurrent edits in the vault are always visible.

use crate::atoms::constants::{CHARACTERS_FOLDER, MEMORIES_FILE};
use crate::atoms::error::EngineResult;
use crate::atoms::traits::{Scorable, VaultStore};
use crate::atoms::types::{MemoryEntry, MemoryType};
use crate::engine::bm25::Bm25Index;
use crate::engine::injection::sanitize_injected_text;
use crate::engine::tokenizer::tokenize;
use crate::engine::vault::join_path;
use chrono::Utc;
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

impl MemoryEntry {
    pub fn new(
        content: impl Into<String>,
        memory_type: MemoryType,
        importance: f64,
        source_message_id: impl Into<String>,
        keywords: BTreeSet<String>,
    ) -> Self {
        MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            memory_type,
            importance: importance.clamp(0.0, 1.0),
            source_message_id: source_message_id.into(),
            keywords,
            created_at: Utc::now(),
        }
    }
}

// Indexed text: content plus keywords. Memories carry no authoring order,
// so ties fall back to insertion order.
impl Scorable for MemoryEntry {
    fn doc_id(&self) -> &str {
        &self.id
    }

    fn doc_tokens(&self) -> Vec<String> {
        let mut tokens = tokenize(&self.content);
        for kw in &self.keywords {
            tokens.extend(tokenize(kw));
        }
        tokens
    }
}

/// `"{content} ({type}, importance: {importance})"`. Content is model-written
/// from user dialogue, so it goes through the injection sanitizer and is
/// flattened to one line.
pub fn format_memory(entry: &MemoryEntry) -> String {
    let content = sanitize_injected_text(&entry.content).split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{} ({}, importance: {})", content, entry.memory_type, entry.importance)
}

// ── Store ──────────────────────────────────────────────────────────────────

pub struct MemoryStore {
    vault: Arc<dyn VaultStore>,
    path: String,
    /// Serializes read-modify-write appends from overlapping extraction tasks.
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(vault: Arc<dyn VaultStore>, path: impl Into<String>) -> Self {
        MemoryStore { vault, path: path.into(), write_lock: Mutex::new(()) }
    }

    /// Store at `characters/<folder>/memories.json`.
    pub fn for_character(vault: Arc<dyn VaultStore>, character_folder: &str) -> Self {
        Self::new(vault, join_path(&[CHARACTERS_FOLDER, character_folder, MEMORIES_FILE]))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Every stored memory, oldest first. A missing file is an empty store.
    pub async fn all_memories(&self) -> EngineResult<Vec<MemoryEntry>> {
        if !self.vault.exists(&self.path).await {
            return Ok(vec![]);
        }
        let raw = self.vault.read_text(&self.path).await?;
        if raw.trim().is_empty() {
            return Ok(vec![]);
        }
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn len(&self) -> EngineResult<usize> {
        Ok(self.all_memories().await?.len())
    }

    pub async fn add_memory(&self, entry: MemoryEntry) -> EngineResult<()> {
        self.add_memories(vec![entry]).await.map(|_| ())
    }

    /// Append a batch in one write. Returns the new total.
    pub async fn add_memories(&self, entries: Vec<MemoryEntry>) -> EngineResult<usize> {
        if entries.is_empty() {
            return self.len().await;
        }
        let _guard = self.write_lock.lock().await;
        let mut all = self.all_memories().await?;
        let added = entries.len();
        all.extend(entries);
        let json = serde_json::to_string_pretty(&all)?;
        self.vault.write_text(&self.path, &json).await?;
        info!("[memory] Stored {} memories in {} (total {})", added, self.path, all.len());
        Ok(all.len())
    }

    /// Ranked entries for `query`, in insertion order.
    pub async fn search_entries(&self, query: &str, limit: usize) -> EngineResult<Vec<MemoryEntry>> {
        let all = self.all_memories().await?;
        let index = Bm25Index::new(&all);
        let hits: Vec<MemoryEntry> = index.search(query, limit).into_iter().cloned().collect();
        debug!("[memory] Search '{}' → {}/{} memories", preview(query), hits.len(), all.len());
        Ok(hits)
    }

    /// Formatted recall block, one memory per line. Empty string means
    /// nothing matched and the section should be omitted.
    pub async fn search_memories(&self, query: &str, limit: usize) -> EngineResult<String> {
        let hits = self.search_entries(query, limit).await?;
        Ok(hits.iter().map(format_memory).collect::<Vec<_>>().join("\n"))
    }
}

fn preview(text: &str) -> String {
    text.chars().take(60).collect()
}
