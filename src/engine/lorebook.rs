// vaultchat Engine — Lorebook Selector
//
// Merges the character's private lorebook with every shared lorebook in the
// vault into one corpus and activates entries whose keys/content match the
// last few messages. Activated content is sanitized before it is injected.

use crate::atoms::constants::{LOREBOOK_CONTENT_SCAN_CHARS, MAX_LOREBOOK_ENTRIES};
use crate::atoms::error::EngineResult;
use crate::atoms::traits::{Scorable, VaultStore};
use crate::atoms::types::{ChatMessage, Lorebook, LorebookEntry};
use crate::engine::bm25::Bm25Index;
use crate::engine::injection::sanitize_injected_text;
use crate::engine::tokenizer::tokenize;
use crate::engine::vault::join_path;
use log::{debug, info, warn};
use std::sync::Arc;

// Keys plus the head of the content; long entries are not indexed past it.
impl Scorable for LorebookEntry {
    fn doc_id(&self) -> &str {
        &self.name
    }

    fn doc_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.keys.iter().flat_map(|k| tokenize(k)).collect();
        let head: String = self.content.chars().take(LOREBOOK_CONTENT_SCAN_CHARS).collect();
        tokens.extend(tokenize(&head));
        tokens
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn always_active(&self) -> bool {
        self.always_active
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Concatenate the last `scan_depth` messages; this is the text scored for
/// activation, so a keyword mentioned a few turns back still triggers.
pub fn scan_window(history: &[ChatMessage], scan_depth: usize) -> String {
    let start = history.len().saturating_sub(scan_depth);
    history[start..].iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n")
}

/// Rank `entries` against `text`, capped at `MAX_LOREBOOK_ENTRIES`.
pub fn select_entries<'a>(entries: &'a [LorebookEntry], text: &str) -> Vec<&'a LorebookEntry> {
    Bm25Index::new(entries).search(text, MAX_LOREBOOK_ENTRIES)
}

/// Sanitized entry contents, blank-line separated. Empty when nothing is left.
pub fn format_entries(entries: &[LorebookEntry]) -> String {
    entries
        .iter()
        .map(|e| sanitize_injected_text(&e.content))
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// Shared lorebook files hold either a full `Lorebook` or a bare entry array.
fn parse_lorebook(file_name: &str, raw: &str) -> Option<Lorebook> {
    if let Ok(book) = serde_json::from_str::<Lorebook>(raw) {
        return Some(book);
    }
    match serde_json::from_str::<Vec<LorebookEntry>>(raw) {
        Ok(entries) => Some(Lorebook { name: file_name.trim_end_matches(".json").to_string(), entries }),
        Err(e) => {
            warn!("[lorebook] Skipping {}: {}", file_name, e);
            None
        }
    }
}

// ── Selector ───────────────────────────────────────────────────────────────

pub struct LorebookSelector {
    vault: Arc<dyn VaultStore>,
    shared_folder: String,
}

impl LorebookSelector {
    pub fn new(vault: Arc<dyn VaultStore>, shared_folder: impl Into<String>) -> Self {
        LorebookSelector { vault, shared_folder: shared_folder.into() }
    }

    /// Every `*.json` lorebook in the shared folder. Unreadable files are
    /// skipped; a missing folder means no shared lore.
    pub async fn load_shared(&self) -> EngineResult<Vec<Lorebook>> {
        if !self.vault.exists(&self.shared_folder).await {
            debug!("[lorebook] No shared folder at {}", self.shared_folder);
            return Ok(vec![]);
        }
        let mut books = Vec::new();
        for name in self.vault.list_folder(&self.shared_folder).await? {
            if !name.ends_with(".json") {
                continue;
            }
            let path = join_path(&[&self.shared_folder, &name]);
            let raw = match self.vault.read_text(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("[lorebook] Could not read {}: {}", path, e);
                    continue;
                }
            };
            if let Some(book) = parse_lorebook(&name, &raw) {
                books.push(book);
            }
        }
        Ok(books)
    }

    /// Private entries first, then shared ones in file-name order.
    pub async fn corpus(&self, private: Option<&Lorebook>) -> EngineResult<Vec<LorebookEntry>> {
        let mut entries: Vec<LorebookEntry> = private.map(|b| b.entries.clone()).unwrap_or_default();
        for book in self.load_shared().await? {
            entries.extend(book.entries);
        }
        Ok(entries)
    }

    /// Entries activated by the last `scan_depth` messages, in authoring order.
    pub async fn activate(
        &self,
        private: Option<&Lorebook>,
        history: &[ChatMessage],
        scan_depth: usize,
    ) -> EngineResult<Vec<LorebookEntry>> {
        let corpus = self.corpus(private).await?;
        let text = scan_window(history, scan_depth);
        let active: Vec<LorebookEntry> = select_entries(&corpus, &text).into_iter().cloned().collect();
        if !active.is_empty() {
            info!(
                "[lorebook] Activated {}/{} entries: {}",
                active.len(),
                corpus.len(),
                active.iter().map(|e| e.name.as_str()).collect::<Vec<_>>().join(", ")
            );
        }
        Ok(active)
    }
}
