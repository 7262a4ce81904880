// vaultchat Engine — Chat Turn
//
// Context assembly and the per-character chat session. One turn:
//   1. recall memories and activate lorebook entries for the new message
//   2. compose the two-message prompt (system context + conversation)
//   3. resolve the text provider and stream the reply
//   4. add usage to the session ledger
//   5. schedule background memory extraction
//
// Dependency rule: chat.rs drives memory, lorebook, routing and providers;
// none of them import from here.

use crate::atoms::constants::{CHARACTERS_FOLDER, CHARACTER_FILE, DIALOGUE_FILE};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::VaultStore;
use crate::atoms::types::{Character, ChatMessage, ModelClass, ModelReference, Role, Settings, TokenUsage};
use crate::engine::extraction::{spawn_extraction, ExtractionInput};
use crate::engine::injection::sanitize_injected_text;
use crate::engine::lorebook::{format_entries, LorebookSelector};
use crate::engine::memory::MemoryStore;
use crate::engine::providers::{AiProvider, ChunkCallback};
use crate::engine::routing::resolve_provider;
use crate::engine::state::AbortSignal;
use crate::engine::vault::join_path;
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Trailing dialogue messages folded into the conversation message.
pub const HISTORY_WINDOW: usize = 30;

// ── Context assembly ───────────────────────────────────────────────────────

/// Ranked context for one turn. Empty strings mean "omit this section".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextSections {
    pub lorebook: String,
    pub memories: String,
    pub stats: String,
}

fn character_prompt(character: &Character) -> String {
    if let Some(sp) = character.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
        return sp.replace("{{char}}", &character.name);
    }
    let mut prompt = format!("You are {}. Stay in character and reply as {} only.", character.name, character.name);
    for (label, text) in [
        ("Description", &character.description),
        ("Personality", &character.personality),
        ("Scenario", &character.scenario),
    ] {
        if !text.trim().is_empty() {
            prompt.push_str(&format!("\n\n{}: {}", label, text.trim()));
        }
    }
    prompt
}

/// System message: character prompt, then world info, memories and stats,
/// each only when non-empty, separated by `---`.
pub fn compose_system_prompt(character: &Character, sections: &ContextSections) -> String {
    let mut parts = vec![character_prompt(character)];
    if !sections.lorebook.is_empty() {
        parts.push(format!("## World Info\n{}", sections.lorebook));
    }
    if !sections.memories.is_empty() {
        parts.push(format!("## Memories\n{}", sections.memories));
    }
    if !sections.stats.is_empty() {
        parts.push(format!("## Current Stats\n{}", sections.stats));
    }
    parts.join("\n\n---\n\n")
}

/// Conversation message: recent transcript, then the new user line.
pub fn compose_conversation(character: &Character, history: &[ChatMessage], user_text: &str) -> String {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let transcript: Vec<String> = history[start..]
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::Assistant => format!("{}: {}", character.name, m.content),
            _ => format!("User: {}", m.content),
        })
        .collect();

    if transcript.is_empty() {
        format!("User: {}", user_text)
    } else {
        format!("{}\n\nUser: {}", transcript.join("\n\n"), user_text)
    }
}

/// The two messages sent to the provider.
pub fn assemble_prompt(
    character: &Character,
    sections: &ContextSections,
    history: &[ChatMessage],
    user_text: &str,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(compose_system_prompt(character, sections)),
        ChatMessage::user(compose_conversation(character, history, user_text)),
    ]
}

// ── Dialogue file ──────────────────────────────────────────────────────────

fn dialogue_path(character_folder: &str) -> String {
    join_path(&[CHARACTERS_FOLDER, character_folder, DIALOGUE_FILE])
}

pub async fn load_dialogue(vault: &dyn VaultStore, character_folder: &str) -> EngineResult<Vec<ChatMessage>> {
    let path = dialogue_path(character_folder);
    if !vault.exists(&path).await {
        return Ok(vec![]);
    }
    let raw = vault.read_text(&path).await?;
    if raw.trim().is_empty() {
        return Ok(vec![]);
    }
    Ok(serde_json::from_str(&raw)?)
}

pub async fn append_dialogue(
    vault: &dyn VaultStore,
    character_folder: &str,
    messages: &[ChatMessage],
) -> EngineResult<()> {
    let mut all = load_dialogue(vault, character_folder).await?;
    all.extend_from_slice(messages);
    vault.write_text(&dialogue_path(character_folder), &serde_json::to_string_pretty(&all)?).await
}

pub async fn load_character(vault: &dyn VaultStore, character_folder: &str) -> EngineResult<Character> {
    let path = join_path(&[CHARACTERS_FOLDER, character_folder, CHARACTER_FILE]);
    let raw = vault.read_text(&path).await?;
    serde_json::from_str(&raw).map_err(|e| EngineError::vault(path, e.to_string()))
}

// ── Session ────────────────────────────────────────────────────────────────

/// Result of one completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub provider_id: String,
    pub model: String,
    /// Id to store the assistant message under; extracted memories point at it.
    pub message_id: String,
    /// Background extraction, if one was scheduled. Dropping it detaches.
    pub extraction: Option<JoinHandle<()>>,
}

// Clears the in-flight flag however the turn ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ChatSession {
    character: Character,
    memory: Arc<MemoryStore>,
    lorebook: LorebookSelector,
    ai: Arc<dyn AiProvider>,
    in_flight: AtomicBool,
    usage: Mutex<TokenUsage>,
}

impl ChatSession {
    pub fn new(
        character: Character,
        memory: Arc<MemoryStore>,
        lorebook: LorebookSelector,
        ai: Arc<dyn AiProvider>,
    ) -> Self {
        ChatSession {
            character,
            memory,
            lorebook,
            ai,
            in_flight: AtomicBool::new(false),
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Session for `characters/<folder>/` in `vault`.
    pub async fn open(
        vault: Arc<dyn VaultStore>,
        character_folder: &str,
        settings: &Settings,
        ai: Arc<dyn AiProvider>,
    ) -> EngineResult<Self> {
        let character = load_character(vault.as_ref(), character_folder).await?;
        let memory = Arc::new(MemoryStore::for_character(vault.clone(), character_folder));
        let lorebook = LorebookSelector::new(vault, settings.shared_lorebook_folder.clone());
        info!("[engine] Opened chat with '{}' ({})", character.name, character_folder);
        Ok(Self::new(character, memory, lorebook, ai))
    }

    pub fn character(&self) -> &Character {
        &self.character
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn lorebook(&self) -> &LorebookSelector {
        &self.lorebook
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Sum of reported usage over every completed turn.
    pub fn total_usage(&self) -> TokenUsage {
        *self.usage.lock()
    }

    /// Ranked context for a new user message.
    pub async fn gather_context(
        &self,
        settings: &Settings,
        history: &[ChatMessage],
        user_text: &str,
    ) -> EngineResult<ContextSections> {
        let mut window: Vec<ChatMessage> = history.to_vec();
        window.push(ChatMessage::user(user_text));

        let active = self
            .lorebook
            .activate(self.character.lorebook.as_ref(), &window, settings.scan_depth)
            .await?;
        let memories = self.memory.search_memories(user_text, settings.memory_limit).await?;

        Ok(ContextSections {
            lorebook: format_entries(&active),
            memories,
            stats: self.character.stats.as_deref().map(sanitize_injected_text).unwrap_or_default(),
        })
    }

    /// Run one full turn. Rejects with `Busy` while another turn streams.
    /// A cancelled turn returns the cancellation error and schedules nothing.
    pub async fn send(
        &self,
        settings: &Settings,
        history: &[ChatMessage],
        user_text: &str,
        model_override: Option<&ModelReference>,
        on_chunk: ChunkCallback<'_>,
        abort: &AbortSignal,
    ) -> EngineResult<TurnOutcome> {
        if self.in_flight.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(EngineError::Busy);
        }
        let _guard = InFlight(&self.in_flight);

        let resolved = resolve_provider(settings, ModelClass::Text, model_override)?;
        let sections = self.gather_context(settings, history, user_text).await?;
        let messages = assemble_prompt(&self.character, &sections, history, user_text);

        let completion = self
            .ai
            .stream_chat(&resolved.provider, &resolved.model, &messages, settings.sampling(), on_chunk, abort)
            .await?;

        if let Some(u) = completion.usage {
            let mut total = self.usage.lock();
            total.prompt_tokens += u.prompt_tokens;
            total.completion_tokens += u.completion_tokens;
            total.total_tokens += u.total_tokens;
        }

        let message_id = uuid::Uuid::new_v4().to_string();
        let extraction = if settings.extraction_enabled && !completion.content.trim().is_empty() {
            Some(spawn_extraction(
                self.ai.clone(),
                settings.clone(),
                self.memory.clone(),
                ExtractionInput {
                    character_name: self.character.name.clone(),
                    user_text: user_text.to_string(),
                    assistant_text: completion.content.clone(),
                    assistant_message_id: message_id.clone(),
                },
                abort.clone(),
            ))
        } else {
            if completion.content.trim().is_empty() {
                warn!("[engine] {} returned an empty reply", resolved.provider_id);
            }
            None
        };

        Ok(TurnOutcome {
            content: completion.content,
            usage: completion.usage,
            provider_id: resolved.provider_id,
            model: resolved.model,
            message_id,
            extraction,
        })
    }
}
