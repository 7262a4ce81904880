// vaultchat CLI — subcommands

use crate::{Cli, Commands};
use log::{info, warn};
use std::io::Write;
use std::sync::Arc;
use vaultchat::engine::chat::{append_dialogue, load_character, load_dialogue};
use vaultchat::engine::lorebook::{format_entries, LorebookSelector};
use vaultchat::engine::memory::{format_memory, MemoryStore};
use vaultchat::{
    resolve_provider, AbortSignal, AiProvider, ChatMessage, ChatSession, CompletionClient, EngineError,
    EngineResult, FsVault, ModelClass, ModelReference, Settings, VaultStore,
};

pub async fn run(cli: Cli, settings: Settings) -> EngineResult<()> {
    let vault_root = cli.vault.clone().or_else(|| settings.vault_root.clone());
    let vault = || -> EngineResult<Arc<dyn VaultStore>> {
        let root = vault_root
            .clone()
            .ok_or_else(|| EngineError::config("no vault: pass --vault or set vault_root in settings"))?;
        let vault: Arc<dyn VaultStore> = Arc::new(FsVault::new(root));
        Ok(vault)
    };

    match cli.command {
        Commands::Chat { character, message, provider, model, no_save } => {
            let override_ref = match (provider, model) {
                (Some(p), m) => Some(ModelReference::new(p, m.unwrap_or_default())),
                // Model alone: keep the resolved text provider.
                (None, Some(m)) => Some(ModelReference::new(
                    resolve_provider(&settings, ModelClass::Text, None)?.provider_id,
                    m,
                )),
                (None, None) => None,
            };
            chat(vault()?, &settings, &character, &message, override_ref.as_ref(), !no_save).await
        }
        Commands::Models { provider, json } => models(&settings, provider.as_deref(), json).await,
        Commands::Recall { character, query, limit } => {
            recall(vault()?, &character, &query, limit.unwrap_or(settings.memory_limit)).await
        }
        Commands::Lore { character, message, with_history } => {
            lore(vault()?, &settings, &character, &message, with_history).await
        }
        Commands::Check => check(&settings),
    }
}

/// Abort signal tripped by Ctrl-C.
fn ctrl_c_signal() -> AbortSignal {
    let abort = AbortSignal::new();
    let trip = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trip.abort();
        }
    });
    abort
}

/// Writes streamed deltas as they arrive. After the first write failure
/// (closed pipe, full disk) it logs once and drops the rest; the reply is
/// still saved.
struct StreamPrinter<W: Write> {
    out: W,
    failed: bool,
}

impl<W: Write> StreamPrinter<W> {
    fn new(out: W) -> Self {
        StreamPrinter { out, failed: false }
    }

    fn chunk(&mut self, delta: &str, done: bool) {
        if self.failed {
            return;
        }
        let written = if done { writeln!(self.out) } else { write!(self.out, "{}", delta) };
        if let Err(e) = written.and_then(|_| self.out.flush()) {
            warn!("[cli] Could not write reply to stdout: {}", e);
            self.failed = true;
        }
    }
}

async fn chat(
    vault: Arc<dyn VaultStore>,
    settings: &Settings,
    character: &str,
    message: &str,
    override_ref: Option<&ModelReference>,
    save: bool,
) -> EngineResult<()> {
    let ai: Arc<dyn AiProvider> = Arc::new(CompletionClient::new());
    let session = ChatSession::open(vault.clone(), character, settings, ai).await?;
    let history = load_dialogue(vault.as_ref(), character).await?;
    let abort = ctrl_c_signal();

    let mut printer = StreamPrinter::new(std::io::stdout());
    let mut print = move |delta: &str, done: bool| printer.chunk(delta, done);

    let outcome = session.send(settings, &history, message, override_ref, &mut print, &abort).await?;
    if let Some(usage) = outcome.usage {
        info!(
            "[cli] {} / {}: {} prompt + {} completion tokens",
            outcome.provider_id, outcome.model, usage.prompt_tokens, usage.completion_tokens
        );
    }

    if save {
        append_dialogue(
            vault.as_ref(),
            character,
            &[
                ChatMessage::user(message),
                ChatMessage::assistant(outcome.content.as_str()).with_id(outcome.message_id.as_str()),
            ],
        )
        .await?;
    }

    // Let extraction finish before the runtime shuts down.
    if let Some(handle) = outcome.extraction {
        let _ = handle.await;
    }
    Ok(())
}

async fn models(settings: &Settings, provider_id: Option<&str>, json: bool) -> EngineResult<()> {
    let provider = match provider_id {
        Some(id) => settings
            .provider(id)
            .cloned()
            .ok_or_else(|| EngineError::config(format!("no provider with id '{}'", id)))?,
        None => resolve_provider(settings, ModelClass::Text, None)?.provider,
    };

    let client = CompletionClient::new();
    let ids = client.list_models(&provider, &ctrl_c_signal()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ids)?);
    } else {
        for id in ids {
            println!("{}", id);
        }
    }
    Ok(())
}

async fn recall(vault: Arc<dyn VaultStore>, character: &str, query: &str, limit: usize) -> EngineResult<()> {
    let store = MemoryStore::for_character(vault, character);
    let hits = store.search_entries(query, limit).await?;
    if hits.is_empty() {
        println!("No memories match ({} stored).", store.len().await?);
    }
    for entry in &hits {
        println!("- {}", format_memory(entry));
    }
    Ok(())
}

async fn lore(
    vault: Arc<dyn VaultStore>,
    settings: &Settings,
    character: &str,
    message: &str,
    with_history: bool,
) -> EngineResult<()> {
    let card = load_character(vault.as_ref(), character).await?;

    let mut window = if with_history { load_dialogue(vault.as_ref(), character).await? } else { vec![] };
    window.push(ChatMessage::user(message));

    let selector = LorebookSelector::new(vault, settings.shared_lorebook_folder.clone());
    let active = selector.activate(card.lorebook.as_ref(), &window, settings.scan_depth).await?;
    if active.is_empty() {
        println!("No lorebook entries activate.");
        return Ok(());
    }
    for entry in &active {
        let marker = if entry.always_active { " (always)" } else { "" };
        println!("# {}{}", entry.name, marker);
    }
    println!("\n{}", format_entries(&active));
    Ok(())
}

fn check(settings: &Settings) -> EngineResult<()> {
    settings.validate()?;
    println!("{} provider(s) configured", settings.providers.len());
    for class in ModelClass::ALL {
        match resolve_provider(settings, class, None) {
            Ok(r) => println!("{:<10} → {} / {}", class.as_str(), r.provider_id, r.model),
            Err(e) => println!("{:<10} → {}", class.as_str(), e),
        }
    }
    Ok(())
}
