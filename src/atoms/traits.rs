// ── vaultchat Atoms: Traits ────────────────────────────────────────────────
// The two seams the engine is generic over:
//   • `Scorable`   — anything the BM25 index can rank (memories, lore).
//   • `VaultStore` — the note vault, treated as a keyed blob store.

use crate::atoms::error::EngineResult;
use async_trait::async_trait;

// ── Scorable ───────────────────────────────────────────────────────────────

/// A document the ranking engine can index.
pub trait Scorable {
    fn doc_id(&self) -> &str;

    /// Token sequence used for term frequency and document length.
    fn doc_tokens(&self) -> Vec<String>;

    /// Authoring order; search output is sorted by this, ascending.
    fn order(&self) -> i64 {
        0
    }

    /// Always-active documents bypass scoring and are always returned.
    fn always_active(&self) -> bool {
        false
    }

    /// Disabled documents are dropped at index time.
    fn enabled(&self) -> bool {
        true
    }
}

// ── VaultStore ─────────────────────────────────────────────────────────────

/// Storage collaborator. Paths are vault-relative, `/`-separated.
#[async_trait]
pub trait VaultStore: Send + Sync {
    async fn read_text(&self, path: &str) -> EngineResult<String>;
    async fn write_text(&self, path: &str, text: &str) -> EngineResult<()>;
    async fn read_binary(&self, path: &str) -> EngineResult<Vec<u8>>;
    /// Entry names (not full paths) directly under `path`, sorted.
    async fn list_folder(&self, path: &str) -> EngineResult<Vec<String>>;
    async fn create_folder(&self, path: &str) -> EngineResult<()>;
    /// Move a folder out of the vault; the backend decides where.
    async fn trash_folder(&self, path: &str) -> EngineResult<()>;
    async fn exists(&self, path: &str) -> bool;
}
