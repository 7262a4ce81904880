// vaultchat — character chat engine for note vaults.
//
// Layering (one-way):
//   atoms/  — constants, error enums, plain data types, core traits
//   engine/ — tokenizer, BM25, memory, lorebook, provider routing,
//             streaming client, context assembly, chat session
//
// Callers hold a `Settings` value and pass it into each operation; nothing
// here keeps global mutable state.

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult, ProviderError};
pub use atoms::traits::{Scorable, VaultStore};
pub use atoms::types::*;
pub use engine::bm25::Bm25Index;
pub use engine::chat::{ChatSession, TurnOutcome};
pub use engine::providers::{AiProvider, CompletionClient};
pub use engine::routing::{auth_headers, resolve_provider, NotConfigured};
pub use engine::state::{AbortSignal, CompletionState};
pub use engine::vault::FsVault;
