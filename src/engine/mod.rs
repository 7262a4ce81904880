// vaultchat Engine — retrieval, routing and streaming generation.

pub mod bm25;
pub mod chat;
pub mod extraction;
pub mod http;
pub mod injection;
pub mod lorebook;
pub mod memory;
pub mod providers;
pub mod routing;
pub mod settings;
pub mod state;
pub mod tokenizer;
pub mod vault;
