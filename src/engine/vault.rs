// vaultchat Engine — Filesystem Vault
//
// `VaultStore` over a plain directory. Paths are vault-relative and may not
// escape the root. Trashed folders move to `<root>/.trash/` rather than
// being deleted.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::VaultStore;
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Component, Path, PathBuf};

pub const TRASH_FOLDER: &str = ".trash";

pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsVault { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a vault-relative path onto the root, rejecting traversal.
    fn resolve(&self, path: &str) -> EngineResult<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(EngineError::vault(path, "path escapes the vault root")),
            }
        }
        Ok(self.root.join(rel))
    }

    fn io_err(path: &str, e: std::io::Error) -> EngineError {
        EngineError::vault(path, e.to_string())
    }
}

#[async_trait]
impl VaultStore for FsVault {
    async fn read_text(&self, path: &str) -> EngineResult<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full).await.map_err(|e| Self::io_err(path, e))
    }

    async fn write_text(&self, path: &str, text: &str) -> EngineResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Self::io_err(path, e))?;
        }
        tokio::fs::write(&full, text).await.map_err(|e| Self::io_err(path, e))?;
        debug!("[vault] Wrote {} ({} bytes)", path, text.len());
        Ok(())
    }

    async fn read_binary(&self, path: &str) -> EngineResult<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full).await.map_err(|e| Self::io_err(path, e))
    }

    async fn list_folder(&self, path: &str) -> EngineResult<Vec<String>> {
        let full = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&full).await.map_err(|e| Self::io_err(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Self::io_err(path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    async fn create_folder(&self, path: &str) -> EngineResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(&full).await.map_err(|e| Self::io_err(path, e))
    }

    async fn trash_folder(&self, path: &str) -> EngineResult<()> {
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(EngineError::vault(path, "refusing to trash the vault root"));
        }
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| EngineError::vault(path, "folder has no name"))?;

        let trash = self.root.join(TRASH_FOLDER);
        tokio::fs::create_dir_all(&trash).await.map_err(|e| Self::io_err(path, e))?;
        let target = trash.join(format!("{}-{}", name, chrono::Utc::now().format("%Y%m%d%H%M%S%3f")));
        tokio::fs::rename(&full, &target).await.map_err(|e| Self::io_err(path, e))?;

        info!("[vault] Trashed {} → {}", path, target.display());
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::try_exists(&full).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Join vault-relative segments with `/`, skipping empty ones.
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
