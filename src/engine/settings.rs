// vaultchat Engine — Settings Persistence
// TOML on disk. Default location: `<config_dir>/vaultchat/settings.toml`,
// overridden by `VAULTCHAT_CONFIG`. A missing file loads as defaults.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ModelClass, Settings};
use log::{info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "VAULTCHAT_CONFIG";

impl Settings {
    /// `$VAULTCHAT_CONFIG`, else `<config_dir>/vaultchat/settings.toml`.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vaultchat")
            .join("settings.toml")
    }

    pub fn load(path: &Path) -> EngineResult<Settings> {
        if !path.exists() {
            info!("[engine] No settings at {}, using defaults", path.display());
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&raw)?;
        info!("[engine] Loaded settings from {} ({} providers)", path.display(), settings.providers.len());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        info!("[engine] Saved settings to {}", path.display());
        Ok(())
    }

    /// Every problem found, joined into one `Config` error.
    /// Dangling model references only warn: resolution falls back past them.
    pub fn validate(&self) -> EngineResult<()> {
        let mut problems: Vec<String> = Vec::new();

        let mut seen = HashSet::new();
        for p in &self.providers {
            if p.id.trim().is_empty() {
                problems.push("a provider has an empty id".into());
            } else if !seen.insert(p.id.as_str()) {
                problems.push(format!("duplicate provider id '{}'", p.id));
            }
            if p.base_url.trim().is_empty() {
                problems.push(format!("provider '{}' has no base_url", p.id));
            } else if !(p.base_url.starts_with("http://") || p.base_url.starts_with("https://")) {
                problems.push(format!("provider '{}' base_url must start with http:// or https://", p.id));
            }
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            problems.push(format!("temperature {} is outside 0..=2", self.temperature));
        }
        if !(0.0..=1.0).contains(&self.top_p) || self.top_p == 0.0 {
            problems.push(format!("top_p {} is outside (0, 1]", self.top_p));
        }

        for class in ModelClass::ALL {
            if let Some(r) = self.defaults.get(class) {
                if self.provider(&r.provider_id).is_none() {
                    warn!("[engine] Default {} model points at missing provider '{}'", class, r.provider_id);
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Config(problems.join("; ")))
        }
    }
}
