// vaultchat Engine — Provider Routing
// Resolves which provider/model serves a request class, and builds the
// provider-specific auth header. Both are pure functions of `Settings`;
// nothing is cached between calls.

use crate::atoms::error::EngineError;
use crate::atoms::types::{AuthHeaderKind, LlmProvider, ModelClass, ModelReference, ResolvedProvider, Settings};
use log::{debug, info};
use thiserror::Error;

/// No provider is configured at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No AI provider is configured. Add a provider in settings first.")]
pub struct NotConfigured;

impl From<NotConfigured> for EngineError {
    fn from(e: NotConfigured) -> Self {
        EngineError::Config(e.to_string())
    }
}

// ── Route Resolution ───────────────────────────────────────────────────────

fn model_for(provider: &LlmProvider, requested: &str) -> String {
    if requested.trim().is_empty() {
        provider.default_model.clone().unwrap_or_default()
    } else {
        requested.to_string()
    }
}

// A reference only counts if its provider still exists.
fn from_reference(settings: &Settings, reference: Option<&ModelReference>) -> Option<ResolvedProvider> {
    let reference = reference?;
    let provider = settings.provider(&reference.provider_id)?;
    Some(ResolvedProvider {
        provider: provider.clone(),
        model: model_for(provider, &reference.model),
        provider_id: provider.id.clone(),
    })
}

/// Resolve the provider for `class`. First match wins:
///   1. `override_ref`, if its provider exists
///   2. the global default for `class`
///   3. extraction only: whatever `text` resolves to
///   4. the first configured provider with its default model
pub fn resolve_provider(
    settings: &Settings,
    class: ModelClass,
    override_ref: Option<&ModelReference>,
) -> Result<ResolvedProvider, NotConfigured> {
    if let Some(r) = from_reference(settings, override_ref) {
        debug!("[routing] {} → override {}/{}", class, r.provider_id, r.model);
        return Ok(r);
    }

    if let Some(r) = from_reference(settings, settings.defaults.get(class)) {
        debug!("[routing] {} → default {}/{}", class, r.provider_id, r.model);
        return Ok(r);
    }

    if class == ModelClass::Extraction {
        debug!("[routing] extraction unconfigured, riding on text");
        return resolve_provider(settings, ModelClass::Text, None);
    }

    match settings.providers.first() {
        Some(first) => {
            info!("[routing] {} → fallback to first provider '{}'", class, first.id);
            Ok(ResolvedProvider {
                provider: first.clone(),
                model: first.default_model.clone().unwrap_or_default(),
                provider_id: first.id.clone(),
            })
        }
        None => Err(NotConfigured),
    }
}

// ── Auth headers ───────────────────────────────────────────────────────────

/// The single header that carries `key` for `kind`.
pub fn auth_headers(kind: AuthHeaderKind, key: &str) -> Vec<(&'static str, String)> {
    match kind {
        AuthHeaderKind::Bearer => vec![("Authorization", format!("Bearer {}", key))],
        AuthHeaderKind::XGoogApiKey => vec![("x-goog-api-key", key.to_string())],
        AuthHeaderKind::XApiKey => vec![("x-api-key", key.to_string())],
        AuthHeaderKind::ApiKey => vec![("api-key", key.to_string())],
    }
}
