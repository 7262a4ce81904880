// vaultchat Engine — Model Listing
// `GET {base}/models`. Vendors disagree on the response shape, so each known
// shape has its own parser, chosen by the provider's preset id, with a
// best-effort generic parser behind it.

use crate::atoms::error::ProviderError;
use crate::atoms::types::LlmProvider;
use crate::engine::http::truncate_utf8;
use crate::engine::providers::endpoint;
use crate::engine::routing::auth_headers;
use crate::engine::state::AbortSignal;
use log::{debug, error, info};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

// ── Known shapes ───────────────────────────────────────────────────────────

/// `{"data": [{"id": "gpt-4o"}, ...]}`
#[derive(Deserialize)]
struct OpenAiModelList {
    data: Vec<OpenAiModel>,
}

#[derive(Deserialize)]
struct OpenAiModel {
    id: String,
}

/// `{"models": [{"name": "models/gemini-1.5-pro"}, ...]}`
#[derive(Deserialize)]
struct GoogleModelList {
    models: Vec<GoogleModel>,
}

#[derive(Deserialize)]
struct GoogleModel {
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelListShape {
    OpenAi,
    Google,
    /// Bare array of strings or objects.
    Generic,
}

impl ModelListShape {
    pub fn for_preset(preset_id: Option<&str>) -> Self {
        match preset_id.map(|p| p.to_lowercase()).as_deref() {
            Some("google") | Some("gemini") => ModelListShape::Google,
            Some("openai") | Some("openrouter") | Some("groq") | Some("mistral") | Some("deepseek")
            | Some("together") | Some("lmstudio") | Some("azure") => ModelListShape::OpenAi,
            Some(_) => ModelListShape::Generic,
            None => ModelListShape::OpenAi,
        }
    }
}

/// Strict parse for one shape. `None` when the body is not that shape.
pub fn parse_shape(shape: ModelListShape, body: &Value) -> Option<Vec<String>> {
    match shape {
        ModelListShape::OpenAi => serde_json::from_value::<OpenAiModelList>(body.clone())
            .ok()
            .map(|l| l.data.into_iter().map(|m| m.id).collect()),
        ModelListShape::Google => serde_json::from_value::<GoogleModelList>(body.clone()).ok().map(|l| {
            l.models
                .into_iter()
                .map(|m| m.name.trim_start_matches("models/").to_string())
                .collect()
        }),
        ModelListShape::Generic => body.as_array().map(|items| items.iter().filter_map(item_id).collect()),
    }
}

// Strings, or objects carrying id / name / model.
fn item_id(item: &Value) -> Option<String> {
    let raw = match item {
        Value::String(s) => s.as_str(),
        Value::Object(_) => ["id", "name", "model"].iter().find_map(|k| item[*k].as_str())?,
        _ => return None,
    };
    let id = raw.trim().trim_start_matches("models/");
    (!id.is_empty()).then(|| id.to_string())
}

/// Any array of model-ish items found at the top level or under a common key.
pub fn parse_generic(body: &Value) -> Vec<String> {
    let items = body
        .as_array()
        .or_else(|| ["data", "models", "result"].iter().find_map(|k| body[*k].as_array()));
    items.map(|items| items.iter().filter_map(item_id).collect()).unwrap_or_default()
}

/// Parse with the preset's shape, falling back to the generic parser.
/// Output is sorted and de-duplicated.
pub fn parse_models(preset_id: Option<&str>, body: &Value) -> Vec<String> {
    let shape = ModelListShape::for_preset(preset_id);
    let mut ids = match parse_shape(shape, body) {
        Some(ids) if !ids.is_empty() => ids,
        _ => {
            debug!("[models] Body is not {:?}-shaped, trying generic parser", shape);
            parse_generic(body)
        }
    };
    ids.retain(|id| !id.trim().is_empty());
    ids.sort();
    ids.dedup();
    ids
}

// ── Request ────────────────────────────────────────────────────────────────

pub async fn list_models(
    client: &Client,
    provider: &LlmProvider,
    abort: &AbortSignal,
) -> Result<Vec<String>, ProviderError> {
    let url = endpoint(&provider.base_url, "models");
    let mut req = client.get(&url);
    for (name, value) in auth_headers(provider.auth_header, &provider.api_key) {
        req = req.header(name, value);
    }

    let response = tokio::select! {
        biased;
        _ = abort.cancelled() => return Err(ProviderError::Cancelled),
        sent = req.send() => sent?,
    };

    let status = response.status().as_u16();
    if !response.status().is_success() {
        let body = response.text().await.unwrap_or_default();
        error!("[models] {} error {}: {}", provider.id, status, truncate_utf8(&body, 300));
        return Err(ProviderError::from_status(status, body));
    }

    let body: Value = tokio::select! {
        biased;
        _ = abort.cancelled() => return Err(ProviderError::Cancelled),
        parsed = response.json::<Value>() => {
            parsed.map_err(|e| ProviderError::Protocol(format!("Model list is not JSON: {}", e)))?
        }
    };

    let ids = parse_models(provider.preset_id.as_deref(), &body);
    info!("[models] {} lists {} models", provider.id, ids.len());
    Ok(ids)
}
