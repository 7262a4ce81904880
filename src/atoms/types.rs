// ── vaultchat Atoms: Pure Data Types ───────────────────────────────────────
// Plain struct/enum definitions shared by every engine module.
// Atoms layer rule: no I/O, no imports from engine/.
//
// Vault-authored records (characters, lorebooks, memories) use camelCase
// JSON keys; settings use snake_case TOML keys.

use crate::atoms::constants::{
    DEFAULT_MEMORY_LIMIT, DEFAULT_SCAN_DEPTH, DEFAULT_SHARED_LOREBOOK_FOLDER, DEFAULT_TEMPERATURE,
    DEFAULT_TOP_P,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

fn default_true() -> bool {
    true
}

// ── Chat messages ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Stable id for dialogue-file messages; never sent over the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage { id: None, role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

// ── Completion results ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Final result of one completion call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        SamplingParams { temperature: DEFAULT_TEMPERATURE, top_p: DEFAULT_TOP_P }
    }
}

// ── Memories ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    #[default]
    Fact,
    Event,
    Preference,
    Relationship,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Event => "event",
            MemoryType::Preference => "preference",
            MemoryType::Relationship => "relationship",
        }
    }

    /// Unknown labels fall back to `Fact`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "event" => MemoryType::Event,
            "preference" => MemoryType::Preference,
            "relationship" => MemoryType::Relationship,
            _ => MemoryType::Fact,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted fact. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub memory_type: MemoryType,
    /// In [0, 1].
    #[serde(default)]
    pub importance: f64,
    #[serde(default)]
    pub source_message_id: String,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ── Lorebooks ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LorebookEntry {
    pub name: String,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub always_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lorebook {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entries: Vec<LorebookEntry>,
}

// ── Characters ─────────────────────────────────────────────────────────────

/// The fields of a character record the engine reads. Card import and
/// editing live elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub scenario: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Free-form status block (HP, mood, inventory...) kept up to date by the UI.
    #[serde(default)]
    pub stats: Option<String>,
    /// Private lorebook.
    #[serde(default)]
    pub lorebook: Option<Lorebook>,
}

// ── Providers ──────────────────────────────────────────────────────────────

/// Which header carries the API key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthHeaderKind {
    #[default]
    Bearer,
    XGoogApiKey,
    XApiKey,
    ApiKey,
}

impl AuthHeaderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthHeaderKind::Bearer => "bearer",
            AuthHeaderKind::XGoogApiKey => "x-goog-api-key",
            AuthHeaderKind::XApiKey => "x-api-key",
            AuthHeaderKind::ApiKey => "api-key",
        }
    }

    /// Unknown values map to `Bearer`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "x-goog-api-key" => AuthHeaderKind::XGoogApiKey,
            "x-api-key" => AuthHeaderKind::XApiKey,
            "api-key" => AuthHeaderKind::ApiKey,
            _ => AuthHeaderKind::Bearer,
        }
    }
}

impl Serialize for AuthHeaderKind {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AuthHeaderKind {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().map(AuthHeaderKind::parse_lenient).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmProvider {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub auth_header: AuthHeaderKind,
    /// Known vendor preset ("openai", "google", "openrouter"...), used to
    /// pick a model-list parser.
    #[serde(default)]
    pub preset_id: Option<String>,
}

/// Request class; each can be pointed at a different provider/model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Text,
    Extraction,
}

impl ModelClass {
    pub const ALL: [ModelClass; 2] = [ModelClass::Text, ModelClass::Extraction];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelClass::Text => "text",
            ModelClass::Extraction => "extraction",
        }
    }
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(ModelClass::Text),
            "extraction" => Ok(ModelClass::Extraction),
            other => Err(format!("unknown model class '{}'", other)),
        }
    }
}

/// Pointer into the provider list. May dangle after a provider is deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReference {
    pub provider_id: String,
    #[serde(default)]
    pub model: String,
}

impl ModelReference {
    pub fn new(provider_id: impl Into<String>, model: impl Into<String>) -> Self {
        ModelReference { provider_id: provider_id.into(), model: model.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDefaults {
    #[serde(default)]
    pub text: Option<ModelReference>,
    #[serde(default)]
    pub extraction: Option<ModelReference>,
}

impl ModelDefaults {
    pub fn get(&self, class: ModelClass) -> Option<&ModelReference> {
        match class {
            ModelClass::Text => self.text.as_ref(),
            ModelClass::Extraction => self.extraction.as_ref(),
        }
    }
}

/// Output of provider resolution. Recomputed per call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProvider {
    pub provider: LlmProvider,
    pub model: String,
    pub provider_id: String,
}

// ── Settings ───────────────────────────────────────────────────────────────

/// Engine configuration. Every field has a default so partial files load.
/// Persistence and validation live in `engine::settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub temperature: f64,
    pub top_p: f64,
    pub memory_limit: usize,
    pub scan_depth: usize,
    pub vault_root: Option<PathBuf>,
    pub shared_lorebook_folder: String,
    pub extraction_enabled: bool,
    pub providers: Vec<LlmProvider>,
    pub defaults: ModelDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            scan_depth: DEFAULT_SCAN_DEPTH,
            vault_root: None,
            shared_lorebook_folder: DEFAULT_SHARED_LOREBOOK_FOLDER.to_string(),
            extraction_enabled: true,
            providers: vec![],
            defaults: ModelDefaults::default(),
        }
    }
}

impl Settings {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams { temperature: self.temperature, top_p: self.top_p }
    }

    pub fn provider(&self, id: &str) -> Option<&LlmProvider> {
        self.providers.iter().find(|p| p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_header_kind_lenient() {
        #[derive(Deserialize)]
        struct Wrap {
            #[serde(default)]
            kind: AuthHeaderKind,
        }
        let w: Wrap = serde_json::from_str(r#"{"kind":"x-goog-api-key"}"#).unwrap();
        assert_eq!(w.kind, AuthHeaderKind::XGoogApiKey);
        let w: Wrap = serde_json::from_str(r#"{"kind":"something-new"}"#).unwrap();
        assert_eq!(w.kind, AuthHeaderKind::Bearer);
        let w: Wrap = serde_json::from_str(r#"{"kind":null}"#).unwrap();
        assert_eq!(w.kind, AuthHeaderKind::Bearer);
        let w: Wrap = serde_json::from_str("{}").unwrap();
        assert_eq!(w.kind, AuthHeaderKind::Bearer);
    }

    #[test]
    fn test_lorebook_entry_defaults() {
        let e: LorebookEntry = serde_json::from_str(r#"{"name":"Castle","keys":["castle"]}"#).unwrap();
        assert!(e.enabled);
        assert!(!e.always_active);
        assert_eq!(e.order, 0);
    }

    #[test]
    fn test_memory_entry_camel_case() {
        let json = r#"{"id":"m1","content":"Likes tea","type":"preference","importance":0.7,
                       "sourceMessageId":"msg-3","keywords":["tea"],"createdAt":"2024-01-01T00:00:00Z"}"#;
        let m: MemoryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(m.memory_type, MemoryType::Preference);
        assert_eq!(m.source_message_id, "msg-3");
        assert!(m.keywords.contains("tea"));
    }

    #[test]
    fn test_chat_message_id_not_serialized_when_absent() {
        let v = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["role"], "user");
    }

    #[test]
    fn test_model_class_parse() {
        assert_eq!("Extraction".parse::<ModelClass>().unwrap(), ModelClass::Extraction);
        assert!("image".parse::<ModelClass>().is_err());
    }
}
