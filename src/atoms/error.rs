// ── vaultchat Atoms: Error Types ───────────────────────────────────────────
// Two `thiserror` enums:
//   • `ProviderError` — wire-level failures talking to an LLM provider.
//   • `EngineError`   — crate-wide error, wraps ProviderError plus config,
//                       vault and serialization failures.
//
// Design rules:
//   • No variant carries secret material (API keys) in its message.
//   • "Nothing matched" / "not configured" during ranking and resolution are
//     typed results, not errors; only the call sites that need a provider
//     convert `NotConfigured` into `EngineError::Config`.
//   • Malformed individual SSE frames never become an error value.

use thiserror::Error;

// ── Provider errors ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    /// 401 / 403 from the provider.
    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// 404 from the provider, usually a wrong base URL or model path.
    #[error("Endpoint not found (404): {message}")]
    NotFound { message: String },

    /// 429 from the provider.
    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    /// Any other non-2xx response; `message` is the response body.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Connection, TLS, timeout or mid-stream read failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The response could not be interpreted at the top level.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The caller aborted the request.
    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Classify a non-2xx status and its body.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { status, message: body },
            404 => ProviderError::NotFound { message: body },
            429 => ProviderError::RateLimited { message: body },
            _ => ProviderError::Api { status, message: body },
        }
    }

    /// Short actionable sentence for the chat UI.
    pub fn user_hint(&self) -> &'static str {
        match self {
            ProviderError::Auth { .. } => "The provider rejected the API key. Check the key in settings.",
            ProviderError::NotFound { .. } => "The provider endpoint was not found. Check the base URL and model name.",
            ProviderError::RateLimited { .. } => "The provider is rate limiting requests. Wait a moment and retry.",
            ProviderError::Api { .. } => "The provider returned an error.",
            ProviderError::Network(_) => "Could not reach the provider. Check your connection and base URL.",
            ProviderError::Protocol(_) => "The provider sent a response that could not be read.",
            ProviderError::Cancelled => "Generation was stopped.",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Network(e.to_string())
    }
}

// ── Engine errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Settings are missing or invalid (includes "no provider configured").
    #[error("Configuration error: {0}")]
    Config(String),

    /// Vault read/write failure for a specific path.
    #[error("Vault error: {path}: {message}")]
    Vault { path: String, message: String },

    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Settings file is not valid TOML.
    #[error("Settings parse error: {0}")]
    SettingsParse(#[from] toml::de::Error),

    /// Settings could not be rendered as TOML.
    #[error("Settings write error: {0}")]
    SettingsWrite(#[from] toml::ser::Error),

    /// A generation is already streaming for this session.
    #[error("A reply is already being generated for this chat")]
    Busy,
}

impl EngineError {
    pub fn vault(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Vault { path: path.into(), message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True when the underlying failure is a user abort.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Provider(p) if p.is_cancelled())
    }
}

/// All engine operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;
