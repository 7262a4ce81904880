// vaultchat integration tests — provider wire protocol against a mock HTTP
// server, and full chat turns over a temporary vault.

use mockito::Matcher;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use vaultchat::engine::chat::{append_dialogue, load_dialogue};
use vaultchat::engine::http::RetryPolicy;
use vaultchat::engine::memory::MemoryStore;
use vaultchat::engine::providers::ChunkCallback;
use vaultchat::{
    resolve_provider, AbortSignal, AiProvider, AuthHeaderKind, ChatCompletion, ChatMessage, ChatSession,
    CompletionClient, EngineError, FsVault, LlmProvider, MemoryEntry, MemoryType, ModelClass, ProviderError,
    SamplingParams, Settings, TokenUsage, VaultStore,
};

// ── Helpers ────────────────────────────────────────────────────────────────

fn make_provider(base_url: &str) -> LlmProvider {
    LlmProvider {
        id: "mock".into(),
        name: "Mock".into(),
        base_url: base_url.into(),
        api_key: "sk-test".into(),
        default_model: Some("mock-model".into()),
        auth_header: AuthHeaderKind::Bearer,
        preset_id: None,
    }
}

fn make_settings(base_url: &str) -> Settings {
    Settings { providers: vec![make_provider(base_url)], ..Settings::default() }
}

fn sse_body(deltas: &[&str], usage: Option<Value>) -> String {
    let mut body = String::new();
    for d in deltas {
        body.push_str(&format!("data: {}\n\n", json!({"choices": [{"delta": {"content": d}}]})));
    }
    if let Some(u) = usage {
        body.push_str(&format!("data: {}\n\n", json!({"choices": [], "usage": u})));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Collects every callback for assertions.
#[derive(Default)]
struct Chunks(Vec<(String, bool)>);

impl Chunks {
    fn sink(&mut self) -> impl FnMut(&str, bool) + Send + '_ {
        move |delta: &str, done: bool| self.0.push((delta.to_string(), done))
    }
}

async fn stream(
    provider: &LlmProvider,
    chunks: &mut Chunks,
    abort: &AbortSignal,
) -> Result<ChatCompletion, ProviderError> {
    let client = CompletionClient::new();
    let mut sink = chunks.sink();
    client
        .stream_chat(provider, "mock-model", &[ChatMessage::user("Hi")], SamplingParams::default(), &mut sink, abort)
        .await
}

// ── Streaming ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_hello_with_usage() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "mock-model",
            "stream": true,
            "stream_options": {"include_usage": true}
        })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse_body(&["Hel", "lo"], Some(json!({"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}))))
        .create_async()
        .await;

    let mut chunks = Chunks::default();
    let done = stream(&make_provider(&server.url()), &mut chunks, &AbortSignal::new()).await.unwrap();

    assert_eq!(done.content, "Hello");
    assert_eq!(done.usage, Some(TokenUsage { prompt_tokens: 5, completion_tokens: 2, total_tokens: 7 }));
    assert_eq!(
        chunks.0,
        vec![("Hel".to_string(), false), ("lo".to_string(), false), (String::new(), true)]
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let mut server = mockito::Server::new_async().await;
    let body = format!(
        ": keep-alive\n\ndata: {}\n\ndata: {{not json\n\nevent: ping\ndata: {}\n\ndata: [DONE]\n\n",
        json!({"choices": [{"delta": {"content": "A"}}]}),
        json!({"choices": [{"delta": {"content": "B"}}]}),
    );
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let mut chunks = Chunks::default();
    let done = stream(&make_provider(&server.url()), &mut chunks, &AbortSignal::new()).await.unwrap();
    assert_eq!(done.content, "AB");
    assert_eq!(done.usage, None);
    assert_eq!(chunks.0.len(), 3);
}

#[tokio::test]
async fn test_stream_without_done_still_finishes() {
    let mut server = mockito::Server::new_async().await;
    let body = format!("data: {}\n\n", json!({"choices": [{"delta": {"content": "partial"}}]}));
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let mut chunks = Chunks::default();
    let done = stream(&make_provider(&server.url()), &mut chunks, &AbortSignal::new()).await.unwrap();
    assert_eq!(done.content, "partial");
    assert_eq!(chunks.0.last(), Some(&(String::new(), true)));
}

#[tokio::test]
async fn test_google_key_header_only() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("x-goog-api-key", "sk-test")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(sse_body(&["ok"], None))
        .create_async()
        .await;

    let mut provider = make_provider(&server.url());
    provider.auth_header = AuthHeaderKind::XGoogApiKey;
    let mut chunks = Chunks::default();
    let done = stream(&provider, &mut chunks, &AbortSignal::new()).await.unwrap();
    assert_eq!(done.content, "ok");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_aborted_before_send_is_cancelled() {
    let server = mockito::Server::new_async().await;
    let abort = AbortSignal::new();
    abort.abort();

    let mut chunks = Chunks::default();
    let err = stream(&make_provider(&server.url()), &mut chunks, &abort).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(chunks.0.is_empty());
}

#[tokio::test]
async fn test_abort_mid_stream_keeps_delivered_chunks() {
    let mut server = mockito::Server::new_async().await;
    let first = format!("data: {}\n\n", json!({"choices": [{"delta": {"content": "Hel"}}]}));
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_chunked_body(move |w| {
            w.write_all(first.as_bytes())?;
            w.flush()?;
            // The client aborts long before the rest would arrive.
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"data: [DONE]\n\n")
        })
        .create_async()
        .await;

    let abort = AbortSignal::new();
    let trip = abort.clone();
    let mut calls: Vec<(String, bool)> = Vec::new();
    let mut sink = |delta: &str, done: bool| {
        calls.push((delta.to_string(), done));
        trip.abort();
    };
    let err = CompletionClient::new()
        .stream_chat(
            &make_provider(&server.url()),
            "mock-model",
            &[ChatMessage::user("Hi")],
            SamplingParams::default(),
            &mut sink,
            &abort,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls, vec![("Hel".to_string(), false)]);
}

// ── Error statuses ─────────────────────────────────────────────────────────

async fn stream_status(status: usize, body: &str) -> ProviderError {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(status)
        .with_body(body)
        .create_async()
        .await;
    let mut chunks = Chunks::default();
    stream(&make_provider(&server.url()), &mut chunks, &AbortSignal::new()).await.unwrap_err()
}

#[tokio::test]
async fn test_401_is_auth() {
    let err = stream_status(401, r#"{"error": "invalid key"}"#).await;
    assert!(matches!(err, ProviderError::Auth { status: 401, .. }));
    assert!(err.user_hint().contains("API key"));
}

#[tokio::test]
async fn test_404_is_not_found() {
    let err = stream_status(404, "no such route").await;
    assert!(matches!(err, ProviderError::NotFound { .. }));
    assert!(err.user_hint().contains("base URL"));
}

#[tokio::test]
async fn test_500_carries_body() {
    let err = stream_status(500, "upstream exploded").await;
    match err {
        ProviderError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "upstream exploded");
        }
        other => panic!("expected Api, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_is_network() {
    // Nothing listens on port 9 on a test host.
    let mut chunks = Chunks::default();
    let err = stream(&make_provider("http://127.0.0.1:9"), &mut chunks, &AbortSignal::new()).await.unwrap_err();
    assert!(matches!(err, ProviderError::Network(_)));
}

// ── Non-streaming ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_complete_reads_message_content() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": false})))
        .with_status(200)
        .with_body(
            json!({
                "choices": [{"message": {"role": "assistant", "content": "[]"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = CompletionClient::new();
    let done = client
        .complete(&make_provider(&server.url()), "mock-model", &[ChatMessage::user("x")], SamplingParams::default(), &AbortSignal::new())
        .await
        .unwrap();
    assert_eq!(done.content, "[]");
    assert_eq!(done.usage.map(|u| u.total_tokens), Some(4));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_complete_without_choices_is_protocol_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(r#"{"object": "chat.completion"}"#)
        .create_async()
        .await;

    let client = CompletionClient::new();
    let err = client
        .complete(&make_provider(&server.url()), "m", &[], SamplingParams::default(), &AbortSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Protocol(_)));
}

fn quick_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy { max_retries, base: Duration::from_millis(5), cap: Duration::from_millis(5) }
}

#[tokio::test]
async fn test_complete_retries_transient_status_then_gives_up() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body("overloaded")
        .expect(2)
        .create_async()
        .await;

    let client = CompletionClient::new().with_retry(quick_retry(1));
    let err = client
        .complete(&make_provider(&server.url()), "m", &[], SamplingParams::default(), &AbortSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Api { status: 503, .. }));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_complete_abort_during_retry_wait_is_cancelled() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_header("retry-after", "30")
        .expect(1)
        .create_async()
        .await;

    let abort = AbortSignal::new();
    let trip = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trip.abort();
    });

    let started = Instant::now();
    let err = CompletionClient::new()
        .complete(&make_provider(&server.url()), "m", &[], SamplingParams::default(), &abort)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(10));
    mock.assert_async().await;
}

// ── Model listing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_models_openai_shape() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/models")
        .match_header("authorization", "Bearer sk-test")
        .with_status(200)
        .with_body(json!({"data": [{"id": "zeta"}, {"id": "alpha"}]}).to_string())
        .create_async()
        .await;

    let ids = CompletionClient::new()
        .list_models(&make_provider(&server.url()), &AbortSignal::new())
        .await
        .unwrap();
    assert_eq!(ids, vec!["alpha", "zeta"]);
}

#[tokio::test]
async fn test_list_models_google_shape() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/models")
        .match_header("x-goog-api-key", "sk-test")
        .with_status(200)
        .with_body(json!({"models": [{"name": "models/gemini-1.5-pro"}]}).to_string())
        .create_async()
        .await;

    let mut provider = make_provider(&server.url());
    provider.auth_header = AuthHeaderKind::XGoogApiKey;
    provider.preset_id = Some("google".into());
    let ids = CompletionClient::new().list_models(&provider, &AbortSignal::new()).await.unwrap();
    assert_eq!(ids, vec!["gemini-1.5-pro"]);
}

#[tokio::test]
async fn test_list_models_auth_failure() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("GET", "/models").with_status(403).create_async().await;
    let err = CompletionClient::new()
        .list_models(&make_provider(&server.url()), &AbortSignal::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Auth { status: 403, .. }));
}

// ── Chat session over a vault ──────────────────────────────────────────────

async fn seed_vault(root: &std::path::Path) -> Arc<dyn VaultStore> {
    let vault: Arc<dyn VaultStore> = Arc::new(FsVault::new(root));
    let character = json!({
        "name": "Ayla",
        "description": "A sailor from the southern isles.",
        "stats": "Mood: wary",
        "lorebook": {
            "name": "Ayla",
            "entries": [
                {"name": "Harbor", "keys": ["harbor"], "content": "The harbor master is a retired pirate.", "order": 2},
                {"name": "Dragons", "keys": ["dragon"], "content": "Dragons vanished a century ago.", "order": 1},
                {"name": "Capital", "keys": ["capital"], "content": "The capital is Veris.", "order": 3}
            ]
        }
    });
    vault
        .write_text("characters/ayla/character.json", &character.to_string())
        .await
        .unwrap();
    let shared = json!([{"name": "Tone", "content": "Narrate in second person.", "alwaysActive": true, "order": 0}]);
    vault.write_text("lorebooks/world.json", &shared.to_string()).await.unwrap();

    let store = MemoryStore::for_character(vault.clone(), "ayla");
    for (content, keyword) in [
        ("Ayla is afraid of storms near the harbor", "harbor"),
        ("Ayla likes black tea", "tea"),
        ("Ayla has an older brother", "brother"),
    ] {
        store
            .add_memory(MemoryEntry::new(content, MemoryType::Fact, 0.7, "seed", [keyword.to_string()].into()))
            .await
            .unwrap();
    }
    vault
}

#[tokio::test]
async fn test_chat_turn_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let chat_mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"stream": true})),
            Matcher::Regex("## World Info".into()),
            Matcher::Regex("harbor master is a retired pirate".into()),
            Matcher::Regex("Narrate in second person".into()),
            Matcher::Regex("## Memories".into()),
            Matcher::Regex("afraid of storms".into()),
            Matcher::Regex("## Current Stats".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse_body(
            &["Aye, ", "old Garr runs it."],
            Some(json!({"prompt_tokens": 120, "completion_tokens": 6, "total_tokens": 126})),
        ))
        .create_async()
        .await;
    let extract_reply = "```json\n[{\"content\": \"Old Garr runs the harbor\", \"type\": \"fact\", \"importance\": 0.6, \"keywords\": [\"harbor\", \"garr\"]}]\n```";
    let extract_mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": false})))
        .with_status(200)
        .with_body(json!({"choices": [{"message": {"content": extract_reply}}]}).to_string())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let vault = seed_vault(dir.path()).await;
    let settings = make_settings(&server.url());
    let ai: Arc<dyn AiProvider> = Arc::new(CompletionClient::new());
    let session = ChatSession::open(vault.clone(), "ayla", &settings, ai).await.unwrap();

    let mut chunks = Chunks::default();
    let mut sink = chunks.sink();
    let outcome = session
        .send(&settings, &[], "Who runs the harbor now?", None, &mut sink, &AbortSignal::new())
        .await
        .unwrap();
    drop(sink);

    assert_eq!(outcome.content, "Aye, old Garr runs it.");
    assert_eq!(outcome.provider_id, "mock");
    assert_eq!(outcome.model, "mock-model");
    assert_eq!(chunks.0.len(), 3);
    assert_eq!(session.total_usage().total_tokens, 126);
    chat_mock.assert_async().await;

    outcome.extraction.expect("extraction scheduled").await.unwrap();
    extract_mock.assert_async().await;

    let memories = session.memory().all_memories().await.unwrap();
    assert_eq!(memories.len(), 4);
    let learned = memories.last().unwrap();
    assert_eq!(learned.content, "Old Garr runs the harbor");
    assert_eq!(learned.source_message_id, outcome.message_id);
    assert!(learned.keywords.contains("garr"));
}

#[tokio::test]
async fn test_cancelled_turn_schedules_no_extraction() {
    let mut server = mockito::Server::new_async().await;
    let extract_mock = server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({"stream": false})))
        .expect(0)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let vault = seed_vault(dir.path()).await;
    let settings = make_settings(&server.url());
    let session = ChatSession::open(vault, "ayla", &settings, Arc::new(CompletionClient::new())).await.unwrap();

    let abort = AbortSignal::new();
    abort.abort();
    let mut sink = |_: &str, _: bool| {};
    let err = session.send(&settings, &[], "Hello", None, &mut sink, &abort).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(session.memory().len().await.unwrap(), 3);
    extract_mock.assert_async().await;
}

#[tokio::test]
async fn test_no_providers_is_config_error() {
    let err: EngineError = resolve_provider(&Settings::default(), ModelClass::Text, None).unwrap_err().into();
    assert!(matches!(err, EngineError::Config(_)));
}

/// Holds every stream open until released.
struct Gate {
    release: Notify,
}

#[async_trait::async_trait]
impl AiProvider for Gate {
    async fn stream_chat(
        &self,
        _provider: &LlmProvider,
        _model: &str,
        _messages: &[ChatMessage],
        _sampling: SamplingParams,
        on_chunk: ChunkCallback<'_>,
        _abort: &AbortSignal,
    ) -> Result<ChatCompletion, ProviderError> {
        self.release.notified().await;
        on_chunk("done", false);
        on_chunk("", true);
        Ok(ChatCompletion { content: "done".into(), usage: None })
    }

    async fn complete(
        &self,
        _provider: &LlmProvider,
        _model: &str,
        _messages: &[ChatMessage],
        _sampling: SamplingParams,
        _abort: &AbortSignal,
    ) -> Result<ChatCompletion, ProviderError> {
        Ok(ChatCompletion { content: "[]".into(), usage: None })
    }

    async fn list_models(&self, _provider: &LlmProvider, _abort: &AbortSignal) -> Result<Vec<String>, ProviderError> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn test_second_send_while_streaming_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let vault = seed_vault(dir.path()).await;
    let mut settings = make_settings("http://unused.invalid");
    settings.extraction_enabled = false;
    let gate = Arc::new(Gate { release: Notify::new() });
    let session = ChatSession::open(vault, "ayla", &settings, gate.clone()).await.unwrap();
    let abort = AbortSignal::new();

    let first = async {
        let mut sink = |_: &str, _: bool| {};
        session.send(&settings, &[], "First", None, &mut sink, &abort).await
    };
    let second = async {
        while !session.is_busy() {
            tokio::task::yield_now().await;
        }
        let mut sink = |_: &str, _: bool| {};
        let rejected = session.send(&settings, &[], "Second", None, &mut sink, &abort).await;
        gate.release.notify_one();
        rejected
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first.unwrap().content, "done");
    assert!(matches!(second, Err(EngineError::Busy)));
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_dialogue_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let vault = FsVault::new(dir.path());
    append_dialogue(&vault, "ayla", &[ChatMessage::user("Hi"), ChatMessage::assistant("Ahoy.").with_id("m1")])
        .await
        .unwrap();
    let history = load_dialogue(&vault, "ayla").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "Ahoy.");
}
