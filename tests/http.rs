use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::stream::{self, BoxStream, StreamExt};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use askbot::audit::{AuditRecord, AuditSink, SqliteAuditLog};
use askbot::config::{parse_config, Config};
use askbot::db;
use askbot::engine::Engine;
use askbot::migrate;
use askbot::server::router;
use askbot::synthesizer::AnswerSynthesizer;
use askbot_core::embedding::EmbeddingProvider;
use askbot_core::error::{GatewayError, StoreError};
use askbot_core::gateway::EmbeddingGateway;
use askbot_core::models::{DocumentChunk, ScoredChunk};
use askbot_core::store::memory::InMemoryStore;
use askbot_core::store::{DocumentStore, ScanFilter, StoreCapabilities, StoreStatus};

/// Embeds every text as the same unit vector and counts calls.
struct CountingProvider {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    fn model_name(&self) -> &str {
        "counting"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.0, 0.0])
    }
}

struct CannedSynthesizer;

#[async_trait]
impl AnswerSynthesizer for CannedSynthesizer {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn synthesize(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        Ok("Polls are open from 7am to 8pm.".to_string())
    }
}

/// A store whose backend is unreachable.
struct DownStore;

#[async_trait]
impl DocumentStore for DownStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::default()
    }

    async fn vector_search(
        &self,
        _query_vec: &[f32],
        _num_candidates: usize,
        _limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        Err(StoreError::Unsupported)
    }

    fn scan(
        &self,
        _filter: ScanFilter,
        _limit: usize,
        _batch_size: usize,
    ) -> BoxStream<'_, Result<DocumentChunk, StoreError>> {
        stream::iter(vec![Err(StoreError::Unavailable(
            "connection refused".to_string(),
        ))])
        .boxed()
    }

    async fn upsert_chunk(&self, _chunk: &DocumentChunk) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn status(&self) -> Result<StoreStatus, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

fn test_config() -> Config {
    parse_config("[db]\npath = \"./unused.sqlite\"\n").unwrap()
}

/// Sits behind an auth proxy that owns `x-user-id`.
fn proxied_config() -> Config {
    parse_config("[db]\npath = \"./unused.sqlite\"\n[server]\ntrust_user_header = true\n")
        .unwrap()
}

fn chunk(id: &str, source: &str, text: &str) -> DocumentChunk {
    DocumentChunk {
        id: id.to_string(),
        source: source.to_string(),
        text: text.to_string(),
        embedding: vec![1.0, 0.0, 0.0],
        chunk_index: 0,
        total_chunks: 1,
    }
}

fn corpus() -> Vec<DocumentChunk> {
    vec![
        chunk(
            "polls-0",
            "polling_places.json",
            "Polling places open at 7am and close at 8pm on election day.",
        ),
        chunk(
            "id-0",
            "voter_id.json",
            "Bring a photo ID such as a driver's license when you vote.",
        ),
    ]
}

fn build_engine(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    history: Option<Arc<SqliteAuditLog>>,
) -> (Engine, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = Arc::new(CountingProvider {
        calls: calls.clone(),
    });
    let gateway = Arc::new(EmbeddingGateway::new(provider, 16));
    let engine = Engine::assemble(
        config,
        store,
        gateway,
        Arc::new(CannedSynthesizer),
        history,
    )
    .unwrap();
    (engine, calls)
}

fn engine_with(store: Arc<dyn DocumentStore>) -> (Engine, Arc<AtomicUsize>) {
    build_engine(&test_config(), store, None)
}

fn default_engine() -> (Engine, Arc<AtomicUsize>) {
    engine_with(Arc::new(InMemoryStore::from_chunks(corpus())))
}

async fn post_json(engine: &Engine, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(engine, request).await
}

async fn get(engine: &Engine, path: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(engine, request).await
}

fn as_user(method: &str, path: &str, user: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("x-user-id", user)
        .header("x-forwarded-for", "203.0.113.7")
        .body(Body::empty())
        .unwrap()
}

async fn send(engine: &Engine, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(engine.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_query_returns_answer_and_sources() {
    let (engine, calls) = default_engine();
    let (status, body) = post_json(
        &engine,
        "/api/chat/query",
        json!({"query": "When do polls open?", "k": 2}),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["answer"], "Polls are open from 7am to 8pm.");
    assert_eq!(body["sources"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["is_political"], true);
    assert_eq!(body["redacted_sources"], false);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeated_query_hits_cache() {
    let (engine, calls) = default_engine();
    for _ in 0..3 {
        let (status, _) = post_json(
            &engine,
            "/api/chat/query",
            json!({"query": "What ID do I need?"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (_, status_body) = get(&engine, "/status").await;
    assert_eq!(status_body["query_cache_entries"], 1);
    assert_eq!(status_body["embedding"]["provider_calls"], 1);
}

#[tokio::test]
async fn test_pii_query_is_rejected_before_embedding() {
    let (engine, calls) = default_engine();
    let (status, body) = post_json(
        &engine,
        "/api/chat/query",
        json!({"query": "my ssn is 123-45-6789, am I registered?"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unsafe_content");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_k_bounds() {
    let (engine, _) = default_engine();
    for k in [0, 21, -1] {
        let (status, body) = post_json(
            &engine,
            "/api/chat/query",
            json!({"query": "where do I vote", "k": k}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "k = {}", k);
        assert_eq!(body["error"]["code"], "bad_request");
    }
    for k in [1, 20] {
        let (status, _) = post_json(
            &engine,
            "/api/chat/query",
            json!({"query": "where do I vote", "k": k}),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "k = {}", k);
    }
}

#[tokio::test]
async fn test_empty_query_and_bad_body() {
    let (engine, _) = default_engine();
    let (status, _) = post_json(&engine, "/api/chat/query", json!({"query": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/api/chat/query")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&engine, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_sensitive_sources_are_redacted() {
    let mut chunks = corpus();
    chunks.push(chunk(
        "memo-0",
        "internal_memo.json",
        "Confidential: precinct staffing roster for election day.",
    ));
    let (engine, _) = engine_with(Arc::new(InMemoryStore::from_chunks(chunks)));

    let (status, body) = post_json(
        &engine,
        "/api/chat/query",
        json!({"query": "who staffs the precinct on election day", "k": 3}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["redacted_sources"], true);
    let sources = body["sources"].as_array().unwrap();
    assert_eq!(sources.len(), 3);
    let redacted: Vec<&Value> = sources
        .iter()
        .filter(|s| s["title"] == "[Redacted]")
        .collect();
    assert_eq!(redacted.len(), 1);
    assert_eq!(
        redacted[0]["snippet"],
        "This source has been redacted for privacy reasons."
    );
    assert!(redacted[0]["url"].is_null());
}

#[tokio::test]
async fn test_unreachable_store_is_service_unavailable() {
    let (engine, _) = engine_with(Arc::new(DownStore));
    let (status, body) = post_json(
        &engine,
        "/api/chat/query",
        json!({"query": "where do I vote"}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "service_unavailable");
    assert_eq!(
        body["error"]["message"],
        "AI Assistant is temporarily unavailable. Please try again later."
    );

    let (status, _) = get(&engine, "/status").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_eleventh_anonymous_request_is_rate_limited() {
    let (engine, _) = default_engine();
    for i in 0..10 {
        let (status, _) = post_json(
            &engine,
            "/api/chat/query",
            json!({"query": format!("question number {}", i)}),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "request {}", i + 1);
    }
    let (status, body) = post_json(
        &engine,
        "/api/chat/query",
        json!({"query": "one more question"}),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn test_forged_user_ids_share_the_anonymous_window() {
    let (engine, _) = default_engine();
    for i in 0..12 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat/query")
            .header("content-type", "application/json")
            .header("x-user-id", format!("someone-{}", i))
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::from(
                json!({"query": format!("question {}", i)}).to_string(),
            ))
            .unwrap();
        let (status, body) = send(&engine, request).await;
        if i < 10 {
            assert_eq!(status, StatusCode::OK, "request {}", i + 1);
        } else {
            assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "request {}", i + 1);
            assert_eq!(body["error"]["code"], "rate_limited");
        }
    }
}

#[tokio::test]
async fn test_authenticated_users_have_their_own_window() {
    let (engine, _) = build_engine(
        &proxied_config(),
        Arc::new(InMemoryStore::from_chunks(corpus())),
        None,
    );
    for i in 0..20 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat/query")
            .header("content-type", "application/json")
            .header("x-user-id", "voter-42")
            .body(Body::from(
                json!({"query": format!("question {}", i)}).to_string(),
            ))
            .unwrap();
        let (status, _) = send(&engine, request).await;
        assert_eq!(status, StatusCode::OK, "request {}", i + 1);
    }

    // a different anonymous caller is unaffected
    let (status, _) = post_json(
        &engine,
        "/api/chat/query",
        json!({"query": "where do I vote"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_feedback_and_analytics() {
    let (engine, _) = default_engine();
    let (status, _) = post_json(
        &engine,
        "/api/chat/query",
        json!({"query": "polling places hours"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_json(
        &engine,
        "/api/chat/query",
        json!({"query": "ssn 123-45-6789"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) =
        post_json(&engine, "/api/chat/feedback", json!({"rating": "helpful"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Feedback received");

    let (status, _) = post_json(&engine, "/api/chat/feedback", json!({"rating": "meh"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, summary) = get(&engine, "/api/chat/analytics/summary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_requests"], 1);
    assert_eq!(summary["blocked_requests_count"], 1);
    assert_eq!(summary["feedback"]["helpful"], 1);
    assert_eq!(summary["feedback"]["not_helpful"], 0);
    let keywords: Vec<&str> = summary["top_queries_by_keyword"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|k| k["keyword"].as_str())
        .collect();
    assert!(keywords.contains(&"polling"));
}

#[tokio::test]
async fn test_health_and_ping() {
    let (engine, _) = default_engine();
    let (status, body) = get(&engine, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (status, body) = get(&engine, "/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert!(body["timestamp"].as_i64().unwrap() > 0);
}

// ============ chat history ============

async fn history_log() -> (TempDir, Arc<SqliteAuditLog>) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("history.sqlite");
    let config = parse_config(&format!("[db]\npath = \"{}\"\n", path.display())).unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, Arc::new(SqliteAuditLog::new(pool)))
}

async fn remember(log: &SqliteAuditLog, user: &str, query: &str, created_at: i64) {
    let record = AuditRecord {
        user_id: Some(user.to_string()),
        ip_address: None,
        query: query.to_string(),
        answer: format!("answer to {}", query),
        sources: Vec::new(),
        is_political: false,
        response_time_ms: 3.0,
        created_at,
    };
    log.record(&record).await.unwrap();
}

async fn history_engine() -> (TempDir, Arc<SqliteAuditLog>, Engine) {
    let (tmp, log) = history_log().await;
    let (engine, _) = build_engine(
        &proxied_config(),
        Arc::new(InMemoryStore::from_chunks(corpus())),
        Some(log.clone()),
    );
    (tmp, log, engine)
}

#[tokio::test]
async fn test_history_requires_an_authenticated_user() {
    let (_tmp, log, engine) = history_engine().await;
    remember(&log, "voter-42", "where do I vote", 100).await;

    let (status, body) = get(&engine, "/api/chat/history").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    // without a trusted proxy the header names nobody
    let (engine, _) = build_engine(
        &test_config(),
        Arc::new(InMemoryStore::from_chunks(corpus())),
        Some(log.clone()),
    );
    let (status, _) = send(&engine, as_user("GET", "/api/chat/history", "voter-42")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&engine, as_user("DELETE", "/api/chat/history/clear", "voter-42")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_history_lists_only_the_callers_entries() {
    let (_tmp, log, engine) = history_engine().await;
    remember(&log, "voter-42", "first question", 100).await;
    remember(&log, "voter-7", "someone else", 150).await;
    remember(&log, "voter-42", "second question", 200).await;
    remember(&log, "voter-42", "third question", 300).await;

    let (status, body) = send(&engine, as_user("GET", "/api/chat/history", "voter-42")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["page"], 1);
    assert_eq!(body["per_page"], 20);
    assert_eq!(body["pages"], 1);
    let queries: Vec<&str> = body["history"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["query"].as_str())
        .collect();
    assert_eq!(
        queries,
        vec!["third question", "second question", "first question"]
    );
    assert_eq!(body["history"][0]["user_id"], "voter-42");
    assert_eq!(body["history"][0]["created_at"], "1970-01-01T00:05:00+00:00");

    let (_, body) = send(
        &engine,
        as_user("GET", "/api/chat/history?page=2&per_page=2", "voter-42"),
    )
    .await;
    assert_eq!(body["pages"], 2);
    assert_eq!(body["history"].as_array().unwrap().len(), 1);
    assert_eq!(body["history"][0]["query"], "first question");

    let (_, body) = send(
        &engine,
        as_user("GET", "/api/chat/history?limit=2", "voter-42"),
    )
    .await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["per_page"], 2);
    assert_eq!(body["history"][0]["query"], "third question");

    let (status, body) = send(
        &engine,
        as_user("GET", "/api/chat/history?page=abc", "voter-42"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_delete_history_entry_is_owner_only() {
    let (_tmp, log, engine) = history_engine().await;
    remember(&log, "voter-7", "not yours", 100).await;
    remember(&log, "voter-42", "mine", 200).await;
    // ids follow insertion order
    let (theirs, mine) = (1, 2);

    let (status, body) = send(
        &engine,
        as_user("DELETE", &format!("/api/chat/history/{}", theirs), "voter-42"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = send(
        &engine,
        as_user("DELETE", &format!("/api/chat/history/{}", mine), "voter-42"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Chat history deleted successfully");

    let (status, _) = send(
        &engine,
        as_user("DELETE", &format!("/api/chat/history/{}", mine), "voter-42"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // the other user's entry survived
    let (_, body) = send(&engine, as_user("GET", "/api/chat/history", "voter-7")).await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_clear_history_removes_only_the_callers_entries() {
    let (_tmp, log, engine) = history_engine().await;
    remember(&log, "voter-42", "one", 100).await;
    remember(&log, "voter-42", "two", 200).await;
    remember(&log, "voter-7", "three", 300).await;

    let (status, body) =
        send(&engine, as_user("DELETE", "/api/chat/history/clear", "voter-42")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted_count"], 2);
    assert_eq!(body["message"], "All chat history cleared successfully");

    let (_, body) = send(&engine, as_user("GET", "/api/chat/history", "voter-42")).await;
    assert_eq!(body["total"], 0);
    assert_eq!(body["pages"], 0);
    let (_, body) = send(&engine, as_user("GET", "/api/chat/history", "voter-7")).await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_history_without_a_log_is_unavailable() {
    let (engine, _) = build_engine(
        &proxied_config(),
        Arc::new(InMemoryStore::from_chunks(corpus())),
        None,
    );
    let (status, body) = send(&engine, as_user("GET", "/api/chat/history", "voter-42")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "service_unavailable");
}
