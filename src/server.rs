//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat/query` | Ask a question (`{query, k?}`) |
//! | `POST` | `/api/chat/feedback` | Rate an answer (`{rating}`) |
//! | `GET`  | `/api/chat/analytics/summary` | Usage counters |
//! | `GET`  | `/api/chat/history` | Caller's history (`page`, `per_page`, `limit`) |
//! | `DELETE` | `/api/chat/history/{id}` | Delete one of the caller's entries |
//! | `DELETE` | `/api/chat/history/clear` | Delete all of the caller's entries |
//! | `GET`  | `/status` | Store and cache status |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/ping` | Liveness |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "k must be between 1 and 20" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsafe_content` (400),
//! `unauthorized` (401), `not_found` (404), `rate_limited` (429),
//! `internal` (500), `service_unavailable` (503).
//!
//! # Caller identity
//!
//! Rate limits, audit records and history key on [`ClientIdentity`]. The
//! `x-user-id` header names an authenticated user only when
//! `[server] trust_user_header` is set, i.e. behind an auth proxy that owns
//! the header. Otherwise it is ignored and the caller is anonymous, keyed
//! by the peer address, else the first `x-forwarded-for` entry.
//!
//! History endpoints require an authenticated user and only ever touch
//! that user's rows. Another user's entry is reported as not found.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, FromRequestParts, Path, Query, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use askbot_core::error::RetrievalError;
use askbot_core::safety::Identity;
use askbot_core::store::StoreStatus;

use crate::analytics::{AnalyticsSummary, FeedbackRating};
use crate::audit::{HistoryPage, HistoryWindow, SqliteAuditLog};
use crate::chat::{ChatResponse, UNAVAILABLE_ANSWER};
use crate::config::Config;
use crate::engine::Engine;

/// Start the HTTP server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Engine::from_config(config).await?;
    let app = router(engine);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "askbot server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Build the application router over `engine`.
pub fn router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat/query", post(handle_query))
        .route("/api/chat/feedback", post(handle_feedback))
        .route("/api/chat/analytics/summary", get(handle_analytics))
        .route("/api/chat/history", get(handle_history))
        .route("/api/chat/history/clear", delete(handle_clear_history))
        .route("/api/chat/history/{id}", delete(handle_delete_history))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .route("/ping", get(handle_ping))
        .layer(cors)
        .with_state(engine)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type that converts into a JSON HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "Authentication required".to_string(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "Internal server error".to_string(),
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // upstream details stay in the logs
        let message = if err.is_retryable() {
            warn!(error = %err, "upstream dependency unavailable");
            UNAVAILABLE_ANSWER.to_string()
        } else {
            err.to_string()
        };
        AppError {
            status,
            code: err.code().to_string(),
            message,
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    bad_request(format!("Invalid request body: {}", rejection.body_text()))
}

// ============ Caller identity ============

/// Who is calling, for rate limiting, auditing and history.
#[derive(Debug, Clone)]
pub struct ClientIdentity(pub Identity);

impl FromRequestParts<Engine> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        engine: &Engine,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIdentity(identify(parts, engine.trust_user_header)))
    }
}

fn identify(parts: &Parts, trust_user_header: bool) -> Identity {
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if let Some(user) = header("x-user-id") {
        if trust_user_header {
            return Identity::User(user);
        }
        debug!("ignoring x-user-id from untrusted caller");
    }

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let forwarded = || {
        header("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|v| !v.is_empty())
    };
    let ip = peer
        .or_else(forwarded)
        .unwrap_or_else(|| "unknown".to_string());

    Identity::Anonymous(ip)
}

/// The authenticated user id plus the history log, or the error to return.
fn history_access(
    engine: &Engine,
    identity: Identity,
) -> Result<(String, &SqliteAuditLog), AppError> {
    let Identity::User(user) = identity else {
        return Err(unauthorized());
    };
    let log = engine.history.as_deref().ok_or_else(|| AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "service_unavailable".to_string(),
        message: "Chat history is not available".to_string(),
    })?;
    Ok((user, log))
}

// ============ POST /api/chat/query ============

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub k: Option<i64>,
}

async fn handle_query(
    State(engine): State<Engine>,
    ClientIdentity(identity): ClientIdentity,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = payload.map_err(json_rejection)?;
    let response = engine.chat.ask(&identity, &req.query, req.k).await?;
    Ok(Json(response))
}

// ============ POST /api/chat/feedback ============

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub rating: String,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_feedback(
    State(engine): State<Engine>,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(req) = payload.map_err(json_rejection)?;
    let rating = FeedbackRating::parse(&req.rating)
        .ok_or_else(|| bad_request("Rating must be 'helpful' or 'not_helpful'"))?;
    engine.chat.analytics().record_feedback(rating);
    Ok(Json(MessageResponse {
        message: "Feedback received".to_string(),
    }))
}

// ============ GET /api/chat/analytics/summary ============

async fn handle_analytics(State(engine): State<Engine>) -> Json<AnalyticsSummary> {
    Json(engine.chat.analytics().summary())
}

// ============ /api/chat/history ============

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub limit: Option<i64>,
}

async fn handle_history(
    State(engine): State<Engine>,
    ClientIdentity(identity): ClientIdentity,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<HistoryPage>, AppError> {
    let (user, log) = history_access(&engine, identity)?;
    let Query(params) =
        params.map_err(|e| bad_request(format!("Invalid query string: {}", e.body_text())))?;
    let window = HistoryWindow::from_params(params.page, params.per_page, params.limit);
    let page = log.list(&user, window).await.map_err(internal)?;
    Ok(Json(page))
}

async fn handle_delete_history(
    State(engine): State<Engine>,
    ClientIdentity(identity): ClientIdentity,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    let (user, log) = history_access(&engine, identity)?;
    if !log.delete(&user, id).await.map_err(internal)? {
        return Err(not_found("Chat history entry not found"));
    }
    Ok(Json(MessageResponse {
        message: "Chat history deleted successfully".to_string(),
    }))
}

#[derive(Serialize)]
struct ClearResponse {
    message: String,
    deleted_count: u64,
}

async fn handle_clear_history(
    State(engine): State<Engine>,
    ClientIdentity(identity): ClientIdentity,
) -> Result<Json<ClearResponse>, AppError> {
    let (user, log) = history_access(&engine, identity)?;
    let deleted_count = log.clear(&user).await.map_err(internal)?;
    info!(deleted_count, "chat history cleared");
    Ok(Json(ClearResponse {
        message: "All chat history cleared successfully".to_string(),
        deleted_count,
    }))
}

// ============ GET /status ============

#[derive(Serialize)]
struct EmbeddingStatus {
    model: String,
    provider_calls: u64,
    memo_entries: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    store: StoreStatus,
    embedding: EmbeddingStatus,
    query_cache_entries: usize,
}

async fn handle_status(State(engine): State<Engine>) -> Result<Json<StatusResponse>, AppError> {
    let store = engine
        .store
        .status()
        .await
        .map_err(RetrievalError::from)?;
    let retriever = engine.chat.retriever();
    let gateway = retriever.gateway();
    Ok(Json(StatusResponse {
        store,
        embedding: EmbeddingStatus {
            model: gateway.model_name().to_string(),
            provider_calls: gateway.provider_calls(),
            memo_entries: gateway.memo_len(),
        },
        query_cache_entries: retriever.cache().len(),
    }))
}

// ============ GET /health, GET /ping ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct PingResponse {
    status: String,
    timestamp: i64,
}

async fn handle_ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "running".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}
