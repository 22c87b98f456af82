//! HTTP surface
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Tiered search; degraded results carry a warning |
//! | `POST` | `/chat` | Rate-limited generation with fallback model |
//! | `POST` | `/chat/stream` | Same, streamed as a chunked text body |
//! | `GET`  | `/status` | Scheduler queue and rate-window snapshot |
//! | `GET`  | `/health/search` | Primary search health and cache reachability |
//!
//! Degraded search and fallback chat are still `200 OK`; the body says so.
//! Only a stopped scheduler or a failed fallback model yields `503`:
//!
//! ```json
//! { "error": { "code": "unavailable", "message": "scheduler is not running" } }
//! ```

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use gateway_core::{
    FallbackReason, FallbackSearch, LlmRequest, RateLimitedScheduler, SchedulerError,
    SchedulerStatus, SearchQuery, SearchResponse, SearchStatus, StreamingToken,
};

const DEFAULT_TOP_K: usize = 10;

/// Handles shared by every route
#[derive(Clone)]
pub struct AppState {
    search: FallbackSearch,
    scheduler: RateLimitedScheduler,
}

impl AppState {
    pub fn new(search: FallbackSearch, scheduler: RateLimitedScheduler) -> Self {
        Self { search, scheduler }
    }
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/search", post(handle_search))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/status", get(handle_status))
        .route("/health/search", get(handle_search_health))
        .with_state(state)
}

// ============ Request / response bodies ============

#[derive(Debug, Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchReply {
    #[serde(flatten)]
    response: SearchResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    context: Option<String>,
}

impl ChatBody {
    fn into_request(self) -> LlmRequest {
        let mut request = LlmRequest::new(self.prompt);
        if let Some(model) = self.model {
            request = request.with_model(model);
        }
        if let Some(system) = self.system {
            request = request.with_system(system);
        }
        if let Some(context) = self.context {
            request = request.with_context(context);
        }
        request
    }
}

#[derive(Debug, Serialize)]
struct ChatReply {
    response: String,
    model: String,
    used_fallback: bool,
    fallback_reason: Option<FallbackReason>,
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
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

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        warn!(error = %err, "Chat request could not be served");
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "unavailable",
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

// ============ Handlers ============

async fn handle_search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchReply>, AppError> {
    if body.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let mut query = SearchQuery::new(body.query, body.top_k.unwrap_or(DEFAULT_TOP_K));
    if let Some(scope) = body.scope {
        query = query.with_scope(scope);
    }

    let response = state.search.search_response(&query).await;
    let warning = response.warning();
    debug!(
        results = response.results.len(),
        degraded = response.degraded_mode,
        "Search served"
    );
    Ok(Json(SearchReply { response, warning }))
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, AppError> {
    if body.prompt.trim().is_empty() {
        return Err(bad_request("prompt must not be empty"));
    }

    let outcome = state.scheduler.generate(body.into_request()).await?;
    Ok(Json(ChatReply {
        response: outcome.response.content,
        model: outcome.response.model,
        used_fallback: outcome.used_fallback,
        fallback_reason: outcome.fallback_reason,
    }))
}

/// Streams token text; the `x-used-fallback` header reports the serving model
async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, AppError> {
    if body.prompt.trim().is_empty() {
        return Err(bad_request("prompt must not be empty"));
    }

    let stream = state.scheduler.generate_stream(body.into_request()).await?;
    let chunks = ReceiverStream::new(stream.receiver).filter_map(|token| match token {
        StreamingToken::Token(text) => Some(Ok::<_, Infallible>(text)),
        StreamingToken::Complete { .. } => None,
        StreamingToken::Error(e) => Some(Ok(format!("\n[error] {e}"))),
    });

    let mut response = Response::new(Body::from_stream(chunks));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        "x-used-fallback",
        header::HeaderValue::from_static(if stream.used_fallback { "true" } else { "false" }),
    );
    Ok(response)
}

async fn handle_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

async fn handle_search_health(State(state): State<AppState>) -> Json<SearchStatus> {
    Json(state.search.status().await)
}
