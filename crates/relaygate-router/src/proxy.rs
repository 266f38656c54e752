use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures_util::StreamExt;
use relaygate_core::bootstrap::AppState;
use relaygate_core::{ChatOutcome, GatewayError, MessagesOutcome};
use relaygate_protocol::anthropic::MessagesRequest;
use relaygate_protocol::openai::ChatCompletionRequest;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

use crate::middleware::request_id;

#[derive(Clone)]
struct GatewayState {
    app: Arc<AppState>,
}

pub fn gateway_router(app: Arc<AppState>) -> Router {
    let state = GatewayState { app };

    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(messages))
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(state.clone(), require_proxy_key))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Rejects requests missing a bearer token or `x-api-key` that matches the
/// configured proxy key (§6). `/health` is exempt.
async fn require_proxy_key(
    State(state): State<GatewayState>,
    request: axum::http::Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let expected = state.app.proxy_key.as_str();

    if !presented_key_matches(request.headers(), expected) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": { "message": "missing or invalid proxy api key", "type": "auth_error" }
            })),
        )
            .into_response();
    }

    if !state.app.rate_limiter.allow(expected) {
        return GatewayError::RateLimited.into_response();
    }

    next.run(request).await
}

fn presented_key_matches(headers: &HeaderMap, expected: &str) -> bool {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let trimmed = value.trim();
        let token = trimmed
            .strip_prefix("Bearer ")
            .or_else(|| trimmed.strip_prefix("bearer "));
        if let Some(token) = token {
            if token.trim() == expected {
                return true;
            }
        }
    }
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if value.trim() == expected {
            return true;
        }
    }
    false
}

/// Always returns the OpenAI `ModelList` shape (§6); there is no
/// Anthropic-dialect variant of this route.
async fn list_models(State(state): State<GatewayState>) -> Response {
    Json(state.app.engine.openai_models().await).into_response()
}

async fn chat_completions(
    State(state): State<GatewayState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, GatewayError> {
    match state.app.engine.chat_completions(request).await? {
        ChatOutcome::Json(response) => Ok(Json(response).into_response()),
        ChatOutcome::Stream(rx) => Ok(sse_response(rx)),
    }
}

async fn messages(
    State(state): State<GatewayState>,
    Json(request): Json<MessagesRequest>,
) -> Result<Response, GatewayError> {
    match state.app.engine.messages(request).await? {
        MessagesOutcome::Json(response) => Ok(Json(response).into_response()),
        MessagesOutcome::Stream(rx) => Ok(sse_response(rx)),
    }
}

fn sse_response(rx: tokio::sync::mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<Bytes, std::io::Error>);
    let body = Body::from_stream(stream);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// `{status, credential_valid, cache_entries}` per §10.5.
async fn health(State(state): State<GatewayState>) -> Response {
    let credential_valid = !state.app.engine.auth.is_expiring_soon().await;
    let cache_entries = state.app.engine.model_cache.len();
    Json(json!({
        "status": "ok",
        "credential_valid": credential_valid,
        "cache_entries": cache_entries,
    }))
    .into_response()
}
