//! HTTP Surface
//!
//! Routes:
//!
//! - `POST /api/chat` - relayed model stream with the video side channel
//! - `GET /api/models` - models the model backend can serve
//! - `GET /health` - liveness plus a model backend probe
//!
//! Errors that happen before the first frame are JSON `{"error": "..."}`
//! bodies; once streaming has begun, failures travel inside the stream.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use vidchat_core::{ChatRequest, ModelInfo, Relay, RelayError};

/// Marks the body as a framed data stream for clients
pub const DATA_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-data-stream");

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    relay: Relay,
}

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self { relay }
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([DATA_STREAM_HEADER]);

    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/models", get(models))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors returned before any frame is streamed
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    BadGateway(String),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidRequest(msg) => Self::BadRequest(msg),
            RelayError::Backend(e) => Self::BadGateway(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::info!(error = %rejection.body_text(), "Rejected chat body");
        ApiError::BadRequest(rejection.body_text())
    })?;

    let stream = state.relay.open(request).await.map_err(|e| {
        if e.is_client_error() {
            tracing::info!(error = %e, "Rejected chat request");
        } else {
            tracing::warn!(error = %e, "Model backend unavailable");
        }
        ApiError::from(e)
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (DATA_STREAM_HEADER, "v1"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

async fn models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ApiError> {
    let models = state
        .relay
        .chat_backend()
        .list_models()
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Failed to list models");
            ApiError::BadGateway(e.to_string())
        })?;

    Ok(Json(ModelsResponse { models }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_backend: bool,
    video: bool,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_backend: state.relay.chat_backend().health_check().await,
        video: state.relay.has_video(),
    })
}
