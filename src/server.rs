//! HTTP surface for the chat service.
//!
//! | Method | Path      | Description |
//! |--------|-----------|-------------|
//! | `POST` | `/chat`   | Process one conversation turn |
//! | `POST` | `/intent` | One-off intent classification (debug) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/chat` runs the full pipeline and answers with the relay outcome
//! once the turn's events have been delivered to the conversation
//! channel; the streamed increments themselves travel over the
//! transport, not this response. Error responses use the
//! `{ "error": { "code", "message" } }` body shape.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::intent::IntentClassifier;
use crate::models::Query;
use crate::pipeline::{Collaborators, TurnProcessor};
use crate::relay::RelayOutcome;

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    processor: Arc<TurnProcessor>,
    collaborators: Collaborators,
}

/// Start the HTTP server on the configured bind address. Runs until the
/// process terminates.
pub async fn run_server(
    config: Arc<Config>,
    processor: Arc<TurnProcessor>,
    collaborators: Collaborators,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config,
        processor,
        collaborators,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chat", post(handle_chat))
        .route("/intent", post(handle_intent))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "chat service listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

struct AppError {
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

// ============ GET /health ============

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

// ============ POST /chat ============

/// JSON request body for `POST /chat`.
#[derive(Deserialize)]
struct ChatTurnRequest {
    message: String,
    #[serde(alias = "adviser_id")]
    user_id: String,
    chat_id: String,
}

/// Handler for `POST /chat`. Processes the turn and returns the relay
/// outcome; stream events are delivered on the conversation channel.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatTurnRequest>,
) -> Result<Json<RelayOutcome>, AppError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    if request.user_id.trim().is_empty() {
        return Err(bad_request("user_id must not be empty"));
    }
    if request.chat_id.trim().is_empty() {
        return Err(bad_request("chat_id must not be empty"));
    }

    let query = Query::new(request.message, request.chat_id, request.user_id);
    let outcome = state.processor.process(&query).await;
    Ok(Json(outcome))
}

// ============ POST /intent ============

#[derive(Deserialize)]
struct IntentRequest {
    message: String,
}

#[derive(Serialize)]
struct IntentResponse {
    intent: String,
}

/// Handler for `POST /intent`. Classifies a bare message with no
/// history; classification failures answer `"NA"` rather than an error
/// so the route stays usable as a liveness probe for the model path.
async fn handle_intent(
    State(state): State<AppState>,
    Json(request): Json<IntentRequest>,
) -> Result<Json<IntentResponse>, AppError> {
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let classifier = IntentClassifier::new(
        &state.config,
        state.collaborators.intent_embedder.as_ref(),
        state.collaborators.index.as_ref(),
        state.collaborators.chat.as_ref(),
    );

    let intent = match classifier.classify(request.message.trim(), "").await {
        Ok(intent) => serde_json::to_value(intent.category)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "NA".to_string()),
        Err(_) => "NA".to_string(),
    };

    Ok(Json(IntentResponse { intent }))
}
