//! HTTP routes: health, inbox access and the run endpoint.

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use qflow::engine::inbox::InboxKey;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::sse;
use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_router())
        .route("/run_sse", post(sse::run_sse))
        .layer(cors)
        .with_state(state)
}

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route(
            "/inbox/{session_id}/{user_id}",
            get(read_inbox).post(write_inbox),
        )
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/inbox/:session/:user - current reply slot text, possibly empty.
async fn read_inbox(
    State(state): State<AppState>,
    Path((session_id, user_id)): Path<(String, String)>,
) -> String {
    state.inbox.read(&InboxKey::new(session_id, user_id))
}

/// POST /api/inbox/:session/:user - body is the reply text. 404 when no run
/// owns the slot.
async fn write_inbox(
    State(state): State<AppState>,
    Path((session_id, user_id)): Path<(String, String)>,
    body: String,
) -> StatusCode {
    info!(session_id = %session_id, user_id = %user_id, "reply received");
    if state
        .inbox
        .write(&InboxKey::new(session_id, user_id), body.trim())
    {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}
