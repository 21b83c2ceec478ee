//! Visitor session tracking for every request that carries a visitor id.
//!
//! Tracking never fails or alters the request: the tracker swallows its own
//! errors and this layer ignores the result beyond a debug log.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::middleware::client::ClientContext;
use crate::state::AppState;

pub async fn track_visitor(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let salt = &state.config.identity_hash_salt;
    let telemetry = ClientContext::from_headers(request.headers(), salt).telemetry(salt);

    if let Some(telemetry) = telemetry {
        if let Some(session_id) = state.tracker.upsert(&telemetry).await {
            tracing::debug!(visitor_session_id = %session_id, "Request attributed to visitor session");
        }
    }

    next.run(request).await
}
