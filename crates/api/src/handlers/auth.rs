//! Handlers for the `/auth` resource (login, refresh, logout, sessions).

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::auth::service::{LogoutScope, SessionSummary, TokenPair};
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::client::ClientContext;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Request body for `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Request body for `POST /auth/refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Optional request body for `POST /auth/logout`.
#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    client: ClientContext,
    Json(input): Json<LoginRequest>,
) -> AppResult<Json<TokenPair>> {
    let pair = state
        .auth
        .login(&input.username, &input.password, &client)
        .await?;
    Ok(Json(pair))
}

/// POST /api/v1/auth/refresh
///
/// Exchange a refresh token for a new pair. The presented token is spent.
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientContext,
    Json(input): Json<RefreshRequest>,
) -> AppResult<Json<TokenPair>> {
    let pair = state.auth.refresh(&input.refresh_token, &client).await?;
    Ok(Json(pair))
}

/// POST /api/v1/auth/logout
///
/// Revokes the current session, an explicit `session_id`, or with `all`
/// every session of the caller. The body is optional. Returns 204.
pub async fn logout(
    State(state): State<AppState>,
    auth_user: AuthUser,
    body: Bytes,
) -> AppResult<StatusCode> {
    let input: LogoutRequest = if body.is_empty() {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid logout body: {e}")))?
    };
    let scope = LogoutScope {
        all: input.all,
        session_id: input.session_id,
    };
    state
        .auth
        .logout(auth_user.user_id, &auth_user.session_id, &scope)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AppResult<Json<DataResponse<Vec<SessionSummary>>>> {
    let data = state
        .auth
        .list_sessions(auth_user.user_id, &auth_user.session_id)
        .await?;
    Ok(Json(DataResponse { data }))
}
