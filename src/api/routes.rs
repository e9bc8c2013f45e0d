//! API route handlers for the session-auth service.
//!
//! All handlers receive `SharedState` via Axum state extraction. Note
//! that login, refresh, and password failures deliberately produce one
//! indistinguishable `401 unauthorized` body — see `AuthError`.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::AuthError;
use crate::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new().nest("/v1", v1_router(state))
}

fn v1_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Sessions ─────────────────────────────────────────────────────
        .route("/sessions", post(session_create))
        .route("/sessions/refresh", post(session_refresh))
        .route("/sessions/verify", post(session_verify))
        .route("/sessions/revoke", post(session_revoke))
        // ── Credentials ──────────────────────────────────────────────────
        .route("/password", put(password_update))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    let pool = state.protocol.pool().status().await;
    Json(json!({
        "service": "session-auth",
        "version": env!("CARGO_PKG_VERSION"),
        "pool": pool,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginRequest {
    user_id: String,
    password: String,
}

/// Login: password check, then a fresh token pair in a fresh family.
/// Any previously active session for the account is invalidated.
async fn session_create(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    if !state
        .protocol
        .verify_password(&req.user_id, &req.password)
        .await?
    {
        return Err(AuthError::Rejected);
    }

    let pair = state.protocol.issue_pair_for_new_login(&req.user_id).await?;
    Ok(Json(pair))
}

#[derive(Deserialize)]
struct RefreshRequest {
    user_id: String,
    refresh_token: String,
}

/// Silent renewal: exchange a still-valid refresh token for a new pair.
async fn session_refresh(
    State(state): State<SharedState>,
    Json(req): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let pair = state
        .protocol
        .rotate(&req.user_id, &req.refresh_token)
        .await?;
    Ok(Json(pair))
}

#[derive(Deserialize)]
struct VerifyRequest {
    user_id: String,
    access_token: String,
}

async fn session_verify(
    State(state): State<SharedState>,
    Json(req): Json<VerifyRequest>,
) -> impl IntoResponse {
    let valid = state.protocol.verify_access(&req.user_id, &req.access_token);
    Json(json!({ "valid": valid }))
}

#[derive(Deserialize)]
struct RevokeRequest {
    user_id: String,
    access_token: String,
}

/// Logout: requires a currently-valid access token for the account.
async fn session_revoke(
    State(state): State<SharedState>,
    Json(req): Json<RevokeRequest>,
) -> Result<impl IntoResponse, AuthError> {
    if !state.protocol.verify_access(&req.user_id, &req.access_token) {
        return Err(AuthError::InvalidToken);
    }

    state.protocol.revoke_all(&req.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PasswordUpdateRequest {
    user_id: String,
    current_password: String,
    new_password: String,
}

/// Password change; revokes the active session as a side effect.
async fn password_update(
    State(state): State<SharedState>,
    Json(req): Json<PasswordUpdateRequest>,
) -> Result<impl IntoResponse, AuthError> {
    state
        .protocol
        .update_password(&req.user_id, &req.current_password, &req.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
