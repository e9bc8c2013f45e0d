use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the session-auth service.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // ── Credential Errors ───────────────────────────────────────────────
    /// Signature, claim, or expiry check failed. Fail-closed: callers
    /// never learn which check it was.
    #[error("Invalid or expired token")]
    InvalidToken,

    /// Protocol-level denial: stale-family reuse or no matching session.
    #[error("Session rejected")]
    Rejected,

    // ── Resource Errors ─────────────────────────────────────────────────
    /// No idle connection became available within the acquire deadline.
    /// Fatal to the current request; never retried by the pool.
    #[error("Timed out waiting for a database connection")]
    PoolTimeout,

    /// Serializable write conflict that survived the retry budget.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        // Serialization failures and deadlocks are transient under
        // SERIALIZABLE; the retry layer keys off this variant.
        if let sqlx::Error::Database(ref db) = e {
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
                return AuthError::Conflict(db.message().to_string());
            }
        }
        tracing::error!("Database error: {e}");
        AuthError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl AuthError {
    /// Whether this error is a transient write conflict worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AuthError::Conflict(_))
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // InvalidToken and Rejected deliberately share one generic body:
        // the response must not signal which check failed.
        let (status, code) = match &self {
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AuthError::Rejected => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AuthError::PoolTimeout => (StatusCode::SERVICE_UNAVAILABLE, "pool_timeout"),
            AuthError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AuthError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AuthError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let message = match &self {
            // Never leak internals to the caller.
            AuthError::Database(_) | AuthError::Internal(_) => "internal error".to_string(),
            AuthError::InvalidToken | AuthError::Rejected => "unauthorized".to_string(),
            other => other.to_string(),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
