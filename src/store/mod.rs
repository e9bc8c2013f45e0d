//! Data layer: bounded connection pool, serializable transactions with
//! bounded conflict retry, and the account operations the rotation
//! protocol depends on.

pub mod pool;
pub mod postgres;
pub mod retry;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::error::AuthError;

pub use pool::{Pool, PoolConfig, PoolStatus, PooledConn};
pub use postgres::PgManager;
pub use retry::{with_serializable_retry, RetryPolicy};

/// Opens and health-checks raw connections on behalf of the pool.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send;

    /// Open a fresh connection. May be expensive (on the order of a
    /// second against a remote database).
    async fn connect(&self) -> Result<Self::Connection, AuthError>;

    /// Cheap liveness round-trip. An `Err` marks the connection broken;
    /// the pool discards it rather than handing it back out.
    async fn ping(&self, conn: &mut Self::Connection) -> Result<(), AuthError>;
}

/// The currently-valid refresh capability for one account.
///
/// Both fields null means no session: nothing can be rotated until the
/// next login. At most one `(token_id, token_family)` pair is ever valid
/// per account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationState {
    pub token_id: Option<String>,
    pub token_family: Option<String>,
}

impl RotationState {
    pub fn revoked() -> Self {
        Self {
            token_id: None,
            token_family: None,
        }
    }

    pub fn active(token_id: &str, token_family: &str) -> Self {
        Self {
            token_id: Some(token_id.to_string()),
            token_family: Some(token_family.to_string()),
        }
    }
}

/// Per-connection account operations, invocable only while holding a
/// leased connection. Multi-step state changes go through
/// [`with_serializable_retry`], which drives the transaction methods.
#[async_trait]
pub trait SessionConn: Send {
    async fn begin_serializable(&mut self) -> Result<(), AuthError>;
    async fn commit(&mut self) -> Result<(), AuthError>;
    async fn rollback(&mut self) -> Result<(), AuthError>;

    /// Read the stored rotation state; `None` if the account does not exist.
    async fn rotation_state(&mut self, user_id: &str) -> Result<Option<RotationState>, AuthError>;

    /// Overwrite the stored rotation state. `NotFound` if the account
    /// does not exist.
    async fn put_rotation_state(
        &mut self,
        user_id: &str,
        state: &RotationState,
    ) -> Result<(), AuthError>;

    /// Read the stored password hash; `None` if the account does not exist.
    async fn password_hash(&mut self, user_id: &str) -> Result<Option<String>, AuthError>;

    /// Overwrite the stored password hash. `NotFound` if the account
    /// does not exist.
    async fn put_password_hash(&mut self, user_id: &str, hash: &str) -> Result<(), AuthError>;
}
