//! PostgreSQL backend: raw `PgConnection`s managed by our own pool.
//!
//! sqlx's built-in pool is deliberately unused — acquisition semantics,
//! liveness checks, and the size cap all belong to [`crate::store::Pool`].

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Row};

use crate::error::AuthError;
use crate::store::{ConnectionManager, RotationState, SessionConn};

/// Opens single Postgres connections by URL.
pub struct PgManager {
    database_url: String,
}

impl PgManager {
    pub fn new(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
        }
    }
}

#[async_trait]
impl ConnectionManager for PgManager {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, AuthError> {
        Ok(PgConnection::connect(&self.database_url).await?)
    }

    async fn ping(&self, conn: &mut PgConnection) -> Result<(), AuthError> {
        sqlx::query("SELECT 1").execute(conn).await?;
        Ok(())
    }
}

/// Run schema migrations. Called once at startup with a leased connection.
pub async fn migrate(conn: &mut PgConnection) -> Result<(), AuthError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            user_id                TEXT PRIMARY KEY,
            password_hash          TEXT NOT NULL,
            refresh_token_id       TEXT,
            refresh_token_family   TEXT,
            created_at             TIMESTAMPTZ DEFAULT NOW(),
            updated_at             TIMESTAMPTZ DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl SessionConn for PgConnection {
    async fn begin_serializable(&mut self) -> Result<(), AuthError> {
        sqlx::query("BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *self)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), AuthError> {
        sqlx::query("COMMIT").execute(&mut *self).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AuthError> {
        sqlx::query("ROLLBACK").execute(&mut *self).await?;
        Ok(())
    }

    async fn rotation_state(&mut self, user_id: &str) -> Result<Option<RotationState>, AuthError> {
        let row = sqlx::query(
            "SELECT refresh_token_id, refresh_token_family FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut *self)
        .await?;

        Ok(row.map(|row| RotationState {
            token_id: row.get(0),
            token_family: row.get(1),
        }))
    }

    async fn put_rotation_state(
        &mut self,
        user_id: &str,
        state: &RotationState,
    ) -> Result<(), AuthError> {
        let affected = sqlx::query(
            r#"
            UPDATE accounts
            SET refresh_token_id = $1,
                refresh_token_family = $2,
                updated_at = NOW()
            WHERE user_id = $3
            "#,
        )
        .bind(&state.token_id)
        .bind(&state.token_family)
        .bind(user_id)
        .execute(&mut *self)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AuthError::NotFound("account".into()));
        }
        Ok(())
    }

    async fn password_hash(&mut self, user_id: &str) -> Result<Option<String>, AuthError> {
        let row = sqlx::query("SELECT password_hash FROM accounts WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self)
            .await?;

        Ok(row.map(|row| row.get(0)))
    }

    async fn put_password_hash(&mut self, user_id: &str, hash: &str) -> Result<(), AuthError> {
        let affected = sqlx::query(
            "UPDATE accounts SET password_hash = $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(hash)
        .bind(user_id)
        .execute(&mut *self)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(AuthError::NotFound("account".into()));
        }
        Ok(())
    }
}
