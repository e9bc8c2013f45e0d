//! Refresh-token rotation protocol.
//!
//! Per account the refresh capability moves through three shapes:
//! no session (both fields null), active `(token_id, family)`, and back
//! — a new login mints a new family, a successful renewal advances the
//! token id within the family, and revocation nulls both fields.
//!
//! The one security-critical transition: a refresh token that carries
//! the *current family* but a *superseded id* means a copy of an old
//! token exists outside the legitimate client. By then it is unknowable
//! whether the attacker or the real client is the desynchronized party,
//! so the whole lineage is revoked, not just the stale token.
//!
//! Every state change runs inside one serializable transaction through
//! the connection pool, so two concurrent renewals for the same account
//! are totally ordered: at most one sees its own id as current.

use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tracing::{info, warn};

use crate::error::AuthError;
use crate::store::{
    with_serializable_retry, ConnectionManager, Pool, PooledConn, RetryPolicy, RotationState,
    SessionConn,
};
use crate::token::{fresh_token_id, TokenIssuer, TokenPair};

/// Hash a password for storage (argon2id, random salt).
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
}

/// Fail-closed password check; a malformed stored hash verifies false.
fn password_matches(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Outcome of the in-transaction rotation decision.
#[derive(Debug)]
enum Decision {
    /// Presented id matched the stored id; state advanced in-family.
    Renewed { token_family: String },
    /// Stale id from the live family: lineage revoked.
    ReuseDetected,
    /// Dead family or unknown account; nothing live left to revoke.
    NoLiveSession,
}

pub struct RotationProtocol<M>
where
    M: ConnectionManager,
    M::Connection: SessionConn,
{
    pool: Arc<Pool<M>>,
    issuer: TokenIssuer,
    retry: RetryPolicy,
}

impl<M> RotationProtocol<M>
where
    M: ConnectionManager,
    M::Connection: SessionConn,
{
    pub fn new(pool: Arc<Pool<M>>, issuer: TokenIssuer, retry: RetryPolicy) -> Self {
        Self {
            pool,
            issuer,
            retry,
        }
    }

    pub fn pool(&self) -> &Pool<M> {
        &self.pool
    }

    /// Login: mint a fresh token id and a fresh family, unconditionally
    /// overwriting whatever session existed (single-active-session
    /// policy). The new state is committed before the signed pair is
    /// returned; a failed write fails the whole login.
    pub async fn issue_pair_for_new_login(&self, user_id: &str) -> Result<TokenPair, AuthError> {
        let user = user_id.to_string();
        let token_id = fresh_token_id();
        let token_family = fresh_token_id();

        let mut lease = self.pool.acquire().await?;
        let result = with_serializable_retry(&self.retry, &mut lease.conn, |c| {
            let user = user.clone();
            let state = RotationState::active(&token_id, &token_family);
            Box::pin(async move { c.put_rotation_state(&user, &state).await })
        })
        .await;
        self.put_back(lease, &result).await;
        result?;

        info!(user_id, "issued new session family");
        self.sign_pair(user_id, &token_id, &token_family)
    }

    /// Stateless access-token check; never touches the store.
    pub fn verify_access(&self, user_id: &str, access_token: &str) -> bool {
        self.issuer.verify_access(user_id, access_token)
    }

    /// Silent renewal: exchange a still-valid refresh token for a new
    /// pair, advancing the stored token id within the same family.
    ///
    /// The only success path is a presented id equal to the stored id.
    /// A stale id from the current family revokes the whole session
    /// (the revocation is committed, then `Rejected` is returned); a
    /// token from a dead family is rejected with no state change.
    pub async fn rotate(&self, user_id: &str, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let presented = self
            .issuer
            .verify_refresh(user_id, refresh_token)
            .ok_or(AuthError::InvalidToken)?;

        let user = user_id.to_string();
        let next_id = fresh_token_id();

        let mut lease = self.pool.acquire().await?;
        let result = with_serializable_retry(&self.retry, &mut lease.conn, |c| {
            let user = user.clone();
            let presented = presented.clone();
            let next_id = next_id.clone();
            Box::pin(async move {
                let stored = match c.rotation_state(&user).await? {
                    Some(state) => state,
                    None => return Ok(Decision::NoLiveSession),
                };

                match (stored.token_id.as_deref(), stored.token_family.as_deref()) {
                    (Some(id), Some(fam)) if presented.token_id == id => {
                        c.put_rotation_state(&user, &RotationState::active(&next_id, fam))
                            .await?;
                        Ok(Decision::Renewed {
                            token_family: fam.to_string(),
                        })
                    }
                    (_, Some(fam)) if presented.token_family == fam => {
                        c.put_rotation_state(&user, &RotationState::revoked()).await?;
                        Ok(Decision::ReuseDetected)
                    }
                    _ => Ok(Decision::NoLiveSession),
                }
            })
        })
        .await;
        self.put_back(lease, &result).await;

        match result? {
            Decision::Renewed { token_family } => {
                self.sign_pair(user_id, &next_id, &token_family)
            }
            Decision::ReuseDetected => {
                warn!(user_id, "refresh token reuse detected; session family revoked");
                Err(AuthError::Rejected)
            }
            Decision::NoLiveSession => Err(AuthError::Rejected),
        }
    }

    /// Revoke all refresh capability for the account. Already-issued
    /// access tokens keep working until their own expiry; no further
    /// renewal is possible.
    pub async fn revoke_all(&self, user_id: &str) -> Result<(), AuthError> {
        let user = user_id.to_string();

        let mut lease = self.pool.acquire().await?;
        let result = with_serializable_retry(&self.retry, &mut lease.conn, |c| {
            let user = user.clone();
            Box::pin(async move { c.put_rotation_state(&user, &RotationState::revoked()).await })
        })
        .await;
        self.put_back(lease, &result).await;
        result?;

        info!(user_id, "session revoked");
        Ok(())
    }

    /// Check a password against the stored hash. Unknown accounts and
    /// malformed hashes verify false.
    pub async fn verify_password(&self, user_id: &str, password: &str) -> Result<bool, AuthError> {
        let user = user_id.to_string();

        let mut lease = self.pool.acquire().await?;
        let result = lease.conn.password_hash(&user).await;
        self.put_back(lease, &result).await;

        Ok(match result? {
            Some(hash) => password_matches(password, &hash),
            None => false,
        })
    }

    /// Change the password and kill the current session in one
    /// transaction: a password change proves intent to cut off anyone
    /// else holding credentials.
    pub async fn update_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if !self.verify_password(user_id, current_password).await? {
            return Err(AuthError::Rejected);
        }

        let user = user_id.to_string();
        let new_hash = hash_password(new_password)?;

        let mut lease = self.pool.acquire().await?;
        let result = with_serializable_retry(&self.retry, &mut lease.conn, |c| {
            let user = user.clone();
            let new_hash = new_hash.clone();
            Box::pin(async move {
                c.put_password_hash(&user, &new_hash).await?;
                c.put_rotation_state(&user, &RotationState::revoked()).await
            })
        })
        .await;
        self.put_back(lease, &result).await;
        result?;

        info!(user_id, "password updated, session revoked");
        Ok(())
    }

    fn sign_pair(
        &self,
        user_id: &str,
        token_id: &str,
        token_family: &str,
    ) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access_token: self.issuer.issue_access(user_id)?,
            refresh_token: self.issuer.issue_refresh(user_id, token_id, token_family)?,
        })
    }

    /// Return the lease, or discard it when an infrastructure error
    /// left the connection in an unknown transaction state.
    async fn put_back<T>(&self, lease: PooledConn<M::Connection>, result: &Result<T, AuthError>) {
        match result {
            Err(AuthError::Database(_)) => self.pool.discard(lease).await,
            _ => self.pool.release(lease).await,
        }
    }
}
