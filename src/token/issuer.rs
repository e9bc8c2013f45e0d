//! Token issuance and verification (HS256 JWTs).
//!
//! One shared secret, loaded once at startup. Verification is stateless
//! — it never touches the store — and fail-closed: every failure mode
//! (signature, audience, type, expiry, subject) collapses to the same
//! negative result so callers cannot leak which check failed.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fam: Option<String>,
    typ: TokenKind,
}

/// Decoded view of a valid refresh token, as the rotation protocol
/// consumes it.
#[derive(Debug, Clone)]
pub struct RefreshClaims {
    pub token_id: String,
    pub token_family: String,
}

/// An access/refresh pair as returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Generate an opaque token/family identifier: 16 random bytes, hex.
pub fn fresh_token_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], audience: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            audience: audience.to_string(),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Sign an access token with a fresh random id. No side effects.
    pub fn issue_access(&self, user_id: &str) -> Result<String, AuthError> {
        self.sign(user_id, fresh_token_id(), None, TokenKind::Access, self.access_ttl)
    }

    /// Sign a refresh token with caller-supplied id and family. No side
    /// effects; persisting the id is the rotation protocol's job.
    pub fn issue_refresh(
        &self,
        user_id: &str,
        token_id: &str,
        token_family: &str,
    ) -> Result<String, AuthError> {
        self.sign(
            user_id,
            token_id.to_string(),
            Some(token_family.to_string()),
            TokenKind::Refresh,
            self.refresh_ttl,
        )
    }

    fn sign(
        &self,
        user_id: &str,
        jti: String,
        fam: Option<String>,
        typ: TokenKind,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            aud: self.audience.clone(),
            iat,
            exp: iat + ttl.as_secs() as i64,
            jti,
            fam,
            typ,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {e}")))
    }

    /// Validate an access token for `user_id`. Returns a plain bool —
    /// never an error — so a validation failure cannot propagate as an
    /// unhandled fault.
    pub fn verify_access(&self, user_id: &str, token: &str) -> bool {
        self.decode_checked(user_id, token, TokenKind::Access).is_some()
    }

    /// Validate a refresh token for `user_id` and return its decoded
    /// rotation claims, or `None` on any failure.
    pub fn verify_refresh(&self, user_id: &str, token: &str) -> Option<RefreshClaims> {
        let claims = self.decode_checked(user_id, token, TokenKind::Refresh)?;
        let token_family = claims.fam?;
        Some(RefreshClaims {
            token_id: claims.jti,
            token_family,
        })
    }

    fn decode_checked(&self, user_id: &str, token: &str, expected: TokenKind) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.validate_exp = true;
        validation.leeway = 0;

        let data = match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => data,
            Err(e) => {
                debug!("token rejected: {e}");
                return None;
            }
        };

        if data.claims.typ != expected || data.claims.sub != user_id {
            debug!("token rejected: claim mismatch");
            return None;
        }
        Some(data.claims)
    }
}
