use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,

    // ── Database (PostgreSQL) ───────────────────────────────────────────
    pub database_url: String,
    /// Connections opened at startup.
    pub pool_initial_size: usize,
    /// Hard cap on live connections.
    pub pool_max_size: usize,
    /// How long `acquire` may wait for an idle connection.
    pub pool_acquire_timeout: Duration,
    /// Serializable-transaction retry budget for write conflicts.
    pub tx_retry_limit: u32,

    // ── Tokens ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded HMAC secret for token signing (HS256).
    pub token_secret: Vec<u8>,
    /// Audience claim stamped into and required from every token.
    pub token_audience: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let token_secret_b64 =
            std::env::var("TOKEN_SECRET").context("TOKEN_SECRET is required (32 bytes, base64)")?;
        let token_secret = base64::engine::general_purpose::STANDARD
            .decode(&token_secret_b64)
            .context("TOKEN_SECRET is not valid base64")?;
        anyhow::ensure!(
            token_secret.len() >= 32,
            "TOKEN_SECRET must decode to at least 32 bytes, got {}",
            token_secret.len()
        );

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8430".into())
                .parse()
                .context("Invalid PORT")?,

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string)")?,
            pool_initial_size: env_parse("POOL_INITIAL_SIZE", 5)?,
            pool_max_size: env_parse("POOL_MAX_SIZE", 20)?,
            pool_acquire_timeout: Duration::from_secs(env_parse("POOL_ACQUIRE_TIMEOUT_SECS", 30)?),
            tx_retry_limit: env_parse("TX_RETRY_LIMIT", 16)?,

            token_secret,
            token_audience: std::env::var("TOKEN_AUDIENCE")
                .unwrap_or_else(|_| "session-auth-clients".into()),
            access_token_ttl: Duration::from_secs(env_parse("ACCESS_TOKEN_TTL_SECS", 600)?),
            refresh_token_ttl: Duration::from_secs(
                env_parse("REFRESH_TOKEN_TTL_DAYS", 180u64)? * 24 * 3600,
            ),
        })
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("Invalid {name}")),
        Err(_) => Ok(default),
    }
}
