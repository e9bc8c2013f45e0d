use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use session_auth::session::RotationProtocol;
use session_auth::store::{self, PgManager, Pool, PoolConfig, RetryPolicy};
use session_auth::token::TokenIssuer;
use session_auth::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_auth=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("session-auth v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    // Connection pool + schema
    let pool = Pool::new(
        PgManager::new(&config.database_url),
        PoolConfig {
            initial_size: config.pool_initial_size,
            max_size: config.pool_max_size,
            acquire_timeout: config.pool_acquire_timeout,
        },
    )
    .await?;
    let pool = Arc::new(pool);

    let mut lease = pool.acquire().await?;
    store::postgres::migrate(&mut lease.conn).await?;
    pool.release(lease).await;
    info!("Database connected and migrated ✓");

    // Token issuer + rotation protocol
    let issuer = TokenIssuer::new(
        &config.token_secret,
        &config.token_audience,
        config.access_token_ttl,
        config.refresh_token_ttl,
    );
    let protocol = RotationProtocol::new(
        pool,
        issuer,
        RetryPolicy::new(config.tx_retry_limit),
    );

    // Build shared state + router
    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        protocol,
    });
    let app = api::router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
