use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use custode::api::{router, AuthState};
use custode::config::AuthConfig;
use custode::rate_limit::TokenBucketRateLimiter;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;

const ENV_DSN: &str = "CUSTODE_DSN";
const ENV_PORT: &str = "CUSTODE_PORT";
const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let dsn = std::env::var(ENV_DSN).context("CUSTODE_DSN is required")?;
    let port = std::env::var(ENV_PORT)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);

    let config = AuthConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let auth_state = Arc::new(AuthState::new(
        config,
        Arc::new(TokenBucketRateLimiter::new()),
    ));

    let app = router(pool, auth_state);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!(port, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
