//! Refresh token sweeper.
//!
//! Periodically deletes expired refresh token records from Redis until
//! SIGINT or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use refresh_token_service::cleanup::CleanupScheduler;
use refresh_token_service::clock::SystemClock;
use refresh_token_service::jwt::HmacSigner;
use refresh_token_service::shutdown::{wait_for_signal, ShutdownCoordinator};
use refresh_token_service::storage::RedisStore;
use refresh_token_service::config::LoggingConfig;
use refresh_token_service::{Config, RefreshTokenService};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = FmtSubscriber::builder().with_env_filter(filter);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_logging(&config.logging);

    info!(
        redis_key_prefix = %config.redis_key_prefix,
        cleanup_interval_secs = config.cleanup_interval.as_secs(),
        "Starting refresh token sweeper"
    );

    let store = RedisStore::new(&config.redis_url, config.redis_key_prefix.clone())
        .await
        .context("Failed to connect to Redis")?;
    let signer = HmacSigner::new(&config.signing_secret, &config.jwt_issuer);

    let service = RefreshTokenService::new(
        Arc::new(store),
        Arc::new(signer),
        Arc::new(SystemClock),
        config.policy,
        config.jwt_issuer.clone(),
    )?;

    let mut coordinator = ShutdownCoordinator::new();
    let scheduler = CleanupScheduler::new(service.cleaner(), config.cleanup_interval);
    let signal = coordinator.subscribe();
    coordinator.spawn("cleanup-scheduler", scheduler.run(signal));

    wait_for_signal()
        .await
        .context("Failed to install signal handlers")?;

    coordinator.shutdown(SHUTDOWN_TIMEOUT).await;
    Ok(())
}
