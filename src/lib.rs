pub mod config;
pub mod error;
pub mod rate_limit;
pub mod store;

use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::rate_limit::{rate_limit_middleware, RateLimiterService};
use crate::store::{RedisDatastore, SharedStore};
use axum::{middleware, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the HTTP application: every route sits behind the rate limiter
pub fn build_app(service: Arc<RateLimiterService>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .layer(middleware::from_fn_with_state(service, rate_limit_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn root_handler() -> &'static str {
    "Hello, World!"
}

/// Connect to the shared store, register token quotas and build the limiter
pub async fn setup_rate_limiter(config: &LimiterConfig) -> Result<Arc<RateLimiterService>> {
    let store = RedisDatastore::connect(&config.redis.url).await?;
    store.ping().await?;
    info!("Redis connection successful");

    let store: SharedStore = Arc::new(store);
    let service = RateLimiterService::new(store, config.engine_settings());

    // A token without its quota record would fail every request it makes
    service.register_all().await?;

    Ok(Arc::new(service))
}

/// Initialize the rate limiter server
pub async fn init_server(config: LimiterConfig) -> Result<()> {
    config.validate()?;

    info!("Starting rate limiter");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let service = setup_rate_limiter(&config).await?;
    let app = build_app(service);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(LimiterError::Io)?;

    info!("Rate limiter ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| LimiterError::Internal(format!("Server error: {}", e)))?;

    info!("Rate limiter stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ratelimiter=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
