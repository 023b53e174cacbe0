//! GaiYa API Server
//!
//! Stateless HTTP control plane for identity, entitlements, quotas, and
//! payments. All shared state lives in Postgres; any number of instances
//! can serve the same store.

use std::net::SocketAddr;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gaiya_api::{routes::create_router, AppState, Config};
use gaiya_shared::create_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gaiya_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GaiYa API Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    tracing::info!(environment = %config.environment, "Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    gaiya_shared::db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let state = AppState::new(pool.clone(), config.clone());

    // Hourly hygiene: prune stale rate-limit events and dead sessions.
    // Correctness never depends on this task; it only bounds table growth.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match gaiya_shared::rate_limit::prune_events(&pool).await {
                Ok(pruned) if pruned > 0 => {
                    tracing::debug!(pruned = pruned, "Rate-limit events pruned")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Rate-limit pruning failed"),
            }
            match gaiya_api::auth::sessions::prune_sessions(&pool).await {
                Ok(pruned) if pruned > 0 => {
                    tracing::debug!(pruned = pruned, "Dead sessions pruned")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Session pruning failed"),
            }
        }
    });

    let app = create_router(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state,
            gaiya_api::cors::cors_middleware,
        ))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
