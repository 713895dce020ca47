mod api;
mod config;
mod db;
mod error;
mod fields;
mod rate_limit;
mod seed;
mod state;

use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(&config.log_level);
    config.log_startup_warnings();

    let pool = db::connect_and_migrate(&config)
        .await
        .context("failed to initialize database")?;

    if config.seed {
        seed::seed_default_templates(&pool, &config.seed_actor)
            .await
            .context("failed to seed default templates")?;
    }

    let state = AppState::new(config.clone(), pool);
    let max_request_body_bytes = state.config.rate_limits.max_request_body_bytes;

    let app = Router::new()
        .nest("/api/v1", api::router())
        .route("/healthz", get(api::healthz))
        .layer(DefaultBodyLimit::max(max_request_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::require_auth,
        ))
        .layer(CorsLayer::permissive())
        // Keep this outermost so abusive requests are throttled before auth checks.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce_limits,
        ))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "attest server listening");
    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}

fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
