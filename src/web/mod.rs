//! JSON API server.
//!
//! Routes under `/api` mirror the dashboard frontend's needs; `/` and
//! `/static` serve the frontend bundle when a static directory is configured.

pub mod auth;
mod error;
pub mod handlers;

pub use error::ApiError;

use crate::config::Config;
use crate::exchange::{Credentials, FuturesApi};
use crate::service::DashboardService;
use anyhow::{Context, Result};
use axum::{
    response::Redirect,
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing::info;

/// Shared state of every handler.
pub struct AppState {
    pub service: DashboardService<dyn FuturesApi>,
    /// Server-side key pair used when the browser has none
    pub fallback_credentials: Option<Credentials>,
    pub cooldown: auth::CredentialCooldown,
    /// Development mode: cookies without `Secure`
    pub debug: bool,
}

impl AppState {
    pub fn new(service: DashboardService<dyn FuturesApi>, config: &Config) -> Self {
        let fallback = Credentials::new(&config.kraken.api_key, &config.kraken.api_secret);
        Self {
            cooldown: auth::CredentialCooldown::new(Duration::from_secs(
                service.settings().credential_cooldown_secs,
            )),
            service,
            fallback_credentials: fallback.is_complete().then_some(fallback),
            debug: config.server.debug,
        }
    }
}

pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .route("/", get(handlers::api_index))
        .route("/test", get(handlers::api_test))
        // auth
        .route("/auth/status", get(auth::auth_status))
        .route(
            "/auth/credentials",
            post(auth::save_credentials).delete(auth::clear_credentials),
        )
        // positions
        .route("/positions", get(handlers::positions))
        .route("/positions/", get(handlers::positions))
        .route("/positions/detailed", get(handlers::detailed_positions))
        // market
        .route("/market/ticker/{symbol}", get(handlers::ticker))
        .route("/market/tickers", post(handlers::tickers))
        .route("/market/price/{symbol}", get(handlers::price))
        .route("/market/fees", get(handlers::fees))
        // analytics
        .route("/analytics/chart-data", get(handlers::chart_data))
        .route("/analytics/fees", get(handlers::analytics_fees))
        .route("/analytics/funding", get(handlers::analytics_funding))
        .route("/analytics/summary", get(handlers::analytics_summary))
        .route("/volumes", get(handlers::volumes))
        .route("/data", get(handlers::dashboard_data))
        // legacy
        .route(
            "/set-credentials",
            post(|| async { Redirect::temporary("/api/auth/credentials") }),
        )
        .route(
            "/clear-credentials",
            post(|| async { Redirect::temporary("/api/auth/credentials") })
                .delete(|| async { Redirect::temporary("/api/auth/credentials") }),
        )
        .route("/validate-credentials", post(auth::validate_credentials));

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api);

    if let Some(dir) = static_dir {
        router = router
            .route_service("/", ServeFile::new(dir.join("index.html")))
            .nest_service("/static", ServeDir::new(dir));
    }

    router
        .fallback(handlers::not_found)
        .with_state(Arc::new(state))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C.
pub async fn run_server(config: &Config, state: AppState) -> Result<()> {
    let static_dir = config.server.static_dir.as_deref().map(Path::new);
    let app = build_router(state, static_dir);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Dashboard listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    Ok(())
}
