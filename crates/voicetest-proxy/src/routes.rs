//! HTTP routes for the token proxy.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Client for backend requests, built with the configured timeout.
    pub client: reqwest::Client,

    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

/// Build the application routes.
///
/// - `/api/backend-token` - Token relay (GET only; other methods get 405)
/// - `/health` - Liveness probe
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/backend-token", get(handlers::backend_token))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
