//! Same-origin token proxy.
//!
//! Browser pages on the dashboard cannot call the agent backend directly, so
//! this service relays `GET /api/backend-token?room=&user=` to the backend's
//! `/token` endpoint and hands the credential back unchanged.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod routes;

pub use config::{Config, ConfigError};
pub use errors::ProxyError;
pub use routes::{AppState, build_routes};
