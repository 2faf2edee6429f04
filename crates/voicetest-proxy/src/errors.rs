//! Proxy error types.
//!
//! Every error renders as a JSON body with an `error` field, which is what
//! the credential broker reads back on a non-2xx response.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub const MISSING_PARAMETERS: &str = "Missing required parameters: room and user are required";
pub const BACKEND_UNREACHABLE: &str = "Failed to fetch token from backend";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Missing required parameters: room and user are required")]
    MissingParameters,

    /// The backend answered with a non-2xx status; relayed as-is.
    #[error("{message}")]
    Upstream { status: StatusCode, message: String },

    /// The backend could not be reached or returned an unreadable body.
    #[error("Failed to fetch token from backend: {0}")]
    Unreachable(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::MissingParameters => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": MISSING_PARAMETERS })),
            )
                .into_response(),
            ProxyError::Upstream { status, message } => {
                tracing::warn!(target: "proxy.upstream", status = %status, message = %message, "Backend rejected token request");
                (status, Json(json!({ "error": message }))).into_response()
            }
            ProxyError::Unreachable(reason) => {
                tracing::error!(target: "proxy.upstream", error = %reason, "Backend token request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": BACKEND_UNREACHABLE, "message": reason })),
                )
                    .into_response()
            }
        }
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        ProxyError::Unreachable(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Unreachable(err.to_string())
    }
}
