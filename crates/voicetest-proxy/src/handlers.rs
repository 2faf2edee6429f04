//! Request handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;
use voicetest_core::CredentialRequest;

use crate::errors::ProxyError;
use crate::routes::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub room: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpstreamError {
    error: Option<String>,
}

/// Relay a token request to the backend's `/token` endpoint.
///
/// A 2xx body is returned unchanged. A non-2xx status is relayed with the
/// backend's `error` message, or a generic one built from the status text.
#[instrument(skip_all, name = "proxy.backend_token")]
pub async fn backend_token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ProxyError> {
    let request = match (query.room, query.user) {
        (Some(room), Some(user)) => {
            CredentialRequest::new(room, user).map_err(|_| ProxyError::MissingParameters)?
        }
        _ => return Err(ProxyError::MissingParameters),
    };

    let url = format!(
        "{}/token?room={}&user={}",
        state.config.backend_url,
        urlencoding::encode(&request.room),
        urlencoding::encode(&request.user),
    );
    tracing::debug!(room = %request.room, user = %request.user, "Requesting token from backend");

    let response = state.client.get(&url).send().await?;
    let status = response.status();
    let body = response.bytes().await?;

    if !status.is_success() {
        let message = serde_json::from_slice::<UpstreamError>(&body)
            .ok()
            .and_then(|e| e.error)
            .unwrap_or_else(|| {
                format!(
                    "Failed to fetch token: {}",
                    status.canonical_reason().unwrap_or(status.as_str())
                )
            });
        return Err(ProxyError::Upstream { status, message });
    }

    let data: Value = serde_json::from_slice(&body)?;
    Ok(Json(data))
}

pub async fn health_check() -> &'static str {
    "OK"
}
