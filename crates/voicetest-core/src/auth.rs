use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{CredentialError, SessionError};
use crate::settings::Settings;

/// Participant name used when the backend does not return one.
pub const DEFAULT_PARTICIPANT_NAME: &str = "Guest";

/// Length of the random suffix in generated room and user names.
const ID_SUFFIX_LEN: usize = 7;
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Access credential for one real-time session.
///
/// Issued per connection attempt and never reused across attempts.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// WebSocket URL of the media server (wss://)
    pub server_url: String,
    pub room_name: String,
    /// JWT access token
    pub token: String,
    pub participant_name: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("server_url", &self.server_url)
            .field("room_name", &self.room_name)
            .field("token", &"[REDACTED]")
            .field("participant_name", &self.participant_name)
            .finish()
    }
}

/// Caller-chosen room and user identity for a credential request.
///
/// The credential endpoint does not guarantee uniqueness, so callers that
/// have no identity of their own should use [`CredentialRequest::generated`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRequest {
    pub room: String,
    pub user: String,
}

impl CredentialRequest {
    pub fn new(room: impl Into<String>, user: impl Into<String>) -> Result<Self, CredentialError> {
        let request = Self {
            room: room.into(),
            user: user.into(),
        };
        request.validate()?;
        Ok(request)
    }

    /// Random `room-xxxxxxx` / `user-xxxxxxx` pair.
    pub fn generated() -> Self {
        Self {
            room: format!("room-{}", random_suffix()),
            user: format!("user-{}", random_suffix()),
        }
    }

    fn validate(&self) -> Result<(), CredentialError> {
        if self.room.trim().is_empty() || self.user.trim().is_empty() {
            return Err(CredentialError::InvalidRequest(
                "room and user are both required".into(),
            ));
        }
        Ok(())
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_SUFFIX_LEN)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

/// Anything able to hand out a [`Credential`]: the HTTP broker in
/// production, stubs in tests.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Single attempt, no retry. Either a complete credential or an error.
    async fn request_credential(
        &self,
        params: Option<&CredentialRequest>,
    ) -> Result<Credential, CredentialError>;
}

/// How the credential endpoint expects to be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMethod {
    /// Room/user passed as query parameters.
    Get,
    /// Room/user passed as a JSON body (`{}` when omitted).
    #[default]
    Post,
}

/// Success payload of the credential endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    token: Option<String>,
    server_url: Option<String>,
    room_name: Option<String>,
    participant_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

impl TokenResponse {
    fn into_credential(self) -> Result<Credential, CredentialError> {
        Ok(Credential {
            token: required(self.token, "token")?,
            server_url: required(self.server_url, "serverUrl")?,
            room_name: required(self.room_name, "roomName")?,
            participant_name: self
                .participant_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PARTICIPANT_NAME.to_string()),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, CredentialError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CredentialError::MalformedResponse(format!("missing {field}")))
}

/// HTTP client for the backend's credential endpoint.
pub struct CredentialBroker {
    client: reqwest::Client,
    endpoint: Url,
    method: BrokerMethod,
}

impl CredentialBroker {
    pub fn new(endpoint: &str, method: BrokerMethod, timeout: Duration) -> Result<Self, SessionError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            SessionError::Config(format!("invalid credential endpoint '{endpoint}': {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint,
            method,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SessionError> {
        Self::new(
            &settings.credential_endpoint,
            settings.credential_method,
            settings.request_timeout(),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn method(&self) -> BrokerMethod {
        self.method
    }

    fn build_request(&self, params: Option<&CredentialRequest>) -> reqwest::RequestBuilder {
        match self.method {
            BrokerMethod::Get => {
                let mut url = self.endpoint.clone();
                if let Some(p) = params {
                    url.query_pairs_mut()
                        .append_pair("room", &p.room)
                        .append_pair("user", &p.user);
                }
                self.client.get(url)
            }
            BrokerMethod::Post => {
                let body = match params {
                    Some(p) => serde_json::json!({ "room": p.room, "user": p.user }),
                    None => serde_json::json!({}),
                };
                self.client.post(self.endpoint.clone()).json(&body)
            }
        }
    }
}

#[async_trait]
impl CredentialSource for CredentialBroker {
    async fn request_credential(
        &self,
        params: Option<&CredentialRequest>,
    ) -> Result<Credential, CredentialError> {
        if let Some(p) = params {
            p.validate()?;
        }

        tracing::info!(
            "requesting credential from {} ({:?})",
            self.endpoint,
            self.method
        );

        let resp = self
            .build_request(params)
            .send()
            .await
            .map_err(|e| CredentialError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| CredentialError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("Failed to fetch token: {status}"));
            tracing::warn!("credential endpoint returned {status}: {message}");
            return Err(CredentialError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let data: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| CredentialError::MalformedResponse(format!("invalid JSON: {e}")))?;
        let credential = data.into_credential()?;

        tracing::info!(
            "credential issued for room {} as {}",
            credential.room_name,
            credential.participant_name
        );
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn broker(server: &MockServer, path: &str, method: BrokerMethod) -> CredentialBroker {
        CredentialBroker::new(
            &format!("{}{path}", server.uri()),
            method,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn token_body() -> serde_json::Value {
        serde_json::json!({
            "token": "t1",
            "serverUrl": "wss://x",
            "roomName": "room-abc",
            "participantName": "Guest"
        })
    }

    #[test]
    fn generated_request_has_prefixed_random_ids() {
        let req = CredentialRequest::generated();
        assert!(req.room.starts_with("room-"));
        assert!(req.user.starts_with("user-"));
        assert_eq!(req.room.len(), "room-".len() + ID_SUFFIX_LEN);
        assert!(req.user["user-".len()..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(req, CredentialRequest::generated());
    }

    #[test]
    fn request_rejects_empty_room_or_user() {
        assert!(CredentialRequest::new("", "alice").is_err());
        assert!(CredentialRequest::new("room-1", "  ").is_err());
        assert!(CredentialRequest::new("room-1", "alice").is_ok());
    }

    #[test]
    fn credential_debug_redacts_token() {
        let cred = Credential {
            server_url: "wss://x".into(),
            room_name: "r".into(),
            token: "super-secret-token".into(),
            participant_name: "Guest".into(),
        };
        let debug = format!("{cred:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-token"));
    }

    #[test]
    fn invalid_endpoint_is_a_config_error() {
        let result = CredentialBroker::new("not a url", BrokerMethod::Post, Duration::from_secs(1));
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn post_without_params_sends_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/livekit/token"))
            .and(body_json(serde_json::json!({})))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let cred = broker(&server, "/api/livekit/token", BrokerMethod::Post)
            .request_credential(None)
            .await
            .unwrap();

        assert_eq!(cred.token, "t1");
        assert_eq!(cred.server_url, "wss://x");
        assert_eq!(cred.room_name, "room-abc");
        assert_eq!(cred.participant_name, "Guest");
    }

    #[tokio::test]
    async fn post_with_params_sends_room_and_user() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_json(serde_json::json!({ "room": "room-1", "user": "alice" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let params = CredentialRequest::new("room-1", "alice").unwrap();
        broker(&server, "/token", BrokerMethod::Post)
            .request_credential(Some(&params))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_passes_params_as_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/backend-token"))
            .and(query_param("room", "room 1"))
            .and(query_param("user", "bob&co"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let params = CredentialRequest::new("room 1", "bob&co").unwrap();
        let cred = broker(&server, "/api/backend-token", BrokerMethod::Get)
            .request_credential(Some(&params))
            .await
            .unwrap();
        assert_eq!(cred.room_name, "room-abc");
    }

    #[tokio::test]
    async fn missing_participant_name_defaults_to_guest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "t1",
                "serverUrl": "wss://x",
                "roomName": "room-abc"
            })))
            .mount(&server)
            .await;

        let cred = broker(&server, "/token", BrokerMethod::Post)
            .request_credential(None)
            .await
            .unwrap();
        assert_eq!(cred.participant_name, DEFAULT_PARTICIPANT_NAME);
    }

    #[tokio::test]
    async fn backend_error_message_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(serde_json::json!({ "error": "unavailable" })),
            )
            .mount(&server)
            .await;

        let err = broker(&server, "/token", BrokerMethod::Post)
            .request_credential(None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CredentialError::Backend {
                status: 500,
                message: "unavailable".into()
            }
        );
    }

    #[tokio::test]
    async fn undecodable_error_body_falls_back_to_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let err = broker(&server, "/token", BrokerMethod::Post)
            .request_credential(None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CredentialError::Backend {
                status: 502,
                message: "Failed to fetch token: 502 Bad Gateway".into()
            }
        );
    }

    #[tokio::test]
    async fn missing_token_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "serverUrl": "wss://x",
                "roomName": "room-abc"
            })))
            .mount(&server)
            .await;

        let err = broker(&server, "/token", BrokerMethod::Post)
            .request_credential(None)
            .await
            .unwrap_err();
        assert_eq!(err, CredentialError::MalformedResponse("missing token".into()));
    }

    #[tokio::test]
    async fn non_json_success_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let err = broker(&server, "/token", BrokerMethod::Post)
            .request_credential(None)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        // Nothing listens on a port released right after binding it.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let endpoint = format!("http://127.0.0.1:{port}/token");

        let broker = CredentialBroker::new(&endpoint, BrokerMethod::Post, Duration::from_secs(2)).unwrap();
        let err = broker.request_credential(None).await.unwrap_err();
        assert!(matches!(err, CredentialError::Network(_)));
    }

    #[tokio::test]
    async fn invalid_params_never_hit_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(0)
            .mount(&server)
            .await;

        let params = CredentialRequest {
            room: String::new(),
            user: "alice".into(),
        };
        let err = broker(&server, "/token", BrokerMethod::Post)
            .request_credential(Some(&params))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::InvalidRequest(_)));
    }
}
