use thiserror::Error;

/// Failure to obtain a credential from the credential endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("network error: {0}")]
    Network(String),
    /// Non-2xx response. Displays as the backend's message verbatim.
    #[error("{message}")]
    Backend { status: u16, message: String },
    #[error("malformed credential response: {0}")]
    MalformedResponse(String),
    #[error("invalid credential request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection lost: {0}")]
    Dropped(String),
    #[error("microphone toggle failed: {0}")]
    Microphone(String),
    #[error("disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no manual credential entry is pending")]
    NoManualEntryPending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_message_verbatim() {
        let err = CredentialError::Backend {
            status: 500,
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "unavailable");
    }

    #[test]
    fn session_error_is_transparent_over_sources() {
        let err: SessionError = CredentialError::Network("refused".into()).into();
        assert_eq!(err.to_string(), "network error: refused");

        let err: SessionError = TransportError::Connect("timeout".into()).into();
        assert_eq!(err.to_string(), "connection failed: timeout");
    }
}
