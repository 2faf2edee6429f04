//! Automatic credential bootstrap with a manual way out.
//!
//! The playground joins a throwaway room under generated identifiers. When
//! the credential endpoint is down, the attempt is kept open in
//! `AcquiringCredential` and the operator can paste a server URL and token
//! instead; the controller then connects with those directly.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::auth::{Credential, CredentialRequest, DEFAULT_PARTICIPANT_NAME};
use crate::errors::{CredentialError, SessionError};
use crate::events::SessionEvent;
use crate::session::{AttemptId, SessionController, StartOutcome};

/// Room name reported for credentials entered without one.
pub const MANUAL_ROOM_NAME: &str = "manual";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackMode {
    Idle,
    /// Credential requested from the endpoint.
    Automatic,
    /// Endpoint failed; waiting for the operator.
    ManualEntry { reason: String },
    /// Connected (or connecting) with an operator-supplied credential.
    Manual,
}

/// What the operator typed into the manual connection form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualCredential {
    Full(Credential),
    Token { server_url: String, token: String },
}

impl ManualCredential {
    fn into_credential(self) -> Result<Credential, CredentialError> {
        let credential = match self {
            Self::Full(credential) => credential,
            Self::Token { server_url, token } => Credential {
                server_url,
                token,
                room_name: MANUAL_ROOM_NAME.to_string(),
                participant_name: DEFAULT_PARTICIPANT_NAME.to_string(),
            },
        };
        if credential.server_url.trim().is_empty() || credential.token.trim().is_empty() {
            return Err(CredentialError::InvalidRequest(
                "server URL and token are both required".into(),
            ));
        }
        Ok(Credential {
            server_url: credential.server_url.trim().to_string(),
            token: credential.token.trim().to_string(),
            ..credential
        })
    }
}

struct ModeState {
    mode: FallbackMode,
    pending: Option<AttemptId>,
}

pub struct FallbackCoordinator {
    controller: Arc<SessionController>,
    state: Mutex<ModeState>,
}

impl FallbackCoordinator {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self {
            controller,
            state: Mutex::new(ModeState {
                mode: FallbackMode::Idle,
                pending: None,
            }),
        }
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn mode(&self) -> FallbackMode {
        self.current().mode.clone()
    }

    /// Why manual entry is being offered, while it is.
    pub fn manual_entry_reason(&self) -> Option<String> {
        match &self.current().mode {
            FallbackMode::ManualEntry { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mode state with a pending entry dropped once its attempt is over,
    /// e.g. after the controller was ended directly.
    fn current(&self) -> MutexGuard<'_, ModeState> {
        let mut state = self.lock();
        if let Some(attempt) = state.pending {
            if !self.controller.is_current(attempt) {
                state.mode = FallbackMode::Idle;
                state.pending = None;
            }
        }
        state
    }

    fn set_mode(&self, mode: FallbackMode, pending: Option<AttemptId>) {
        let mut state = self.lock();
        state.mode = mode;
        state.pending = pending;
    }

    /// Request a credential under generated identifiers and connect with it.
    ///
    /// A credential failure does not fail the session: the attempt stays
    /// open and [`StartOutcome::ManualEntryRequired`] is returned.
    pub async fn start(&self) -> Result<StartOutcome, SessionError> {
        let Some(attempt) = self.controller.begin_attempt() else {
            return Ok(StartOutcome::AlreadyActive);
        };
        self.set_mode(FallbackMode::Automatic, None);

        let params = CredentialRequest::generated();
        tracing::info!("playground joining {} as {}", params.room, params.user);

        let source = self.controller.credential_source();
        match source.request_credential(Some(&params)).await {
            Ok(credential) => self.controller.connect_with_credential(attempt, credential).await,
            Err(e) => {
                let reason = e.to_string();
                if !self.controller.note_error(attempt, reason.clone()) {
                    return Ok(StartOutcome::Superseded);
                }
                tracing::warn!("credential bootstrap failed, offering manual connection: {reason}");
                self.set_mode(
                    FallbackMode::ManualEntry {
                        reason: reason.clone(),
                    },
                    Some(attempt),
                );
                self.controller.emit(SessionEvent::ManualEntryRequired {
                    reason: reason.clone(),
                });
                Ok(StartOutcome::ManualEntryRequired { reason })
            }
        }
    }

    /// Connect the pending attempt with an operator-supplied credential.
    ///
    /// An incomplete entry is rejected and manual entry stays open.
    pub async fn submit_manual(&self, entry: ManualCredential) -> Result<StartOutcome, SessionError> {
        let Some(attempt) = self.current().pending else {
            return Err(SessionError::NoManualEntryPending);
        };

        let credential = entry.into_credential()?;
        self.set_mode(FallbackMode::Manual, None);
        tracing::info!("connecting with operator-supplied credential for {}", credential.server_url);
        self.controller.connect_with_credential(attempt, credential).await
    }

    /// Hang up and drop any pending manual entry.
    pub async fn end(&self) {
        self.set_mode(FallbackMode::Idle, None);
        self.controller.end().await;
    }
}
