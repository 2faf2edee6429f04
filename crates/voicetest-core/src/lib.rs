//! Voice test call core.
//!
//! Credential acquisition, call-session lifecycle and the manual-connection
//! fallback for the operator dashboard's voice test pages. The media layer
//! sits behind the [`Transport`] trait; enable the `livekit` feature for the
//! LiveKit implementation.

pub mod auth;
pub mod errors;
pub mod events;
pub mod fallback;
#[cfg(feature = "livekit")]
pub mod livekit_transport;
pub mod session;
pub mod settings;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

pub use auth::{BrokerMethod, Credential, CredentialBroker, CredentialRequest, CredentialSource};
pub use errors::{CredentialError, SessionError, TransportError};
pub use events::{EventEmitter, SessionEvent, SessionEventListener};
pub use fallback::{FallbackCoordinator, FallbackMode, ManualCredential};
#[cfg(feature = "livekit")]
pub use livekit_transport::LiveKitTransport;
pub use session::{
    MediaControlState, SessionController, SessionSnapshot, SessionState, StartOutcome,
};
pub use settings::{Settings, SettingsStore};
pub use transport::{
    ConnectOptions, DisconnectReason, Transport, TransportConnectionState, TransportEvent,
    TransportEvents,
};
