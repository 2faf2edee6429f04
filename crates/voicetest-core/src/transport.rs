//! Seam to the real-time media layer.
//!
//! The controller never talks to a media SDK directly: it calls a
//! [`Transport`] and drains the [`TransportEvents`] subscription returned by
//! [`Transport::connect`]. The subscription is owned by exactly one consumer;
//! dropping it unsubscribes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::TransportError;

/// Media capture requested when joining a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub audio: bool,
    pub video: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConnectionState {
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientInitiated,
    /// Closed by the server or the remote side (room deleted, kicked, ...).
    Remote(String),
    /// Signaling or media failure the transport could not recover from.
    Error(String),
}

/// Notifications pushed by the transport, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStateChanged(TransportConnectionState),
    /// Number of remote participants currently in the room.
    ParticipantsChanged(usize),
    Disconnected(DisconnectReason),
}

/// Event subscription for one connection.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin joining the room. `Ok` means the attempt was accepted; the
    /// connected notification arrives on the returned subscription.
    async fn connect(
        &self,
        server_url: &str,
        token: &str,
        options: ConnectOptions,
    ) -> Result<TransportEvents, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), TransportError>;
}
