//! Lifecycle of one voice test call.
//!
//! [`SessionController`] drives a single call attempt at a time:
//!
//! ```text
//! Idle -> AcquiringCredential -> Connecting -> Connected <-> Reconnecting
//!                 |                   |            |              |
//!                 v                   v            v              v
//!              Failed              Failed   Disconnected/Failed  Disconnected
//! ```
//!
//! Every attempt gets a fresh id from a monotonically increasing counter.
//! Async completions (credential, connect) and transport events carry the id
//! they were started under and are dropped once a newer attempt or `end()`
//! has moved the counter on.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use crate::auth::{Credential, CredentialBroker, CredentialRequest, CredentialSource};
use crate::errors::{SessionError, TransportError};
use crate::events::{EventEmitter, SessionEvent, SessionEventListener};
use crate::settings::Settings;
use crate::transport::{
    ConnectOptions, DisconnectReason, Transport, TransportConnectionState, TransportEvent,
    TransportEvents,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AcquiringCredential,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    /// Human-readable reason, shown to the operator as is.
    Failed(String),
}

impl SessionState {
    /// A transport session exists or is being established.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// An attempt is running; `start()` is ignored.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::AcquiringCredential) || self.is_live()
    }

    pub fn can_start(&self) -> bool {
        !self.is_in_flight()
    }

    pub fn can_end(&self) -> bool {
        !matches!(self, Self::Idle | Self::Disconnected)
    }

    /// Media controls (mute) apply only in these states.
    pub fn controls_enabled(&self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::AcquiringCredential => "Requesting token…",
            Self::Connecting => "Connecting…",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting…",
            Self::Disconnected => "Disconnected",
            Self::Failed(_) => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaControlState {
    pub microphone_enabled: bool,
}

/// Everything the presentation layer renders, read in one go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub media: MediaControlState,
    /// Remote participants in the room. Advisory only.
    pub participant_count: usize,
    pub last_error: Option<String>,
    pub room_name: Option<String>,
    pub participant_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Credential handed to the transport; waiting for it to report connected.
    Connecting,
    /// Another attempt is already running. Nothing was done.
    AlreadyActive,
    /// The attempt was cancelled or replaced while suspended; its result was
    /// discarded.
    Superseded,
    /// Automatic credential bootstrap failed and the operator can now supply
    /// one by hand.
    ManualEntryRequired { reason: String },
}

/// Identifies one call attempt of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttemptId(u64);

struct Inner {
    state: SessionState,
    media: MediaControlState,
    participants: usize,
    last_error: Option<String>,
    credential: Option<Credential>,
    attempt: u64,
    event_task: Option<JoinHandle<()>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            media: MediaControlState::default(),
            participants: 0,
            last_error: None,
            credential: None,
            attempt: 0,
            event_task: None,
        }
    }

    fn is_current(&self, attempt: AttemptId) -> bool {
        self.attempt == attempt.0
    }

    fn transition(&mut self, state: SessionState, out: &mut Vec<SessionEvent>) {
        tracing::info!(
            "session attempt {}: {:?} -> {:?}",
            self.attempt,
            self.state,
            state
        );
        self.state = state.clone();
        out.push(SessionEvent::StateChanged(state));
    }

    /// Drop everything tied to the current connection.
    fn clear_connection(&mut self, out: &mut Vec<SessionEvent>) {
        self.credential = None;
        self.media = MediaControlState::default();
        if self.participants != 0 {
            self.participants = 0;
            out.push(SessionEvent::ParticipantsChanged(0));
        }
    }

    fn fail(&mut self, reason: String, out: &mut Vec<SessionEvent>) {
        tracing::warn!("session attempt {} failed: {reason}", self.attempt);
        self.last_error = Some(reason.clone());
        self.clear_connection(out);
        self.transition(SessionState::Failed(reason), out);
    }
}

/// State shared between the controller and its transport event pump.
struct Shared {
    inner: Mutex<Inner>,
    emitter: EventEmitter,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.emitter.emit(event);
        }
    }

    /// Apply one transport notification. Returns `true` once the stream has
    /// nothing more to say about this attempt.
    fn apply_transport_event(
        &self,
        attempt: AttemptId,
        options: ConnectOptions,
        event: TransportEvent,
    ) -> bool {
        let mut out = Vec::new();
        let finished = {
            let mut inner = self.lock();
            if !inner.is_current(attempt) {
                tracing::debug!("dropping {event:?} from superseded attempt {}", attempt.0);
                return true;
            }
            Self::apply_locked(&mut inner, options, event, &mut out)
        };
        self.emit_all(out);
        finished
    }

    fn apply_locked(
        inner: &mut Inner,
        options: ConnectOptions,
        event: TransportEvent,
        out: &mut Vec<SessionEvent>,
    ) -> bool {
        match event {
            TransportEvent::ConnectionStateChanged(TransportConnectionState::Connected) => {
                match inner.state {
                    SessionState::Connecting => {
                        inner.media.microphone_enabled = options.audio;
                        inner.transition(SessionState::Connected, out);
                        out.push(SessionEvent::MicrophoneChanged(options.audio));
                    }
                    SessionState::Reconnecting => inner.transition(SessionState::Connected, out),
                    _ => tracing::debug!("ignoring connected in {:?}", inner.state),
                }
                false
            }
            TransportEvent::ConnectionStateChanged(TransportConnectionState::Reconnecting) => {
                if inner.state == SessionState::Connected {
                    inner.transition(SessionState::Reconnecting, out);
                } else {
                    tracing::debug!("ignoring reconnecting in {:?}", inner.state);
                }
                false
            }
            TransportEvent::ConnectionStateChanged(TransportConnectionState::Connecting) => false,
            TransportEvent::ParticipantsChanged(count) => {
                if inner.state.is_live() && inner.participants != count {
                    inner.participants = count;
                    out.push(SessionEvent::ParticipantsChanged(count));
                }
                false
            }
            TransportEvent::Disconnected(reason) => {
                tracing::info!("transport disconnected: {reason:?}");
                match (inner.state.clone(), reason) {
                    (SessionState::Connecting, DisconnectReason::Remote(msg))
                    | (SessionState::Connecting, DisconnectReason::Error(msg)) => {
                        inner.fail(TransportError::Connect(msg).to_string(), out);
                    }
                    (SessionState::Connected, DisconnectReason::Error(msg)) => {
                        inner.fail(TransportError::Dropped(msg).to_string(), out);
                    }
                    (SessionState::Connected, DisconnectReason::Remote(msg))
                    | (SessionState::Reconnecting, DisconnectReason::Error(msg)) => {
                        inner.last_error = Some(TransportError::Dropped(msg).to_string());
                        inner.clear_connection(out);
                        inner.transition(SessionState::Disconnected, out);
                    }
                    (state, _) if state.is_live() => {
                        inner.clear_connection(out);
                        inner.transition(SessionState::Disconnected, out);
                    }
                    (state, _) => {
                        tracing::debug!("ignoring disconnect in {state:?}");
                        return false;
                    }
                }
                // The pump itself owns this handle; let it detach.
                inner.event_task = None;
                true
            }
        }
    }
}

/// Drains one connection's transport events, strictly in arrival order.
async fn pump_transport_events(
    shared: Arc<Shared>,
    attempt: AttemptId,
    options: ConnectOptions,
    mut events: TransportEvents,
) {
    while let Some(event) = events.recv().await {
        if shared.apply_transport_event(attempt, options, event) {
            tracing::debug!("transport event pump for attempt {} done", attempt.0);
            return;
        }
    }
    // Stream closed without a disconnect notification.
    shared.apply_transport_event(
        attempt,
        options,
        TransportEvent::Disconnected(DisconnectReason::Error(
            "transport event stream closed".into(),
        )),
    );
}

/// Owns the lifecycle of a voice test call against one transport.
///
/// Construct one per presentation scope. Dropping it stops event processing
/// and, when a call is live, disconnects the transport in the background.
pub struct SessionController {
    broker: Arc<dyn CredentialSource>,
    transport: Arc<dyn Transport>,
    options: ConnectOptions,
    shared: Arc<Shared>,
    /// Serializes connect and stale-connection teardown so attempts never
    /// overlap on the transport.
    connect_gate: tokio::sync::Mutex<()>,
}

impl SessionController {
    pub fn new(broker: Arc<dyn CredentialSource>, transport: Box<dyn Transport>) -> Self {
        Self {
            broker,
            transport: Arc::from(transport),
            options: ConnectOptions::default(),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::new()),
                emitter: EventEmitter::new(),
            }),
            connect_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Controller talking HTTP to the credential endpoint in `settings`.
    pub fn from_settings(settings: &Settings, transport: Box<dyn Transport>) -> Result<Self, SessionError> {
        let broker = CredentialBroker::from_settings(settings)?;
        Ok(Self::new(Arc::new(broker), transport).with_options(settings.connect_options()))
    }

    pub fn with_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> ConnectOptions {
        self.options
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    pub fn media(&self) -> MediaControlState {
        self.shared.lock().media
    }

    pub fn participant_count(&self) -> usize {
        self.shared.lock().participants
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Credential of the running attempt, if one has been obtained.
    pub fn credential(&self) -> Option<Credential> {
        self.shared.lock().credential.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.shared.lock();
        SessionSnapshot {
            state: inner.state.clone(),
            media: inner.media,
            participant_count: inner.participants,
            last_error: inner.last_error.clone(),
            room_name: inner.credential.as_ref().map(|c| c.room_name.clone()),
            participant_name: inner.credential.as_ref().map(|c| c.participant_name.clone()),
        }
    }

    /// Start a call: fetch a fresh credential, then connect with it.
    ///
    /// Ignored while an attempt is already running. Credential and connect
    /// failures land in [`SessionState::Failed`] and are also returned.
    pub async fn start(&self, params: Option<&CredentialRequest>) -> Result<StartOutcome, SessionError> {
        let Some(attempt) = self.begin_attempt() else {
            return Ok(StartOutcome::AlreadyActive);
        };

        match self.broker.request_credential(params).await {
            Ok(credential) => self.connect_with_credential(attempt, credential).await,
            Err(e) => {
                if self.fail_attempt(attempt, e.to_string()) {
                    Err(e.into())
                } else {
                    tracing::warn!("discarding credential error of superseded attempt: {e}");
                    Ok(StartOutcome::Superseded)
                }
            }
        }
    }

    /// Enter `AcquiringCredential` for a new attempt, unless one is running.
    pub(crate) fn begin_attempt(&self) -> Option<AttemptId> {
        let mut out = Vec::new();
        let attempt = {
            let mut inner = self.shared.lock();
            if inner.state.is_in_flight() {
                tracing::debug!("start ignored: attempt already {:?}", inner.state);
                return None;
            }
            inner.attempt += 1;
            if let Some(task) = inner.event_task.take() {
                task.abort();
            }
            inner.last_error = None;
            inner.clear_connection(&mut out);
            inner.transition(SessionState::AcquiringCredential, &mut out);
            AttemptId(inner.attempt)
        };
        self.shared.emit_all(out);
        Some(attempt)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        self.shared.emitter.emit(event);
    }

    pub(crate) fn credential_source(&self) -> Arc<dyn CredentialSource> {
        self.broker.clone()
    }

    pub(crate) fn is_current(&self, attempt: AttemptId) -> bool {
        self.shared.lock().is_current(attempt)
    }

    /// Record an error against a still-pending attempt without failing it.
    pub(crate) fn note_error(&self, attempt: AttemptId, message: String) -> bool {
        let current = {
            let mut inner = self.shared.lock();
            if inner.is_current(attempt) {
                inner.last_error = Some(message.clone());
                true
            } else {
                false
            }
        };
        if current {
            self.shared.emitter.emit(SessionEvent::Error(message));
        }
        current
    }

    fn fail_attempt(&self, attempt: AttemptId, reason: String) -> bool {
        let mut out = Vec::new();
        {
            let mut inner = self.shared.lock();
            if !inner.is_current(attempt) {
                return false;
            }
            inner.fail(reason, &mut out);
        }
        self.shared.emit_all(out);
        true
    }

    /// The `AcquiringCredential -> Connecting` transition for `attempt`.
    pub(crate) async fn connect_with_credential(
        &self,
        attempt: AttemptId,
        credential: Credential,
    ) -> Result<StartOutcome, SessionError> {
        let _gate = self.connect_gate.lock().await;

        let mut out = Vec::new();
        {
            let mut inner = self.shared.lock();
            if !inner.is_current(attempt) || inner.state != SessionState::AcquiringCredential {
                tracing::warn!("discarding credential of superseded attempt {}", attempt.0);
                return Ok(StartOutcome::Superseded);
            }
            inner.credential = Some(credential.clone());
            inner.transition(SessionState::Connecting, &mut out);
        }
        self.shared.emit_all(out);

        tracing::info!(
            "connecting to {} (room {}, audio={}, video={})",
            credential.server_url,
            credential.room_name,
            self.options.audio,
            self.options.video
        );

        let events = match self
            .transport
            .connect(&credential.server_url, &credential.token, self.options)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                return if self.fail_attempt(attempt, e.to_string()) {
                    Err(e.into())
                } else {
                    tracing::warn!("discarding connect error of superseded attempt: {e}");
                    Ok(StartOutcome::Superseded)
                };
            }
        };

        let events = {
            let mut inner = self.shared.lock();
            if inner.is_current(attempt) {
                let task = tokio::spawn(pump_transport_events(
                    self.shared.clone(),
                    attempt,
                    self.options,
                    events,
                ));
                inner.event_task = Some(task);
                None
            } else {
                Some(events)
            }
        };

        match events {
            None => Ok(StartOutcome::Connecting),
            Some(stale) => {
                tracing::warn!("attempt {} ended while connecting, tearing down", attempt.0);
                drop(stale);
                if let Err(e) = self.transport.disconnect().await {
                    tracing::warn!("teardown of superseded connection failed: {e}");
                }
                Ok(StartOutcome::Superseded)
            }
        }
    }

    /// Flip the microphone. Only acts in `Connected`/`Reconnecting`; anywhere
    /// else it returns the current value unchanged.
    ///
    /// The new value is committed only after the transport applied it.
    pub async fn toggle_microphone(&self) -> Result<bool, SessionError> {
        let (attempt, target) = {
            let inner = self.shared.lock();
            if !inner.state.controls_enabled() {
                tracing::debug!("toggle_microphone ignored in {:?}", inner.state);
                return Ok(inner.media.microphone_enabled);
            }
            (AttemptId(inner.attempt), !inner.media.microphone_enabled)
        };

        match self.transport.set_microphone_enabled(target).await {
            Ok(()) => {
                let (changed, enabled) = {
                    let mut inner = self.shared.lock();
                    if inner.is_current(attempt) && inner.state.controls_enabled() {
                        inner.media.microphone_enabled = target;
                        (true, target)
                    } else {
                        (false, inner.media.microphone_enabled)
                    }
                };
                if changed {
                    tracing::info!("microphone enabled: {enabled}");
                    self.shared.emitter.emit(SessionEvent::MicrophoneChanged(enabled));
                }
                Ok(enabled)
            }
            Err(e) => {
                tracing::warn!("microphone toggle failed: {e}");
                self.note_error(attempt, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Hang up. Always ends in `Disconnected` (no-op in `Idle` or when
    /// already disconnected); transport teardown is best effort.
    pub async fn end(&self) {
        let mut out = Vec::new();
        let was_live = {
            let mut inner = self.shared.lock();
            if !inner.state.can_end() {
                tracing::debug!("end ignored in {:?}", inner.state);
                return;
            }
            let was_live = inner.state.is_live();
            inner.attempt += 1;
            if let Some(task) = inner.event_task.take() {
                task.abort();
            }
            inner.last_error = None;
            inner.clear_connection(&mut out);
            inner.transition(SessionState::Disconnected, &mut out);
            was_live
        };
        self.shared.emit_all(out);

        if was_live {
            if let Err(e) = self.transport.disconnect().await {
                tracing::warn!("transport teardown failed: {e}");
            }
        }
    }

    /// End any running call and return to `Idle`.
    pub async fn reset(&self) {
        self.end().await;
        let mut out = Vec::new();
        {
            let mut inner = self.shared.lock();
            if inner.state == SessionState::Idle {
                return;
            }
            inner.attempt += 1;
            inner.last_error = None;
            inner.transition(SessionState::Idle, &mut out);
        }
        self.shared.emit_all(out);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let was_live = {
            let mut inner = self.shared.lock();
            inner.attempt += 1;
            if let Some(task) = inner.event_task.take() {
                task.abort();
            }
            inner.state.is_live()
        };
        if !was_live {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let transport = self.transport.clone();
                runtime.spawn(async move {
                    if let Err(e) = transport.disconnect().await {
                        tracing::warn!("transport teardown on drop failed: {e}");
                    }
                });
            }
            Err(_) => tracing::warn!("controller dropped outside a runtime, transport left open"),
        }
    }
}
