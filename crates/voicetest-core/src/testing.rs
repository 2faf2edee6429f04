//! Test doubles for the credential and transport seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::auth::{Credential, CredentialRequest, CredentialSource};
use crate::errors::{CredentialError, TransportError};
use crate::events::{SessionEvent, SessionEventListener};
use crate::session::SessionState;
use crate::transport::{ConnectOptions, Transport, TransportEvent, TransportEvents};

pub fn credential() -> Credential {
    Credential {
        server_url: "wss://x".into(),
        room_name: "room-abc".into(),
        token: "t1".into(),
        participant_name: "Guest".into(),
    }
}

/// Yield to spawned tasks until `cond` holds.
pub async fn eventually(cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
struct StubInner {
    responses: Mutex<VecDeque<Result<Credential, CredentialError>>>,
    requests: Mutex<Vec<Option<CredentialRequest>>>,
    calls: AtomicUsize,
    hold: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Credential source answering from a queue of canned results.
#[derive(Clone, Default)]
pub struct StubCredentialSource {
    inner: Arc<StubInner>,
}

impl StubCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, credential: Credential) {
        self.inner.responses.lock().unwrap().push_back(Ok(credential));
    }

    pub fn push_err(&self, error: CredentialError) {
        self.inner.responses.lock().unwrap().push_back(Err(error));
    }

    /// Park the next request until the returned sender fires.
    pub fn hold(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.inner.hold.lock().unwrap() = Some(rx);
        tx
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Option<CredentialRequest>> {
        self.inner.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialSource for StubCredentialSource {
    async fn request_credential(
        &self,
        params: Option<&CredentialRequest>,
    ) -> Result<Credential, CredentialError> {
        self.inner.requests.lock().unwrap().push(params.cloned());
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.inner.hold.lock().unwrap().take();
        if let Some(rx) = hold {
            let _ = rx.await;
        }
        self.inner
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CredentialError::Network("no stub response queued".into())))
    }
}

#[derive(Default)]
struct MockInner {
    connects: Mutex<Vec<(String, String, ConnectOptions)>>,
    disconnects: AtomicUsize,
    mic_calls: Mutex<Vec<bool>>,
    sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    connect_error: Mutex<Option<TransportError>>,
    mic_error: Mutex<Option<TransportError>>,
    disconnect_error: Mutex<Option<TransportError>>,
    connect_hold: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Transport that records calls and lets the test inject events.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, event: TransportEvent) {
        self.inner
            .sender
            .lock()
            .unwrap()
            .as_ref()
            .expect("no transport subscription")
            .send(event)
            .expect("subscription dropped");
    }

    pub fn send_if_subscribed(&self, event: TransportEvent) {
        if let Some(tx) = self.inner.sender.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Drop the sending side of the current subscription.
    pub fn close_stream(&self) {
        self.inner.sender.lock().unwrap().take();
    }

    /// Park the next connect, after it was recorded, until the returned
    /// sender fires.
    pub fn hold_connect(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.inner.connect_hold.lock().unwrap() = Some(rx);
        tx
    }

    /// Sending side of the current subscription, kept alive past a new connect.
    pub fn subscription(&self) -> Option<mpsc::UnboundedSender<TransportEvent>> {
        self.inner.sender.lock().unwrap().clone()
    }

    pub fn fail_connect(&self, error: TransportError) {
        *self.inner.connect_error.lock().unwrap() = Some(error);
    }

    pub fn fail_mic(&self, error: TransportError) {
        *self.inner.mic_error.lock().unwrap() = Some(error);
    }

    pub fn fail_disconnect(&self, error: TransportError) {
        *self.inner.disconnect_error.lock().unwrap() = Some(error);
    }

    pub fn connects(&self) -> Vec<(String, String, ConnectOptions)> {
        self.inner.connects.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    pub fn mic_calls(&self) -> Vec<bool> {
        self.inner.mic_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        server_url: &str,
        token: &str,
        options: ConnectOptions,
    ) -> Result<TransportEvents, TransportError> {
        self.inner
            .connects
            .lock()
            .unwrap()
            .push((server_url.to_string(), token.to_string(), options));
        let hold = self.inner.connect_hold.lock().unwrap().take();
        if let Some(rx) = hold {
            let _ = rx.await;
        }
        if let Some(e) = self.inner.connect_error.lock().unwrap().clone() {
            return Err(e);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        match self.inner.disconnect_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        self.inner.mic_calls.lock().unwrap().push(enabled);
        match self.inner.mic_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Listener recording every event it receives.
#[derive(Default)]
pub struct EventCapture {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

impl SessionEventListener for EventCapture {
    fn on_event(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}
