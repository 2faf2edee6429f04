use std::sync::Arc;

use async_trait::async_trait;
use livekit::options::TrackPublishOptions;
use livekit::prelude::{LocalAudioTrack, LocalTrack, Room, RoomEvent, RoomOptions};
use livekit::track::TrackSource as LkTrackSource;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::prelude::{AudioSourceOptions, RtcAudioSource};
use livekit::DisconnectReason as RoomDisconnectReason;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::errors::TransportError;
use crate::transport::{
    ConnectOptions, DisconnectReason, Transport, TransportConnectionState, TransportEvent,
    TransportEvents,
};

/// Audio source options matching the agent's expected input.
const AUDIO_SAMPLE_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u32 = 1;
const AUDIO_QUEUE_SIZE_MS: u32 = 100;

type RoomSlot = Arc<Mutex<Option<Arc<Room>>>>;

/// Server-side closes are `Remote`; anything the client did not ask for and
/// the server did not announce is an `Error`.
fn map_disconnect_reason(reason: RoomDisconnectReason) -> DisconnectReason {
    match reason {
        RoomDisconnectReason::ClientInitiated => DisconnectReason::ClientInitiated,
        RoomDisconnectReason::RoomDeleted
        | RoomDisconnectReason::ParticipantRemoved
        | RoomDisconnectReason::ServerShutdown
        | RoomDisconnectReason::DuplicateIdentity => DisconnectReason::Remote(format!("{reason:?}")),
        other => DisconnectReason::Error(format!("{other:?}")),
    }
}

/// [`Transport`] backed by a LiveKit room.
///
/// Joining publishes a microphone track when audio is requested. Host code
/// feeds captured PCM into [`LiveKitTransport::audio_source`].
pub struct LiveKitTransport {
    room: RoomSlot,
    audio_source: Arc<Mutex<Option<NativeAudioSource>>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LiveKitTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveKitTransport {
    pub fn new() -> Self {
        Self {
            room: Arc::new(Mutex::new(None)),
            audio_source: Arc::new(Mutex::new(None)),
            forwarder: Mutex::new(None),
        }
    }

    /// Audio source of the published microphone track, if any.
    pub async fn audio_source(&self) -> Option<NativeAudioSource> {
        self.audio_source.lock().await.clone()
    }

    async fn publish_microphone(&self, room: &Room) -> Result<(), TransportError> {
        let source = NativeAudioSource::new(
            AudioSourceOptions {
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
            AUDIO_SAMPLE_RATE,
            AUDIO_CHANNELS,
            AUDIO_QUEUE_SIZE_MS,
        );

        let track = LocalAudioTrack::create_audio_track(
            "microphone",
            RtcAudioSource::Native(source.clone()),
        );

        room.local_participant()
            .publish_track(
                LocalTrack::Audio(track),
                TrackPublishOptions {
                    source: LkTrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TransportError::Microphone(format!("publish audio: {e}")))?;

        *self.audio_source.lock().await = Some(source);
        tracing::info!("microphone track published");
        Ok(())
    }

    async fn forward_room_events(
        room: Arc<Room>,
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
        tx: mpsc::UnboundedSender<TransportEvent>,
        room_slot: RoomSlot,
    ) {
        while let Some(event) = events.recv().await {
            let mapped = match event {
                RoomEvent::Connected { .. } | RoomEvent::Reconnected => Some(
                    TransportEvent::ConnectionStateChanged(TransportConnectionState::Connected),
                ),
                RoomEvent::Reconnecting => Some(TransportEvent::ConnectionStateChanged(
                    TransportConnectionState::Reconnecting,
                )),
                RoomEvent::ParticipantConnected(_) | RoomEvent::ParticipantDisconnected(_) => Some(
                    TransportEvent::ParticipantsChanged(room.remote_participants().len()),
                ),
                RoomEvent::Disconnected { reason } => {
                    tracing::info!("room disconnected: {reason:?}");
                    let reason = map_disconnect_reason(reason);
                    room_slot.lock().await.take();
                    let _ = tx.send(TransportEvent::Disconnected(reason));
                    break;
                }
                other => {
                    tracing::debug!("unhandled room event: {other:?}");
                    None
                }
            };

            if let Some(event) = mapped {
                if tx.send(event).is_err() {
                    tracing::debug!("transport subscription dropped, stopping room event forwarding");
                    break;
                }
            }
        }

        tracing::info!("room event forwarding ended");
    }
}

impl Drop for LiveKitTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.forwarder.get_mut().take() {
            handle.abort();
        }
        let room = match self.room.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(room) = room else { return };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = room.close().await {
                        tracing::warn!("error closing room on drop: {e}");
                    }
                });
            }
            Err(_) => tracing::warn!("transport dropped outside a runtime, room left open"),
        }
    }
}

#[async_trait]
impl Transport for LiveKitTransport {
    async fn connect(
        &self,
        server_url: &str,
        token: &str,
        options: ConnectOptions,
    ) -> Result<TransportEvents, TransportError> {
        let mut room_options = RoomOptions::default();
        room_options.auto_subscribe = true;

        let (room, room_events) = Room::connect(server_url, token, room_options)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let room = Arc::new(room);

        if options.audio {
            if let Err(e) = self.publish_microphone(&room).await {
                if let Err(close_err) = room.close().await {
                    tracing::warn!("error closing room after failed publish: {close_err}");
                }
                return Err(TransportError::Connect(e.to_string()));
            }
        }
        if options.video {
            tracing::warn!("camera capture is not available here, joining audio-only");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        // Room::connect only returns once joined.
        let _ = tx.send(TransportEvent::ConnectionStateChanged(
            TransportConnectionState::Connected,
        ));
        let _ = tx.send(TransportEvent::ParticipantsChanged(
            room.remote_participants().len(),
        ));

        *self.room.lock().await = Some(room.clone());

        let handle = tokio::spawn(Self::forward_room_events(
            room,
            room_events,
            tx,
            self.room.clone(),
        ));
        if let Some(previous) = self.forwarder.lock().await.replace(handle) {
            previous.abort();
        }

        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.forwarder.lock().await.take() {
            handle.abort();
        }
        self.audio_source.lock().await.take();
        let room = self.room.lock().await.take();
        match room {
            Some(room) => room
                .close()
                .await
                .map_err(|e| TransportError::Disconnect(e.to_string())),
            None => Ok(()),
        }
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        let room = self
            .room
            .lock()
            .await
            .clone()
            .ok_or_else(|| TransportError::Microphone("not connected".into()))?;

        let local = room.local_participant();
        let mut found = false;
        for (_, publication) in local.track_publications() {
            if publication.source() == LkTrackSource::Microphone {
                if enabled {
                    publication.unmute();
                } else {
                    publication.mute();
                }
                found = true;
                break;
            }
        }

        if !found {
            if !enabled {
                return Ok(());
            }
            // Joined with audio off: publish on first unmute.
            self.publish_microphone(&room).await?;
        }

        tracing::info!("microphone enabled: {enabled}");
        Ok(())
    }
}
