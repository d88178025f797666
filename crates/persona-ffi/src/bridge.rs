//! Adapters from the host callback interfaces to the core traits.
//!
//! Host callbacks are synchronous and may block (SDK calls, permission
//! dialogs), so each one runs on tokio's blocking pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use persona_core::{
    AvatarClient, AvatarClientFactory, ClientEvent, DeviceAccess, LocalAudioTrack,
    PermissionStatus, RemoteStream, SessionToken,
};
use tokio::sync::mpsc;

use crate::{AvatarBridge, DevicePermissions, PersonaError};

type CoreError = persona_core::PersonaError;

async fn blocking<T, F>(call: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, PersonaError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| CoreError::Session(format!("host callback failed: {e}")))?
        .map_err(CoreError::from)
}

/// Sender side of the current client's event channel.
///
/// Every opened session gets a fresh id that the host passes back with its
/// notifications. Only the most recently opened session is listening;
/// events tagged with any other id are dropped.
#[derive(Clone, Default)]
pub struct EventSlot {
    current: Arc<Mutex<Option<(u64, mpsc::UnboundedSender<ClientEvent>)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventSlot {
    fn open(&self) -> (u64, mpsc::UnboundedReceiver<ClientEvent>) {
        let session_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.current.lock().unwrap() = Some((session_id, tx));
        (session_id, rx)
    }

    /// Close `session_id`'s channel. A newer session stays untouched.
    fn close(&self, session_id: u64) {
        let mut current = self.current.lock().unwrap();
        if matches!(current.as_ref(), Some((id, _)) if *id == session_id) {
            current.take();
        }
    }

    pub fn send(&self, session_id: u64, event: ClientEvent) {
        match self.current.lock().unwrap().as_ref() {
            Some((id, tx)) if *id == session_id => {
                if tx.send(event).is_err() {
                    tracing::debug!("client event dropped: session {session_id} already gone");
                }
            }
            Some((id, _)) => {
                tracing::debug!("client event for stale session {session_id} dropped (current {id})")
            }
            None => tracing::debug!("client event dropped: no open session"),
        }
    }
}

pub struct BridgeClientFactory {
    bridge: Arc<dyn AvatarBridge>,
    events: EventSlot,
}

impl BridgeClientFactory {
    pub fn new(bridge: Arc<dyn AvatarBridge>, events: EventSlot) -> Self {
        Self { bridge, events }
    }
}

#[async_trait]
impl AvatarClientFactory for BridgeClientFactory {
    async fn create(
        &self,
        token: &SessionToken,
    ) -> Result<(Arc<dyn AvatarClient>, mpsc::UnboundedReceiver<ClientEvent>), CoreError> {
        // Open the channel first: the host may report "established" from
        // inside `open_session`.
        let (session_id, rx) = self.events.open();
        let bridge = self.bridge.clone();
        let token = token.as_str().to_string();
        if let Err(e) = blocking(move || bridge.open_session(session_id, token)).await {
            self.events.close(session_id);
            return Err(e);
        }

        let client = BridgeClient {
            session_id,
            bridge: self.bridge.clone(),
            events: self.events.clone(),
        };
        Ok((Arc::new(client), rx))
    }
}

struct BridgeClient {
    session_id: u64,
    bridge: Arc<dyn AvatarBridge>,
    events: EventSlot,
}

#[async_trait]
impl AvatarClient for BridgeClient {
    async fn stream(&self, input: &LocalAudioTrack) -> Result<Vec<RemoteStream>, CoreError> {
        let bridge = self.bridge.clone();
        let track_id = input.id.clone();
        let ids = blocking(move || bridge.start_streaming(track_id)).await?;
        Ok(ids
            .into_iter()
            .map(|id| RemoteStream {
                id,
                has_video: true,
                has_audio: true,
            })
            .collect())
    }

    async fn set_input_muted(&self, muted: bool) -> Result<(), CoreError> {
        let bridge = self.bridge.clone();
        blocking(move || bridge.set_input_muted(muted)).await
    }

    async fn stop_streaming(&self) -> Result<(), CoreError> {
        self.events.close(self.session_id);
        let bridge = self.bridge.clone();
        blocking(move || bridge.stop_streaming()).await
    }

    async fn talk(&self, text: &str) -> Result<(), CoreError> {
        let bridge = self.bridge.clone();
        let text = text.to_string();
        blocking(move || bridge.talk(text)).await
    }

    async fn switch_camera(&self, facing: persona_core::CameraFacing) -> Result<(), CoreError> {
        let bridge = self.bridge.clone();
        blocking(move || bridge.switch_camera(facing.into())).await
    }

    async fn set_output_volume(&self, stream_id: &str, volume: f64) -> Result<(), CoreError> {
        let bridge = self.bridge.clone();
        let stream_id = stream_id.to_string();
        blocking(move || bridge.set_output_volume(stream_id, volume)).await
    }
}

pub struct BridgeDevices {
    devices: Arc<dyn DevicePermissions>,
}

impl BridgeDevices {
    pub fn new(devices: Arc<dyn DevicePermissions>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceAccess for BridgeDevices {
    async fn request_permissions(&self) -> Result<PermissionStatus, CoreError> {
        let devices = self.devices.clone();
        let granted = blocking(move || Ok(devices.request_capture_permissions())).await?;
        Ok(if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        })
    }

    async fn open_microphone(&self) -> Result<LocalAudioTrack, CoreError> {
        let devices = self.devices.clone();
        let id = blocking(move || devices.open_microphone())
            .await
            .map_err(|e| match e {
                CoreError::PermissionDenied => e,
                other => CoreError::Device(other.to_string()),
            })?;
        Ok(LocalAudioTrack { id })
    }

    async fn release_microphone(&self, track: LocalAudioTrack) {
        let devices = self.devices.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || devices.release_microphone(track.id)).await {
            tracing::warn!("release_microphone callback failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CameraFacing;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedBridge {
        calls: StdMutex<Vec<String>>,
        events: StdMutex<Option<EventSlot>>,
        establish_on_open: bool,
    }

    impl AvatarBridge for ScriptedBridge {
        fn open_session(&self, session_id: u64, session_token: String) -> Result<(), PersonaError> {
            self.calls.lock().unwrap().push(format!("open:{session_token}"));
            if session_token == "bad" {
                return Err(PersonaError::Auth { msg: "token rejected".into() });
            }
            if self.establish_on_open {
                if let Some(slot) = self.events.lock().unwrap().as_ref() {
                    slot.send(session_id, ClientEvent::Established);
                }
            }
            Ok(())
        }

        fn start_streaming(&self, audio_track_id: String) -> Result<Vec<String>, PersonaError> {
            self.calls.lock().unwrap().push(format!("stream:{audio_track_id}"));
            Ok(vec!["rtc-stream-1".into()])
        }

        fn set_input_muted(&self, muted: bool) -> Result<(), PersonaError> {
            self.calls.lock().unwrap().push(format!("mute:{muted}"));
            Ok(())
        }

        fn stop_streaming(&self) -> Result<(), PersonaError> {
            self.calls.lock().unwrap().push("stop".into());
            Ok(())
        }

        fn talk(&self, text: String) -> Result<(), PersonaError> {
            self.calls.lock().unwrap().push(format!("talk:{text}"));
            Ok(())
        }

        fn switch_camera(&self, facing: CameraFacing) -> Result<(), PersonaError> {
            self.calls.lock().unwrap().push(format!("camera:{facing:?}"));
            Ok(())
        }

        fn set_output_volume(&self, _stream_id: String, _volume: f64) -> Result<(), PersonaError> {
            Err(PersonaError::Unsupported { msg: "volume".into() })
        }
    }

    #[tokio::test]
    async fn events_sent_during_open_are_delivered() {
        let slot = EventSlot::default();
        let bridge = Arc::new(ScriptedBridge {
            establish_on_open: true,
            ..ScriptedBridge::default()
        });
        *bridge.events.lock().unwrap() = Some(slot.clone());
        let factory = BridgeClientFactory::new(bridge.clone(), slot);

        let (_client, mut rx) = factory.create(&SessionToken::new("t1")).await.unwrap();
        assert_eq!(rx.recv().await, Some(ClientEvent::Established));
    }

    #[tokio::test]
    async fn rejected_open_maps_to_core_error() {
        let slot = EventSlot::default();
        let factory = BridgeClientFactory::new(Arc::new(ScriptedBridge::default()), slot);

        let err = factory.create(&SessionToken::new("bad")).await.err().unwrap();
        assert_eq!(err, CoreError::Auth("token rejected".into()));
    }

    #[tokio::test]
    async fn stop_streaming_closes_event_slot() {
        let slot = EventSlot::default();
        let bridge = Arc::new(ScriptedBridge::default());
        let factory = BridgeClientFactory::new(bridge.clone(), slot.clone());
        let (client, mut rx) = factory.create(&SessionToken::new("t1")).await.unwrap();

        let streams = client
            .stream(&LocalAudioTrack { id: "mic".into() })
            .await
            .unwrap();
        assert_eq!(streams[0].id, "rtc-stream-1");

        client.stop_streaming().await.unwrap();
        slot.send(1, ClientEvent::Established);
        assert_eq!(rx.recv().await, None);
        assert_eq!(
            bridge.calls.lock().unwrap().as_slice(),
            ["open:t1", "stream:mic", "stop"]
        );
    }

    #[tokio::test]
    async fn stopping_an_old_session_keeps_the_new_one_open() {
        let slot = EventSlot::default();
        let factory = BridgeClientFactory::new(Arc::new(ScriptedBridge::default()), slot.clone());
        let (old, mut old_rx) = factory.create(&SessionToken::new("t1")).await.unwrap();
        let (_new, mut new_rx) = factory.create(&SessionToken::new("t2")).await.unwrap();

        // Late teardown of the first session must not cut off the second.
        old.stop_streaming().await.unwrap();
        slot.send(1, ClientEvent::Established);
        slot.send(2, ClientEvent::Established);

        assert_eq!(new_rx.recv().await, Some(ClientEvent::Established));
        assert_eq!(old_rx.recv().await, None);
    }

    #[test]
    fn events_for_other_sessions_are_dropped() {
        let slot = EventSlot::default();
        let (first, _first_rx) = slot.open();
        let (second, mut second_rx) = slot.open();
        assert_ne!(first, second);

        slot.send(first, ClientEvent::Established);
        assert!(second_rx.try_recv().is_err());

        slot.send(second, ClientEvent::PersonaMessage("hi".into()));
        assert_eq!(second_rx.try_recv().unwrap(), ClientEvent::PersonaMessage("hi".into()));
    }
}
