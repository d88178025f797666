use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::auth::TokenService;
use crate::chat::Transcript;
use crate::client::{AvatarClient, AvatarClientFactory, CameraFacing, ClientEvent};
use crate::controls::MediaControls;
use crate::device::{DeviceAccess, LocalAudioTrack, PermissionStatus};
use crate::errors::PersonaError;
use crate::events::{
    ChatMessage, ConnectionState, EventEmitter, RemoteMedia, Sender, SessionEvent,
    SessionEventListener,
};
use crate::persona::{Credential, PersonaConfig, SessionToken};
use crate::settings::Settings;

/// Everything one controller owns about its current session.
///
/// `remote_media` is `Some` exactly while `state` is `Connected`; streams
/// obtained before "established" wait in `staged_media`.
struct SessionState {
    state: ConnectionState,
    /// Bumped by every `connect` and `disconnect`. Work started under an
    /// older value is discarded.
    generation: u64,
    client: Option<Arc<dyn AvatarClient>>,
    microphone: Option<LocalAudioTrack>,
    established: bool,
    staged_media: Option<RemoteMedia>,
    remote_media: Option<RemoteMedia>,
    controls: MediaControls,
    last_error: Option<String>,
    event_task: Option<JoinHandle<()>>,
    timeout_task: Option<JoinHandle<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            generation: 0,
            client: None,
            microphone: None,
            established: false,
            staged_media: None,
            remote_media: None,
            controls: MediaControls::default(),
            last_error: None,
            event_task: None,
            timeout_task: None,
        }
    }

    fn set_state(&mut self, state: ConnectionState, events: &mut Vec<SessionEvent>) {
        if self.state != state {
            tracing::info!("session state: {} -> {}", self.state.as_str(), state.as_str());
            self.state = state;
            events.push(SessionEvent::ConnectionStateChanged(state));
        }
    }

    /// The attempt started under `generation` may keep going.
    fn ensure_current(&self, generation: u64, expected: ConnectionState) -> Result<(), PersonaError> {
        if self.generation == generation && self.state == expected {
            Ok(())
        } else {
            Err(PersonaError::Cancelled)
        }
    }

    fn promote_to_connected(&mut self, events: &mut Vec<SessionEvent>) {
        let Some(media) = self.staged_media.take() else {
            return;
        };
        if let Some(handle) = self.timeout_task.take() {
            handle.abort();
        }
        self.remote_media = Some(media.clone());
        self.set_state(ConnectionState::Connected, events);
        events.push(SessionEvent::RemoteMediaChanged(Some(media)));
        events.push(SessionEvent::Connected);
    }

    /// Detach every per-connection resource. The caller sets the next state
    /// under the same lock and performs the release after unlocking.
    fn teardown(&mut self, events: &mut Vec<SessionEvent>) -> Released {
        self.established = false;
        self.staged_media = None;
        if self.remote_media.take().is_some() {
            events.push(SessionEvent::RemoteMediaChanged(None));
        }
        Released {
            client: self.client.take(),
            microphone: self.microphone.take(),
            event_task: self.event_task.take(),
            timeout_task: self.timeout_task.take(),
        }
    }
}

/// Resources taken out of `SessionState`, released without holding the lock.
struct Released {
    client: Option<Arc<dyn AvatarClient>>,
    microphone: Option<LocalAudioTrack>,
    event_task: Option<JoinHandle<()>>,
    timeout_task: Option<JoinHandle<()>>,
}

impl Released {
    async fn release(self, devices: &dyn DeviceAccess, stop_client: bool) {
        if let Some(handle) = self.event_task {
            handle.abort();
        }
        if let Some(handle) = self.timeout_task {
            handle.abort();
        }
        if let Some(client) = self.client {
            if stop_client {
                if let Err(e) = client.stop_streaming().await {
                    tracing::warn!("error stopping avatar stream: {e}");
                }
            }
            tracing::debug!("client handle released");
        }
        if let Some(track) = self.microphone {
            tracing::debug!("releasing microphone {}", track.id);
            devices.release_microphone(track).await;
        }
    }
}

struct Inner {
    state: Mutex<SessionState>,
    emitter: EventEmitter,
    transcript: Transcript,
    devices: Arc<dyn DeviceAccess>,
    clients: Arc<dyn AvatarClientFactory>,
    settings: RwLock<Settings>,
}

/// Drives one real-time avatar session from user intent to teardown.
///
/// ```text
/// idle -> requesting-permissions -> connecting -> connected
/// connecting -> error | disconnected
/// connected -> disconnected
/// any -> idle (disconnect)
/// ```
/// `error` and `disconnected` accept a fresh `connect`.
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        devices: Arc<dyn DeviceAccess>,
        clients: Arc<dyn AvatarClientFactory>,
        settings: Settings,
    ) -> Self {
        let emitter = EventEmitter::new();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::new()),
                transcript: Transcript::new(emitter.clone()),
                emitter,
                devices,
                clients,
                settings: RwLock::new(settings),
            }),
        }
    }

    /// Register a listener for session events.
    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.inner.emitter.add_listener(listener);
    }

    /// Replace the settings used by the next connect attempt.
    pub fn update_settings(&self, settings: Settings) {
        *self.inner.settings.write().unwrap() = settings;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().await.state
    }

    pub async fn remote_media(&self) -> Option<RemoteMedia> {
        self.inner.state.lock().await.remote_media.clone()
    }

    pub async fn is_muted(&self) -> bool {
        self.inner.state.lock().await.controls.is_muted()
    }

    pub async fn camera_facing(&self) -> CameraFacing {
        self.inner.state.lock().await.controls.facing()
    }

    /// Message of the last failed connect attempt, cleared by the next one.
    pub async fn last_error(&self) -> Option<String> {
        self.inner.state.lock().await.last_error.clone()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.transcript.messages().await
    }

    /// Open a session for `persona`.
    ///
    /// Returns once streaming has started; "established" and "closed" are
    /// applied later by the session event loop. Rejected with
    /// `AlreadyActive` while another attempt or session is live.
    pub async fn connect(
        &self,
        persona: PersonaConfig,
        credential: Credential,
    ) -> Result<(), PersonaError> {
        let settings = self.inner.settings.read().unwrap().clone();
        let mut events = Vec::new();
        let generation = {
            let mut st = self.inner.state.lock().await;
            if st.state.is_active() {
                tracing::warn!("connect ignored: session is {}", st.state.as_str());
                return Err(PersonaError::AlreadyActive);
            }
            st.generation += 1;
            st.controls = MediaControls::from_settings(&settings);
            st.set_state(ConnectionState::RequestingPermissions, &mut events);
            st.generation
        };
        self.inner.emit_all(events);

        tracing::info!("connecting to persona '{}'", persona.label());
        match self
            .inner
            .run_connect(generation, &settings, &persona, credential)
            .await
        {
            Ok(()) => Ok(()),
            Err(PersonaError::Cancelled) => Err(self.inner.cancellation_cause(generation).await),
            Err(e) => {
                if self.inner.fail(generation, &e).await {
                    Err(e)
                } else {
                    Err(self.inner.cancellation_cause(generation).await)
                }
            }
        }
    }

    /// Tear down whatever is active. Safe from any state.
    ///
    /// Ends in `disconnected` when a session was connected, `idle` otherwise.
    pub async fn disconnect(&self) {
        let mut events = Vec::new();
        let (released, was_connected) = {
            let mut st = self.inner.state.lock().await;
            st.generation += 1;
            let previous = st.state;
            let released = st.teardown(&mut events);
            st.last_error = None;
            let next = match previous {
                ConnectionState::Connected | ConnectionState::Disconnected => {
                    ConnectionState::Disconnected
                }
                _ => ConnectionState::Idle,
            };
            st.set_state(next, &mut events);
            (released, previous == ConnectionState::Connected)
        };
        if was_connected {
            events.push(SessionEvent::Disconnected);
        }
        released.release(self.inner.devices.as_ref(), true).await;
        self.inner.emit_all(events);
    }

    /// The call button: hang up a live or pending session, otherwise dial.
    pub async fn toggle_call(
        &self,
        persona: PersonaConfig,
        credential: Credential,
    ) -> Result<(), PersonaError> {
        if self.connection_state().await.is_active() {
            self.disconnect().await;
            Ok(())
        } else {
            self.connect(persona, credential).await
        }
    }

    /// Flip outbound audio mute. No-op without a client handle.
    pub async fn toggle_mute(&self) -> Result<(), PersonaError> {
        let (client, target) = {
            let st = self.inner.state.lock().await;
            let Some(client) = st.client.clone() else {
                tracing::debug!("toggle_mute: no client handle");
                return Ok(());
            };
            (client, st.controls.toggled_mute())
        };

        if let Err(e) = client.set_input_muted(target).await {
            return Err(self.inner.invocation_failed("mute", e));
        }

        self.inner.state.lock().await.controls.set_muted(target);
        tracing::info!("microphone muted: {target}");
        self.inner.emitter.emit(SessionEvent::MuteChanged(target));
        Ok(())
    }

    /// Swap between front and back camera. No-op without a client handle.
    pub async fn switch_camera(&self) -> Result<(), PersonaError> {
        let (client, target) = {
            let st = self.inner.state.lock().await;
            let Some(client) = st.client.clone() else {
                tracing::debug!("switch_camera: no client handle");
                return Ok(());
            };
            (client, st.controls.facing().flipped())
        };

        if let Err(e) = client.switch_camera(target).await {
            return Err(self.inner.invocation_failed("switch camera", e));
        }

        self.inner.state.lock().await.controls.set_facing(target);
        self.inner.emitter.emit(SessionEvent::CameraSwitched(target));
        Ok(())
    }

    /// Speak `text` into the live conversation and record it in the
    /// transcript. Blank text is rejected before the client is touched.
    pub async fn send_message(&self, text: &str) -> Result<ChatMessage, PersonaError> {
        let text = Transcript::validate(text)?;
        let client = {
            let st = self.inner.state.lock().await;
            match (&st.client, st.state) {
                (Some(client), ConnectionState::Connected) => client.clone(),
                _ => return Err(PersonaError::NotConnected),
            }
        };

        if let Err(e) = client.talk(text).await {
            return Err(self.inner.invocation_failed("send message", e));
        }
        Ok(self.inner.transcript.append(Sender::User, text).await)
    }
}

impl Drop for SessionController {
    /// Best-effort release for hosts that drop the controller without
    /// calling `disconnect` first.
    fn drop(&mut self) {
        let Ok(mut st) = self.inner.state.try_lock() else {
            // Busy: finish the teardown as soon as the lock frees up.
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    let inner = self.inner.clone();
                    rt.spawn(async move { inner.shutdown().await });
                }
                Err(_) => tracing::warn!("controller dropped while busy outside a runtime"),
            }
            return;
        };
        st.generation += 1;
        let mut events = Vec::new();
        let released = st.teardown(&mut events);
        st.state = ConnectionState::Idle;
        drop(st);

        let has_work = released.client.is_some() || released.microphone.is_some();
        if let Some(handle) = &released.event_task {
            handle.abort();
        }
        if let Some(handle) = &released.timeout_task {
            handle.abort();
        }
        if !has_work {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let devices = self.inner.devices.clone();
                rt.spawn(async move { released.release(devices.as_ref(), true).await });
            }
            Err(_) => tracing::warn!("controller dropped outside a runtime; media not released"),
        }
    }
}

impl Inner {
    fn emit_all(&self, events: Vec<SessionEvent>) {
        for event in events {
            self.emitter.emit(event);
        }
    }

    /// Deferred form of the teardown in `Drop`.
    async fn shutdown(&self) {
        let released = {
            let mut st = self.state.lock().await;
            st.generation += 1;
            let released = st.teardown(&mut Vec::new());
            st.state = ConnectionState::Idle;
            released
        };
        released.release(self.devices.as_ref(), true).await;
    }

    async fn run_connect(
        self: &Arc<Self>,
        generation: u64,
        settings: &Settings,
        persona: &PersonaConfig,
        credential: Credential,
    ) -> Result<(), PersonaError> {
        let status = self.devices.request_permissions().await.map_err(|e| match e {
            PersonaError::PermissionDenied | PersonaError::Device(_) => e,
            other => PersonaError::Device(format!("permission request failed: {other}")),
        })?;
        if status == PermissionStatus::Denied {
            return Err(PersonaError::PermissionDenied);
        }

        let mut events = Vec::new();
        {
            let mut st = self.state.lock().await;
            st.ensure_current(generation, ConnectionState::RequestingPermissions)?;
            st.last_error = None;
            st.set_state(ConnectionState::Connecting, &mut events);
            st.timeout_task = Some(self.spawn_connect_timeout(generation, settings));
        }
        self.emit_all(events);

        let token = match credential {
            Credential::SessionToken(token) => token,
            Credential::ApiKey(api_key) => {
                let service = TokenService::new(settings.token_endpoint()?, settings.token_timeout())?;
                service.request_session_token(&api_key, persona).await?
            }
        };
        self.state
            .lock()
            .await
            .ensure_current(generation, ConnectionState::Connecting)?;

        let client = self.open_client(generation, &token).await?;

        let microphone = self.devices.open_microphone().await?;
        {
            let mut st = self.state.lock().await;
            if let Err(e) = st.ensure_current(generation, ConnectionState::Connecting) {
                drop(st);
                self.devices.release_microphone(microphone).await;
                return Err(e);
            }
            st.microphone = Some(microphone.clone());
        }

        let streams = client
            .stream(&microphone)
            .await
            .map_err(|e| PersonaError::Session(format!("start streaming: {e}")))?;
        let Some(primary) = streams.into_iter().next() else {
            return Err(PersonaError::Session("client returned no remote stream".into()));
        };
        tracing::info!("remote stream {} ready", primary.id);

        if let Err(e) = client.set_output_volume(&primary.id, settings.output_volume).await {
            tracing::debug!("output volume not applied: {e}");
        }
        self.apply_initial_controls(generation, client.as_ref()).await;

        let mut events = Vec::new();
        {
            let mut st = self.state.lock().await;
            st.ensure_current(generation, ConnectionState::Connecting)?;
            // The first stream carries both the avatar's video and its voice.
            st.staged_media = Some(RemoteMedia {
                stream_id: primary.id,
                has_video: primary.has_video,
                has_audio: primary.has_audio,
            });
            if st.established {
                st.promote_to_connected(&mut events);
            }
        }
        self.emit_all(events);
        Ok(())
    }

    /// Build the client handle, store it, and start its event loop.
    async fn open_client(
        self: &Arc<Self>,
        generation: u64,
        token: &SessionToken,
    ) -> Result<Arc<dyn AvatarClient>, PersonaError> {
        let (client, client_events) = self.clients.create(token).await?;

        let mut st = self.state.lock().await;
        if let Err(e) = st.ensure_current(generation, ConnectionState::Connecting) {
            drop(st);
            if let Err(stop_err) = client.stop_streaming().await {
                tracing::warn!("error stopping orphaned client: {stop_err}");
            }
            return Err(e);
        }
        st.client = Some(client.clone());

        let inner = self.clone();
        st.event_task = Some(tokio::spawn(async move {
            inner.event_loop(generation, client_events).await;
        }));
        Ok(client)
    }

    async fn apply_initial_controls(&self, generation: u64, client: &dyn AvatarClient) {
        let controls = {
            let st = self.state.lock().await;
            if st.generation != generation {
                return;
            }
            st.controls.clone()
        };

        if controls.is_muted() {
            if let Err(e) = client.set_input_muted(true).await {
                tracing::warn!("could not start muted: {e}");
                self.state.lock().await.controls.set_muted(false);
            }
        }
        if controls.facing() == CameraFacing::Back {
            if let Err(e) = client.switch_camera(CameraFacing::Back).await {
                tracing::debug!("back camera not selected: {e}");
                self.state.lock().await.controls.set_facing(CameraFacing::Front);
            }
        }
    }

    fn spawn_connect_timeout(self: &Arc<Self>, generation: u64, settings: &Settings) -> JoinHandle<()> {
        let inner = self.clone();
        let timeout = settings.connect_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            inner.on_connect_timeout(generation, timeout.as_secs()).await;
        })
    }

    async fn on_connect_timeout(&self, generation: u64, secs: u64) {
        let err = PersonaError::Timeout(format!("session not established after {secs}s"));
        let mut events = Vec::new();
        let released = {
            let mut st = self.state.lock().await;
            if st.ensure_current(generation, ConnectionState::Connecting).is_err() {
                return;
            }
            // This task is the timeout; let it finish on its own.
            st.timeout_task = None;
            let released = st.teardown(&mut events);
            st.last_error = Some(err.to_string());
            st.set_state(ConnectionState::Error, &mut events);
            released
        };
        tracing::error!("{err}");
        events.push(SessionEvent::Error(err.to_string()));
        released.release(self.devices.as_ref(), true).await;
        self.emit_all(events);
    }

    async fn event_loop(
        self: Arc<Self>,
        generation: u64,
        mut client_events: mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        while let Some(event) = client_events.recv().await {
            match event {
                ClientEvent::Established => self.on_established(generation).await,
                ClientEvent::Closed { reason } => {
                    self.on_closed(generation, reason).await;
                    return;
                }
                ClientEvent::PersonaMessage(text) => {
                    if self.state.lock().await.generation == generation {
                        self.transcript.append(Sender::Ai, &text).await;
                    }
                }
            }
        }
        self.on_closed(generation, Some("client event channel closed".into()))
            .await;
    }

    async fn on_established(&self, generation: u64) {
        let mut events = Vec::new();
        {
            let mut st = self.state.lock().await;
            if st.ensure_current(generation, ConnectionState::Connecting).is_err() {
                tracing::debug!("ignoring stale established notification");
                return;
            }
            tracing::info!("avatar session established");
            st.established = true;
            st.promote_to_connected(&mut events);
        }
        self.emit_all(events);
    }

    async fn on_closed(&self, generation: u64, reason: Option<String>) {
        let mut events = Vec::new();
        let released = {
            let mut st = self.state.lock().await;
            let live = matches!(
                st.state,
                ConnectionState::Connecting | ConnectionState::Connected
            );
            if st.generation != generation || !live {
                tracing::debug!("ignoring stale closed notification");
                return;
            }
            tracing::info!("avatar session closed: {reason:?}");
            // Running inside the event task itself.
            st.event_task = None;
            let released = st.teardown(&mut events);
            st.set_state(ConnectionState::Disconnected, &mut events);
            released
        };
        events.push(SessionEvent::Disconnected);
        released.release(self.devices.as_ref(), false).await;
        self.emit_all(events);
    }

    /// Record a connect-time failure and release what the attempt acquired.
    ///
    /// Returns false when the attempt was already resolved (timed out,
    /// closed or disconnected); that outcome has been reported already.
    async fn fail(&self, generation: u64, err: &PersonaError) -> bool {
        let mut events = Vec::new();
        let released = {
            let mut st = self.state.lock().await;
            if st.generation != generation || !st.state.is_active() {
                return false;
            }
            let released = st.teardown(&mut events);
            st.last_error = Some(err.to_string());
            st.set_state(ConnectionState::Error, &mut events);
            released
        };
        tracing::error!("connect failed: {err}");
        events.push(SessionEvent::Error(err.to_string()));
        released.release(self.devices.as_ref(), true).await;
        self.emit_all(events);
        true
    }

    /// Why an attempt stopped early: the connect timeout fired, or the
    /// session was disconnected or closed underneath it.
    async fn cancellation_cause(&self, generation: u64) -> PersonaError {
        let st = self.state.lock().await;
        if st.generation == generation && st.state == ConnectionState::Error {
            PersonaError::Timeout(st.last_error.clone().unwrap_or_default())
        } else {
            PersonaError::Cancelled
        }
    }

    /// Post-connect action failures are surfaced without moving the state.
    fn invocation_failed(&self, action: &str, err: PersonaError) -> PersonaError {
        let err = match err {
            PersonaError::Unsupported(_) => err,
            other => PersonaError::Invocation(format!("{action}: {other}")),
        };
        tracing::warn!("{err}");
        self.emitter.emit(SessionEvent::Error(err.to_string()));
        err
    }
}
