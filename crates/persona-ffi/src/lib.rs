//! UniFFI bindings for persona-core.
//!
//! Provides a PersonaClient object that wraps SessionController and
//! SettingsStore into a single FFI-safe interface. The host shell plugs in
//! the vendor avatar SDK (`AvatarBridge`) and the OS permission prompts
//! (`DevicePermissions`).

use std::sync::Arc;

use persona_core::{
    self,
    events::{
        ChatMessage as CoreChatMessage, ConnectionState as CoreConnectionState,
        RemoteMedia as CoreRemoteMedia, Sender as CoreSender, SessionEvent as CoreSessionEvent,
    },
};

mod bridge;

use bridge::{BridgeClientFactory, BridgeDevices, EventSlot};

uniffi::include_scaffolding!("persona");

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using PersonaClient.
/// On Android, stderr goes to logcat for debuggable builds.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("persona_core=debug,persona_ffi=debug")),
            )
            .with_ansi(false)
            .init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    RequestingPermissions,
    Connecting,
    Connected,
    Error,
    Disconnected,
}

impl From<CoreConnectionState> for ConnectionState {
    fn from(s: CoreConnectionState) -> Self {
        match s {
            CoreConnectionState::Idle => Self::Idle,
            CoreConnectionState::RequestingPermissions => Self::RequestingPermissions,
            CoreConnectionState::Connecting => Self::Connecting,
            CoreConnectionState::Connected => Self::Connected,
            CoreConnectionState::Error => Self::Error,
            CoreConnectionState::Disconnected => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    Back,
}

impl From<persona_core::CameraFacing> for CameraFacing {
    fn from(f: persona_core::CameraFacing) -> Self {
        match f {
            persona_core::CameraFacing::Front => Self::Front,
            persona_core::CameraFacing::Back => Self::Back,
        }
    }
}

impl From<CameraFacing> for persona_core::CameraFacing {
    fn from(f: CameraFacing) -> Self {
        match f {
            CameraFacing::Front => Self::Front,
            CameraFacing::Back => Self::Back,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSender {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub has_video: bool,
    pub has_audio: bool,
}

impl From<CoreRemoteMedia> for RemoteMedia {
    fn from(m: CoreRemoteMedia) -> Self {
        Self {
            stream_id: m.stream_id,
            has_video: m.has_video,
            has_audio: m.has_audio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: MessageSender,
    pub timestamp_ms: u64,
}

impl From<CoreChatMessage> for ChatMessage {
    fn from(m: CoreChatMessage) -> Self {
        Self {
            id: m.id,
            text: m.text,
            sender: match m.sender {
                CoreSender::User => MessageSender::User,
                CoreSender::Ai => MessageSender::Ai,
            },
            timestamp_ms: m.timestamp_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InlinePersona {
    pub name: String,
    pub avatar_id: String,
    pub voice_id: String,
    pub brain_type: Option<String>,
    pub system_prompt: String,
}

#[derive(Debug, Clone)]
pub enum PersonaConfig {
    ById { persona_id: String },
    Inline { persona: InlinePersona },
}

impl From<PersonaConfig> for persona_core::PersonaConfig {
    fn from(p: PersonaConfig) -> Self {
        match p {
            PersonaConfig::ById { persona_id } => Self::ById { persona_id },
            PersonaConfig::Inline { persona } => Self::Inline(persona_core::InlinePersona {
                name: persona.name,
                avatar_id: persona.avatar_id,
                voice_id: persona.voice_id,
                brain_type: persona.brain_type,
                system_prompt: persona.system_prompt,
            }),
        }
    }
}

pub enum Credential {
    ApiKey { key: String },
    SessionToken { token: String },
}

impl From<Credential> for persona_core::Credential {
    fn from(c: Credential) -> Self {
        match c {
            Credential::ApiKey { key } => Self::ApiKey(key),
            Credential::SessionToken { token } => {
                Self::SessionToken(persona_core::SessionToken::new(token))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub auth_base_url: String,
    pub token_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub start_muted: bool,
    pub prefer_front_camera: bool,
    pub output_volume: f64,
}

impl From<persona_core::Settings> for Settings {
    fn from(s: persona_core::Settings) -> Self {
        Self {
            auth_base_url: s.auth_base_url,
            token_timeout_secs: s.token_timeout_secs,
            connect_timeout_secs: s.connect_timeout_secs,
            start_muted: s.start_muted,
            prefer_front_camera: s.prefer_front_camera,
            output_volume: s.output_volume,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PersonaEvent {
    ConnectionStateChanged { state: ConnectionState },
    Connected,
    Disconnected,
    RemoteMediaChanged { media: Option<RemoteMedia> },
    MuteChanged { muted: bool },
    CameraSwitched { facing: CameraFacing },
    ChatMessageAppended { message: ChatMessage },
    Failed { message: String },
}

impl From<CoreSessionEvent> for PersonaEvent {
    fn from(e: CoreSessionEvent) -> Self {
        match e {
            CoreSessionEvent::ConnectionStateChanged(s) => {
                Self::ConnectionStateChanged { state: s.into() }
            }
            CoreSessionEvent::Connected => Self::Connected,
            CoreSessionEvent::Disconnected => Self::Disconnected,
            CoreSessionEvent::RemoteMediaChanged(m) => {
                Self::RemoteMediaChanged { media: m.map(RemoteMedia::from) }
            }
            CoreSessionEvent::MuteChanged(muted) => Self::MuteChanged { muted },
            CoreSessionEvent::CameraSwitched(f) => Self::CameraSwitched { facing: f.into() },
            CoreSessionEvent::ChatMessageAppended(m) => {
                Self::ChatMessageAppended { message: m.into() }
            }
            CoreSessionEvent::Error(message) => Self::Failed { message },
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    #[error("Permission denied: {msg}")]
    PermissionDenied { msg: String },
    #[error("Device error: {msg}")]
    Device { msg: String },
    #[error("HTTP error: {msg}")]
    Http { msg: String },
    #[error("Auth error: {msg}")]
    Auth { msg: String },
    #[error("Session error: {msg}")]
    Session { msg: String },
    #[error("Timeout: {msg}")]
    Timeout { msg: String },
    #[error("Already active: {msg}")]
    AlreadyActive { msg: String },
    #[error("Not connected: {msg}")]
    NotConnected { msg: String },
    #[error("Invalid message: {msg}")]
    InvalidMessage { msg: String },
    #[error("Invocation failed: {msg}")]
    Invocation { msg: String },
    #[error("Cancelled: {msg}")]
    Cancelled { msg: String },
    #[error("Unsupported: {msg}")]
    Unsupported { msg: String },
    #[error("Invalid configuration: {msg}")]
    Config { msg: String },
    #[error("Bridge error: {msg}")]
    Bridge { msg: String },
}

impl From<persona_core::PersonaError> for PersonaError {
    fn from(e: persona_core::PersonaError) -> Self {
        use persona_core::PersonaError as Core;
        tracing::error!("PersonaError: {e}");
        let msg = e.to_string();
        match e {
            Core::PermissionDenied => Self::PermissionDenied { msg },
            Core::Device(_) => Self::Device { msg },
            Core::Http(_) => Self::Http { msg },
            Core::Auth(_) => Self::Auth { msg },
            Core::Session(_) => Self::Session { msg },
            Core::Timeout(_) => Self::Timeout { msg },
            Core::AlreadyActive => Self::AlreadyActive { msg },
            Core::NotConnected => Self::NotConnected { msg },
            Core::InvalidMessage(_) => Self::InvalidMessage { msg },
            Core::Invocation(_) => Self::Invocation { msg },
            Core::Cancelled => Self::Cancelled { msg },
            Core::Unsupported(_) => Self::Unsupported { msg },
            Core::Config(_) => Self::Config { msg },
        }
    }
}

/// Errors thrown by host callbacks, seen from the core.
impl From<PersonaError> for persona_core::PersonaError {
    fn from(e: PersonaError) -> Self {
        use persona_core::PersonaError as Core;
        match e {
            PersonaError::PermissionDenied { .. } => Core::PermissionDenied,
            PersonaError::Device { msg } => Core::Device(msg),
            PersonaError::Http { msg } => Core::Http(msg),
            PersonaError::Auth { msg } => Core::Auth(msg),
            PersonaError::Timeout { msg } => Core::Timeout(msg),
            PersonaError::Unsupported { msg } => Core::Unsupported(msg),
            PersonaError::InvalidMessage { msg } => Core::InvalidMessage(msg),
            PersonaError::Session { msg }
            | PersonaError::AlreadyActive { msg }
            | PersonaError::NotConnected { msg }
            | PersonaError::Invocation { msg }
            | PersonaError::Cancelled { msg }
            | PersonaError::Config { msg }
            | PersonaError::Bridge { msg } => Core::Session(msg),
        }
    }
}

impl From<uniffi::UnexpectedUniFFICallbackError> for PersonaError {
    fn from(e: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::Bridge { msg: e.reason }
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait PersonaEventListener: Send + Sync {
    fn on_event(&self, event: PersonaEvent);
}

/// OS permission prompt and microphone capture, implemented by the host.
pub trait DevicePermissions: Send + Sync {
    fn request_capture_permissions(&self) -> bool;
    fn open_microphone(&self) -> Result<String, PersonaError>;
    fn release_microphone(&self, track_id: String);
}

/// The vendor avatar SDK, implemented by the host.
///
/// `open_session` hands the host a session id. Connection notifications
/// flow back through `PersonaClient::notify_session_established` /
/// `notify_session_closed` tagged with that id; notifications for any
/// session other than the latest one are ignored.
pub trait AvatarBridge: Send + Sync {
    fn open_session(&self, session_id: u64, session_token: String) -> Result<(), PersonaError>;
    fn start_streaming(&self, audio_track_id: String) -> Result<Vec<String>, PersonaError>;
    fn set_input_muted(&self, muted: bool) -> Result<(), PersonaError>;
    fn stop_streaming(&self) -> Result<(), PersonaError>;
    fn talk(&self, text: String) -> Result<(), PersonaError>;
    fn switch_camera(&self, facing: CameraFacing) -> Result<(), PersonaError>;
    fn set_output_volume(&self, stream_id: String, volume: f64) -> Result<(), PersonaError>;
}

// ── Bridge listener: FFI callback → core listener ─────────────────────

struct BridgeListener {
    ffi_listener: Arc<dyn PersonaEventListener>,
}

impl persona_core::SessionEventListener for BridgeListener {
    fn on_event(&self, event: CoreSessionEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

// ── PersonaClient: main FFI object ────────────────────────────────────

pub struct PersonaClient {
    controller: persona_core::SessionController,
    settings: persona_core::SettingsStore,
    client_events: EventSlot,
    rt: tokio::runtime::Runtime,
}

impl PersonaClient {
    pub fn new(
        data_dir: String,
        bridge: Box<dyn AvatarBridge>,
        devices: Box<dyn DevicePermissions>,
    ) -> Self {
        tracing::info!("PersonaClient::new() called");
        let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
        let settings = persona_core::SettingsStore::new(&data_dir);
        let client_events = EventSlot::default();

        let factory = BridgeClientFactory::new(Arc::from(bridge), client_events.clone());
        let devices = BridgeDevices::new(Arc::from(devices));
        let controller = persona_core::SessionController::new(
            Arc::new(devices),
            Arc::new(factory),
            settings.get(),
        );

        Self {
            controller,
            settings,
            client_events,
            rt,
        }
    }

    pub fn connect(&self, persona: PersonaConfig, credential: Credential) -> Result<(), PersonaError> {
        tracing::info!("connect() entered");

        // Wrap in catch_unwind to prevent panics from crossing FFI boundary.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.rt.block_on(async {
                self.controller
                    .connect(persona.into(), credential.into())
                    .await
                    .map_err(PersonaError::from)
            })
        }));

        match result {
            Ok(res) => res,
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                tracing::error!("connect() panic caught: {msg}");
                Err(PersonaError::Session { msg: format!("panic in connect: {msg}") })
            }
        }
    }

    pub fn disconnect(&self) {
        self.rt.block_on(self.controller.disconnect());
    }

    pub fn toggle_call(&self, persona: PersonaConfig, credential: Credential) -> Result<(), PersonaError> {
        self.rt
            .block_on(self.controller.toggle_call(persona.into(), credential.into()))
            .map_err(PersonaError::from)
    }

    pub fn toggle_mute(&self) -> Result<(), PersonaError> {
        self.rt
            .block_on(self.controller.toggle_mute())
            .map_err(PersonaError::from)
    }

    pub fn switch_camera(&self) -> Result<(), PersonaError> {
        self.rt
            .block_on(self.controller.switch_camera())
            .map_err(PersonaError::from)
    }

    pub fn send_message(&self, text: String) -> Result<ChatMessage, PersonaError> {
        self.rt.block_on(async {
            self.controller
                .send_message(&text)
                .await
                .map(ChatMessage::from)
                .map_err(PersonaError::from)
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.rt.block_on(self.controller.connection_state()).into()
    }

    pub fn remote_media(&self) -> Option<RemoteMedia> {
        self.rt
            .block_on(self.controller.remote_media())
            .map(RemoteMedia::from)
    }

    pub fn is_muted(&self) -> bool {
        self.rt.block_on(self.controller.is_muted())
    }

    pub fn camera_facing(&self) -> CameraFacing {
        self.rt.block_on(self.controller.camera_facing()).into()
    }

    pub fn last_error(&self) -> Option<String> {
        self.rt.block_on(self.controller.last_error())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.rt
            .block_on(self.controller.messages())
            .into_iter()
            .map(ChatMessage::from)
            .collect()
    }

    pub fn add_listener(&self, listener: Box<dyn PersonaEventListener>) {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: Arc::from(listener),
        });
        self.controller.add_listener(bridge);
    }

    pub fn notify_session_established(&self, session_id: u64) {
        self.client_events
            .send(session_id, persona_core::ClientEvent::Established);
    }

    pub fn notify_session_closed(&self, session_id: u64, reason: Option<String>) {
        self.client_events
            .send(session_id, persona_core::ClientEvent::Closed { reason });
    }

    pub fn notify_persona_message(&self, session_id: u64, text: String) {
        self.client_events
            .send(session_id, persona_core::ClientEvent::PersonaMessage(text));
    }

    pub fn get_settings(&self) -> Settings {
        self.settings.get().into()
    }

    pub fn set_auth_base_url(&self, url: String) {
        self.settings.set_auth_base_url(url);
        self.sync_settings();
    }

    pub fn set_token_timeout_secs(&self, secs: u64) {
        self.settings.set_token_timeout_secs(secs);
        self.sync_settings();
    }

    pub fn set_connect_timeout_secs(&self, secs: u64) {
        self.settings.set_connect_timeout_secs(secs);
        self.sync_settings();
    }

    pub fn set_start_muted(&self, muted: bool) {
        self.settings.set_start_muted(muted);
        self.sync_settings();
    }

    pub fn set_prefer_front_camera(&self, front: bool) {
        self.settings.set_prefer_front_camera(front);
        self.sync_settings();
    }

    pub fn set_output_volume(&self, volume: f64) {
        self.settings.set_output_volume(volume);
        self.sync_settings();
    }

    fn sync_settings(&self) {
        self.controller.update_settings(self.settings.get());
    }
}

impl Drop for PersonaClient {
    fn drop(&mut self) {
        tracing::info!("PersonaClient dropped, tearing down session");
        self.rt.block_on(self.controller.disconnect());
    }
}
