use std::sync::Arc;

/// Events emitted by the core to native UI listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStateChanged(ConnectionState),
    /// "established" observed; fired once per connection.
    Connected,
    /// Session ended after having been established or attempted.
    Disconnected,
    /// Remote media became available (`Some`) or was released (`None`).
    RemoteMediaChanged(Option<RemoteMedia>),
    MuteChanged(bool),
    CameraSwitched(crate::client::CameraFacing),
    ChatMessageAppended(ChatMessage),
    /// Human-readable failure, surfaced once per occurrence.
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    RequestingPermissions,
    Connecting,
    Connected,
    Error,
    Disconnected,
}

impl ConnectionState {
    /// States in which a new `connect` must be rejected.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::RequestingPermissions | Self::Connecting | Self::Connected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::RequestingPermissions => "requesting-permissions",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Inbound audio/video of an established session.
///
/// The first remote stream returned by the client carries both video and
/// audio; `stream_id` is whatever the host needs to attach a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub has_video: bool,
    pub has_audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp_ms: u64,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait SessionEventListener: Send + Sync {
    fn on_event(&self, event: SessionEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn SessionEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: SessionEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
