use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::device::LocalAudioTrack;
use crate::errors::PersonaError;
use crate::persona::SessionToken;

/// Notifications from an open client handle. They arrive on the client's
/// own schedule, possibly long after `connect` has returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Established,
    Closed { reason: Option<String> },
    /// Text the persona spoke, when the vendor exposes transcripts.
    PersonaMessage(String),
}

/// One inbound media stream produced by `AvatarClient::stream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
    pub has_video: bool,
    pub has_audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    Front,
    Back,
}

impl CameraFacing {
    pub fn flipped(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

/// An open real-time connection to the avatar service.
///
/// The core never looks inside; transport, codecs and persona behaviour all
/// live behind this trait.
#[async_trait]
pub trait AvatarClient: Send + Sync {
    /// Start streaming the local audio and return the remote streams.
    async fn stream(&self, input: &LocalAudioTrack) -> Result<Vec<RemoteStream>, PersonaError>;

    async fn set_input_muted(&self, muted: bool) -> Result<(), PersonaError>;

    async fn stop_streaming(&self) -> Result<(), PersonaError>;

    /// Inject a user utterance into the conversation.
    async fn talk(&self, _text: &str) -> Result<(), PersonaError> {
        Err(PersonaError::Unsupported("talk".into()))
    }

    async fn switch_camera(&self, _facing: CameraFacing) -> Result<(), PersonaError> {
        Err(PersonaError::Unsupported("switch_camera".into()))
    }

    async fn set_output_volume(&self, _stream_id: &str, _volume: f64) -> Result<(), PersonaError> {
        Err(PersonaError::Unsupported("set_output_volume".into()))
    }
}

/// Builds a client handle from a session token.
///
/// The returned receiver carries the handle's `ClientEvent`s; the channel
/// closing is treated like `Closed`.
#[async_trait]
pub trait AvatarClientFactory: Send + Sync {
    async fn create(
        &self,
        token: &SessionToken,
    ) -> Result<(Arc<dyn AvatarClient>, mpsc::UnboundedReceiver<ClientEvent>), PersonaError>;
}
