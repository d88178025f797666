use async_trait::async_trait;

use crate::errors::PersonaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// A captured local microphone stream, handed to the avatar client as its
/// input. The id is opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAudioTrack {
    pub id: String,
}

/// Platform access to capture devices.
///
/// Implemented by the native shell: Android requests CAMERA and
/// RECORD_AUDIO at runtime, iOS relies on the Info.plist prompts.
#[async_trait]
pub trait DeviceAccess: Send + Sync {
    /// Ask for camera and microphone access. Both must be granted.
    async fn request_permissions(&self) -> Result<PermissionStatus, PersonaError>;

    /// Open an audio-only capture stream.
    async fn open_microphone(&self) -> Result<LocalAudioTrack, PersonaError>;

    /// Stop the capture stream and free the device.
    async fn release_microphone(&self, track: LocalAudioTrack);
}
