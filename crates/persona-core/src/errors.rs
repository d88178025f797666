use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersonaError {
    #[error("camera and microphone permissions are required")]
    PermissionDenied,
    #[error("device error: {0}")]
    Device(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("a session is already active")]
    AlreadyActive,
    #[error("not connected")]
    NotConnected,
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("invocation failed: {0}")]
    Invocation(String),
    #[error("connect attempt cancelled")]
    Cancelled,
    #[error("not supported by client: {0}")]
    Unsupported(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
