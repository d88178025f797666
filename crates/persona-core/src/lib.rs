//! Persona Mobile core business logic.
//!
//! Pure Rust crate with no platform dependencies.
//! Drives one conversational-avatar session per controller: device
//! permissions, session-token exchange, the vendor client lifecycle and
//! the chat transcript. Consumed by native UI shells via UniFFI bindings.

pub mod auth;
pub mod chat;
pub mod client;
pub mod controls;
pub mod device;
pub mod errors;
pub mod events;
pub mod persona;
pub mod session;
pub mod settings;

pub use auth::TokenService;
pub use chat::Transcript;
pub use client::{AvatarClient, AvatarClientFactory, CameraFacing, ClientEvent, RemoteStream};
pub use controls::MediaControls;
pub use device::{DeviceAccess, LocalAudioTrack, PermissionStatus};
pub use errors::PersonaError;
pub use events::{
    ChatMessage, ConnectionState, EventEmitter, RemoteMedia, Sender, SessionEvent,
    SessionEventListener,
};
pub use persona::{Credential, InlinePersona, PersonaConfig, SessionToken};
pub use session::SessionController;
pub use settings::{Settings, SettingsStore};
