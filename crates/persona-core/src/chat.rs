use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::PersonaError;
use crate::events::{ChatMessage, EventEmitter, Sender, SessionEvent};

/// Append-only chat log shared between the session event loop and callers.
///
/// Entries are never edited or removed; the log lives as long as the
/// controller and is not persisted.
#[derive(Clone)]
pub struct Transcript {
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    emitter: EventEmitter,
}

impl Transcript {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            emitter,
        }
    }

    /// Trim and reject blank input before anything is sent anywhere.
    pub fn validate(text: &str) -> Result<&str, PersonaError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PersonaError::InvalidMessage("message is empty".into()));
        }
        Ok(trimmed)
    }

    pub async fn append(&self, sender: Sender, text: &str) -> ChatMessage {
        let msg = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender,
            timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
        };
        self.messages.lock().await.push(msg.clone());
        self.emitter.emit(SessionEvent::ChatMessageAppended(msg.clone()));
        msg
    }

    /// Get all messages in arrival order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }
}
