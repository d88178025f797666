use std::fmt;

use serde::{Deserialize, Serialize};

/// Who the avatar is: a persona registered ahead of time, or one described
/// inline for this session.
///
/// Serialized untagged so the token endpoint receives either
/// `{"personaId": ...}` or the inline descriptor fields directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonaConfig {
    ById {
        #[serde(rename = "personaId")]
        persona_id: String,
    },
    Inline(InlinePersona),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlinePersona {
    pub name: String,
    pub avatar_id: String,
    pub voice_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brain_type: Option<String>,
    pub system_prompt: String,
}

impl PersonaConfig {
    pub fn by_id(persona_id: impl Into<String>) -> Self {
        Self::ById {
            persona_id: persona_id.into(),
        }
    }

    /// Short label for logs; never includes the system prompt.
    pub fn label(&self) -> &str {
        match self {
            Self::ById { persona_id } => persona_id,
            Self::Inline(p) => &p.name,
        }
    }
}

/// A short-lived bearer value authorizing one real-time session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// How the caller authenticates a connect attempt.
///
/// A pre-fetched session token is preferred; an API key is exchanged for a
/// fresh token on every connect.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey(String),
    SessionToken(SessionToken),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::SessionToken(_) => f.write_str("SessionToken(<redacted>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cara() -> InlinePersona {
        InlinePersona {
            name: "Cara".into(),
            avatar_id: "30fa96d0-26c4-4e55-94a0-517025942e18".into(),
            voice_id: "6bfbe25a-979d-40f3-a92b-5394170af54b".into(),
            brain_type: Some("ANAM_LLAMA_v3_3_70B_V1".into()),
            system_prompt: "You are Cara, a helpful assistant.".into(),
        }
    }

    #[test]
    fn persona_id_serializes_flat() {
        let value = serde_json::to_value(PersonaConfig::by_id("p1")).unwrap();
        assert_eq!(value, json!({ "personaId": "p1" }));
    }

    #[test]
    fn inline_persona_uses_camel_case_fields() {
        let value = serde_json::to_value(PersonaConfig::Inline(cara())).unwrap();
        assert_eq!(value["avatarId"], "30fa96d0-26c4-4e55-94a0-517025942e18");
        assert_eq!(value["voiceId"], "6bfbe25a-979d-40f3-a92b-5394170af54b");
        assert_eq!(value["brainType"], "ANAM_LLAMA_v3_3_70B_V1");
        assert_eq!(value["systemPrompt"], "You are Cara, a helpful assistant.");
        assert!(value.get("personaId").is_none());
    }

    #[test]
    fn inline_persona_omits_missing_brain_type() {
        let mut p = cara();
        p.brain_type = None;
        let value = serde_json::to_value(PersonaConfig::Inline(p)).unwrap();
        assert!(value.get("brainType").is_none());
    }

    #[test]
    fn deserializes_either_shape() {
        let by_id: PersonaConfig = serde_json::from_value(json!({ "personaId": "p9" })).unwrap();
        assert_eq!(by_id, PersonaConfig::by_id("p9"));

        let inline: PersonaConfig = serde_json::from_value(json!({
            "name": "Cara",
            "avatarId": "a",
            "voiceId": "v",
            "systemPrompt": "s",
        }))
        .unwrap();
        assert_eq!(inline.label(), "Cara");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let token = SessionToken::new("secret-token");
        assert!(!format!("{token:?}").contains("secret"));
        let key = Credential::ApiKey("sk-live-123".into());
        assert!(!format!("{key:?}").contains("sk-live"));
    }
}
