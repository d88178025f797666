use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::PersonaError;
use crate::persona::{PersonaConfig, SessionToken};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionTokenRequest<'a> {
    persona_config: &'a PersonaConfig,
}

/// Response from the session-token endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionTokenResponse {
    session_token: Option<String>,
}

/// Exchanges a long-lived API key for a short-lived session token.
pub struct TokenService {
    http: reqwest::Client,
    endpoint: url::Url,
}

impl TokenService {
    pub fn new(endpoint: url::Url, timeout: Duration) -> Result<Self, PersonaError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PersonaError::Http(e.to_string()))?;
        Ok(Self { http, endpoint })
    }

    /// POST the persona configuration with the API key as bearer credential.
    ///
    /// Non-2xx responses, transport failures and bodies without a
    /// `sessionToken` all fail the attempt.
    pub async fn request_session_token(
        &self,
        api_key: &str,
        persona: &PersonaConfig,
    ) -> Result<SessionToken, PersonaError> {
        tracing::info!(
            "requesting session token from {} for persona '{}'",
            self.endpoint,
            persona.label()
        );

        let resp = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .json(&SessionTokenRequest {
                persona_config: persona,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PersonaError::Timeout("session token request".into())
                } else {
                    PersonaError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PersonaError::Auth(format!(
                "token endpoint returned status {status}"
            )));
        }

        let data: SessionTokenResponse = resp
            .json()
            .await
            .map_err(|e| PersonaError::Auth(format!("invalid token response: {e}")))?;

        match data.session_token {
            Some(token) if !token.is_empty() => {
                tracing::debug!("session token received");
                Ok(SessionToken::new(token))
            }
            _ => Err(PersonaError::Auth(
                "token response is missing sessionToken".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn service_for(server: &MockServer) -> TokenService {
        let endpoint = url::Url::parse(&format!("{}/v1/auth/session-token", server.uri())).unwrap();
        TokenService::new(endpoint, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn exchanges_key_for_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/session-token"))
            .and(header("authorization", "Bearer key-123"))
            .and(body_json(json!({ "personaConfig": { "personaId": "p1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sessionToken": "t1" })))
            .expect(1)
            .mount(&server)
            .await;

        let svc = service_for(&server).await;
        let token = svc
            .request_session_token("key-123", &PersonaConfig::by_id("p1"))
            .await
            .unwrap();
        assert_eq!(token.as_str(), "t1");
    }

    #[tokio::test]
    async fn server_error_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let svc = service_for(&server).await;
        let err = svc
            .request_session_token("key", &PersonaConfig::by_id("p1"))
            .await
            .unwrap_err();
        match err {
            PersonaError::Auth(msg) => assert!(msg.contains("500"), "{msg}"),
            other => panic!("expected Auth, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let svc = service_for(&server).await;
        let err = svc
            .request_session_token("key", &PersonaConfig::by_id("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersonaError::Auth(_)));
    }

    #[tokio::test]
    async fn missing_token_field_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "other": 1 })))
            .mount(&server)
            .await;

        let svc = service_for(&server).await;
        let err = svc
            .request_session_token("key", &PersonaConfig::by_id("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersonaError::Auth(msg) if msg.contains("sessionToken")));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let endpoint = url::Url::parse("http://127.0.0.1:1/v1/auth/session-token").unwrap();
        let svc = TokenService::new(endpoint, Duration::from_secs(2)).unwrap();
        let err = svc
            .request_session_token("key", &PersonaConfig::by_id("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersonaError::Http(_) | PersonaError::Timeout(_)));
    }
}
