//! Supabase Auth (GoTrue) REST client.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use super::provider::{AuthError, AuthProvider, AuthenticatedUser, OtpKind, SignUpOutcome};
use super::session::SessionTokens;
use crate::config::{AuthConfig, SupabaseConfig};

/// `error_code`s GoTrue answers with 400 when the JWT or its session is unusable.
const TOKEN_ERROR_CODES: &[&str] = &["bad_jwt", "session_not_found", "session_expired", "user_not_found"];

pub struct GoTrueProvider {
    client: reqwest::Client,
    base_url: Url,
    anon_key: String,
}

impl GoTrueProvider {
    pub fn new(config: &AuthConfig, supabase: &SupabaseConfig) -> anyhow::Result<Self> {
        let base_url = supabase
            .url
            .clone()
            .context("supabase.url (or SUPABASE_URL) is required for authentication")?;
        let anon_key = supabase
            .anon_key
            .clone()
            .context("supabase.anon_key (or SUPABASE_ANON_KEY) is required for authentication")?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build auth HTTP client")?;

        Ok(Self {
            client,
            base_url,
            anon_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn post(&self, path: &str, body: Value, bearer: Option<&str>) -> Result<Response, AuthError> {
        self.client
            .post(self.endpoint(path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))
    }
}

/// GoTrue has used `msg`, `error_description`, `message` and `error` for the human readable text.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| parsed.as_ref()?.get(*key)?.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{} {}", status.as_u16(), body.trim()).trim().to_string())
}

fn error_for(status: StatusCode, body: &str) -> AuthError {
    if status.is_client_error() {
        AuthError::Rejected {
            status: status.as_u16(),
            message: error_message(status, body),
        }
    } else {
        AuthError::Provider {
            status: status.as_u16(),
            message: error_message(status, body),
        }
    }
}

/// Whether a failed user lookup means the token itself is bad, as opposed to rate limiting or
/// other request level trouble.
fn token_not_accepted(status: StatusCode, body: &str) -> bool {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => true,
        StatusCode::BAD_REQUEST => serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|json| json.get("error_code")?.as_str().map(str::to_string))
            .is_some_and(|code| TOKEN_ERROR_CODES.contains(&code.as_str())),
        _ => false,
    }
}

async fn read(response: Response) -> Result<(StatusCode, String), AuthError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| AuthError::Transport(e.to_string()))?;
    debug!(status = status.as_u16(), "Auth provider responded");
    Ok((status, body))
}

async fn check(response: Response) -> Result<String, AuthError> {
    let (status, body) = read(response).await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(error_for(status, &body))
    }
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T, AuthError> {
    serde_json::from_str(body).map_err(|e| AuthError::Decode(e.to_string()))
}

#[async_trait]
impl AuthProvider for GoTrueProvider {
    #[instrument(skip_all, err)]
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthenticatedUser>, AuthError> {
        let response = self
            .client
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let (status, body) = read(response).await?;
        if status.is_success() {
            return Ok(Some(parse(&body)?));
        }
        if token_not_accepted(status, &body) {
            debug!(status = status.as_u16(), message = %error_message(status, &body), "Session token not accepted");
            return Ok(None);
        }
        Err(error_for(status, &body))
    }

    #[instrument(skip_all, err)]
    async fn refresh_session(&self, refresh_token: &str) -> Result<SessionTokens, AuthError> {
        let response = self
            .post(
                "token?grant_type=refresh_token",
                json!({"refresh_token": refresh_token}),
                None,
            )
            .await?;
        parse(&check(response).await?)
    }

    #[instrument(skip(self, password), err)]
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<SessionTokens, AuthError> {
        let response = self
            .post(
                "token?grant_type=password",
                json!({"email": email, "password": password}),
                None,
            )
            .await?;
        parse(&check(response).await?)
    }

    #[instrument(skip(self, password), err)]
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError> {
        let response = self
            .post("signup", json!({"email": email, "password": password}), None)
            .await?;
        let body: Value = parse(&check(response).await?)?;

        // Auto-confirmed projects answer with a session, others with the bare user
        if body.get("access_token").is_some() {
            let session: SessionTokens = serde_json::from_value(body).map_err(|e| AuthError::Decode(e.to_string()))?;
            Ok(SignUpOutcome {
                user: session.authenticated_user(),
                session: Some(session),
            })
        } else {
            Ok(SignUpOutcome {
                user: serde_json::from_value(body).ok(),
                session: None,
            })
        }
    }

    #[instrument(skip(self), err)]
    async fn send_email_otp(&self, email: &str, create_user: bool) -> Result<(), AuthError> {
        let response = self
            .post("otp", json!({"email": email, "create_user": create_user}), None)
            .await?;
        check(response).await.map(|_| ())
    }

    #[instrument(skip(self, token), err)]
    async fn verify_otp(&self, email: &str, token: &str, kind: OtpKind) -> Result<SessionTokens, AuthError> {
        let response = self
            .post(
                "verify",
                json!({"type": kind.as_str(), "email": email, "token": token}),
                None,
            )
            .await?;
        parse(&check(response).await?)
    }

    #[instrument(skip_all, err)]
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self.post("logout", json!({}), Some(access_token)).await?;
        check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GoTrueProvider {
        let supabase = SupabaseConfig {
            url: Some(Url::parse(&server.uri()).unwrap()),
            anon_key: Some("anon-key".to_string()),
        };
        GoTrueProvider::new(&AuthConfig::default(), &supabase).unwrap()
    }

    fn session_body() -> Value {
        json!({
            "access_token": "access",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1_900_000_000,
            "refresh_token": "refresh",
            "user": {"id": "user-1", "email": "user@example.com"}
        })
    }

    #[test_log::test(tokio::test)]
    async fn test_get_user_with_valid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-1",
                "email": "user@example.com",
                "aud": "authenticated"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let user = provider(&server).get_user("access").await.unwrap().unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.email.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn test_get_user_with_rejected_token_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "code": 403,
                "error_code": "bad_jwt",
                "msg": "invalid JWT: token is expired"
            })))
            .mount(&server)
            .await;

        assert!(provider(&server).get_user("expired").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_user_with_unknown_session_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": 400,
                "error_code": "session_not_found",
                "msg": "Session from session_id claim in JWT does not exist"
            })))
            .mount(&server)
            .await;

        assert!(provider(&server).get_user("revoked").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_user_when_rate_limited_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"msg": "Request rate limit reached"})))
            .mount(&server)
            .await;

        match provider(&server).get_user("access").await {
            Err(AuthError::Rejected { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "Request rate limit reached");
            }
            other => panic!("expected rate limit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_user_with_other_bad_request_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_code": "validation_failed",
                "msg": "Unsupported request"
            })))
            .mount(&server)
            .await;

        assert!(provider(&server).get_user("access").await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_session_exchanges_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(header("apikey", "anon-key"))
            .and(body_json(json!({"refresh_token": "refresh"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-access",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "next-refresh",
                "user": {"id": "user-1", "email": "user@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = provider(&server).refresh_session("refresh").await.unwrap();
        assert_eq!(session.access_token, "fresh-access");
        assert_eq!(session.refresh_token.as_deref(), Some("next-refresh"));
    }

    #[tokio::test]
    async fn test_refresh_with_used_token_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_code": "refresh_token_already_used",
                "msg": "Invalid Refresh Token: Already Used"
            })))
            .mount(&server)
            .await;

        let err = provider(&server).refresh_session("refresh").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_get_user_with_provider_outage_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let err = provider(&server).get_user("access").await.unwrap_err();
        assert!(matches!(err, AuthError::Provider { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_password_sign_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(body_json(json!({"email": "user@example.com", "password": "hunter22"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body()))
            .expect(1)
            .mount(&server)
            .await;

        let session = provider(&server)
            .sign_in_with_password("user@example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(session.access_token, "access");
        assert_eq!(session.authenticated_user().unwrap().id, "user-1");
    }

    #[tokio::test]
    async fn test_bad_credentials_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let err = provider(&server)
            .sign_in_with_password("user@example.com", "wrong")
            .await
            .unwrap_err();
        match err {
            AuthError::Rejected { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid login credentials");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sign_up_without_confirmation_has_no_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-2",
                "email": "new@example.com",
                "confirmation_sent_at": "2026-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let outcome = provider(&server).sign_up("new@example.com", "hunter22").await.unwrap();
        assert!(outcome.session.is_none());
        assert_eq!(outcome.user.unwrap().id, "user-2");
    }

    #[tokio::test]
    async fn test_sign_up_with_auto_confirm_returns_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body()))
            .mount(&server)
            .await;

        let outcome = provider(&server).sign_up("user@example.com", "hunter22").await.unwrap();
        assert_eq!(outcome.session.unwrap().access_token, "access");
        assert_eq!(outcome.user.unwrap().id, "user-1");
    }

    #[tokio::test]
    async fn test_otp_request_and_verification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/otp"))
            .and(body_json(json!({"email": "user@example.com", "create_user": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/verify"))
            .and(body_json(json!({"type": "email", "email": "user@example.com", "token": "123456"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_body()))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        provider.send_email_otp("user@example.com", true).await.unwrap();
        let session = provider
            .verify_otp("user@example.com", "123456", OtpKind::Email)
            .await
            .unwrap();
        assert_eq!(session.access_token, "access");
    }

    #[tokio::test]
    async fn test_sign_out_uses_user_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server).sign_out("access").await.unwrap();
    }
}
