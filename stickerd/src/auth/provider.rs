//! Auth provider abstraction
//!
//! Users, passwords and one-time codes are owned by a managed auth service. This trait covers the
//! handful of calls the service makes: validating and refreshing a session and the three sign-in
//! flows.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::gotrue::GoTrueProvider;
use super::session::SessionTokens;
use crate::config::{AuthConfig, SupabaseConfig};

pub fn create_auth_provider(config: &AuthConfig, supabase: &SupabaseConfig) -> anyhow::Result<Arc<dyn AuthProvider>> {
    Ok(Arc::new(GoTrueProvider::new(config, supabase)?))
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The provider refused the request (bad credentials, expired code, weak password, ...)
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The provider failed on its side
    #[error("Auth provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Auth provider request failed: {0}")]
    Transport(String),

    #[error("Failed to decode auth provider response: {0}")]
    Decode(String),
}

/// The slice of the provider's user record the service cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Result of a sign-up. `session` is only present when the provider confirms accounts
/// immediately; otherwise the user must verify the emailed code first.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: Option<AuthenticatedUser>,
    pub session: Option<SessionTokens>,
}

/// Which flow a one-time code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OtpKind {
    /// Confirms a fresh sign-up
    Signup,
    /// Passwordless email sign-in
    Email,
}

impl OtpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpKind::Signup => "signup",
            OtpKind::Email => "email",
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve the user behind `access_token`. `Ok(None)` means the token was not accepted.
    async fn get_user(&self, access_token: &str) -> Result<Option<AuthenticatedUser>, AuthError>;

    /// Exchange a refresh token for a new session. Refresh tokens are single use.
    async fn refresh_session(&self, refresh_token: &str) -> Result<SessionTokens, AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<SessionTokens, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, AuthError>;

    /// Email a one-time code, creating the account first when `create_user` is set.
    async fn send_email_otp(&self, email: &str, create_user: bool) -> Result<(), AuthError>;

    async fn verify_otp(&self, email: &str, token: &str, kind: OtpKind) -> Result<SessionTokens, AuthError>;

    /// Revoke the session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}
