use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::provider::{AuthenticatedUser, OtpKind};

/// Email and password sign-in.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    /// Must equal `password`
    pub confirm_password: String,
}

/// Request a one-time sign-in code by email. Unknown addresses get an account.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyOtpRequest {
    pub email: String,
    /// Code from the email
    pub token: String,
    /// `signup` after registering, `email` after requesting a sign-in code
    pub kind: OtpKind,
}

/// What the client should show next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    /// Signed in (or out); nothing left to do
    Done,
    /// Ask for the code that was just emailed
    VerifyOtp,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthenticatedUser>,
    pub next_step: NextStep,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub user: AuthenticatedUser,
}

/// Auth flow response that may also set or clear the session cookies.
pub struct AuthCookieResponse {
    pub status: StatusCode,
    pub body: AuthResponse,
    pub cookies: Vec<HeaderValue>,
}

impl IntoResponse for AuthCookieResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        for cookie in self.cookies {
            headers.append(header::SET_COOKIE, cookie);
        }
        (self.status, headers, Json(self.body)).into_response()
    }
}
