use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use tracing::{info, warn};

use crate::{
    AppState,
    api::models::auth::{
        AuthCookieResponse, AuthResponse, NextStep, OtpRequest, SessionResponse, SignInRequest, SignUpRequest, VerifyOtpRequest,
    },
    auth::{
        current_user::CurrentUser,
        provider::{AuthError, OtpKind},
        session::{self, SessionTokens},
    },
    errors::Error,
};

fn require(value: &str, field: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::BadRequest {
            message: format!("{field} is required"),
        });
    }
    Ok(())
}

/// Provider rejections become `reject(message)`; anything else is an internal failure.
fn map_auth_error(err: AuthError, reject: impl FnOnce(String) -> Error) -> Error {
    match err {
        AuthError::Rejected { message, .. } => reject(message),
        other => Error::Internal {
            details: other.to_string(),
        },
    }
}

/// Response that stores `tokens` in the session cookie.
fn signed_in(state: &AppState, headers: &HeaderMap, status: StatusCode, tokens: &SessionTokens, message: &str) -> AuthCookieResponse {
    let cookie_name = state.config.session_cookie_name();
    let existing = session::session_cookie_names(headers, &cookie_name);
    let cookies = session::session_cookies(&cookie_name, tokens, &state.config.auth, &existing);

    AuthCookieResponse {
        status,
        body: AuthResponse {
            user: tokens.authenticated_user(),
            next_step: NextStep::Done,
            message: message.to_string(),
        },
        cookies,
    }
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/authentication/sign-in",
    request_body = SignInRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Signed in, session cookie set", body = AuthResponse),
        (status = 400, description = "Missing email or password", body = crate::errors::ErrorBody),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SignInRequest>,
) -> Result<AuthCookieResponse, Error> {
    require(&request.email, "Email")?;
    require(&request.password, "Password")?;

    let tokens = state
        .auth
        .sign_in_with_password(request.email.trim(), &request.password)
        .await
        .map_err(|e| map_auth_error(e, |message| Error::InvalidCredentials { message }))?;

    info!("User signed in with password");
    Ok(signed_in(&state, &headers, StatusCode::OK, &tokens, "Signed in"))
}

/// Create an account
///
/// When the auth provider confirms the account immediately the session cookie is set and
/// `next_step` is `done`; otherwise a confirmation code was emailed and `next_step` is `verify_otp`.
#[utoipa::path(
    post,
    path = "/authentication/sign-up",
    request_body = SignUpRequest,
    tag = "authentication",
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid input or rejected by the auth provider", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sign_up(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SignUpRequest>,
) -> Result<AuthCookieResponse, Error> {
    require(&request.email, "Email")?;
    require(&request.password, "Password")?;
    if request.password != request.confirm_password {
        return Err(Error::BadRequest {
            message: "Passwords do not match".to_string(),
        });
    }

    let outcome = state
        .auth
        .sign_up(request.email.trim(), &request.password)
        .await
        .map_err(|e| map_auth_error(e, |message| Error::BadRequest { message }))?;

    match outcome.session {
        Some(tokens) => {
            info!("Account created and confirmed");
            Ok(signed_in(&state, &headers, StatusCode::CREATED, &tokens, "Account created"))
        }
        None => {
            info!("Account created, awaiting email confirmation");
            Ok(AuthCookieResponse {
                status: StatusCode::CREATED,
                body: AuthResponse {
                    user: outcome.user,
                    next_step: NextStep::VerifyOtp,
                    message: "Check your email for a confirmation code".to_string(),
                },
                cookies: Vec::new(),
            })
        }
    }
}

/// Email a one-time sign-in code
#[utoipa::path(
    post,
    path = "/authentication/otp",
    request_body = OtpRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Code sent", body = AuthResponse),
        (status = 400, description = "Missing email or rejected by the auth provider", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn request_otp(State(state): State<AppState>, Json(request): Json<OtpRequest>) -> Result<Json<AuthResponse>, Error> {
    require(&request.email, "Email")?;

    state
        .auth
        .send_email_otp(request.email.trim(), true)
        .await
        .map_err(|e| map_auth_error(e, |message| Error::BadRequest { message }))?;

    Ok(Json(AuthResponse {
        user: None,
        next_step: NextStep::VerifyOtp,
        message: "Check your email for a sign-in code".to_string(),
    }))
}

/// Exchange an emailed code for a session
#[utoipa::path(
    post,
    path = "/authentication/verify-otp",
    request_body = VerifyOtpRequest,
    tag = "authentication",
    responses(
        (status = 200, description = "Code accepted, session cookie set", body = AuthResponse),
        (status = 400, description = "Missing email or code", body = crate::errors::ErrorBody),
        (status = 401, description = "Code invalid or expired", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_otp(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<AuthCookieResponse, Error> {
    require(&request.email, "Email")?;
    require(&request.token, "Code")?;

    let tokens = state
        .auth
        .verify_otp(request.email.trim(), request.token.trim(), request.kind)
        .await
        .map_err(|e| map_auth_error(e, |message| Error::InvalidCredentials { message }))?;

    let message = match request.kind {
        OtpKind::Signup => "Email confirmed",
        OtpKind::Email => "Signed in",
    };
    Ok(signed_in(&state, &headers, StatusCode::OK, &tokens, message))
}

/// Sign out and clear the session cookie
///
/// Always succeeds; the provider-side logout is best effort.
#[utoipa::path(
    post,
    path = "/authentication/sign-out",
    tag = "authentication",
    responses(
        (status = 200, description = "Signed out", body = AuthResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn sign_out(State(state): State<AppState>, headers: HeaderMap) -> AuthCookieResponse {
    let cookie_name = state.config.session_cookie_name();

    if let Some(access_token) = session::access_token_from_headers(&headers, &cookie_name)
        && let Err(e) = state.auth.sign_out(&access_token).await
    {
        warn!(error = %e, "Provider sign-out failed, clearing cookie anyway");
    }

    let existing = session::session_cookie_names(&headers, &cookie_name);
    AuthCookieResponse {
        status: StatusCode::OK,
        body: AuthResponse {
            user: None,
            next_step: NextStep::Done,
            message: "Signed out".to_string(),
        },
        cookies: session::clear_session_cookies(&cookie_name, &state.config.auth, &existing),
    }
}

/// Current signed-in user
#[utoipa::path(
    get,
    path = "/authentication/session",
    tag = "authentication",
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_session(current: CurrentUser) -> Json<SessionResponse> {
    Json(SessionResponse { user: current.user })
}
