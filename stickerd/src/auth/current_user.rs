use std::sync::{Arc, OnceLock};

use axum::{
    extract::{FromRequestParts, Request},
    http::{HeaderValue, header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{debug, info, instrument, trace};

use super::{
    provider::{AuthError, AuthenticatedUser},
    session::{self, SessionTokens},
};
use crate::{
    AppState,
    errors::{Error, Result},
};

/// The signed-in user behind the request's session cookie.
///
/// When the provider no longer accepts the access token, the cookie's refresh token is exchanged
/// once for a new session and the lookup is retried. Rejects with `Unauthorized` when there is no
/// usable session, and with `AuthCheckFailed` when the provider could not be asked.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: AuthenticatedUser,
    /// Forwarded to storage so bucket policies apply to this user
    pub access_token: String,
}

/// Slot for `Set-Cookie` values of a session refreshed while extracting [`CurrentUser`].
///
/// Inserted by [`write_refreshed_session`]; without it a refresh still authenticates the request
/// but the new session is not persisted.
#[derive(Debug, Clone, Default)]
pub struct RefreshedSession(Arc<OnceLock<Vec<HeaderValue>>>);

/// Middleware writing any session refreshed during the request back to the client.
pub async fn write_refreshed_session(mut request: Request, next: Next) -> Response {
    let refreshed = RefreshedSession::default();
    request.extensions_mut().insert(refreshed.clone());

    let mut response = next.run(request).await;
    if let Some(cookies) = refreshed.0.get() {
        for cookie in cookies {
            response.headers_mut().append(header::SET_COOKIE, cookie.clone());
        }
    }
    response
}

fn check_failed_or_unauthorized(err: AuthError) -> Error {
    match err {
        // Unknown, expired or already used refresh tokens
        AuthError::Rejected {
            status: 400 | 401 | 403,
            message,
        } => {
            debug!(%message, "Refresh token not accepted");
            Error::Unauthorized
        }
        other => Error::AuthCheckFailed(other),
    }
}

async fn refresh(parts: &mut Parts, state: &AppState, cookie_name: &str, refresh_token: &str) -> Result<CurrentUser> {
    let tokens: SessionTokens = state
        .auth
        .refresh_session(refresh_token)
        .await
        .map_err(check_failed_or_unauthorized)?;

    let user = match state.auth.get_user(&tokens.access_token).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(Error::Unauthorized),
        Err(e) => return Err(Error::AuthCheckFailed(e)),
    };
    info!(user_id = %user.id, "Refreshed expired session");

    match parts.extensions.get::<RefreshedSession>() {
        Some(slot) => {
            let existing = session::session_cookie_names(&parts.headers, cookie_name);
            let cookies = session::session_cookies(cookie_name, &tokens, &state.config.auth, &existing);
            if slot.0.set(cookies).is_err() {
                debug!("Session already refreshed for this request");
            }
        }
        None => debug!("No refreshed session slot on request, new session not persisted"),
    }

    Ok(CurrentUser {
        user,
        access_token: tokens.access_token,
    })
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let cookie_name = state.config.session_cookie_name();
        let Some(stored) = session::stored_session_from_headers(&parts.headers, &cookie_name) else {
            trace!("No session cookie on request");
            return Err(Error::Unauthorized);
        };

        match state.auth.get_user(&stored.access_token).await {
            Ok(Some(user)) => {
                debug!(user_id = %user.id, "Authenticated session");
                Ok(CurrentUser {
                    user,
                    access_token: stored.access_token,
                })
            }
            Ok(None) => match stored.refresh_token {
                Some(refresh_token) => refresh(parts, state, &cookie_name, &refresh_token).await,
                None => Err(Error::Unauthorized),
            },
            Err(e) => Err(Error::AuthCheckFailed(e)),
        }
    }
}
