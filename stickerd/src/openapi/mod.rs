//! OpenAPI document for the HTTP API, served at `/api-docs/openapi.json`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::{api, auth, errors};

/// Documents the session cookie. The name depends on the configured auth project, so the
/// default form is shown.
struct SessionCookieAddon;

impl Modify for SessionCookieAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "SessionCookie".to_string(),
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::with_description(
                    "sb-{project-ref}-auth-token",
                    "Session set by the sign-in endpoints. Large sessions are split into `.0`, `.1`, ... chunks.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "stickerd", description = "Turn photos into stickers."),
    modifiers(&SessionCookieAddon),
    paths(
        api::handlers::stickers::generate_sticker,
        api::handlers::auth::sign_in,
        api::handlers::auth::sign_up,
        api::handlers::auth::request_otp,
        api::handlers::auth::verify_otp,
        api::handlers::auth::sign_out,
        api::handlers::auth::get_session,
        api::handlers::health::healthz,
    ),
    components(
        schemas(
            api::models::stickers::StickerResponse,
            api::models::stickers::StickerForm,
            api::models::auth::SignInRequest,
            api::models::auth::SignUpRequest,
            api::models::auth::OtpRequest,
            api::models::auth::VerifyOtpRequest,
            api::models::auth::NextStep,
            api::models::auth::AuthResponse,
            api::models::auth::SessionResponse,
            auth::provider::AuthenticatedUser,
            auth::provider::OtpKind,
            errors::ErrorBody,
        )
    ),
    tags(
        (name = "stickers", description = "Generate stickers from photos. Requires a session cookie."),
        (name = "authentication", description = "Sign in, sign up and manage the session cookie."),
        (name = "health", description = "Liveness."),
    )
)]
pub struct ApiDoc;
