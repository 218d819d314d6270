//! API request and response data models.
//!
//! Every model is annotated with `utoipa` so it shows up in `/api-docs/openapi.json`.
//!
//! - [`auth`]: Sign-in, sign-up and one-time code flows, plus the cookie-setting response
//! - [`stickers`]: Sticker generation form and result

pub mod auth;
pub mod stickers;
