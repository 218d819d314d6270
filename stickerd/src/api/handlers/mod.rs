//! HTTP request handlers.
//!
//! - [`auth`]: Sign-in, sign-up, one-time codes, sign-out and session lookup
//! - [`health`]: Liveness endpoint
//! - [`static_assets`]: Embedded UI with `index.html` fallback
//! - [`stickers`]: Photo upload to sticker generation
//!
//! # Authentication
//!
//! Handlers that need a signed-in user take a [`crate::auth::current_user::CurrentUser`]
//! argument; the extractor runs before the request body is read.
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Result`]; every error renders as a JSON
//! [`crate::errors::ErrorBody`] with the status from [`crate::errors::Error::status_code`].

pub mod auth;
pub mod health;
pub mod static_assets;
pub mod stickers;
