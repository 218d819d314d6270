//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Stickers** (`POST /api/sticker`): Multipart photo upload, returns the sticker URL
//! - **Authentication** (`/authentication/*`): Password and one-time code flows backed by the
//!   auth provider, session cookie handling
//! - **Health** (`/healthz`)
//!
//! Everything else is served from the embedded UI.
//!
//! # OpenAPI Documentation
//!
//! All endpoints carry `utoipa` annotations. The document is served at `/api-docs/openapi.json`.

pub mod handlers;
pub mod models;
