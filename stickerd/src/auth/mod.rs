//! Authentication against the managed auth service.
//!
//! The service never stores users itself. A request is authenticated by reading the session
//! cookie, extracting the access token and asking the auth provider who it belongs to.
//!
//! # Modules
//!
//! - [`current_user`]: Extractor resolving the signed-in user in handlers
//! - [`gotrue`]: HTTP client for Supabase Auth
//! - [`provider`]: The `AuthProvider` trait and its types
//! - [`session`]: Session cookie encoding, chunking and parsing
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use stickerd::auth::current_user::CurrentUser;
//!
//! async fn protected_handler(current: CurrentUser) -> String {
//!     format!("Hello, {}!", current.user.id)
//! }
//! ```

pub mod current_user;
pub mod gotrue;
pub mod provider;
pub mod session;
