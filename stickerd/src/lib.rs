//! # stickerd: photo to sticker service
//!
//! `stickerd` takes a photo from a signed-in user, turns it into a stylised sticker through an
//! image edit API and hands back a public URL for the result.
//!
//! ## Overview
//!
//! The service is a thin orchestrator between three external systems: an auth provider that
//! owns user accounts and sessions, an image transform provider that does the actual editing,
//! and an object store that keeps the results. Each sits behind a trait so that a deployment can
//! point at Supabase and OpenAI while tests and local development run against in-process
//! backends.
//!
//! ### Request Flow
//!
//! A `POST /api/sticker` request first resolves the session cookie into a user via the
//! [`auth`] provider. The multipart body is then read, the `image` field is downscaled
//! (see [`imaging`]) and sent to the [`transform`] provider under a bounded retry policy. The
//! returned image is decoded and uploaded to [`storage`] as `public/edited-{uuid}.png`, and its
//! public URL is returned. The untouched original is archived on a background task tracked by
//! [`stickers::StickerService`] so that shutdown waits for it.
//!
//! The auth endpoints under `/authentication/*` wrap the provider's password and one-time code
//! flows and write the session cookie. Everything else falls through to the embedded UI.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use stickerd::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = stickerd::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     stickerd::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`config`] for the YAML layout and environment overrides.

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod imaging;
mod openapi;
mod static_assets;
pub mod stickers;
pub mod storage;
pub mod telemetry;
pub mod transform;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    middleware::from_fn,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;

use crate::{
    auth::{
        current_user::write_refreshed_session,
        provider::{AuthProvider, create_auth_provider},
    },
    config::CorsOrigin,
    openapi::ApiDoc,
    stickers::StickerService,
};
pub use config::Config;

/// Shared state handed to every handler.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .auth(auth_provider)
///     .stickers(sticker_service)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub auth: Arc<dyn AuthProvider>,
    pub stickers: StickerService,
}

impl AppState {
    /// Wire up the configured providers.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let auth = create_auth_provider(&config.auth, &config.supabase)?;
        let stickers = StickerService::from_config(&config)?;
        Ok(Self::builder().config(config).auth(auth).stickers(stickers).build())
    }
}

/// Create CORS layer from configuration
///
/// A `*` entry allows any origin and makes the other entries redundant.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let wildcard = config
        .cors
        .allowed_origins
        .iter()
        .any(|origin| matches!(origin, CorsOrigin::Wildcard));
    let allow_origin = if wildcard {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - `POST /api/sticker` behind the upload body limit
/// - `/authentication/*` session endpoints
/// - `/healthz` and `/api-docs/openapi.json`
/// - `/internal/metrics` when `enable_metrics` is set
/// - sessions refreshed during a request are written back as cookies
/// - the embedded UI for every other path
///
/// # Errors
///
/// Returns an error if the CORS configuration cannot be turned into header values.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth as auth_handlers, health, static_assets, stickers};

    let sticker_routes = Router::new()
        .route("/api/sticker", post(stickers::generate_sticker))
        .layer(DefaultBodyLimit::max(state.config.limits.max_upload_bytes));

    let auth_routes = Router::new()
        .route("/authentication/sign-in", post(auth_handlers::sign_in))
        .route("/authentication/sign-up", post(auth_handlers::sign_up))
        .route("/authentication/otp", post(auth_handlers::request_otp))
        .route("/authentication/verify-otp", post(auth_handlers::verify_otp))
        .route("/authentication/sign-out", post(auth_handlers::sign_out))
        .route("/authentication/session", get(auth_handlers::get_session));

    let router = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(sticker_routes)
        .merge(auth_routes)
        .fallback(static_assets::serve_embedded_asset)
        .with_state(state.clone())
        .layer(from_fn(write_refreshed_session));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        // Also installs the global recorder the pipeline's counters report to
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The HTTP server and the state it owns.
///
/// 1. **Create**: [`Application::new`] builds the providers and the router
/// 2. **Serve**: [`Application::serve`] binds the configured address and handles requests
/// 3. **Shutdown**: once the shutdown future resolves, in-flight requests drain, pending archival
///    uploads finish and telemetry is flushed
pub struct Application {
    router: Router,
    state: AppState,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting stickerd with configuration: {:#?}", config);

        let state = AppState::from_config(config.clone())?;
        let router = build_router(&state)?;

        Ok(Self { router, state, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, AppState) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.state)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "stickerd listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Waiting for background uploads...");
        self.state.stickers.shutdown().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
