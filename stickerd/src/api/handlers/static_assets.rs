//! Serves the embedded single-page UI.

use axum::{
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument};

use crate::static_assets::Assets;

const INDEX: &str = "index.html";

/// Serve an embedded asset, falling back to `index.html` for anything unknown.
#[instrument(skip_all, fields(path = %uri.path()))]
pub async fn serve_embedded_asset(uri: Uri) -> Response {
    let mut path = uri.path().trim_start_matches('/');
    if path.is_empty() || path.ends_with('/') {
        path = INDEX;
    }

    if let Some(content) = Assets::get(path) {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (
            [
                (header::CONTENT_TYPE, mime.as_ref().to_string()),
                (header::CACHE_CONTROL, cache_control(path).to_string()),
            ],
            content.data.into_owned(),
        )
            .into_response();
    }

    debug!("Unknown asset, serving index.html");
    match Assets::get(INDEX) {
        Some(index) => (
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            index.data.into_owned(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Icons and images change rarely; the page itself must always be revalidated.
fn cache_control(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("svg" | "png" | "ico") => "public, max-age=86400",
        _ => "no-cache",
    }
}
