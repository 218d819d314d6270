use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use tracing::debug;

use crate::{
    AppState,
    api::models::stickers::StickerResponse,
    auth::current_user::CurrentUser,
    errors::{Error, Result},
    stickers::{StickerUpload, UploadedImage},
};

fn multipart_error(err: MultipartError) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return Error::PayloadTooLarge {
            message: "Uploaded image is too large".to_string(),
        };
    }
    Error::MissingInput {
        details: Some(err.body_text()),
    }
}

/// Collect the `image` and `prompt` fields; anything else is skipped.
async fn read_upload(mut multipart: Multipart) -> Result<StickerUpload> {
    let mut upload = StickerUpload::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                upload.image = Some(UploadedImage {
                    bytes,
                    file_name,
                    content_type,
                });
            }
            Some("prompt") => {
                upload.prompt = Some(field.text().await.map_err(multipart_error)?);
            }
            other => debug!(field = ?other, "Ignoring unexpected form field"),
        }
    }

    Ok(upload)
}

/// Generate a sticker from an uploaded photo
#[utoipa::path(
    post,
    path = "/api/sticker",
    tag = "stickers",
    request_body(
        content = crate::api::models::stickers::StickerForm,
        content_type = "multipart/form-data",
        description = "Photo plus an optional style prompt"
    ),
    responses(
        (status = 200, description = "Sticker generated and stored", body = StickerResponse),
        (status = 400, description = "No image file provided", body = crate::errors::ErrorBody),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorBody),
        (status = 413, description = "Upload too large", body = crate::errors::ErrorBody),
        (status = 500, description = "Processing, provider or storage failure", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = %current_user.user.id))]
pub async fn generate_sticker(
    State(state): State<AppState>,
    current_user: CurrentUser,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<StickerResponse>> {
    let multipart = multipart.map_err(|rejection| Error::MissingInput {
        details: Some(rejection.body_text()),
    })?;
    let upload = read_upload(multipart).await?;

    let image_url = state.stickers.generate(&current_user, upload).await?;

    Ok(Json(StickerResponse {
        success: true,
        image_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorBody;
    use crate::test_utils::{
        PUBLIC_BASE_URL, ScriptedTransformer, StaticAuthProvider, create_test_config, generated, jpeg_bytes, memory_storage,
        png_bytes, session_cookie_for, test_state,
    };
    use crate::transform::{EditResponse, TransformError};
    use axum_test::{
        TestServer,
        multipart::{MultipartForm, Part},
    };
    use base64::{Engine, engine::general_purpose::STANDARD};

    const COOKIE_NAME: &str = "sb-testproject-auth-token";

    fn photo_form(prompt: Option<&str>) -> MultipartForm {
        let form = MultipartForm::new().add_part(
            "image",
            Part::bytes(jpeg_bytes(500, 500)).file_name("photo.jpg").mime_type("image/jpeg"),
        );
        match prompt {
            Some(prompt) => form.add_text("prompt", prompt),
            None => form,
        }
    }

    fn sticker_b64() -> String {
        STANDARD.encode(png_bytes(32, 32))
    }

    fn connection_error() -> TransformError {
        TransformError::Connection("connection reset by peer".to_string())
    }

    fn server_for(state: &crate::AppState) -> TestServer {
        TestServer::new(crate::build_router(state).unwrap()).unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_generates_and_stores_sticker() {
        let transformer = ScriptedTransformer::new([Ok(generated(&sticker_b64()))]);
        let storage = memory_storage();
        let state = test_state()
            .transformer(transformer.clone())
            .storage(storage.clone())
            .call();
        let server = server_for(&state);

        let response = server
            .post("/api/sticker")
            .add_header("cookie", session_cookie_for(COOKIE_NAME, "good-token"))
            .multipart(photo_form(Some("cute sticker")))
            .await;

        response.assert_status_ok();
        let body: StickerResponse = response.json();
        assert!(body.success);
        assert!(body.image_url.starts_with(&format!("{PUBLIC_BASE_URL}/uploads/public/edited-")));
        assert!(body.image_url.ends_with(".png"));

        let calls = transformer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt.as_deref(), Some("cute sticker"));
        let sent = image::load_from_memory(&calls[0].image).unwrap();
        assert!(sent.width() <= 128 && sent.height() <= 128);

        state.stickers.shutdown().await;
        let paths = storage.paths();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().any(|p| p.starts_with("public/edited-") && p.ends_with(".png")));
        let archived = paths.iter().find(|p| p.ends_with(".jpg")).unwrap();
        assert_eq!(storage.get(archived).unwrap().content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_each_request_gets_a_distinct_path() {
        let transformer = ScriptedTransformer::new([Ok(generated(&sticker_b64())), Ok(generated(&sticker_b64()))]);
        let state = test_state().transformer(transformer).call();
        let server = server_for(&state);

        let mut urls = Vec::new();
        for _ in 0..2 {
            let response = server
                .post("/api/sticker")
                .add_header("cookie", session_cookie_for(COOKIE_NAME, "good-token"))
                .multipart(photo_form(None))
                .await;
            response.assert_status_ok();
            urls.push(response.json::<StickerResponse>().image_url);
        }

        assert_ne!(urls[0], urls[1]);
    }

    #[tokio::test]
    async fn test_requires_session_before_reading_body() {
        let transformer = ScriptedTransformer::new([]);
        let storage = memory_storage();
        let auth = StaticAuthProvider::with_user("good-token", "user-1", "user@example.com");
        let state = test_state()
            .transformer(transformer.clone())
            .storage(storage.clone())
            .auth(auth.clone())
            .call();
        let server = server_for(&state);

        let response = server.post("/api/sticker").multipart(photo_form(None)).await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "Unauthorized: User not logged in");
        assert_eq!(auth.lookups(), 0);
        assert_eq!(transformer.call_count(), 0);
        state.stickers.shutdown().await;
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_expired_session_is_refreshed_before_generating() {
        let transformer = ScriptedTransformer::new([Ok(generated(&sticker_b64()))]);
        let auth = std::sync::Arc::new(
            StaticAuthProvider::default()
                .user("good-token", "user-1", "user@example.com")
                .refresh("refresh-expired-token", "fresh-token", "user-1", "user@example.com"),
        );
        let state = test_state().transformer(transformer.clone()).auth(auth.clone()).call();
        let server = server_for(&state);

        let response = server
            .post("/api/sticker")
            .add_header("cookie", session_cookie_for(COOKIE_NAME, "expired-token"))
            .multipart(photo_form(None))
            .await;

        response.assert_status_ok();
        assert_eq!(transformer.call_count(), 1);
        assert!(
            response
                .header("set-cookie")
                .to_str()
                .unwrap()
                .starts_with(&format!("{COOKIE_NAME}=base64-"))
        );
    }

    #[tokio::test]
    async fn test_missing_image_is_bad_request() {
        let transformer = ScriptedTransformer::new([]);
        let state = test_state().transformer(transformer.clone()).call();
        let server = server_for(&state);

        let response = server
            .post("/api/sticker")
            .add_header("cookie", session_cookie_for(COOKIE_NAME, "good-token"))
            .multipart(MultipartForm::new().add_text("prompt", "sticker"))
            .await;

        response.assert_status_bad_request();
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "No image file provided");
        assert_eq!(transformer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_bad_request() {
        let state = test_state().call();
        let server = server_for(&state);

        let response = server
            .post("/api/sticker")
            .add_header("cookie", session_cookie_for(COOKIE_NAME, "good-token"))
            .json(&serde_json::json!({"image": "nope"}))
            .await;

        response.assert_status_bad_request();
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "No image file provided");
        assert!(body.details.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let transformer = ScriptedTransformer::new([Err(connection_error()), Ok(generated(&sticker_b64()))]);
        let state = test_state().transformer(transformer.clone()).call();
        let server = server_for(&state);

        let response = server
            .post("/api/sticker")
            .add_header("cookie", session_cookie_for(COOKIE_NAME, "good-token"))
            .multipart(photo_form(None))
            .await;

        response.assert_status_ok();
        assert_eq!(transformer.call_count(), 2);
    }

    #[tokio::test]
    async fn test_provider_error_passes_status_through() {
        let transformer = ScriptedTransformer::new([Err(TransformError::Api {
            status: 400,
            message: "Invalid image".to_string(),
            code: None,
            kind: Some("invalid_request_error".to_string()),
        })]);
        let state = test_state().transformer(transformer.clone()).call();
        let server = server_for(&state);

        let response = server
            .post("/api/sticker")
            .add_header("cookie", session_cookie_for(COOKIE_NAME, "good-token"))
            .multipart(photo_form(None))
            .await;

        response.assert_status_bad_request();
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "OpenAI API Error: Invalid image");
        assert_eq!(transformer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_provider_result_stores_nothing() {
        let transformer = ScriptedTransformer::new([Ok(EditResponse { data: vec![] })]);
        let storage = memory_storage();
        let state = test_state()
            .transformer(transformer)
            .storage(storage.clone())
            .call();
        let server = server_for(&state);

        let response = server
            .post("/api/sticker")
            .add_header("cookie", session_cookie_for(COOKIE_NAME, "good-token"))
            .multipart(photo_form(None))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: ErrorBody = response.json();
        assert_eq!(body.error, "Invalid response structure from OpenAI Edit API");
        state.stickers.shutdown().await;
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let transformer = ScriptedTransformer::new([]);
        let mut config = create_test_config();
        config.limits.max_upload_bytes = 1024;
        let state = test_state().transformer(transformer.clone()).config(config).call();
        let server = server_for(&state);

        let response = server
            .post("/api/sticker")
            .add_header("cookie", session_cookie_for(COOKIE_NAME, "good-token"))
            .multipart(photo_form(None))
            .await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(transformer.call_count(), 0);
    }
}
