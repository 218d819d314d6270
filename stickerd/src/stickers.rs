//! Sticker generation pipeline.
//!
//! One upload runs through: input validation, downscale to the configured bounding box, the
//! transform call under the retry policy, response validation, base64 decode, storage upload and
//! public URL resolution. The untouched original is archived afterwards on a tracked background
//! task whose outcome never reaches the caller.

use std::path::Path;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use metrics::counter;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, info, info_span, instrument, warn};

use crate::{
    auth::current_user::CurrentUser,
    config::Config,
    errors::{Error, Result},
    imaging,
    storage::{self, ObjectStorage, ObjectUpload},
    transform::{self, EditRequest, ImageTransformer, RetryPolicy},
};

/// File name the resized input is sent under.
const TRANSFORM_INPUT_NAME: &str = "user_input.png";

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

/// Parsed multipart form of one sticker request.
#[derive(Debug, Clone, Default)]
pub struct StickerUpload {
    pub image: Option<UploadedImage>,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StickerSettings {
    pub max_dimension: u32,
    pub size: String,
    pub retry: RetryPolicy,
    pub cache_control: String,
}

impl Default for StickerSettings {
    fn default() -> Self {
        Self {
            max_dimension: 128,
            size: "1024x1024".to_string(),
            retry: RetryPolicy::default(),
            cache_control: "3600".to_string(),
        }
    }
}

impl From<&Config> for StickerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_dimension: config.imaging.max_dimension,
            size: config.transform.size.clone(),
            retry: RetryPolicy::from(&config.transform),
            cache_control: config.storage.cache_control.clone(),
        }
    }
}

#[derive(Clone)]
pub struct StickerService {
    transformer: Arc<dyn ImageTransformer>,
    storage: Arc<dyn ObjectStorage>,
    tasks: TaskTracker,
    settings: StickerSettings,
}

impl StickerService {
    pub fn new(transformer: Arc<dyn ImageTransformer>, storage: Arc<dyn ObjectStorage>, settings: StickerSettings) -> Self {
        Self {
            transformer,
            storage,
            tasks: TaskTracker::new(),
            settings,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            transform::create_transformer(&config.transform)?,
            storage::create_storage(&config.storage, &config.supabase)?,
            StickerSettings::from(config),
        ))
    }

    /// Turn an upload into a stored sticker and return its public URL.
    #[instrument(skip_all, fields(user_id = %user.user.id))]
    pub async fn generate(&self, user: &CurrentUser, upload: StickerUpload) -> Result<String> {
        let image = upload
            .image
            .filter(|image| !image.bytes.is_empty())
            .ok_or(Error::MissingInput { details: None })?;

        let prompt = upload
            .prompt
            .map(|prompt| prompt.trim().to_string())
            .filter(|prompt| !prompt.is_empty());
        match &prompt {
            Some(prompt) => info!(prompt_len = prompt.len(), "Received sticker request"),
            None => warn!("Received sticker request without a prompt, provider default applies"),
        }

        let resized = imaging::resize_for_transform(image.bytes.clone(), self.settings.max_dimension)
            .await
            .map_err(Error::PreprocessingFailed)?;
        info!(width = resized.width, height = resized.height, "Resized input image");

        let request = EditRequest {
            image: Bytes::from(resized.png),
            file_name: TRANSFORM_INPUT_NAME.to_string(),
            content_type: "image/png".to_string(),
            prompt,
            size: self.settings.size.clone(),
            n: 1,
        };
        let response = transform::edit_with_retry(self.transformer.as_ref(), request, self.settings.retry).await?;

        let first = response.data.first().ok_or_else(|| Error::InvalidProviderResponse {
            message: "Invalid response structure from OpenAI Edit API".to_string(),
        })?;
        let encoded = first
            .b64_json
            .as_deref()
            .filter(|data| !data.is_empty())
            .ok_or_else(|| Error::InvalidProviderResponse {
                message: "Failed to get edited image data from OpenAI".to_string(),
            })?;
        let edited = STANDARD
            .decode(encoded)
            .map_err(|e| Error::InvalidProviderResponse {
                message: format!("Failed to decode edited image data: {e}"),
            })?;

        let stored = self
            .storage
            .upload(ObjectUpload {
                path: storage::object_path("edited-", "png"),
                bytes: Bytes::from(edited),
                content_type: "image/png".to_string(),
                cache_control: self.settings.cache_control.clone(),
                upsert: false,
                auth_token: Some(user.access_token.clone()),
            })
            .await
            .map_err(|e| Error::StorageUploadFailed(e.to_string()))?;

        let url = self.storage.public_url(&stored.path).ok_or(Error::PublicUrlUnavailable)?;
        info!(path = %stored.path, "Stored generated sticker");

        self.archive_original(user, image);

        Ok(url)
    }

    /// Upload the original input on a tracked task. Failures are logged and counted only.
    fn archive_original(&self, user: &CurrentUser, image: UploadedImage) {
        let extension = archive_extension(image.file_name.as_deref(), image.content_type.as_deref());
        let content_type = image.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_ext(&extension)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        let upload = ObjectUpload {
            path: storage::object_path("", &extension),
            bytes: image.bytes,
            content_type,
            cache_control: self.settings.cache_control.clone(),
            upsert: false,
            auth_token: Some(user.access_token.clone()),
        };

        let storage = self.storage.clone();
        let span = info_span!("archive_original", user_id = %user.user.id, path = %upload.path);
        self.tasks.spawn(
            async move {
                match storage.upload(upload).await {
                    Ok(stored) => {
                        counter!("stickerd_archival_uploads_total", "outcome" => "success").increment(1);
                        info!(key = %stored.key, "Archived original upload");
                    }
                    Err(e) => {
                        counter!("stickerd_archival_uploads_total", "outcome" => "failure").increment(1);
                        warn!(error = %e, "Failed to archive original upload");
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Stop accepting background work and wait for in-flight archival uploads.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Extension for the archived original: the upload's file name, then its content type, then `bin`.
fn archive_extension(file_name: Option<&str>, content_type: Option<&str>) -> String {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase);
    if let Some(ext) = from_name {
        return ext;
    }

    let from_type = content_type.and_then(|content_type| {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        match essence {
            "image/jpeg" => Some("jpg"),
            "image/png" => Some("png"),
            "image/webp" => Some("webp"),
            "image/gif" => Some("gif"),
            other => mime_guess::get_mime_extensions_str(other).and_then(|exts| exts.first().copied()),
        }
    });
    from_type.unwrap_or("bin").to_string()
}
