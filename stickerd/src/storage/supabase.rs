//! Supabase Storage REST client.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{ObjectStorage, ObjectUpload, StorageError, StoredObject};
use crate::config::{StorageConfig, SupabaseConfig};

pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: Url,
    anon_key: String,
    bucket: String,
    public_base_url: Option<Url>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: String,
}

impl SupabaseStorage {
    pub fn new(config: &StorageConfig, supabase: &SupabaseConfig) -> anyhow::Result<Self> {
        let base_url = supabase
            .url
            .clone()
            .context("supabase.url (or SUPABASE_URL) is required for the supabase storage backend")?;
        let anon_key = supabase
            .anon_key
            .clone()
            .context("supabase.anon_key (or SUPABASE_ANON_KEY) is required for the supabase storage backend")?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build storage HTTP client")?;

        Ok(Self {
            client,
            base_url,
            anon_key,
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
        })
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/storage/v1/{suffix}", self.base_url.as_str().trim_end_matches('/'))
    }
}

/// Storage errors look like `{"statusCode": "409", "error": "Duplicate", "message": "..."}`.
fn api_error(status: u16, body: &str) -> StorageError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let field = |key: &str| -> Option<String> {
        parsed.as_ref().and_then(|v| v.get(key)).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };

    if status == 409 || field("statusCode").as_deref() == Some("409") {
        return StorageError::AlreadyExists;
    }

    let message = field("message")
        .or_else(|| field("error"))
        .unwrap_or_else(|| format!("{status} {}", body.trim()));
    StorageError::Api { status, message }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, upload), fields(bucket = %self.bucket, path = %upload.path, bytes = upload.bytes.len()), err)]
    async fn upload(&self, upload: ObjectUpload) -> Result<StoredObject, StorageError> {
        let bearer = upload.auth_token.as_deref().unwrap_or(&self.anon_key);

        let response = self
            .client
            .post(self.endpoint(&format!("object/{}/{}", self.bucket, upload.path)))
            .bearer_auth(bearer)
            .header("apikey", &self.anon_key)
            .header(reqwest::header::CACHE_CONTROL, format!("max-age={}", upload.cache_control))
            .header("x-upsert", upload.upsert.to_string())
            .header(reqwest::header::CONTENT_TYPE, &upload.content_type)
            .body(upload.bytes)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        debug!(status = status.as_u16(), "Storage upload completed");

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        let parsed: UploadResponse = serde_json::from_str(&body).map_err(|e| StorageError::Decode(e.to_string()))?;
        Ok(StoredObject {
            bucket: self.bucket.clone(),
            path: upload.path,
            key: parsed.key,
        })
    }

    fn public_url(&self, path: &str) -> Option<String> {
        match &self.public_base_url {
            Some(base) => Some(format!("{}/{}/{path}", base.as_str().trim_end_matches('/'), self.bucket)),
            None => Some(self.endpoint(&format!("object/public/{}/{path}", self.bucket))),
        }
    }
}
