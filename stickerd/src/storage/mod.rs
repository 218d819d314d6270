//! Object storage abstraction
//!
//! Generated stickers and archived originals are written once under random paths inside a single
//! bucket, then served from a public URL. `ObjectStorage` hides whether that bucket lives in
//! Supabase Storage or in process memory.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::config::{StorageBackend, StorageConfig, SupabaseConfig};

pub mod memory;
pub mod supabase;

/// Create the storage backend named in configuration.
pub fn create_storage(config: &StorageConfig, supabase: &SupabaseConfig) -> anyhow::Result<Arc<dyn ObjectStorage>> {
    match config.backend {
        StorageBackend::Supabase => Ok(Arc::new(supabase::SupabaseStorage::new(config, supabase)?)),
        StorageBackend::Memory => Ok(Arc::new(memory::MemoryStorage::new(config))),
    }
}

/// Random, write-once object path: `public/{prefix}{uuid}.{extension}`.
pub fn object_path(prefix: &str, extension: &str) -> String {
    format!("public/{prefix}{}.{extension}", Uuid::new_v4())
}

#[derive(Clone)]
pub struct ObjectUpload {
    pub path: String,
    pub bytes: Bytes,
    pub content_type: String,
    /// Seconds, sent as `max-age`
    pub cache_control: String,
    pub upsert: bool,
    /// Caller's access token, so bucket policies see the signed-in user
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub path: String,
    /// Storage key as reported by the backend (`{bucket}/{path}`)
    pub key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("The resource already exists")]
    AlreadyExists,

    #[error("Storage request failed: {0}")]
    Transport(String),

    #[error("Failed to decode storage response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    fn bucket(&self) -> &str;

    async fn upload(&self, upload: ObjectUpload) -> Result<StoredObject, StorageError>;

    /// Public URL for `path`, or `None` when the backend cannot serve it.
    fn public_url(&self, path: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_paths_are_unique() {
        let a = object_path("edited-", "png");
        let b = object_path("edited-", "png");
        assert_ne!(a, b);
        assert!(a.starts_with("public/edited-"));
        assert!(a.ends_with(".png"));

        let uuid = a.trim_start_matches("public/edited-").trim_end_matches(".png");
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn test_object_path_without_prefix() {
        let path = object_path("", "jpg");
        let uuid = path.trim_start_matches("public/").trim_end_matches(".jpg");
        assert!(Uuid::parse_str(uuid).is_ok());
    }
}
