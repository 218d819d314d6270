//! In-process storage backend for local development and tests.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{ObjectStorage, ObjectUpload, StorageError, StoredObject};
use crate::config::StorageConfig;

#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_control: String,
}

/// Objects keyed by path. URLs are only resolvable when `public_base_url` is configured, since
/// nothing serves these bytes over HTTP.
pub struct MemoryStorage {
    bucket: String,
    public_base_url: Option<String>,
    objects: DashMap<String, MemoryObject>,
}

impl MemoryStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            bucket: config.bucket.clone(),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|url| url.as_str().trim_end_matches('/').to_string()),
            objects: DashMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<MemoryObject> {
        self.objects.get(path).map(|entry| entry.value().clone())
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.iter().map(|entry| entry.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(&self, upload: ObjectUpload) -> Result<StoredObject, StorageError> {
        let object = MemoryObject {
            bytes: upload.bytes,
            content_type: upload.content_type,
            cache_control: upload.cache_control,
        };

        match self.objects.entry(upload.path.clone()) {
            Entry::Occupied(mut existing) if upload.upsert => {
                existing.insert(object);
            }
            Entry::Occupied(_) => return Err(StorageError::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(object);
            }
        }

        tracing::debug!(bucket = %self.bucket, path = %upload.path, "Stored object in memory");
        Ok(StoredObject {
            key: format!("{}/{}", self.bucket, upload.path),
            bucket: self.bucket.clone(),
            path: upload.path,
        })
    }

    fn public_url(&self, path: &str) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{base}/{}/{path}", self.bucket))
    }
}
