//! Offline transformer for development: returns the input image unchanged.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};

use super::{EditRequest, EditResponse, GeneratedImage, ImageTransformer, TransformError};

#[derive(Debug, Default)]
pub struct DummyTransformer;

#[async_trait]
impl ImageTransformer for DummyTransformer {
    async fn edit(&self, request: EditRequest) -> Result<EditResponse, TransformError> {
        tracing::info!(bytes = request.image.len(), "Dummy transformer echoing input image");
        let encoded = STANDARD.encode(&request.image);
        Ok(EditResponse {
            data: (0..request.n.max(1))
                .map(|_| GeneratedImage {
                    b64_json: Some(encoded.clone()),
                })
                .collect(),
        })
    }
}
