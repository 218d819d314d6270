//! Image transform provider abstraction
//!
//! The `ImageTransformer` trait hides the image-generation API behind a single `edit` call: one
//! input image plus an optional text prompt in, a list of base64 encoded images out. Errors carry
//! enough structure for the retry policy to tell transient transport failures from answers the
//! provider actually gave.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::{TransformConfig, TransformProviderKind};

pub mod dummy;
pub mod openai;
pub mod retry;

pub use retry::{RetryPolicy, edit_with_retry};

/// Create a transformer from configuration.
///
/// Adding a new provider requires adding a match arm here.
pub fn create_transformer(config: &TransformConfig) -> anyhow::Result<Arc<dyn ImageTransformer>> {
    match config.provider {
        TransformProviderKind::OpenAi => Ok(Arc::new(openai::OpenAiTransformer::new(config)?)),
        TransformProviderKind::Dummy => Ok(Arc::new(dummy::DummyTransformer::default())),
    }
}

/// Errors returned by a transform provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    /// The provider answered with an error status
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
        kind: Option<String>,
    },

    /// The request never produced a response (reset, refused, broken body)
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered 2xx with a body we could not parse
    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("{0}")]
    Other(String),
}

impl TransformError {
    /// Whether a second attempt has a reasonable chance of succeeding.
    ///
    /// Transport failures are transient. Anything else only counts when the provider itself
    /// reports a connection error. Timeouts are not retried: one attempt already used the full
    /// time budget.
    pub fn is_transient(&self) -> bool {
        match self {
            TransformError::Connection(_) => true,
            TransformError::Api { message, .. } | TransformError::Other(message) => {
                message.to_ascii_lowercase().contains("connection error")
            }
            TransformError::Timeout(_) | TransformError::Decode(_) => false,
        }
    }
}

impl TransformError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransformError::Timeout(timeout)
        } else if err.is_connect() || err.is_request() || err.is_body() {
            TransformError::Connection(error_chain(&err))
        } else if err.is_decode() {
            TransformError::Decode(error_chain(&err))
        } else {
            TransformError::Other(error_chain(&err))
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// One image edit request.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub image: Bytes,
    pub file_name: String,
    pub content_type: String,
    /// Sent only when present; the provider applies its own behaviour otherwise
    pub prompt: Option<String>,
    pub size: String,
    pub n: u8,
}

/// Provider answer, mirroring the OpenAI images response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditResponse {
    #[serde(default)]
    pub data: Vec<GeneratedImage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(default)]
    pub b64_json: Option<String>,
}

#[async_trait]
pub trait ImageTransformer: Send + Sync {
    /// Apply the prompt to the image and return whatever the provider generated.
    async fn edit(&self, request: EditRequest) -> Result<EditResponse, TransformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(message: &str) -> TransformError {
        TransformError::Api {
            status: 500,
            message: message.to_string(),
            code: None,
            kind: None,
        }
    }

    #[test]
    fn test_connection_errors_are_transient() {
        assert!(TransformError::Connection("connection reset by peer".into()).is_transient());
        assert!(api("Connection error.").is_transient());
        assert!(TransformError::Other("upstream connection error".into()).is_transient());
    }

    #[test]
    fn test_provider_answers_are_not_transient() {
        assert!(!api("Invalid image file").is_transient());
        assert!(!TransformError::Timeout(Duration::from_secs(60)).is_transient());
        assert!(!TransformError::Decode("expected value".into()).is_transient());
        assert!(!TransformError::Other("boom".into()).is_transient());
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let parsed: EditResponse = serde_json::from_str(r#"{"created": 1}"#).unwrap();
        assert!(parsed.data.is_empty());

        let parsed: EditResponse = serde_json::from_str(r#"{"data": [{"revised_prompt": "x"}]}"#).unwrap();
        assert_eq!(parsed.data.len(), 1);
        assert!(parsed.data[0].b64_json.is_none());
    }
}
