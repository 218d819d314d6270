//! OpenAI image edits client.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, instrument};

use super::{EditRequest, EditResponse, ImageTransformer, TransformError};
use crate::config::TransformConfig;

pub struct OpenAiTransformer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiTransformer {
    pub fn new(config: &TransformConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .context("transform.api_key (or OPENAI_API_KEY) is required for the openai provider")?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build OpenAI HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/images/edits", config.base_url.as_str().trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            timeout: config.timeout,
        })
    }

    fn form(&self, request: EditRequest) -> Result<Form, TransformError> {
        let image = Part::bytes(request.image.to_vec())
            .file_name(request.file_name)
            .mime_str(&request.content_type)
            .map_err(|e| TransformError::Other(format!("Invalid image content type: {e}")))?;

        let mut form = Form::new().text("model", self.model.clone()).part("image[]", image);
        if let Some(prompt) = request.prompt {
            form = form.text("prompt", prompt);
        }
        Ok(form
            .text("n", request.n.to_string())
            .text("size", request.size))
    }
}

/// Pull `{error: {message, type, code}}` out of a failed response, falling back to the raw body.
fn api_error(status: u16, body: &str) -> TransformError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .filter(Value::is_object);

    let text = |key: &str| -> Option<String> {
        detail.as_ref().and_then(|d| d.get(key)).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    };

    let message = text("message").unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("{status} status code (no body)")
        } else {
            format!("{status} {}", body.trim())
        }
    });

    TransformError::Api {
        status,
        message,
        code: text("code"),
        kind: text("type"),
    }
}

#[async_trait]
impl ImageTransformer for OpenAiTransformer {
    #[instrument(skip(self, request), fields(model = %self.model, size = %request.size, bytes = request.image.len()), err)]
    async fn edit(&self, request: EditRequest) -> Result<EditResponse, TransformError> {
        let form = self.form(request)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransformError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransformError::from_reqwest(e, self.timeout))?;

        debug!(status = status.as_u16(), response_len = body.len(), "Image edit request completed");

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| TransformError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformConfig;
    use bytes::Bytes;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transformer(server: &MockServer) -> OpenAiTransformer {
        let config = TransformConfig {
            api_key: Some("sk-test".to_string()),
            base_url: Url::parse(&format!("{}/v1", server.uri())).unwrap(),
            ..Default::default()
        };
        OpenAiTransformer::new(&config).unwrap()
    }

    fn request(prompt: Option<&str>) -> EditRequest {
        EditRequest {
            image: Bytes::from_static(b"\x89PNG fake"),
            file_name: "user_input.png".to_string(),
            content_type: "image/png".to_string(),
            prompt: prompt.map(str::to_string),
            size: "1024x1024".to_string(),
            n: 1,
        }
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let config = TransformConfig {
            api_key: None,
            ..Default::default()
        };
        assert!(OpenAiTransformer::new(&config).is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_edit_sends_multipart_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "created": 1,
                "data": [{"b64_json": "aGVsbG8="}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = transformer(&server).edit(request(Some("make it a sticker"))).await.unwrap();
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].b64_json.as_deref(), Some("aGVsbG8="));

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains(r#"name="model""#));
        assert!(body.contains("gpt-image-1"));
        assert!(body.contains(r#"name="image[]"; filename="user_input.png""#));
        assert!(body.contains(r#"name="prompt""#));
        assert!(body.contains("make it a sticker"));
        assert!(body.contains(r#"name="size""#));
        assert!(body.contains("1024x1024"));
    }

    #[tokio::test]
    async fn test_prompt_is_omitted_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        transformer(&server).edit(request(None)).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(!body.contains(r#"name="prompt""#));
    }

    #[tokio::test]
    async fn test_api_error_body_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/edits"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {
                    "message": "Invalid image file or mode for image 1",
                    "type": "invalid_request_error",
                    "code": "invalid_image_file"
                }
            })))
            .mount(&server)
            .await;

        let err = transformer(&server).edit(request(Some("x"))).await.unwrap_err();
        match err {
            TransformError::Api {
                status,
                message,
                code,
                kind,
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid image file or mode for image 1");
                assert_eq!(code.as_deref(), Some("invalid_image_file"));
                assert_eq!(kind.as_deref(), Some("invalid_request_error"));
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unstructured_error_body_falls_back_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = transformer(&server).edit(request(None)).await.unwrap_err();
        assert!(matches!(err, TransformError::Api { status: 502, ref message, .. } if message == "502 bad gateway"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_garbage_success_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = transformer(&server).edit(request(None)).await.unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        let config = TransformConfig {
            api_key: Some("sk-test".to_string()),
            base_url: Url::parse("http://127.0.0.1:1/v1").unwrap(),
            ..Default::default()
        };
        let err = OpenAiTransformer::new(&config).unwrap().edit(request(None)).await.unwrap_err();
        assert!(matches!(err, TransformError::Connection(_)), "got {err:?}");
        assert!(err.is_transient());
    }
}
