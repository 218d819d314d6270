use crate::auth::provider::AuthError;
use crate::imaging::ImageError;
use crate::transform::TransformError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// No session cookie, or the auth provider rejected the token
    #[error("Unauthorized: User not logged in")]
    Unauthorized,

    /// The auth provider could not be asked about the session
    #[error("Failed to retrieve user session")]
    AuthCheckFailed(#[source] AuthError),

    /// Required upload field missing or unreadable
    #[error("No image file provided")]
    MissingInput { details: Option<String> },

    /// The auth provider rejected the submitted credentials or code
    #[error("{message}")]
    InvalidCredentials { message: String },

    /// Invalid request data for the auth flows
    #[error("{message}")]
    BadRequest { message: String },

    /// Request body exceeded the configured upload limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// The uploaded image could not be decoded, resized or re-encoded
    #[error("Failed to resize user image before sending to OpenAI")]
    PreprocessingFailed(#[source] ImageError),

    /// Error reported by the image transform provider, passed through with its status
    #[error("OpenAI API Error: {message}")]
    Provider { status: Option<u16>, message: String },

    /// The transform provider answered, but without usable image data
    #[error("{message}")]
    InvalidProviderResponse { message: String },

    /// Object storage refused or failed the upload
    #[error("Failed to upload edited image: {0}")]
    StorageUploadFailed(String),

    /// Object storage did not yield a public URL for the uploaded object
    #[error("Failed to get public URL for the edited image")]
    PublicUrlUnavailable,

    /// Generic internal service error
    #[error("Internal Server Error")]
    Internal { details: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// JSON body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized | Error::InvalidCredentials { .. } => StatusCode::UNAUTHORIZED,
            Error::MissingInput { .. } | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Provider { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Error::AuthCheckFailed(_)
            | Error::PreprocessingFailed(_)
            | Error::InvalidProviderResponse { .. }
            | Error::StorageUploadFailed(_)
            | Error::PublicUrlUnavailable
            | Error::Internal { .. }
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the client. Internal failures keep a generic `error` and move the cause
    /// into `details`.
    pub fn body(&self) -> ErrorBody {
        match self {
            Error::MissingInput { details } => ErrorBody {
                error: self.to_string(),
                details: details.clone(),
            },
            Error::PreprocessingFailed(source) => ErrorBody {
                error: self.to_string(),
                details: Some(source.to_string()),
            },
            Error::Internal { details } => ErrorBody {
                error: self.to_string(),
                details: Some(details.clone()),
            },
            Error::Other(err) => ErrorBody {
                error: "Internal Server Error".to_string(),
                details: Some(format!("{err:#}")),
            },
            _ => ErrorBody {
                error: self.to_string(),
                details: None,
            },
        }
    }
}

impl From<TransformError> for Error {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Api { status, message, .. } => Error::Provider {
                status: Some(status),
                message,
            },
            other => Error::Internal {
                details: other.to_string(),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Unauthorized | Error::InvalidCredentials { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::MissingInput { .. } | Error::BadRequest { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Provider { status, message } => {
                tracing::error!(status = ?status, "Transform provider error: {}", message);
            }
            _ => {
                tracing::error!("Internal service error: {}", self.error_chain());
            }
        }

        (self.status_code(), Json(self.body())).into_response()
    }
}

impl Error {
    /// Display text of the error followed by every source, `: ` separated.
    fn error_chain(&self) -> String {
        let mut chain = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        chain
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
