use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Successful sticker generation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StickerResponse {
    pub success: bool,
    /// Public URL of the stored sticker
    pub image_url: String,
}

/// Multipart body of `POST /api/sticker`. Documentation only; the handler streams the fields.
#[derive(ToSchema)]
#[allow(unused)]
pub struct StickerForm {
    /// Photo to transform (JPEG, PNG, WebP or GIF)
    #[schema(value_type = String, format = Binary)]
    pub image: Vec<u8>,
    /// Style prompt; the provider's default behaviour applies when omitted
    pub prompt: Option<String>,
}
