//! Input preprocessing for the transform provider.
//!
//! Uploaded photos are downscaled to fit a square bounding box before they are sent to the
//! provider. Aspect ratio is preserved, small images are never enlarged, and the result is always
//! re-encoded as PNG with the strongest compression setting.

use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use thiserror::Error;

/// Errors raised while preparing an uploaded image.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("unsupported or corrupt image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode PNG: {0}")]
    Encode(#[source] image::ImageError),

    #[error("image processing task failed: {0}")]
    Task(String),
}

/// A PNG ready to be sent to the transform provider.
#[derive(Debug, Clone)]
pub struct ResizedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Target dimensions for an image of `width`×`height` that must fit inside a
/// `max_dimension`×`max_dimension` box. Never upscales; neither side drops below 1.
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let scale = f64::min(
        f64::from(max_dimension) / f64::from(width),
        f64::from(max_dimension) / f64::from(height),
    );
    let scaled = |side: u32| -> u32 { ((f64::from(side) * scale).round() as u32).clamp(1, max_dimension) };

    (scaled(width), scaled(height))
}

/// Decode `bytes`, shrink to fit `max_dimension` and re-encode as PNG.
///
/// CPU bound; call [`resize_for_transform`] from async code.
pub fn resize_to_png(bytes: &[u8], max_dimension: u32) -> Result<ResizedImage, ImageError> {
    let decoded = image::load_from_memory(bytes).map_err(ImageError::Decode)?;
    let (width, height) = fit_within(decoded.width(), decoded.height(), max_dimension);

    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Lanczos3)
    };

    let mut png = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut png, CompressionType::Best, PngFilter::Adaptive);
    resized.write_with_encoder(encoder).map_err(ImageError::Encode)?;

    Ok(ResizedImage { png, width, height })
}

/// Run [`resize_to_png`] on the blocking pool.
pub async fn resize_for_transform(bytes: Bytes, max_dimension: u32) -> Result<ResizedImage, ImageError> {
    tokio::task::spawn_blocking(move || resize_to_png(&bytes, max_dimension))
        .await
        .map_err(|e| ImageError::Task(e.to_string()))?
}
