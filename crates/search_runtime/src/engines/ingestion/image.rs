//! Image validation and normalization.
//!
//! Every candidate image passes through here before embedding: size
//! bounds, minimum dimensions, supported formats, decodability. Valid
//! images are normalized to RGB JPEG with transparency flattened onto a
//! white background and oversized sides downscaled, aspect preserved.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::config::IngestionConfig;
use crate::errors::{ErrorCode, SearchError, SearchResult};

#[derive(Debug, Clone)]
pub struct ImagePolicy {
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl From<&IngestionConfig> for ImagePolicy {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            min_bytes: config.min_image_bytes,
            max_bytes: config.max_image_bytes,
            min_dimension: config.min_dimension,
            max_dimension: config.max_dimension,
        }
    }
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            min_bytes: 1024,
            max_bytes: 20 * 1024 * 1024,
            min_dimension: 50,
            max_dimension: 2048,
        }
    }
}

/// A validated, normalized image ready for embedding.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

const SUPPORTED: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// Validate raw bytes against the policy and normalize them.
pub fn validate_and_normalize(bytes: &[u8], policy: &ImagePolicy) -> SearchResult<NormalizedImage> {
    if bytes.len() < policy.min_bytes {
        return Err(SearchError::validation(
            ErrorCode::ImageTooSmall,
            &format!("file too small: {} bytes", bytes.len()),
        ));
    }
    if bytes.len() > policy.max_bytes {
        return Err(SearchError::validation(
            ErrorCode::ImageTooLarge,
            &format!("file too large: {} bytes", bytes.len()),
        ));
    }

    let format = image::guess_format(bytes).map_err(|_| {
        SearchError::validation(ErrorCode::UnsupportedFormat, "unrecognized image format")
    })?;
    if !SUPPORTED.contains(&format) {
        return Err(SearchError::validation(
            ErrorCode::UnsupportedFormat,
            &format!("unsupported format: {:?}", format),
        ));
    }

    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        SearchError::validation(ErrorCode::CorruptImage, &format!("decode failed: {}", e))
    })?;

    let (width, height) = (decoded.width(), decoded.height());
    if width < policy.min_dimension || height < policy.min_dimension {
        return Err(SearchError::validation(
            ErrorCode::ImageTooSmall,
            &format!("image too small: {}x{}", width, height),
        ));
    }

    let mut normalized = flatten_onto_white(decoded);
    if normalized.width() > policy.max_dimension || normalized.height() > policy.max_dimension {
        normalized = normalized.thumbnail(policy.max_dimension, policy.max_dimension);
    }

    let mut jpeg = Vec::new();
    normalized
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|e| {
            SearchError::validation(ErrorCode::CorruptImage, &format!("re-encode failed: {}", e))
        })?;

    Ok(NormalizedImage {
        width: normalized.width(),
        height: normalized.height(),
        jpeg,
    })
}

/// Composite any transparency onto a white background and drop the alpha
/// channel. The encoder pipeline expects plain RGB.
fn flatten_onto_white(image: DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return DynamicImage::ImageRgb8(image.into_rgb8());
    }

    let rgba = image.into_rgba8();
    let mut flattened = RgbaImage::from_pixel(rgba.width(), rgba.height(), Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut flattened, &rgba, 0, 0);
    DynamicImage::ImageRgba8(flattened).into_rgb8().into()
}
