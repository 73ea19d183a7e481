//! Embedding generation.
//!
//! Wraps a pretrained dual encoder producing vectors for images and text
//! in a shared space. Every vector that leaves this module is
//! L2-normalized; downstream cosine similarity assumes unit vectors, so
//! normalization is a hard post-condition enforced here rather than
//! trusted to the backend.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::SearchResult;

pub mod clip_http;
pub mod stub;

pub use clip_http::ClipHttpEmbedder;
pub use stub::HashEmbedder;

/// Shared contract for image/text encoders.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single image. Fails if the bytes cannot be encoded.
    async fn embed_image(&self, bytes: &[u8]) -> SearchResult<Vec<f32>>;

    /// Embed a batch of images. The result has the same length and order
    /// as the input; a failure for item *i* yields `None` at index *i*
    /// without aborting the rest of the batch.
    async fn embed_image_batch(&self, images: &[Bytes]) -> SearchResult<Vec<Option<Vec<f32>>>>;

    /// Embed a single text query.
    async fn embed_text(&self, text: &str) -> SearchResult<Vec<f32>>;

    /// Embed several texts at once.
    async fn embed_texts(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>>;

    /// Fixed output dimension of this encoder.
    fn dimension(&self) -> usize;
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}

/// Whether a vector is unit-length within `epsilon`.
pub fn is_normalized(values: &[f32], epsilon: f32) -> bool {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    (norm - 1.0).abs() < epsilon
}
