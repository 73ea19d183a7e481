//! Deterministic, model-free embedder.
//!
//! Expands a SHA-256 digest of the input into a fixed-dimension unit
//! vector. Identical inputs always produce identical vectors, which is
//! exactly what local runs and the test suite need; it carries no
//! semantic similarity.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::engines::embedding::{l2_normalize, Embedder};
use crate::errors::SearchResult;

pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn encode(&self, bytes: &[u8]) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;

        while values.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();

            for chunk in digest.chunks_exact(4) {
                if values.len() == self.dimension {
                    break;
                }
                let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Map into [-1, 1).
                values.push((word as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }

        l2_normalize(&mut values);
        values
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_image(&self, bytes: &[u8]) -> SearchResult<Vec<f32>> {
        Ok(self.encode(bytes))
    }

    async fn embed_image_batch(&self, images: &[Bytes]) -> SearchResult<Vec<Option<Vec<f32>>>> {
        Ok(images.iter().map(|img| Some(self.encode(img))).collect())
    }

    async fn embed_text(&self, text: &str) -> SearchResult<Vec<f32>> {
        Ok(self.encode(text.as_bytes()))
    }

    async fn embed_texts(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.encode(text.as_bytes())).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::embedding::is_normalized;

    #[tokio::test]
    async fn test_embeddings_are_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(512);

        let first = embedder.embed_text("blue sneakers").await.unwrap();
        let second = embedder.embed_text("blue sneakers").await.unwrap();
        let other = embedder.embed_text("red boots").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 512);
        assert!(is_normalized(&first, 1e-4));
    }

    #[tokio::test]
    async fn test_batch_matches_single_item_result() {
        let embedder = HashEmbedder::new(64);
        let bytes = Bytes::from_static(b"image-bytes");

        let single = embedder.embed_image(&bytes).await.unwrap();
        let batch = embedder
            .embed_image_batch(&[bytes.clone(), Bytes::from_static(b"other")])
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].as_ref().unwrap(), &single);
    }
}
