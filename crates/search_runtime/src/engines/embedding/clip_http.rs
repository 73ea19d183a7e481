//! HTTP client for the CLIP inference service.
//!
//! The encoder itself runs as a sidecar service; this client speaks its
//! JSON API and enforces the unit-norm post-condition on every response.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::engines::embedding::{l2_normalize, Embedder};
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, SearchError, SearchResult};

pub struct ClipHttpEmbedder {
    client: Client,
    base_url: String,
    device: String,
    batch_size: usize,
    dimension: usize,
    // The accelerator behind the service is effectively single-writer;
    // callers may still issue concurrent requests and accept serialized
    // throughput.
    inflight: Semaphore,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    image: String,
    device: &'a str,
}

#[derive(Debug, Serialize)]
struct ImageBatchRequest<'a> {
    images: Vec<String>,
    device: &'a str,
}

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    texts: &'a [String],
    device: &'a str,
}

#[derive(Debug, Deserialize)]
struct VectorResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    // One entry per input image, `null` where encoding failed.
    embeddings: Vec<Option<Vec<f32>>>,
}

#[derive(Debug, Deserialize)]
struct TextsResponse {
    embeddings: Vec<Vec<f32>>,
}

impl ClipHttpEmbedder {
    pub fn new(config: &EmbeddingConfig, dimension: usize) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        tracing::info!(
            url = %config.service_url,
            device = %config.device,
            dimension,
            "CLIP embedder initialized"
        );

        Ok(Self {
            client,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            device: config.device.clone(),
            batch_size: config.batch_size.max(1),
            dimension,
            inflight: Semaphore::new(config.max_inflight.max(1)),
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> SearchResult<()> {
        if vector.len() != self.dimension {
            return Err(SearchError::new(
                ErrorCode::DimensionMismatch,
                ErrorCategory::Embedding,
                ErrorSeverity::High,
                &format!(
                    "embedding service returned dimension {} (expected {})",
                    vector.len(),
                    self.dimension
                ),
            ));
        }
        Ok(())
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> SearchResult<R> {
        let _permit = self.inflight.acquire().await.map_err(|_| {
            SearchError::new(
                ErrorCode::EmbeddingServiceError,
                ErrorCategory::Embedding,
                ErrorSeverity::High,
                "embedding service semaphore closed",
            )
        })?;

        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SearchError::new(
                ErrorCode::EmbeddingServiceError,
                ErrorCategory::Embedding,
                ErrorSeverity::Medium,
                &format!("embedding service {} returned {}: {}", path, status, text),
            ));
        }

        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl Embedder for ClipHttpEmbedder {
    async fn embed_image(&self, bytes: &[u8]) -> SearchResult<Vec<f32>> {
        let request = ImageRequest {
            image: BASE64.encode(bytes),
            device: &self.device,
        };
        let response: VectorResponse = self.post_json("/embed/image", &request).await?;

        let mut vector = response.embedding;
        self.check_dimension(&vector)?;
        l2_normalize(&mut vector);
        Ok(vector)
    }

    async fn embed_image_batch(&self, images: &[Bytes]) -> SearchResult<Vec<Option<Vec<f32>>>> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(images.len());

        // Chunked so one oversized request cannot exhaust service memory;
        // chunking must not change per-item numeric results.
        for chunk in images.chunks(self.batch_size) {
            let request = ImageBatchRequest {
                images: chunk.iter().map(|img| BASE64.encode(img)).collect(),
                device: &self.device,
            };

            match self
                .post_json::<_, BatchResponse>("/embed/images", &request)
                .await
            {
                Ok(response) => {
                    if response.embeddings.len() != chunk.len() {
                        return Err(SearchError::new(
                            ErrorCode::EmbeddingServiceError,
                            ErrorCategory::Embedding,
                            ErrorSeverity::High,
                            &format!(
                                "embedding service returned {} results for a batch of {}",
                                response.embeddings.len(),
                                chunk.len()
                            ),
                        ));
                    }
                    for entry in response.embeddings {
                        match entry {
                            Some(mut vector) => {
                                self.check_dimension(&vector)?;
                                l2_normalize(&mut vector);
                                results.push(Some(vector));
                            }
                            None => results.push(None),
                        }
                    }
                }
                Err(err) => {
                    // A failed chunk marks its items absent; the rest of
                    // the batch continues.
                    tracing::warn!(error = %err, size = chunk.len(), "embedding chunk failed");
                    results.extend(std::iter::repeat_with(|| None).take(chunk.len()));
                }
            }
        }

        Ok(results)
    }

    async fn embed_text(&self, text: &str) -> SearchResult<Vec<f32>> {
        let texts = [text.to_string()];
        let vectors = self.embed_texts(&texts).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::embedding("embedding service returned no text vector"))
    }

    async fn embed_texts(&self, texts: &[String]) -> SearchResult<Vec<Vec<f32>>> {
        let request = TextRequest {
            texts,
            device: &self.device,
        };
        let response: TextsResponse = self.post_json("/embed/text", &request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(SearchError::new(
                ErrorCode::EmbeddingServiceError,
                ErrorCategory::Embedding,
                ErrorSeverity::High,
                &format!(
                    "embedding service returned {} vectors for {} texts",
                    response.embeddings.len(),
                    texts.len()
                ),
            ));
        }

        let mut vectors = response.embeddings;
        for vector in vectors.iter_mut() {
            self.check_dimension(vector)?;
            l2_normalize(vector);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
