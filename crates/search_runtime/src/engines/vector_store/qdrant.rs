//! REST client for the Qdrant vector engine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    payload_with_product_id, point_id, CollectionInfo, Distance, VectorHit, VectorStore,
};
use crate::config::VectorStoreConfig;
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, SearchError, SearchResult};

pub struct QdrantVectorStore {
    client: Client,
    base_url: String,
    collection: String,
}

#[derive(Debug, Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateCollectionRequest {
    vectors: VectorParams,
}

#[derive(Debug, Serialize)]
struct PointStruct<'a> {
    id: Uuid,
    vector: &'a [f32],
    payload: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    points: Vec<PointStruct<'a>>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    score_threshold: f32,
    with_payload: bool,
}

#[derive(Debug, Serialize)]
struct DeleteRequest {
    points: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParamsInfo,
}

#[derive(Debug, Deserialize)]
struct VectorParamsInfo {
    size: usize,
    distance: String,
}

impl QdrantVectorStore {
    pub fn new(config: &VectorStoreConfig) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        tracing::info!(url = %config.url, collection = %config.collection, "Qdrant client initialized");

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    async fn describe(&self) -> SearchResult<Option<CollectionDescription>> {
        let response = self.client.get(self.collection_url()).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.status_error("describe collection", response).await);
        }

        let body: ApiResponse<CollectionDescription> = response.json().await?;
        Ok(Some(body.result))
    }

    async fn status_error(&self, operation: &str, response: reqwest::Response) -> SearchError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        SearchError::new(
            ErrorCode::VectorStoreError,
            ErrorCategory::Storage,
            ErrorSeverity::High,
            &format!(
                "qdrant {} on '{}' failed with {}: {}",
                operation, self.collection, status, body
            ),
        )
    }

    fn parse_distance(raw: &str) -> Distance {
        match raw {
            "Euclid" => Distance::Euclid,
            "Dot" => Distance::Dot,
            _ => Distance::Cosine,
        }
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(&self, dimension: usize, distance: Distance) -> SearchResult<()> {
        if let Some(existing) = self.describe().await? {
            if existing.config.params.vectors.size != dimension {
                return Err(SearchError::new(
                    ErrorCode::DimensionMismatch,
                    ErrorCategory::Storage,
                    ErrorSeverity::Critical,
                    &format!(
                        "collection '{}' exists with dimension {} (requested {})",
                        self.collection, existing.config.params.vectors.size, dimension
                    ),
                ));
            }
            tracing::info!(collection = %self.collection, "collection already exists");
            return Ok(());
        }

        let request = CreateCollectionRequest {
            vectors: VectorParams {
                size: dimension,
                distance: distance.as_str(),
            },
        };

        let response = self
            .client
            .put(self.collection_url())
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.status_error("create collection", response).await);
        }

        tracing::info!(
            collection = %self.collection,
            dimension,
            distance = distance.as_str(),
            "✅ created collection"
        );
        Ok(())
    }

    async fn upsert(
        &self,
        external_ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[Map<String, Value>],
    ) -> SearchResult<()> {
        if external_ids.len() != vectors.len() || external_ids.len() != payloads.len() {
            return Err(SearchError::new(
                ErrorCode::StoreWriteFailed,
                ErrorCategory::Storage,
                ErrorSeverity::Medium,
                &format!(
                    "length mismatch: {} ids vs {} vectors vs {} payloads",
                    external_ids.len(),
                    vectors.len(),
                    payloads.len()
                ),
            ));
        }
        if external_ids.is_empty() {
            return Ok(());
        }

        let points: Vec<PointStruct<'_>> = external_ids
            .iter()
            .zip(vectors.iter())
            .zip(payloads.iter())
            .map(|((external_id, vector), payload)| PointStruct {
                id: point_id(external_id),
                vector: vector.as_slice(),
                payload: payload_with_product_id(external_id, payload),
            })
            .collect();

        let url = format!("{}/points?wait=true", self.collection_url());
        let response = self
            .client
            .put(&url)
            .json(&UpsertRequest { points })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(self.status_error("upsert", response).await);
        }

        tracing::debug!(count = external_ids.len(), collection = %self.collection, "upserted points");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> SearchResult<Vec<VectorHit>> {
        let url = format!("{}/points/search", self.collection_url());
        let request = SearchRequest {
            vector: query,
            limit: top_k,
            score_threshold,
            with_payload: true,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(self.status_error("search", response).await);
        }

        let body: ApiResponse<Vec<ScoredPoint>> = response.json().await?;
        let hits = body
            .result
            .into_iter()
            .map(|point| {
                let payload = point.payload.unwrap_or_default();
                let external_id = payload
                    .get("product_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                VectorHit {
                    external_id,
                    score: point.score,
                    payload,
                }
            })
            .collect();

        Ok(hits)
    }

    async fn delete(&self, external_ids: &[String]) -> SearchResult<()> {
        if external_ids.is_empty() {
            return Ok(());
        }

        let url = format!("{}/points/delete?wait=true", self.collection_url());
        let request = DeleteRequest {
            points: external_ids.iter().map(|id| point_id(id)).collect(),
        };

        let response = self.client.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(self.status_error("delete", response).await);
        }

        tracing::debug!(count = external_ids.len(), collection = %self.collection, "deleted points");
        Ok(())
    }

    async fn collection_info(&self) -> SearchResult<CollectionInfo> {
        let description = self.describe().await?.ok_or_else(|| {
            SearchError::vector_store(&format!("collection '{}' does not exist", self.collection))
        })?;

        Ok(CollectionInfo {
            name: self.collection.clone(),
            points: description.points_count.unwrap_or(0),
            dimension: description.config.params.vectors.size,
            distance: Self::parse_distance(&description.config.params.vectors.distance),
            status: description.status,
        })
    }
}
