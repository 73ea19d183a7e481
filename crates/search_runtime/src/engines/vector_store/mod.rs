//! Vector store management.
//!
//! Collection lifecycle, deterministic-id upsert, similarity search and
//! deletion. The deterministic external-id to point-id mapping is the
//! idempotency backbone for the retry-heavy ingestion and webhook paths:
//! writing the same external id twice always overwrites in place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::SearchResult;

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantVectorStore;

/// Distance metric of a collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Distance {
    Cosine,
    Euclid,
    Dot,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
            Distance::Euclid => "Euclid",
            Distance::Dot => "Dot",
        }
    }
}

/// A single similarity hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    /// The external id recovered from the payload.
    pub external_id: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub points: u64,
    pub dimension: usize,
    pub distance: Distance,
    pub status: String,
}

/// Map an external id to its vector-store point id.
///
/// UUIDv5 over the DNS namespace: identical across calls and across
/// process restarts, so re-upserts of the same product always land on
/// the same point.
pub fn point_id(external_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, external_id.as_bytes())
}

/// Contract over the vector similarity engine.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent. Idempotent; fails loudly when an
    /// existing collection has a different dimension.
    async fn ensure_collection(&self, dimension: usize, distance: Distance) -> SearchResult<()>;

    /// Upsert vectors keyed by external id. All three slices must have
    /// equal length or the call fails before any write. Payloads are
    /// guaranteed to carry `product_id` on return.
    async fn upsert(
        &self,
        external_ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[Map<String, Value>],
    ) -> SearchResult<()>;

    /// Similarity search: descending score, entries below
    /// `score_threshold` excluded, at most `top_k` returned.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> SearchResult<Vec<VectorHit>>;

    /// Delete by external ids. Absent ids are not an error.
    async fn delete(&self, external_ids: &[String]) -> SearchResult<()>;

    async fn collection_info(&self) -> SearchResult<CollectionInfo>;
}

/// Ensure every payload carries the external id under `product_id`,
/// so hits can be resolved without a relational join.
pub(crate) fn payload_with_product_id(
    external_id: &str,
    payload: &Map<String, Value>,
) -> Map<String, Value> {
    let mut payload = payload.clone();
    payload
        .entry("product_id".to_string())
        .or_insert_with(|| Value::String(external_id.to_string()));
    payload
}
