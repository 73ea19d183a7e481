//! In-process vector store.
//!
//! Implements the full [`VectorStore`] contract with cosine scoring over
//! a guarded map. Used by the test suite and for local development
//! without a running vector engine.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    payload_with_product_id, point_id, CollectionInfo, Distance, VectorHit, VectorStore,
};
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, SearchError, SearchResult};

struct StoredPoint {
    external_id: String,
    vector: Vec<f32>,
    payload: Map<String, Value>,
}

struct Collection {
    dimension: usize,
    distance: Distance,
    points: HashMap<Uuid, StoredPoint>,
}

pub struct InMemoryVectorStore {
    name: String,
    collection: RwLock<Option<Collection>>,
}

impl InMemoryVectorStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collection: RwLock::new(None),
        }
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, dimension: usize, distance: Distance) -> SearchResult<()> {
        let mut guard = self.collection.write().await;
        match guard.as_ref() {
            Some(existing) if existing.dimension != dimension => Err(SearchError::new(
                ErrorCode::DimensionMismatch,
                ErrorCategory::Storage,
                ErrorSeverity::Critical,
                &format!(
                    "collection '{}' exists with dimension {} (requested {})",
                    self.name, existing.dimension, dimension
                ),
            )),
            Some(_) => Ok(()),
            None => {
                *guard = Some(Collection {
                    dimension,
                    distance,
                    points: HashMap::new(),
                });
                tracing::info!(collection = %self.name, dimension, "created in-memory collection");
                Ok(())
            }
        }
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

        let mut guard = self.collection.write().await;
        let collection = guard
            .as_mut()
            .ok_or_else(|| SearchError::vector_store("collection does not exist"))?;

        for ((external_id, vector), payload) in
            external_ids.iter().zip(vectors.iter()).zip(payloads.iter())
        {
            if vector.len() != collection.dimension {
                return Err(SearchError::new(
                    ErrorCode::DimensionMismatch,
                    ErrorCategory::Storage,
                    ErrorSeverity::High,
                    &format!(
                        "vector for '{}' has dimension {} (collection {})",
                        external_id,
                        vector.len(),
                        collection.dimension
                    ),
                ));
            }

            collection.points.insert(
                point_id(external_id),
                StoredPoint {
                    external_id: external_id.clone(),
                    vector: vector.clone(),
                    payload: payload_with_product_id(external_id, payload),
                },
            );
        }

        tracing::debug!(count = external_ids.len(), "upserted points");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> SearchResult<Vec<VectorHit>> {
        let guard = self.collection.read().await;
        let collection = guard
            .as_ref()
            .ok_or_else(|| SearchError::vector_store("collection does not exist"))?;

        if query.len() != collection.dimension {
            return Err(SearchError::new(
                ErrorCode::DimensionMismatch,
                ErrorCategory::Storage,
                ErrorSeverity::High,
                &format!(
                    "query has dimension {} (collection {})",
                    query.len(),
                    collection.dimension
                ),
            ));
        }

        let mut hits: Vec<VectorHit> = collection
            .points
            .values()
            .map(|point| VectorHit {
                external_id: point.external_id.clone(),
                score: Self::cosine(query, &point.vector),
                payload: point.payload.clone(),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, external_ids: &[String]) -> SearchResult<()> {
        let mut guard = self.collection.write().await;
        let collection = guard
            .as_mut()
            .ok_or_else(|| SearchError::vector_store("collection does not exist"))?;

        for external_id in external_ids {
            // Absent ids are fine, deletion is idempotent.
            collection.points.remove(&point_id(external_id));
        }
        Ok(())
    }

    async fn collection_info(&self) -> SearchResult<CollectionInfo> {
        let guard = self.collection.read().await;
        let collection = guard
            .as_ref()
            .ok_or_else(|| SearchError::vector_store("collection does not exist"))?;

        Ok(CollectionInfo {
            name: self.name.clone(),
            points: collection.points.len() as u64,
            dimension: collection.dimension,
            distance: collection.distance,
            status: "green".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut v = values.to_vec();
        crate::engines::embedding::l2_normalize(&mut v);
        v
    }

    async fn seeded_store() -> InMemoryVectorStore {
        let store = InMemoryVectorStore::new("test");
        store.ensure_collection(8, Distance::Cosine).await.unwrap();

        let ids: Vec<String> = ["p1", "p2", "p3"].iter().map(|s| s.to_string()).collect();
        let vectors = vec![
            unit(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            unit(&[0.9, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            unit(&[0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        ];
        let payloads = vec![Map::new(), Map::new(), Map::new()];

        store.upsert(&ids, &vectors, &payloads).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_self_query_ranks_first_with_threshold() {
        // Scenario: querying with p1's own vector returns p1 at score ~1.0
        // first, then the nearest neighbour below 1.0.
        let store = seeded_store().await;
        let query = unit(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let hits = store.search(&query, 2, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].external_id, "p1");
        assert!((hits[0].score - 1.0).abs() < 1e-4);
        assert_eq!(hits[1].external_id, "p2");
        assert!(hits[1].score < 1.0 && hits[1].score >= 0.5);
    }

    #[tokio::test]
    async fn test_scores_are_monotonically_non_increasing() {
        let store = seeded_store().await;
        let query = unit(&[0.7, 0.7, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let hits = store.search(&query, 10, -1.0).await.unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_upsert_twice_overwrites_in_place() {
        let store = InMemoryVectorStore::new("test");
        store.ensure_collection(2, Distance::Cosine).await.unwrap();

        let ids = vec!["p1".to_string()];
        let payloads = vec![Map::new()];
        store
            .upsert(&ids, &[vec![1.0, 0.0]], &payloads)
            .await
            .unwrap();
        store
            .upsert(&ids, &[vec![0.0, 1.0]], &payloads)
            .await
            .unwrap();

        let info = store.collection_info().await.unwrap();
        assert_eq!(info.points, 1);

        // Second write wins.
        let hits = store.search(&[0.0, 1.0], 1, 0.9).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].external_id, "p1");
    }

    #[tokio::test]
    async fn test_length_mismatch_fails_before_any_write() {
        let store = InMemoryVectorStore::new("test");
        store.ensure_collection(2, Distance::Cosine).await.unwrap();

        let err = store
            .upsert(
                &["a".to_string(), "b".to_string()],
                &[vec![1.0, 0.0]],
                &[Map::new()],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::StoreWriteFailed);
        assert_eq!(store.collection_info().await.unwrap().points, 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_propagates() {
        let store = seeded_store().await;

        store.delete(&["p1".to_string()]).await.unwrap();
        // Deleting again (and a never-existing id) is not an error.
        store
            .delete(&["p1".to_string(), "ghost".to_string()])
            .await
            .unwrap();

        let query = unit(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let hits = store.search(&query, 10, -1.0).await.unwrap();
        assert!(hits.iter().all(|hit| hit.external_id != "p1"));
    }

    #[tokio::test]
    async fn test_mis_dimensioned_query_is_rejected() {
        let store = seeded_store().await;

        let err = store.search(&[1.0, 0.0, 0.0], 5, -1.0).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DimensionMismatch);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_loudly() {
        let store = InMemoryVectorStore::new("test");
        store.ensure_collection(8, Distance::Cosine).await.unwrap();
        // Re-ensuring with the same dimension is idempotent.
        store.ensure_collection(8, Distance::Cosine).await.unwrap();

        let err = store
            .ensure_collection(512, Distance::Cosine)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DimensionMismatch);
    }
}
