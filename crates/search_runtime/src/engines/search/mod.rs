//! Query orchestration: embed the query, search the vector store, join
//! hits with product metadata.
//!
//! Vector hits whose product row has gone missing (store drift) are
//! dropped from the response rather than surfaced as errors; the ranked
//! order of the surviving hits is preserved.

use std::sync::Arc;
use std::time::Instant;

use cdn_store::ObjectStore;

use crate::config::ApiConfig;
use crate::engines::embedding::Embedder;
use crate::engines::ingestion::{validate_and_normalize, ImagePolicy};
use crate::engines::metadata::MetadataStore;
use crate::engines::vector_store::{VectorHit, VectorStore};
use crate::errors::{ErrorCode, SearchError, SearchResult};
use crate::types::{Product, SearchHit, SearchResponse};

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    pub limit: usize,
    pub score_threshold: f32,
}

pub struct QueryOrchestrator {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    metadata: Arc<MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    image_policy: ImagePolicy,
    default_limit: usize,
    max_limit: usize,
}

impl QueryOrchestrator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        metadata: Arc<MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        image_policy: ImagePolicy,
        api: &ApiConfig,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            metadata,
            objects,
            image_policy,
            default_limit: api.default_limit,
            max_limit: api.max_limit,
        }
    }

    pub fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit)
    }

    /// Free-text search via the shared text/image embedding space.
    pub async fn search_by_text(
        &self,
        query: &str,
        options: QueryOptions,
    ) -> SearchResult<SearchResponse> {
        let started = Instant::now();

        if query.trim().is_empty() {
            return Err(SearchError::validation(
                ErrorCode::ValidationFailed,
                "query text is empty",
            ));
        }

        let vector = self
            .embedder
            .embed_text(query)
            .await
            .map_err(|err| SearchError::embedding(&format!("query embedding failed: {}", err)))?;

        self.run_query(&vector, options, None, started).await
    }

    /// Reverse image search. The uploaded bytes pass the same validation
    /// as ingested images, so a corrupt upload is rejected up front.
    pub async fn search_by_image(
        &self,
        image: &[u8],
        options: QueryOptions,
    ) -> SearchResult<SearchResponse> {
        let started = Instant::now();

        let normalized = validate_and_normalize(image, &self.image_policy)?;
        let vector = self
            .embedder
            .embed_image(&normalized.jpeg)
            .await
            .map_err(|err| SearchError::embedding(&format!("query embedding failed: {}", err)))?;

        self.run_query(&vector, options, None, started).await
    }

    /// More-like-this: embed the stored product's own image and search,
    /// excluding the product itself from the results.
    pub async fn search_similar(
        &self,
        external_id: &str,
        options: QueryOptions,
    ) -> SearchResult<SearchResponse> {
        let started = Instant::now();

        let product = self
            .metadata
            .get_product(external_id)
            .await?
            .ok_or_else(|| SearchError::not_found(&format!("product '{}' not found", external_id)))?;

        let image_ref = product.image_ref.as_deref().ok_or_else(|| {
            SearchError::not_found(&format!("product '{}' has no image", external_id))
        })?;

        let bytes = self.fetch_reference(image_ref).await?;
        let normalized = validate_and_normalize(&bytes, &self.image_policy)?;
        let vector = self
            .embedder
            .embed_image(&normalized.jpeg)
            .await
            .map_err(|err| SearchError::embedding(&format!("query embedding failed: {}", err)))?;

        // One extra hit to compensate for excluding the anchor itself.
        let widened = QueryOptions {
            limit: options.limit + 1,
            ..options
        };
        self.run_query(&vector, widened, Some(external_id), started)
            .await
            .map(|mut response| {
                response.results.truncate(options.limit);
                response.results_count = response.results.len();
                response
            })
    }

    /// Resolve a stored image reference back to bytes. `cdn://{key}`
    /// references (written at indexing time) are served by the object
    /// store; plain HTTP(S) references are fetched directly.
    async fn fetch_reference(&self, image_ref: &str) -> SearchResult<bytes::Bytes> {
        if let Some(key) = image_ref.strip_prefix("cdn://") {
            return Ok(self.objects.get_object(key).await?);
        }

        if !(image_ref.starts_with("http://") || image_ref.starts_with("https://")) {
            return Err(SearchError::download(&format!(
                "image reference '{}' is not fetchable",
                image_ref
            )));
        }

        let response = reqwest::get(image_ref).await?;
        if !response.status().is_success() {
            return Err(SearchError::download(&format!(
                "fetching '{}' failed with {}",
                image_ref,
                response.status()
            )));
        }
        Ok(response.bytes().await?)
    }

    async fn run_query(
        &self,
        vector: &[f32],
        options: QueryOptions,
        exclude: Option<&str>,
        started: Instant,
    ) -> SearchResult<SearchResponse> {
        let hits = self
            .vector_store
            .search(vector, options.limit, options.score_threshold)
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in &hits {
            if Some(hit.external_id.as_str()) == exclude {
                continue;
            }
            match self.metadata.get_product(&hit.external_id).await? {
                Some(product) => results.push(to_search_hit(product, hit)),
                None => {
                    // Store drift: the vector exists but the row is gone.
                    tracing::debug!(external_id = %hit.external_id, "dropping hit without metadata");
                }
            }
        }

        Ok(SearchResponse {
            query_time_ms: started.elapsed().as_millis() as u64,
            results_count: results.len(),
            results,
        })
    }
}

fn to_search_hit(product: Product, hit: &VectorHit) -> SearchHit {
    SearchHit {
        external_id: product.external_id,
        title: product.title,
        description: product.description,
        category: product.category,
        price: product.price,
        currency: product.currency,
        image_ref: product.image_ref,
        // Cosine over unit vectors lands in [-1, 1]; the API promises
        // [0, 1], so clamp at the boundary.
        similarity_score: hit.score.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::engines::embedding::HashEmbedder;
    use crate::engines::vector_store::{Distance, InMemoryVectorStore};
    use crate::types::ProductDraft;
    use cdn_store::MemoryObjectStore;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use serde_json::Map;
    use std::io::Cursor;

    const DIM: usize = 32;

    struct Fixture {
        orchestrator: QueryOrchestrator,
        metadata: Arc<MetadataStore>,
        vector_store: Arc<InMemoryVectorStore>,
        objects: Arc<MemoryObjectStore>,
    }

    async fn fixture() -> Fixture {
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let vector_store = Arc::new(InMemoryVectorStore::new("search-test"));
        vector_store
            .ensure_collection(DIM, Distance::Cosine)
            .await
            .unwrap();
        let metadata = Arc::new(
            MetadataStore::connect(&DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                connection_timeout_seconds: 5,
            })
            .await
            .unwrap(),
        );
        let objects = Arc::new(MemoryObjectStore::new());

        let orchestrator = QueryOrchestrator::new(
            embedder,
            vector_store.clone(),
            metadata.clone(),
            objects.clone(),
            ImagePolicy {
                min_bytes: 16,
                ..ImagePolicy::default()
            },
            &ApiConfig::default(),
        );
        Fixture {
            orchestrator,
            metadata,
            vector_store,
            objects,
        }
    }

    fn jpeg_bytes(seed: u8) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(96, 96, |x, y| {
            image::Rgb([seed, (x % 256) as u8, (y % 256) as u8])
        }));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    async fn seed(
        metadata: &MetadataStore,
        vector_store: &InMemoryVectorStore,
        embedder: &HashEmbedder,
        external_id: &str,
        title: &str,
        text: &str,
    ) {
        metadata
            .create_product(&ProductDraft {
                external_id: external_id.to_string(),
                title: title.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let vector = embedder.embed_text(text).await.unwrap();
        vector_store
            .upsert(
                &[external_id.to_string()],
                &[vector],
                &[Map::new()],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_text_search_joins_metadata_in_rank_order() {
        let fx = fixture().await;
        let embedder = HashEmbedder::new(DIM);

        seed(&fx.metadata, &fx.vector_store, &embedder, "p1", "Sneakers", "sneakers").await;
        seed(&fx.metadata, &fx.vector_store, &embedder, "p2", "Boots", "boots").await;

        // The hash embedder is deterministic, so querying with p1's exact
        // text puts p1 at similarity 1.0.
        let response = fx
            .orchestrator
            .search_by_text(
                "sneakers",
                QueryOptions {
                    limit: 10,
                    score_threshold: -1.0,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.results_count, response.results.len());
        assert_eq!(response.results[0].external_id, "p1");
        assert_eq!(response.results[0].title, "Sneakers");
        assert!((response.results[0].similarity_score - 1.0).abs() < 1e-4);
        for pair in response.results.windows(2) {
            assert!(pair[0].similarity_score >= pair[1].similarity_score);
        }
    }

    #[tokio::test]
    async fn test_hits_without_metadata_are_dropped_silently() {
        let fx = fixture().await;
        let embedder = HashEmbedder::new(DIM);

        seed(&fx.metadata, &fx.vector_store, &embedder, "p1", "Sneakers", "sneakers").await;
        seed(&fx.metadata, &fx.vector_store, &embedder, "p2", "Boots", "boots").await;
        // Orphan the p2 vector.
        fx.metadata.delete_product("p2").await.unwrap();

        let response = fx
            .orchestrator
            .search_by_text(
                "sneakers",
                QueryOptions {
                    limit: 10,
                    score_threshold: -1.0,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.results_count, 1);
        assert_eq!(response.results[0].external_id, "p1");
    }

    #[tokio::test]
    async fn test_empty_query_text_is_rejected_as_client_error() {
        let fx = fixture().await;
        let err = fx
            .orchestrator
            .search_by_text(
                "   ",
                QueryOptions {
                    limit: 5,
                    score_threshold: 0.0,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn test_similar_for_unknown_product_is_not_found() {
        let fx = fixture().await;
        let err = fx
            .orchestrator
            .search_similar(
                "ghost",
                QueryOptions {
                    limit: 5,
                    score_threshold: 0.0,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_scores_are_clamped_into_unit_interval() {
        let fx = fixture().await;

        fx.metadata
            .create_product(&ProductDraft {
                external_id: "p1".to_string(),
                title: "Anything".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        // An anti-parallel vector scores -1.0 raw.
        let mut vector = vec![0.0; DIM];
        vector[0] = -1.0;
        fx.vector_store
            .upsert(&["p1".to_string()], &[vector], &[Map::new()])
            .await
            .unwrap();

        let mut query = vec![0.0; DIM];
        query[0] = 1.0;
        let hits = fx.vector_store.search(&query, 5, -2.0).await.unwrap();
        assert!(hits[0].score < 0.0);

        let response = fx
            .orchestrator
            .search_by_text(
                "whatever",
                QueryOptions {
                    limit: 5,
                    score_threshold: -2.0,
                },
            )
            .await
            .unwrap();
        assert!(response
            .results
            .iter()
            .all(|hit| (0.0..=1.0).contains(&hit.similarity_score)));
    }

    #[tokio::test]
    async fn test_limit_clamping() {
        let api = ApiConfig::default();
        let fx = fixture().await;

        assert_eq!(fx.orchestrator.clamp_limit(None), api.default_limit);
        assert_eq!(fx.orchestrator.clamp_limit(Some(0)), 1);
        assert_eq!(fx.orchestrator.clamp_limit(Some(500)), api.max_limit);
        assert_eq!(fx.orchestrator.clamp_limit(Some(7)), 7);
    }

    /// Seed a product whose image lives in the object store under a
    /// `cdn://` reference, the way the indexer writes key-only deliveries.
    async fn seed_with_stored_image(fx: &Fixture, external_id: &str, key: &str, pixel_seed: u8) {
        let image = jpeg_bytes(pixel_seed);
        fx.objects.put_object(key, image.clone());
        fx.metadata
            .create_product(&ProductDraft {
                external_id: external_id.to_string(),
                title: format!("Product {}", external_id),
                image_ref: Some(format!("cdn://{}", key)),
                ..Default::default()
            })
            .await
            .unwrap();

        // Same validate+embed path search_similar takes.
        let normalized = validate_and_normalize(
            &image,
            &ImagePolicy {
                min_bytes: 16,
                ..ImagePolicy::default()
            },
        )
        .unwrap();
        let embedder = HashEmbedder::new(DIM);
        let vector = embedder.embed_image(&normalized.jpeg).await.unwrap();
        fx.vector_store
            .upsert(&[external_id.to_string()], &[vector], &[Map::new()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_similar_resolves_stored_reference_and_excludes_anchor() {
        let fx = fixture().await;

        seed_with_stored_image(&fx, "mkt_801", "801/main_1.jpg", 10).await;
        seed_with_stored_image(&fx, "mkt_802", "802/main_1.jpg", 200).await;

        let response = fx
            .orchestrator
            .search_similar(
                "mkt_801",
                QueryOptions {
                    limit: 5,
                    score_threshold: -1.0,
                },
            )
            .await
            .unwrap();

        // The anchor itself never appears, even though its own vector is
        // the top raw hit.
        assert!(response
            .results
            .iter()
            .all(|hit| hit.external_id != "mkt_801"));
        assert_eq!(response.results[0].external_id, "mkt_802");

        // The widened-then-truncated search still honors the limit.
        let response = fx
            .orchestrator
            .search_similar(
                "mkt_801",
                QueryOptions {
                    limit: 1,
                    score_threshold: -1.0,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.results_count, 1);
        assert_eq!(response.results[0].external_id, "mkt_802");
    }
}
