//! Incremental indexer: webhook-driven updates to both stores.
//!
//! Each marketplace event becomes at most one dual write (metadata row +
//! vector point) keyed by the namespaced external id. All writes are
//! idempotent, so at-least-once delivery and retries are safe.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Map, Value};

use cdn_store::ObjectStore;

use crate::config::IngestionConfig;
use crate::engines::embedding::Embedder;
use crate::engines::ingestion::{validate_and_normalize, ImagePolicy};
use crate::engines::metadata::MetadataStore;
use crate::engines::vector_store::VectorStore;
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, SearchError, SearchResult};
use crate::types::{EventKind, ProductDraft, ProductEventData, ProductUpdate, WebhookEvent};

pub mod queue;
pub mod retry;
pub mod signature;

pub use queue::EventQueue;
pub use retry::RetryPolicy;

pub struct IncrementalIndexer {
    objects: Arc<dyn ObjectStore>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    metadata: Arc<MetadataStore>,
    http: reqwest::Client,
    config: IngestionConfig,
}

impl IncrementalIndexer {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        metadata: Arc<MetadataStore>,
        config: IngestionConfig,
    ) -> SearchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            objects,
            embedder,
            vector_store,
            metadata,
            http,
            config,
        })
    }

    pub fn external_id(&self, product_id: &str) -> String {
        format!("{}{}", self.config.external_id_prefix, product_id)
    }

    /// Dispatch one event. Exhaustive over the event kinds; a new kind
    /// cannot be added without deciding its handling here.
    pub async fn handle_event(&self, event: &WebhookEvent) -> SearchResult<()> {
        tracing::info!(
            event_type = event.event_type.as_str(),
            event_id = %event.event_id,
            product_id = %event.data.product_id,
            "processing event"
        );

        match event.event_type {
            EventKind::ProductCreated => self.handle_created(&event.data).await,
            EventKind::ProductUpdated => self.handle_updated(&event.data).await,
            EventKind::ProductImageUpdated => self.handle_image_updated(&event.data).await,
            EventKind::ProductDeleted => self.handle_deleted(&event.data).await,
        }
    }

    async fn handle_created(&self, data: &ProductEventData) -> SearchResult<()> {
        let external_id = self.external_id(&data.product_id);

        if data.image_key.is_none() && data.image_url.is_none() {
            // A product without an image cannot be found by similarity,
            // but its metadata should still exist for later image events.
            tracing::warn!(external_id = %external_id, "created without image, metadata only");
            self.metadata
                .upsert_product(&self.draft_from_event(data, &external_id, None))
                .await?;
            return Ok(());
        }

        self.index_with_image(data, &external_id).await
    }

    async fn handle_image_updated(&self, data: &ProductEventData) -> SearchResult<()> {
        let external_id = self.external_id(&data.product_id);

        if data.image_key.is_none() && data.image_url.is_none() {
            return Err(SearchError::new(
                ErrorCode::InvalidEvent,
                ErrorCategory::Ingestion,
                ErrorSeverity::Medium,
                &format!("image update for '{}' carries no image reference", external_id),
            ));
        }

        self.index_with_image(data, &external_id).await
    }

    async fn handle_updated(&self, data: &ProductEventData) -> SearchResult<()> {
        let external_id = self.external_id(&data.product_id);

        let update = ProductUpdate {
            title: data.title.clone(),
            description: data.description.clone(),
            category: data.category.clone(),
            price: data.price,
            currency: data.currency.clone(),
            image_ref: self.image_ref_for(data),
            metadata: if data.metadata.is_empty() {
                None
            } else {
                Some(data.metadata.clone())
            },
        };

        if update.is_empty() {
            tracing::debug!(external_id = %external_id, "empty update, nothing to do");
            return Ok(());
        }

        match self.metadata.update_product(&external_id, &update).await? {
            Some(_) => {}
            None => {
                // Out-of-order delivery: the update arrived before the
                // create. Treat it as a create so the row self-heals.
                tracing::warn!(external_id = %external_id, "update for unknown product, creating");
                return self.handle_created(data).await;
            }
        }

        // A changed image on a plain update still means re-embedding.
        if data.image_key.is_some() || data.image_url.is_some() {
            let bytes = self.fetch_image(data).await?;
            self.embed_and_upsert_vector(data, &external_id, &bytes).await?;
        }

        Ok(())
    }

    async fn handle_deleted(&self, data: &ProductEventData) -> SearchResult<()> {
        let external_id = self.external_id(&data.product_id);

        self.metadata.delete_product(&external_id).await?;
        // Tolerant of points that never existed.
        self.vector_store.delete(&[external_id.clone()]).await?;

        tracing::info!(external_id = %external_id, "product removed from both stores");
        Ok(())
    }

    /// Full index path shared by create and image-update: fetch, validate,
    /// embed, then write the row and the vector.
    async fn index_with_image(
        &self,
        data: &ProductEventData,
        external_id: &str,
    ) -> SearchResult<()> {
        let bytes = self.fetch_image(data).await?;

        self.metadata
            .upsert_product(&self.draft_from_event(data, external_id, self.image_ref_for(data)))
            .await?;
        self.embed_and_upsert_vector(data, external_id, &bytes).await?;

        tracing::info!(external_id = %external_id, "✅ product indexed");
        Ok(())
    }

    async fn embed_and_upsert_vector(
        &self,
        data: &ProductEventData,
        external_id: &str,
        raw: &[u8],
    ) -> SearchResult<()> {
        let normalized = validate_and_normalize(raw, &ImagePolicy::from(&self.config))?;
        let vector = self.embedder.embed_image(&normalized.jpeg).await?;

        let mut payload = Map::new();
        payload.insert("product_id".to_string(), Value::String(external_id.to_string()));
        payload.insert("source".to_string(), Value::String("webhook".to_string()));
        if let Some(category) = &data.category {
            payload.insert("category".to_string(), Value::String(category.clone()));
        }

        self.vector_store
            .upsert(
                &[external_id.to_string()],
                std::slice::from_ref(&vector),
                &[payload],
            )
            .await
    }

    /// Resolve image bytes from the event: a bucket key takes precedence
    /// over a public URL.
    async fn fetch_image(&self, data: &ProductEventData) -> SearchResult<Bytes> {
        if let Some(key) = &data.image_key {
            return Ok(self.objects.get_object(key).await?);
        }

        let url = data
            .image_url
            .as_deref()
            .ok_or_else(|| SearchError::download("event carries no image reference"))?;

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SearchError::download(&format!(
                "image download from {} failed with {}",
                url,
                response.status()
            )));
        }
        Ok(response.bytes().await?)
    }

    fn image_ref_for(&self, data: &ProductEventData) -> Option<String> {
        data.image_url
            .clone()
            .or_else(|| data.image_key.as_ref().map(|key| format!("cdn://{}", key)))
    }

    fn draft_from_event(
        &self,
        data: &ProductEventData,
        external_id: &str,
        image_ref: Option<String>,
    ) -> ProductDraft {
        ProductDraft {
            external_id: external_id.to_string(),
            title: data
                .title
                .clone()
                .unwrap_or_else(|| format!("Product {}", data.product_id)),
            description: data.description.clone(),
            category: data.category.clone(),
            price: data.price,
            currency: data.currency.clone(),
            image_ref,
            metadata: data.metadata.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::engines::embedding::HashEmbedder;
    use crate::engines::vector_store::{Distance, InMemoryVectorStore};
    use cdn_store::MemoryObjectStore;
    use chrono::Utc;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    const DIM: usize = 32;

    struct Fixture {
        objects: Arc<MemoryObjectStore>,
        indexer: IncrementalIndexer,
        vector_store: Arc<InMemoryVectorStore>,
        metadata: Arc<MetadataStore>,
    }

    async fn fixture() -> Fixture {
        let objects = Arc::new(MemoryObjectStore::new());
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let vector_store = Arc::new(InMemoryVectorStore::new("test"));
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

        let indexer = IncrementalIndexer::new(
            objects.clone(),
            embedder,
            vector_store.clone(),
            metadata.clone(),
            IngestionConfig {
                min_image_bytes: 16,
                ..Default::default()
            },
        )
        .unwrap();

        Fixture {
            objects,
            indexer,
            vector_store,
            metadata,
        }
    }

    fn jpeg_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(80, 80, image::Rgb([10, 200, 30])));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    fn created_event(product_id: &str, image_key: Option<&str>) -> WebhookEvent {
        WebhookEvent {
            event_type: EventKind::ProductCreated,
            event_id: format!("evt-{}", product_id),
            timestamp: Utc::now(),
            data: ProductEventData {
                product_id: product_id.to_string(),
                title: Some("Running shoes".to_string()),
                category: Some("shoes".to_string()),
                image_key: image_key.map(str::to_string),
                ..Default::default()
            },
            signature: None,
        }
    }

    #[tokio::test]
    async fn test_created_event_writes_row_and_vector_idempotently() {
        let fx = fixture().await;
        fx.objects.put_object("4711/main_1.jpg", jpeg_bytes());

        let event = created_event("4711", Some("4711/main_1.jpg"));
        fx.indexer.handle_event(&event).await.unwrap();
        // Redelivery of the same event must not duplicate anything.
        fx.indexer.handle_event(&event).await.unwrap();

        let product = fx.metadata.get_product("mkt_4711").await.unwrap().unwrap();
        assert_eq!(product.title, "Running shoes");
        assert_eq!(fx.metadata.count_products().await.unwrap(), 1);
        assert_eq!(fx.vector_store.collection_info().await.unwrap().points, 1);
    }

    #[tokio::test]
    async fn test_deleted_event_clears_both_stores() {
        let fx = fixture().await;
        fx.objects.put_object("7/x_1.jpg", jpeg_bytes());
        fx.indexer
            .handle_event(&created_event("7", Some("7/x_1.jpg")))
            .await
            .unwrap();

        let mut delete = created_event("7", None);
        delete.event_type = EventKind::ProductDeleted;
        fx.indexer.handle_event(&delete).await.unwrap();
        // Deleting twice stays quiet.
        fx.indexer.handle_event(&delete).await.unwrap();

        assert!(fx.metadata.get_product("mkt_7").await.unwrap().is_none());
        assert_eq!(fx.vector_store.collection_info().await.unwrap().points, 0);
    }

    #[tokio::test]
    async fn test_update_for_unknown_product_self_heals() {
        let fx = fixture().await;
        fx.objects.put_object("9/a_1.jpg", jpeg_bytes());

        let mut update = created_event("9", Some("9/a_1.jpg"));
        update.event_type = EventKind::ProductUpdated;
        fx.indexer.handle_event(&update).await.unwrap();

        let product = fx.metadata.get_product("mkt_9").await.unwrap().unwrap();
        assert_eq!(product.title, "Running shoes");
        assert_eq!(fx.vector_store.collection_info().await.unwrap().points, 1);
    }

    #[tokio::test]
    async fn test_image_update_without_reference_is_invalid() {
        let fx = fixture().await;
        let mut event = created_event("11", None);
        event.event_type = EventKind::ProductImageUpdated;

        let err = fx.indexer.handle_event(&event).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidEvent);
    }
}
