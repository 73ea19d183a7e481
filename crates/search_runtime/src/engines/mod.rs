/*!
# Engine Container

Owns every runtime engine behind `Arc` so HTTP handlers, workers and the
sync binary share one set of connections. Construction is two-phase:
`initialize` wires the production backends from config, while
`with_backends` accepts arbitrary implementations for tests and local
runs without external services.
*/

use std::sync::Arc;

use serde::Serialize;

use cdn_store::{CdnClient, ObjectStore};

use crate::config::{cdn_config_from_env, RuntimeConfig};
use crate::engines::embedding::{ClipHttpEmbedder, Embedder};
use crate::engines::indexer::{EventQueue, IncrementalIndexer};
use crate::engines::ingestion::{ImagePolicy, SyncPipeline};
use crate::engines::metadata::MetadataStore;
use crate::engines::search::QueryOrchestrator;
use crate::engines::vector_store::{Distance, QdrantVectorStore, VectorStore};
use crate::errors::SearchResult;

pub mod embedding;
pub mod indexer;
pub mod ingestion;
pub mod metadata;
pub mod search;
pub mod vector_store;

/// Aggregate health report for the readiness endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EnginesHealth {
    pub healthy: bool,
    pub database: bool,
    pub vector_store: bool,
    pub indexed_points: u64,
    pub products: i64,
}

pub struct SearchEngines {
    pub config: RuntimeConfig,
    pub embedder: Arc<dyn Embedder>,
    pub vector_store: Arc<dyn VectorStore>,
    pub metadata: Arc<MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub orchestrator: Arc<QueryOrchestrator>,
    pub indexer: Arc<IncrementalIndexer>,
}

impl SearchEngines {
    /// Wire the production backends: CLIP sidecar, Qdrant, sqlite and the
    /// marketplace CDN. Ensures the vector collection exists before
    /// returning.
    pub async fn initialize(config: RuntimeConfig) -> SearchResult<Self> {
        tracing::info!("🚀 initializing search engines");

        let embedder: Arc<dyn Embedder> =
            Arc::new(ClipHttpEmbedder::new(&config.embedding, config.vector.dimension)?);
        let vector_store: Arc<dyn VectorStore> = Arc::new(QdrantVectorStore::new(&config.vector)?);
        let objects: Arc<dyn ObjectStore> = Arc::new(
            CdnClient::new(cdn_config_from_env())
                .map_err(|e| crate::errors::SearchError::config(&e.to_string()))?,
        );
        let metadata = Arc::new(MetadataStore::connect(&config.database).await?);

        vector_store
            .ensure_collection(config.vector.dimension, Distance::Cosine)
            .await?;

        Ok(Self::with_backends(
            config,
            embedder,
            vector_store,
            metadata,
            objects,
        )?)
    }

    /// Assemble the container from pre-built backends.
    pub fn with_backends(
        config: RuntimeConfig,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        metadata: Arc<MetadataStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> SearchResult<Self> {
        let orchestrator = Arc::new(QueryOrchestrator::new(
            embedder.clone(),
            vector_store.clone(),
            metadata.clone(),
            objects.clone(),
            ImagePolicy::from(&config.ingestion),
            &config.api,
        ));

        let indexer = Arc::new(IncrementalIndexer::new(
            objects.clone(),
            embedder.clone(),
            vector_store.clone(),
            metadata.clone(),
            config.ingestion.clone(),
        )?);

        Ok(Self {
            config,
            embedder,
            vector_store,
            metadata,
            objects,
            orchestrator,
            indexer,
        })
    }

    /// Start the webhook worker pool.
    pub fn start_event_queue(&self) -> EventQueue {
        EventQueue::start(self.indexer.clone(), &self.config.webhook)
    }

    /// Build a sync pipeline sharing this container's backends.
    pub fn sync_pipeline(&self) -> SyncPipeline {
        SyncPipeline::new(
            self.objects.clone(),
            self.embedder.clone(),
            self.vector_store.clone(),
            self.metadata.clone(),
            self.config.ingestion.clone(),
        )
    }

    /// Probe both stores. Failures degrade the report instead of erroring
    /// so the health endpoint always answers.
    pub async fn health_check(&self) -> EnginesHealth {
        let products = self.metadata.count_products().await;
        let collection = self.vector_store.collection_info().await;

        let database = products.is_ok();
        let vector_store = collection.is_ok();

        EnginesHealth {
            healthy: database && vector_store,
            database,
            vector_store,
            indexed_points: collection.map(|info| info.points).unwrap_or(0),
            products: products.unwrap_or(0),
        }
    }
}
