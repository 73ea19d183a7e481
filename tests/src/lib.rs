//! Shared fixtures for the integration test suite.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, RgbImage};

use cdn_store::{MemoryObjectStore, ObjectStore};
use search_runtime::config::{DatabaseConfig, IngestionConfig, RuntimeConfig, WebhookConfig};
use search_runtime::engines::embedding::{Embedder, HashEmbedder};
use search_runtime::engines::metadata::MetadataStore;
use search_runtime::engines::vector_store::{Distance, InMemoryVectorStore, VectorStore};
use search_runtime::SearchEngines;

pub const DIM: usize = 32;

/// Valid JPEG bytes; `seed` varies the pixels so products differ.
pub fn jpeg_bytes(seed: u8) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(96, 96, |x, y| {
        image::Rgb([seed, (x % 256) as u8, (y % 256) as u8])
    }));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .expect("jpeg encoding");
    bytes
}

pub struct TestStack {
    pub engines: Arc<SearchEngines>,
    pub objects: Arc<MemoryObjectStore>,
}

/// Engine container over fully in-process backends.
pub async fn memory_engines(secret: &str, checkpoint: &std::path::Path) -> TestStack {
    let objects = Arc::new(MemoryObjectStore::new());
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(DIM));
    let vector_store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new("test"));
    vector_store
        .ensure_collection(DIM, Distance::Cosine)
        .await
        .expect("collection");

    let metadata = Arc::new(
        MetadataStore::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            connection_timeout_seconds: 5,
        })
        .await
        .expect("metadata store"),
    );

    let config = RuntimeConfig {
        ingestion: IngestionConfig {
            checkpoint_path: checkpoint.to_path_buf(),
            checkpoint_every: 2,
            min_image_bytes: 16,
            store_batch_size: 3,
            ..Default::default()
        },
        webhook: WebhookConfig {
            secret: secret.to_string(),
            workers: 1,
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        },
        ..Default::default()
    };

    let engines = Arc::new(
        SearchEngines::with_backends(
            config,
            embedder,
            vector_store,
            metadata,
            objects.clone() as Arc<dyn ObjectStore>,
        )
        .expect("engines"),
    );

    TestStack { engines, objects }
}

pub fn temp_checkpoint(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "visearch-it-{}-{}.json",
        name,
        std::process::id()
    ))
}
