//! Bulk ingestion/sync pipeline.
//!
//! Lists the remote image bucket, selects one main image per product,
//! validates and normalizes the bytes, embeds them in encoder-sized
//! batches and upserts vectors plus metadata rows in store-sized
//! batches, checkpointing progress along the way.
//!
//! The pipeline is a single sequential flow to bound memory and
//! accelerator contention. It is not safe to run two instances against
//! the same checkpoint file.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde_json::{Map, Value};

use cdn_store::ObjectStore;

use crate::config::IngestionConfig;
use crate::engines::embedding::Embedder;
use crate::engines::metadata::MetadataStore;
use crate::engines::vector_store::VectorStore;
use crate::errors::SearchResult;
use crate::types::{IngestReport, ProductDraft};

pub mod checkpoint;
pub mod image;

pub use checkpoint::Checkpoint;
pub use image::{validate_and_normalize, ImagePolicy, NormalizedImage};

/// One year; presigned URLs stored in product rows should outlive any
/// reasonable re-sync interval.
const PRESIGN_TTL_SECS: u64 = 31_536_000;

/// Derive the product id from the bucket path convention
/// (`{product_id}/{filename}`).
pub fn extract_product_id(object_key: &str) -> Option<&str> {
    let mut parts = object_key.splitn(2, '/');
    let id = parts.next()?;
    // A bare filename without a folder carries no product id.
    parts.next()?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Whether this object is the product's main image: stem ends in `_1`,
/// or carries no `_N` variant suffix at all.
pub fn is_main_image(object_key: &str) -> bool {
    let filename = object_key.rsplit('/').next().unwrap_or(object_key);
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);

    if stem.ends_with("_1") {
        return true;
    }
    !(2..10).any(|n| stem.ends_with(&format!("_{}", n)))
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Cap on the number of products to process (test runs).
    pub limit: Option<usize>,
    /// Re-process products that already exist in the stores.
    pub reindex: bool,
    /// Restrict the bucket listing to this prefix.
    pub prefix: Option<String>,
}

struct Candidate {
    external_id: String,
    key: String,
}

pub struct SyncPipeline {
    objects: Arc<dyn ObjectStore>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    metadata: Arc<MetadataStore>,
    config: IngestionConfig,
}

impl SyncPipeline {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        metadata: Arc<MetadataStore>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            objects,
            embedder,
            vector_store,
            metadata,
            config,
        }
    }

    /// Run one full sync pass.
    pub async fn run(&self, options: &SyncOptions) -> SearchResult<IngestReport> {
        let started = Instant::now();
        let mut report = IngestReport::default();
        let mut checkpoint =
            Checkpoint::load(&self.config.checkpoint_path, self.config.checkpoint_every)?;

        let candidates = self
            .select_candidates(options, &mut report, &checkpoint)
            .await?;
        tracing::info!(
            listed = report.listed,
            selected = report.selected,
            skipped = report.skipped_existing,
            "bucket listing complete"
        );

        let policy = ImagePolicy::from(&self.config);

        // Store-sized batches bound both memory and request size; the
        // embedder re-chunks each batch down to its own batch size.
        for batch in candidates.chunks(self.config.store_batch_size.max(1)) {
            let mut ids: Vec<String> = Vec::new();
            let mut images: Vec<Bytes> = Vec::new();
            let mut keys: Vec<String> = Vec::new();

            for candidate in batch {
                let bytes = match self.objects.get_object(&candidate.key).await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::warn!(key = %candidate.key, error = %err, "download failed");
                        continue;
                    }
                };
                report.downloaded += 1;

                match validate_and_normalize(&bytes, &policy) {
                    Ok(normalized) => {
                        ids.push(candidate.external_id.clone());
                        images.push(Bytes::from(normalized.jpeg));
                        keys.push(candidate.key.clone());
                    }
                    Err(err) => {
                        report.rejected += 1;
                        tracing::warn!(key = %candidate.key, error = %err, "image rejected");
                    }
                }
            }

            if ids.is_empty() {
                continue;
            }

            let embeddings = self.embedder.embed_image_batch(&images).await?;

            let mut write_ids: Vec<String> = Vec::new();
            let mut write_vectors: Vec<Vec<f32>> = Vec::new();
            let mut write_keys: Vec<String> = Vec::new();
            for ((external_id, embedding), key) in
                ids.into_iter().zip(embeddings.into_iter()).zip(keys)
            {
                match embedding {
                    Some(vector) => {
                        write_ids.push(external_id);
                        write_vectors.push(vector);
                        write_keys.push(key);
                    }
                    None => {
                        report.embed_failed += 1;
                        tracing::warn!(external_id = %external_id, "embedding failed");
                    }
                }
            }

            if write_ids.is_empty() {
                continue;
            }

            // Each batch succeeds or fails on its own; a failure here
            // never invalidates earlier batches, and the whole batch is
            // safe to retry because upsert is idempotent.
            match self
                .write_batch(&write_ids, &write_vectors, &write_keys)
                .await
            {
                Ok(()) => {
                    report.succeeded += write_ids.len();
                    for external_id in &write_ids {
                        checkpoint.record(external_id)?;
                    }
                }
                Err(err) => {
                    report.store_failed += write_ids.len();
                    tracing::error!(error = %err, size = write_ids.len(), "❌ store write batch failed");
                }
            }
        }

        checkpoint.flush()?;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            succeeded = report.succeeded,
            rejected = report.rejected,
            embed_failed = report.embed_failed,
            store_failed = report.store_failed,
            elapsed_ms = report.elapsed_ms,
            "✅ sync run complete"
        );
        Ok(report)
    }

    /// Walk the paginated listing and pick one main image per product,
    /// skipping products that are already indexed unless reindexing.
    async fn select_candidates(
        &self,
        options: &SyncOptions,
        report: &mut IngestReport,
        checkpoint: &Checkpoint,
    ) -> SearchResult<Vec<Candidate>> {
        let existing: HashSet<String> = if options.reindex {
            HashSet::new()
        } else {
            self.metadata.existing_external_ids().await?.into_iter().collect()
        };

        let mut candidates = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut continuation: Option<String> = None;

        'listing: loop {
            let page = self
                .objects
                .list_objects(options.prefix.as_deref(), continuation.as_deref())
                .await?;
            report.listed += page.objects.len();

            for entry in page.objects {
                let Some(product_id) = extract_product_id(&entry.key) else {
                    continue;
                };
                if !is_main_image(&entry.key) || seen.contains(product_id) {
                    continue;
                }
                seen.insert(product_id.to_string());

                let external_id = format!("{}{}", self.config.external_id_prefix, product_id);
                if !options.reindex
                    && (existing.contains(&external_id) || checkpoint.contains(&external_id))
                {
                    report.skipped_existing += 1;
                    continue;
                }

                candidates.push(Candidate {
                    external_id,
                    key: entry.key,
                });
                report.selected += 1;

                if let Some(limit) = options.limit {
                    if candidates.len() >= limit {
                        break 'listing;
                    }
                }
            }

            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(candidates)
    }

    /// Dual write: vectors and metadata rows for one batch.
    async fn write_batch(
        &self,
        external_ids: &[String],
        vectors: &[Vec<f32>],
        keys: &[String],
    ) -> SearchResult<()> {
        let mut payloads: Vec<Map<String, Value>> = Vec::with_capacity(external_ids.len());
        for (external_id, key) in external_ids.iter().zip(keys.iter()) {
            let mut payload = Map::new();
            payload.insert("product_id".to_string(), Value::String(external_id.clone()));
            payload.insert("source".to_string(), Value::String("bulk_sync".to_string()));
            payload.insert("object_key".to_string(), Value::String(key.clone()));
            payloads.push(payload);
        }

        self.vector_store
            .upsert(external_ids, vectors, &payloads)
            .await?;

        for (external_id, key) in external_ids.iter().zip(keys.iter()) {
            let product_id = external_id
                .strip_prefix(&self.config.external_id_prefix)
                .unwrap_or(external_id);

            let image_ref = match self.objects.presigned_url(key, PRESIGN_TTL_SECS).await {
                Ok(url) => url,
                Err(_) => format!("cdn://{}", key),
            };

            let mut metadata = Map::new();
            metadata.insert("source".to_string(), Value::String("bulk_sync".to_string()));
            metadata.insert("object_key".to_string(), Value::String(key.clone()));

            self.metadata
                .upsert_product(&ProductDraft {
                    external_id: external_id.clone(),
                    title: format!("Product {}", product_id),
                    description: None,
                    category: None,
                    price: None,
                    currency: None,
                    image_ref: Some(image_ref),
                    metadata,
                })
                .await?;
        }

        Ok(())
    }
}
