//! Runtime configuration, loaded from `VISEARCH_*` environment variables
//! with sensible defaults for local development.

use std::env;
use std::path::PathBuf;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// HTTP API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for uploaded query images, in bytes.
    pub max_upload_bytes: usize,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: env_string("VISEARCH_API_HOST", "0.0.0.0"),
            port: env_parse("VISEARCH_API_PORT", 8000),
            max_upload_bytes: 10 * 1024 * 1024,
            default_limit: 20,
            max_limit: 100,
        }
    }
}

/// Metadata store settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let default_path = PathBuf::from(home).join(".visearch").join("products.db");
        let default_url = format!("sqlite://{}", default_path.display());

        Self {
            url: env_string("VISEARCH_DATABASE_URL", &default_url),
            max_connections: env_parse("VISEARCH_DATABASE_MAX_CONNECTIONS", 10),
            connection_timeout_seconds: 30,
        }
    }
}

/// Vector similarity engine settings.
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub url: String,
    pub collection: String,
    pub dimension: usize,
    pub timeout_seconds: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: env_string("VISEARCH_QDRANT_URL", "http://localhost:6333"),
            collection: env_string("VISEARCH_COLLECTION", "product_embeddings"),
            dimension: env_parse("VISEARCH_VECTOR_DIM", 512),
            timeout_seconds: 30,
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub service_url: String,
    /// `auto`, `cpu` or `cuda`; forwarded to the inference service.
    pub device: String,
    pub batch_size: usize,
    /// Maximum concurrent inference requests; the accelerator is
    /// effectively single-writer, so this stays small.
    pub max_inflight: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            service_url: env_string("VISEARCH_EMBED_URL", "http://localhost:8501"),
            device: env_string("VISEARCH_EMBED_DEVICE", "auto"),
            batch_size: env_parse("VISEARCH_EMBED_BATCH", 32),
            max_inflight: env_parse("VISEARCH_EMBED_INFLIGHT", 2),
            timeout_seconds: 120,
        }
    }
}

/// Bulk ingestion settings.
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Write batch for the two stores. Sized to stay under store request
    /// limits; independent from (and much larger than) the embed batch.
    pub store_batch_size: usize,
    /// Flush the checkpoint every this many newly-succeeded items.
    pub checkpoint_every: usize,
    pub checkpoint_path: PathBuf,
    /// Namespace prefix for external ids derived from source product ids.
    pub external_id_prefix: String,
    pub min_image_bytes: usize,
    pub max_image_bytes: usize,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let checkpoint = PathBuf::from(home)
            .join(".visearch")
            .join("sync_checkpoint.json");

        Self {
            store_batch_size: env_parse("VISEARCH_STORE_BATCH", 256),
            checkpoint_every: env_parse("VISEARCH_CHECKPOINT_EVERY", 200),
            checkpoint_path: env::var("VISEARCH_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or(checkpoint),
            external_id_prefix: env_string("VISEARCH_ID_PREFIX", "mkt_"),
            min_image_bytes: 1024,
            max_image_bytes: 20 * 1024 * 1024,
            min_dimension: 50,
            max_dimension: 2048,
        }
    }
}

/// Build the CDN client settings from the environment.
pub fn cdn_config_from_env() -> cdn_store::CdnConfig {
    cdn_store::CdnConfig {
        api_url: env_string("VISEARCH_CDN_URL", "http://localhost:9000"),
        bucket: env_string("VISEARCH_CDN_BUCKET", "product-images"),
        access_key: env_string("VISEARCH_CDN_ACCESS_KEY", ""),
        secret_key: env_string("VISEARCH_CDN_SECRET_KEY", ""),
        timeout_seconds: 30,
        page_size: env_parse("VISEARCH_CDN_PAGE_SIZE", 1000),
    }
}

/// Webhook intake settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared HMAC secret; empty means signature checking is disabled
    /// (accepted with an operational warning).
    pub secret: String,
    pub queue_capacity: usize,
    pub workers: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: env_string("VISEARCH_WEBHOOK_SECRET", ""),
            queue_capacity: env_parse("VISEARCH_WEBHOOK_QUEUE", 1024),
            workers: env_parse("VISEARCH_WEBHOOK_WORKERS", 2),
            max_attempts: env_parse("VISEARCH_WEBHOOK_ATTEMPTS", 3),
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub vector: VectorStoreConfig,
    pub embedding: EmbeddingConfig,
    pub ingestion: IngestionConfig,
    pub webhook: WebhookConfig,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::default()
    }
}
