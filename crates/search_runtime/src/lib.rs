/*!
# Search Runtime

Visual product search: CLIP embeddings over product images, a vector
store for similarity and a relational store for product metadata, fed by
bulk ingestion from the image bucket and kept current by marketplace
webhooks.

## Architecture

- **Embedding**: HTTP client for the CLIP sidecar plus a deterministic
  in-process stand-in for tests.
- **Vector store**: Qdrant over REST and an in-memory twin. Point ids
  are UUIDv5 of the external id, making every write idempotent.
- **Metadata**: product rows in sqlite, keyed by external id.
- **Ingestion**: checkpointed bulk sync from the CDN bucket.
- **Indexer**: webhook-driven incremental updates with retry.
- **Search**: query orchestration joining vector hits with metadata.
*/

pub mod config;
pub mod engines;
pub mod errors;
pub mod http;
pub mod types;

pub use config::RuntimeConfig;
pub use engines::SearchEngines;
pub use errors::{SearchError, SearchResult};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
