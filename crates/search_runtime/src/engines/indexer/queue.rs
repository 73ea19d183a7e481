//! Bounded in-process event queue with worker tasks.
//!
//! The webhook endpoint enqueues and returns immediately; workers drain
//! the queue and run each event through the indexer under the retry
//! policy. Events that exhaust their attempts are logged and dropped,
//! never retried forever.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::retry::{run_with_retry, RetryPolicy};
use super::IncrementalIndexer;
use crate::config::WebhookConfig;
use crate::errors::{ErrorCategory, ErrorCode, ErrorSeverity, SearchError, SearchResult};
use crate::types::WebhookEvent;

pub struct EventQueue {
    tx: mpsc::Sender<WebhookEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl EventQueue {
    /// Spawn the worker pool and return the queue handle.
    pub fn start(indexer: Arc<IncrementalIndexer>, config: &WebhookConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let policy = RetryPolicy::from(config);

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let indexer = indexer.clone();
                tokio::spawn(async move {
                    loop {
                        let event = { rx.lock().await.recv().await };
                        let Some(event) = event else {
                            tracing::debug!(worker_id, "event queue closed, worker exiting");
                            break;
                        };
                        Self::process(&indexer, policy, event, worker_id).await;
                    }
                })
            })
            .collect();

        tracing::info!(
            workers = config.workers.max(1),
            capacity = config.queue_capacity,
            "🚀 event workers started"
        );

        Self { tx, workers }
    }

    async fn process(
        indexer: &IncrementalIndexer,
        policy: RetryPolicy,
        event: WebhookEvent,
        worker_id: usize,
    ) {
        let label = format!("{}:{}", event.event_type.as_str(), event.event_id);
        let result = run_with_retry(policy, &label, || indexer.handle_event(&event)).await;

        if let Err(err) = result {
            tracing::error!(
                worker_id,
                event_id = %event.event_id,
                event_type = event.event_type.as_str(),
                error = %err,
                "❌ event dropped after exhausting retries"
            );
        }
    }

    /// Enqueue an event for asynchronous processing. Applies backpressure
    /// while the queue is full.
    pub async fn enqueue(&self, event: WebhookEvent) -> SearchResult<()> {
        self.tx.send(event).await.map_err(|_| {
            SearchError::new(
                ErrorCode::QueueClosed,
                ErrorCategory::System,
                ErrorSeverity::High,
                "event queue is closed",
            )
        })
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, IngestionConfig};
    use crate::engines::embedding::HashEmbedder;
    use crate::engines::metadata::MetadataStore;
    use crate::engines::vector_store::{Distance, InMemoryVectorStore, VectorStore};
    use crate::types::{EventKind, ProductEventData};
    use cdn_store::MemoryObjectStore;
    use chrono::Utc;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    async fn build_indexer() -> (Arc<IncrementalIndexer>, Arc<MetadataStore>) {
        let objects = Arc::new(MemoryObjectStore::new());
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, image::Rgb([5, 5, 5])));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        objects.put_object("42/main_1.jpg", bytes);

        let vector_store = Arc::new(InMemoryVectorStore::new("queue-test"));
        vector_store
            .ensure_collection(16, Distance::Cosine)
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

        let indexer = Arc::new(
            IncrementalIndexer::new(
                objects,
                Arc::new(HashEmbedder::new(16)),
                vector_store,
                metadata.clone(),
                IngestionConfig {
                    min_image_bytes: 16,
                    ..Default::default()
                },
            )
            .unwrap(),
        );

        (indexer, metadata)
    }

    #[tokio::test]
    async fn test_enqueued_event_is_processed_by_a_worker() {
        let (indexer, metadata) = build_indexer().await;
        let queue = EventQueue::start(
            indexer,
            &WebhookConfig {
                workers: 2,
                queue_capacity: 8,
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 2,
                secret: String::new(),
            },
        );

        queue
            .enqueue(WebhookEvent {
                event_type: EventKind::ProductCreated,
                event_id: "e1".to_string(),
                timestamp: Utc::now(),
                data: ProductEventData {
                    product_id: "42".to_string(),
                    title: Some("Desk lamp".to_string()),
                    image_key: Some("42/main_1.jpg".to_string()),
                    ..Default::default()
                },
                signature: None,
            })
            .await
            .unwrap();

        // Drain before asserting.
        queue.shutdown().await;

        let product = metadata.get_product("mkt_42").await.unwrap().unwrap();
        assert_eq!(product.title, "Desk lamp");
    }

    #[tokio::test]
    async fn test_failing_event_is_dropped_and_queue_keeps_going() {
        let (indexer, metadata) = build_indexer().await;
        let queue = EventQueue::start(
            indexer,
            &WebhookConfig {
                workers: 1,
                queue_capacity: 8,
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 2,
                secret: String::new(),
            },
        );

        let event = |id: &str, key: &str| WebhookEvent {
            event_type: EventKind::ProductCreated,
            event_id: id.to_string(),
            timestamp: Utc::now(),
            data: ProductEventData {
                product_id: id.to_string(),
                image_key: Some(key.to_string()),
                ..Default::default()
            },
            signature: None,
        };

        // First event references a missing object and will be dropped;
        // the second must still go through.
        queue.enqueue(event("99", "99/missing_1.jpg")).await.unwrap();
        queue.enqueue(event("42", "42/main_1.jpg")).await.unwrap();
        queue.shutdown().await;

        assert!(metadata.get_product("mkt_99").await.unwrap().is_none());
        assert!(metadata.get_product("mkt_42").await.unwrap().is_some());
    }
}
