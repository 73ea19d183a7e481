use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A product record as stored in the metadata store.
///
/// `external_id` is the stable identity shared with the vector store;
/// rows are only removed through an explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_ref: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating (or fully replacing) a product row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductDraft {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_ref: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_ref: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl ProductUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.price.is_none()
            && self.currency.is_none()
            && self.image_ref.is_none()
            && self.metadata.is_none()
    }
}

/// A single ranked search result returned to API consumers.
///
/// `similarity_score` is clamped into [0, 1] at the response boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_ref: Option<String>,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query_time_ms: u64,
    pub results_count: usize,
    pub results: Vec<SearchHit>,
}

/// Webhook event types delivered by the upstream marketplace.
///
/// Adding a new event means extending this enum and the dispatcher match,
/// not comparing strings at call sites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    #[serde(rename = "product.created")]
    ProductCreated,
    #[serde(rename = "product.updated")]
    ProductUpdated,
    #[serde(rename = "product.deleted")]
    ProductDeleted,
    #[serde(rename = "product.image.updated")]
    ProductImageUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProductCreated => "product.created",
            EventKind::ProductUpdated => "product.updated",
            EventKind::ProductDeleted => "product.deleted",
            EventKind::ProductImageUpdated => "product.image.updated",
        }
    }
}

/// Product fields carried inside a webhook event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductEventData {
    pub product_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image_url: Option<String>,
    pub image_key: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Inbound webhook envelope. Consumed once by the incremental indexer;
/// not persisted beyond task-queue retry state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_type: EventKind,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: ProductEventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Acknowledgement returned by the webhook endpoint after queueing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAck {
    pub success: bool,
    pub message: String,
    pub event_id: String,
}

/// Final accounting of one ingestion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IngestReport {
    /// Objects seen in the bucket listing.
    pub listed: usize,
    /// Unique products selected (main image, deduped).
    pub selected: usize,
    /// Skipped because the product already exists (metadata or checkpoint).
    pub skipped_existing: usize,
    pub downloaded: usize,
    /// Rejected by image validation.
    pub rejected: usize,
    pub embed_failed: usize,
    pub store_failed: usize,
    pub succeeded: usize,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip() {
        let raw = r#"{
            "event_type": "product.created",
            "event_id": "e1",
            "timestamp": "2025-03-01T12:00:00Z",
            "data": {
                "product_id": "4711",
                "title": "Blue sneakers",
                "image_key": "4711/main_1.jpg"
            }
        }"#;

        let event: WebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, EventKind::ProductCreated);
        assert_eq!(event.event_id, "e1");
        assert_eq!(event.data.product_id, "4711");
        assert_eq!(event.data.image_key.as_deref(), Some("4711/main_1.jpg"));
        assert!(event.signature.is_none());
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let raw = r#"{
            "event_type": "product.archived",
            "event_id": "e2",
            "timestamp": "2025-03-01T12:00:00Z",
            "data": { "product_id": "1" }
        }"#;

        assert!(serde_json::from_str::<WebhookEvent>(raw).is_err());
    }

    #[test]
    fn test_empty_update_detection() {
        assert!(ProductUpdate::default().is_empty());
        let update = ProductUpdate {
            title: Some("New title".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
