//! HTTP API: search, webhook intake, product CRUD and operational
//! endpoints.
//!
//! Handlers stay thin; they translate HTTP in and out of the engine
//! container and map [`SearchError`] codes onto status codes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engines::indexer::{signature, EventQueue};
use crate::engines::search::QueryOptions;
use crate::engines::SearchEngines;
use crate::errors::{ErrorCode, SearchError};
use crate::types::{ProductDraft, ProductUpdate, WebhookAck, WebhookEvent};

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Clone)]
pub struct AppState {
    pub engines: Arc<SearchEngines>,
    pub queue: Arc<EventQueue>,
}

/// Error envelope returned for every non-2xx response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

struct ApiError(SearchError);

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::SignatureInvalid => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidEvent
            | ErrorCode::ValidationFailed
            | ErrorCode::ImageTooSmall
            | ErrorCode::UnsupportedFormat
            | ErrorCode::CorruptImage => StatusCode::BAD_REQUEST,
            ErrorCode::ImageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::DatabaseError if self.0.message.contains("UNIQUE") => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: self.0.message,
            code: format!("{:?}", self.0.code),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let max_upload = state.engines.config.api.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/index/info", get(index_info))
        .route("/api/v1/search/by-text", post(search_by_text))
        .route("/api/v1/search/by-image", post(search_by_image))
        .route("/api/v1/search/similar/:external_id", get(search_similar))
        .route("/api/v1/webhooks/market", post(webhook))
        .route("/api/v1/products", post(create_product).get(list_products))
        .route(
            "/api/v1/products/:external_id",
            get(get_product).patch(update_product).delete(delete_product),
        )
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    let report = state.engines.health_check().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn index_info(State(state): State<AppState>) -> Result<Response, ApiError> {
    let info = state.engines.vector_store.collection_info().await?;
    Ok(Json(info).into_response())
}

#[derive(Debug, Deserialize)]
struct TextSearchRequest {
    query: String,
    limit: Option<usize>,
    score_threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    limit: Option<usize>,
    score_threshold: Option<f32>,
}

async fn search_by_text(
    State(state): State<AppState>,
    Json(request): Json<TextSearchRequest>,
) -> Result<Response, ApiError> {
    let options = QueryOptions {
        limit: state.engines.orchestrator.clamp_limit(request.limit),
        score_threshold: request.score_threshold.unwrap_or(0.0),
    };

    let response = state
        .engines
        .orchestrator
        .search_by_text(&request.query, options)
        .await?;
    Ok(Json(response).into_response())
}

async fn search_by_image(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(content_type) = headers.get("content-type").and_then(|v| v.to_str().ok()) {
        if !content_type.starts_with("image/")
            && content_type != "application/octet-stream"
        {
            return Err(SearchError::validation(
                ErrorCode::UnsupportedFormat,
                &format!("unsupported content type: {}", content_type),
            )
            .into());
        }
    }

    let options = QueryOptions {
        limit: state.engines.orchestrator.clamp_limit(params.limit),
        score_threshold: params.score_threshold.unwrap_or(0.0),
    };

    let response = state
        .engines
        .orchestrator
        .search_by_image(&body, options)
        .await?;
    Ok(Json(response).into_response())
}

async fn search_similar(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let options = QueryOptions {
        limit: state.engines.orchestrator.clamp_limit(params.limit),
        score_threshold: params.score_threshold.unwrap_or(0.0),
    };

    let response = state
        .engines
        .orchestrator
        .search_similar(&external_id, options)
        .await?;
    Ok(Json(response).into_response())
}

/// Webhook intake: verify, parse, enqueue, acknowledge. Processing is
/// asynchronous; a 200 here only means the event was accepted.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    signature::verify(&body, provided, &state.engines.config.webhook.secret)?;

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        SearchError::new(
            ErrorCode::InvalidEvent,
            crate::errors::ErrorCategory::Ingestion,
            crate::errors::ErrorSeverity::Low,
            &format!("unparseable event: {}", e),
        )
    })?;

    let event_id = event.event_id.clone();
    state.queue.enqueue(event).await?;

    Ok(Json(WebhookAck {
        success: true,
        message: "event queued".to_string(),
        event_id,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
    offset: Option<i64>,
    category: Option<String>,
}

async fn create_product(
    State(state): State<AppState>,
    Json(draft): Json<ProductDraft>,
) -> Result<Response, ApiError> {
    let product = state.engines.metadata.create_product(&draft).await?;
    Ok((StatusCode::CREATED, Json(product)).into_response())
}

async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let limit = params
        .limit
        .unwrap_or(state.engines.config.api.default_limit as i64)
        .clamp(1, state.engines.config.api.max_limit as i64);
    let offset = params.offset.unwrap_or(0).max(0);

    let products = state
        .engines
        .metadata
        .list_products(limit, offset, params.category.as_deref())
        .await?;
    Ok(Json(products).into_response())
}

async fn get_product(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Response, ApiError> {
    let product = state
        .engines
        .metadata
        .get_product(&external_id)
        .await?
        .ok_or_else(|| SearchError::not_found(&format!("product '{}' not found", external_id)))?;
    Ok(Json(product).into_response())
}

async fn update_product(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
    Json(update): Json<ProductUpdate>,
) -> Result<Response, ApiError> {
    let product = state
        .engines
        .metadata
        .update_product(&external_id, &update)
        .await?
        .ok_or_else(|| SearchError::not_found(&format!("product '{}' not found", external_id)))?;
    Ok(Json(product).into_response())
}

async fn delete_product(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Response, ApiError> {
    let found = state.engines.metadata.delete_product(&external_id).await?;
    // The vector may or may not exist; deletion there is tolerant.
    state.engines.vector_store.delete(&[external_id.clone()]).await?;

    if found {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(SearchError::not_found(&format!("product '{}' not found", external_id)).into())
    }
}
