use serde::{Deserialize, Serialize};
use std::fmt;

/// Main result type for search runtime operations
pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ErrorCode {
    // General Errors
    Unknown,
    Timeout,
    ConfigError,
    InitializationFailed,

    // Ingestion Errors
    DownloadFailed,
    ValidationFailed,
    ImageTooSmall,
    ImageTooLarge,
    UnsupportedFormat,
    CorruptImage,
    CheckpointError,

    // Embedding Errors
    EmbeddingFailed,
    EmbeddingServiceError,
    DimensionMismatch,

    // Storage Errors
    VectorStoreError,
    DatabaseError,
    StoreWriteFailed,
    NotFound,

    // Webhook Errors
    SignatureInvalid,
    InvalidEvent,
    QueueClosed,

    // Network Errors
    NetworkError,
    UpstreamServiceError,

    // Serialization Errors
    SerializationError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ErrorCategory {
    System,
    Configuration,
    Ingestion,
    Embedding,
    Storage,
    Network,
    Security,
    Search,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct SearchError {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
}

impl SearchError {
    pub fn new(
        code: ErrorCode,
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: &str,
    ) -> Self {
        Self {
            code,
            category,
            severity,
            message: message.to_string(),
        }
    }

    /// Errors worth another attempt: transient network and store failures.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::Timeout
                | ErrorCode::NetworkError
                | ErrorCode::UpstreamServiceError
                | ErrorCode::EmbeddingServiceError
                | ErrorCode::StoreWriteFailed
                | ErrorCode::VectorStoreError
                | ErrorCode::DatabaseError
                | ErrorCode::DownloadFailed
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.code, ErrorCode::NotFound)
    }

    /// Creates a "not found" error
    pub fn not_found(message: &str) -> Self {
        Self::new(
            ErrorCode::NotFound,
            ErrorCategory::Storage,
            ErrorSeverity::Low,
            message,
        )
    }

    /// Creates a validation error for a rejected image
    pub fn validation(code: ErrorCode, message: &str) -> Self {
        Self::new(code, ErrorCategory::Ingestion, ErrorSeverity::Low, message)
    }

    /// Creates an embedding error
    pub fn embedding(message: &str) -> Self {
        Self::new(
            ErrorCode::EmbeddingFailed,
            ErrorCategory::Embedding,
            ErrorSeverity::Medium,
            message,
        )
    }

    /// Creates a vector store error
    pub fn vector_store(message: &str) -> Self {
        Self::new(
            ErrorCode::VectorStoreError,
            ErrorCategory::Storage,
            ErrorSeverity::High,
            message,
        )
    }

    /// Creates a relational store error
    pub fn database(message: &str) -> Self {
        Self::new(
            ErrorCode::DatabaseError,
            ErrorCategory::Storage,
            ErrorSeverity::High,
            message,
        )
    }

    /// Creates a webhook signature error
    pub fn signature(message: &str) -> Self {
        Self::new(
            ErrorCode::SignatureInvalid,
            ErrorCategory::Security,
            ErrorSeverity::High,
            message,
        )
    }

    /// Creates a download error
    pub fn download(message: &str) -> Self {
        Self::new(
            ErrorCode::DownloadFailed,
            ErrorCategory::Network,
            ErrorSeverity::Medium,
            message,
        )
    }

    /// Creates a configuration error
    pub fn config(message: &str) -> Self {
        Self::new(
            ErrorCode::ConfigError,
            ErrorCategory::Configuration,
            ErrorSeverity::Critical,
            message,
        )
    }
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.category, self.code, self.message)
    }
}

impl std::error::Error for SearchError {}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::new(
            ErrorCode::SerializationError,
            ErrorCategory::System,
            ErrorSeverity::Medium,
            &format!("JSON serialization error: {}", err),
        )
    }
}

impl From<sqlx::Error> for SearchError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => SearchError::not_found("row not found"),
            other => SearchError::database(&format!("database error: {}", other)),
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::Timeout
        } else {
            ErrorCode::NetworkError
        };
        SearchError::new(
            code,
            ErrorCategory::Network,
            ErrorSeverity::Medium,
            &format!("HTTP request failed: {}", err),
        )
    }
}

impl From<cdn_store::StoreError> for SearchError {
    fn from(err: cdn_store::StoreError) -> Self {
        match err {
            cdn_store::StoreError::NotFound(key) => {
                SearchError::not_found(&format!("object not found: {}", key))
            }
            other => SearchError::download(&format!("object store error: {}", other)),
        }
    }
}
