//! Metadata store: product records over sqlite.
//!
//! CRUD keyed by `external_id` (unique). The schema is created by an
//! idempotent migration at connect time.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::config::DatabaseConfig;
use crate::errors::{SearchError, SearchResult};
use crate::types::{Product, ProductDraft, ProductUpdate};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT,
    category TEXT,
    price REAL,
    currency TEXT,
    image_ref TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
CREATE INDEX IF NOT EXISTS idx_products_created_at ON products(created_at);
"#;

pub struct MetadataStore {
    pool: SqlitePool,
}

fn row_to_product(row: &SqliteRow) -> SearchResult<Product> {
    let metadata: String = row.try_get("metadata")?;
    let metadata: Map<String, Value> = serde_json::from_str(&metadata).unwrap_or_default();

    Ok(Product {
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        image_ref: row.try_get("image_ref")?,
        metadata,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

impl MetadataStore {
    /// Connect and run migrations.
    pub async fn connect(config: &DatabaseConfig) -> SearchResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| SearchError::config(&format!("invalid database url: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(url = %config.url, "metadata store initialized");
        Ok(store)
    }

    async fn migrate(&self) -> SearchResult<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert a new product. Fails on a duplicate `external_id`.
    pub async fn create_product(&self, draft: &ProductDraft) -> SearchResult<Product> {
        let now = Utc::now();
        let metadata = serde_json::to_string(&draft.metadata)?;

        sqlx::query(
            "INSERT INTO products \
             (external_id, title, description, category, price, currency, image_ref, metadata, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&draft.external_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.category)
        .bind(draft.price)
        .bind(&draft.currency)
        .bind(&draft.image_ref)
        .bind(&metadata)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(external_id = %draft.external_id, "created product");
        self.get_product(&draft.external_id)
            .await?
            .ok_or_else(|| SearchError::database("created product row not readable"))
    }

    /// Insert or fully replace a product row keyed by `external_id`.
    ///
    /// The retry-heavy paths (ingestion, webhooks) use this so that a
    /// redelivered event can never trip over the unique constraint.
    pub async fn upsert_product(&self, draft: &ProductDraft) -> SearchResult<Product> {
        let now = Utc::now();
        let metadata = serde_json::to_string(&draft.metadata)?;

        sqlx::query(
            "INSERT INTO products \
             (external_id, title, description, category, price, currency, image_ref, metadata, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(external_id) DO UPDATE SET \
               title = excluded.title, \
               description = excluded.description, \
               category = excluded.category, \
               price = excluded.price, \
               currency = excluded.currency, \
               image_ref = excluded.image_ref, \
               metadata = excluded.metadata, \
               updated_at = excluded.updated_at",
        )
        .bind(&draft.external_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.category)
        .bind(draft.price)
        .bind(&draft.currency)
        .bind(&draft.image_ref)
        .bind(&metadata)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_product(&draft.external_id)
            .await?
            .ok_or_else(|| SearchError::database("upserted product row not readable"))
    }

    pub async fn get_product(&self, external_id: &str) -> SearchResult<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_product).transpose()
    }

    /// Paginated listing, newest first, optionally filtered by category.
    pub async fn list_products(
        &self,
        limit: i64,
        offset: i64,
        category: Option<&str>,
    ) -> SearchResult<Vec<Product>> {
        let rows = match category {
            Some(category) => {
                sqlx::query(
                    "SELECT * FROM products WHERE category = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(category)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM products ORDER BY created_at DESC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_product).collect()
    }

    pub async fn count_products(&self) -> SearchResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Partial update; bumps `updated_at`. Returns `None` when no row
    /// matches.
    pub async fn update_product(
        &self,
        external_id: &str,
        update: &ProductUpdate,
    ) -> SearchResult<Option<Product>> {
        let Some(current) = self.get_product(external_id).await? else {
            return Ok(None);
        };

        let metadata = update.metadata.clone().unwrap_or(current.metadata);
        let metadata = serde_json::to_string(&metadata)?;

        sqlx::query(
            "UPDATE products SET \
               title = ?, description = ?, category = ?, price = ?, currency = ?, \
               image_ref = ?, metadata = ?, updated_at = ? \
             WHERE external_id = ?",
        )
        .bind(update.title.as_ref().unwrap_or(&current.title))
        .bind(update.description.as_ref().or(current.description.as_ref()))
        .bind(update.category.as_ref().or(current.category.as_ref()))
        .bind(update.price.or(current.price))
        .bind(update.currency.as_ref().or(current.currency.as_ref()))
        .bind(update.image_ref.as_ref().or(current.image_ref.as_ref()))
        .bind(&metadata)
        .bind(Utc::now())
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(external_id, "updated product");
        self.get_product(external_id).await
    }

    /// Hard delete. Returns whether a row existed; callers treat `false`
    /// as a warning, not a failure.
    pub async fn delete_product(&self, external_id: &str) -> SearchResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE external_id = ?")
            .bind(external_id)
            .execute(&self.pool)
            .await?;

        let found = result.rows_affected() > 0;
        if found {
            tracing::debug!(external_id, "deleted product");
        } else {
            tracing::warn!(external_id, "product not found for deletion");
        }
        Ok(found)
    }

    /// External ids of all stored products; used by the sync pipeline to
    /// skip work that is already done.
    pub async fn existing_external_ids(&self) -> SearchResult<Vec<String>> {
        let rows = sqlx::query("SELECT external_id FROM products")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("external_id").map_err(SearchError::from))
            .collect()
    }
}
