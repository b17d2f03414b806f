//! Structured product-fact storage.
//!
//! The grounded answer path prepends a small fact record (issuer, type,
//! payout timeline, sale status) to the retrieval context. [`FactStore`]
//! is the lookup seam; [`SqliteFactStore`] is the durable backend and
//! [`MemoryFactStore`] backs tests.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::SqlitePool;

use crate::models::ProductFacts;

#[async_trait]
pub trait FactStore: Send + Sync {
    async fn find_by_product_id(&self, product_id: &str) -> Result<Option<ProductFacts>>;
    async fn find_by_product_name(&self, product_name: &str) -> Result<Option<ProductFacts>>;
}

/// SQLite-backed fact store.
pub struct SqliteFactStore {
    pool: SqlitePool,
}

impl SqliteFactStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the facts table. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS product_facts (
                product_id TEXT PRIMARY KEY,
                product_name TEXT NOT NULL,
                issuer_name TEXT NOT NULL DEFAULT '',
                issue_date TEXT NOT NULL DEFAULT '',
                product_type TEXT NOT NULL DEFAULT '',
                payout_timeline TEXT NOT NULL DEFAULT '',
                is_on_sale INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_product_facts_name
             ON product_facts (product_name)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert(&self, product_id: &str, facts: &ProductFacts) -> Result<()> {
        sqlx::query(
            "INSERT INTO product_facts
                (product_id, product_name, issuer_name, issue_date,
                 product_type, payout_timeline, is_on_sale)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(product_id) DO UPDATE SET
                product_name = excluded.product_name,
                issuer_name = excluded.issuer_name,
                issue_date = excluded.issue_date,
                product_type = excluded.product_type,
                payout_timeline = excluded.payout_timeline,
                is_on_sale = excluded.is_on_sale",
        )
        .bind(product_id)
        .bind(&facts.product_name)
        .bind(&facts.issuer_name)
        .bind(&facts.issue_date)
        .bind(&facts.product_type)
        .bind(&facts.payout_timeline)
        .bind(facts.is_on_sale)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_where(&self, column: &str, value: &str) -> Result<Option<ProductFacts>> {
        let sql = format!(
            "SELECT product_name, issuer_name, issue_date, product_type,
                    payout_timeline, is_on_sale
             FROM product_facts WHERE {} = ?1",
            column
        );

        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;

        Ok(row.map(|row| ProductFacts {
            product_name: row.get("product_name"),
            issuer_name: row.get("issuer_name"),
            issue_date: row.get("issue_date"),
            product_type: row.get("product_type"),
            payout_timeline: row.get("payout_timeline"),
            is_on_sale: row.get::<i64, _>("is_on_sale") != 0,
        }))
    }
}

#[async_trait]
impl FactStore for SqliteFactStore {
    async fn find_by_product_id(&self, product_id: &str) -> Result<Option<ProductFacts>> {
        self.find_where("product_id", product_id).await
    }

    async fn find_by_product_name(&self, product_name: &str) -> Result<Option<ProductFacts>> {
        self.find_where("product_name", product_name).await
    }
}

/// In-memory fact store for tests.
pub struct MemoryFactStore {
    by_id: RwLock<HashMap<String, ProductFacts>>,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self {
            by_id: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, product_id: &str, facts: ProductFacts) {
        self.by_id
            .write()
            .unwrap()
            .insert(product_id.to_string(), facts);
    }
}

impl Default for MemoryFactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FactStore for MemoryFactStore {
    async fn find_by_product_id(&self, product_id: &str) -> Result<Option<ProductFacts>> {
        Ok(self.by_id.read().unwrap().get(product_id).cloned())
    }

    async fn find_by_product_name(&self, product_name: &str) -> Result<Option<ProductFacts>> {
        Ok(self
            .by_id
            .read()
            .unwrap()
            .values()
            .find(|f| f.product_name == product_name)
            .cloned())
    }
}
