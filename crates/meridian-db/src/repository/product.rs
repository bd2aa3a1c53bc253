//! # Product Repository
//!
//! Catalog CRUD. Deleting a product keeps history intact:
//!
//! ```text
//!   DELETE products(7)
//!      ├── location_stock rows for 7      ──► removed (cascade)
//!      ├── sale_items.product_id = 7      ──► NULL, product_name snapshot stays
//!      └── operations_history             ──► product_delete row names "Tea"
//! ```

use chrono::Utc;
use meridian_core::validation::{normalize_barcode, validate_product};
use meridian_core::{NewOperation, NewProduct, OperationType, Product, RequestContext};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::pool::{begin_write, commit_within};
use crate::repository::history;

const SELECT_PRODUCT: &str = r#"
    SELECT id, name, barcode, cost_price, sell_price, unit_type, created_at, updated_at
    FROM products
"#;

/// Loads a product inside a transaction, or fails with NotFound.
pub(crate) async fn fetch(conn: &mut SqliteConnection, id: i64) -> DbResult<Product> {
    let sql = format!("{} WHERE id = ?1", SELECT_PRODUCT);
    sqlx::query_as::<_, Product>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Product", id))
}

fn barcode_conflict(err: DbError, barcode: Option<&str>) -> DbError {
    match (err, barcode) {
        (DbError::UniqueViolation { .. }, Some(code)) => DbError::duplicate("barcode", code),
        (err, _) => err,
    }
}

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
    timeout: Duration,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        ProductRepository { pool, timeout }
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Product>> {
        let sql = format!("{} WHERE id = ?1", SELECT_PRODUCT);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    pub async fn find_by_barcode(&self, barcode: &str) -> DbResult<Option<Product>> {
        let sql = format!("{} WHERE barcode = ?1", SELECT_PRODUCT);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(barcode.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    pub async fn list(&self, limit: i64) -> DbResult<Vec<Product>> {
        let sql = format!("{} ORDER BY name LIMIT ?1", SELECT_PRODUCT);
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(products)
    }

    /// Creates a product.
    ///
    /// ## Errors
    /// - sell price below cost, empty name → `Validation`
    /// - barcode already used → `UniqueViolation`
    pub async fn create(&self, ctx: &RequestContext, input: &NewProduct) -> DbResult<Product> {
        validate_product(input)?;
        let barcode = normalize_barcode(input.barcode.as_deref())?;

        commit_within(self.timeout, "product_create", async {
            let mut tx = begin_write(&self.pool).await?;
            let now = Utc::now();

            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO products (name, barcode, cost_price, sell_price, unit_type, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                RETURNING id
                "#,
            )
            .bind(input.name.trim())
            .bind(barcode.as_deref())
            .bind(input.cost_price)
            .bind(input.sell_price)
            .bind(&input.unit_type)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| barcode_conflict(e.into(), barcode.as_deref()))?;

            let product = fetch(&mut tx, id).await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::ProductCreate,
                    "products",
                    Some(id),
                    format!("Product created: {}", product.name),
                )
                .new_data(json!(product)),
            )
            .await;

            info!(product_id = id, name = %product.name, "Product created");
            Ok((tx, product))
        })
        .await
    }

    /// Replaces a product's editable fields.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: i64,
        input: &NewProduct,
    ) -> DbResult<Product> {
        validate_product(input)?;
        let barcode = normalize_barcode(input.barcode.as_deref())?;

        commit_within(self.timeout, "product_update", async {
            let mut tx = begin_write(&self.pool).await?;
            let before = fetch(&mut tx, id).await?;

            sqlx::query(
                r#"
                UPDATE products
                SET name = ?1, barcode = ?2, cost_price = ?3, sell_price = ?4,
                    unit_type = ?5, updated_at = ?6
                WHERE id = ?7
                "#,
            )
            .bind(input.name.trim())
            .bind(barcode.as_deref())
            .bind(input.cost_price)
            .bind(input.sell_price)
            .bind(&input.unit_type)
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| barcode_conflict(e.into(), barcode.as_deref()))?;

            let after = fetch(&mut tx, id).await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::ProductUpdate,
                    "products",
                    Some(id),
                    format!("Product updated: {}", after.name),
                )
                .old_data(json!(before))
                .new_data(json!(after)),
            )
            .await;

            debug!(product_id = id, "Product updated");
            Ok((tx, after))
        })
        .await
    }

    /// Deletes a product. Sale lines keep their name snapshot with a null
    /// product reference.
    pub async fn delete(&self, ctx: &RequestContext, id: i64) -> DbResult<()> {
        commit_within(self.timeout, "product_delete", async {
            let mut tx = begin_write(&self.pool).await?;
            let before = fetch(&mut tx, id).await?;

            sqlx::query("DELETE FROM products WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::ProductDelete,
                    "products",
                    Some(id),
                    format!("Product deleted: {}", before.name),
                )
                .old_data(json!(before)),
            )
            .await;

            info!(product_id = id, name = %before.name, "Product deleted");
            Ok((tx, ()))
        })
        .await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
