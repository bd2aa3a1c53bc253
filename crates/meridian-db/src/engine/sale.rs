//! # Sale Transaction Builder
//!
//! Turns a cart into a persisted sale in one transaction.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. validate lines, rate, payment          (nothing touched yet)        │
//! │  2. total = Σ unit_price × qty                                          │
//! │     split_sale_payment(total, payment)  ──► cash/click/terminal/debt    │
//! │  3. BEGIN                                                               │
//! │     for each line:                                                      │
//! │        cost  = product.cost_price (moving average, snapshotted)         │
//! │        decrement stock at the line's source ──► InsufficientStock?      │
//! │     INSERT sales, sale_items                                            │
//! │     audit: one `sale` row                                               │
//! │     COMMIT                                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lines may draw from a source other than the selling location (a store
//! selling straight out of a warehouse). A line without a source draws from
//! the selling location.

use chrono::Utc;
use meridian_core::allocation::{split_sale_payment, PaymentInstruction};
use meridian_core::collaborators::SaleSnapshot;
use meridian_core::validation::{
    validate_currency_rate, validate_line_count, validate_price, validate_quantity,
};
use meridian_core::{
    CurrencyRate, LocationKind, LocationRef, Money, NewOperation, OperationType, PaymentStatus,
    Quantity, RequestContext, Sale, SaleItem, SaleWithItems, ValidationError, MAX_AMOUNT_CENTS,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::info;

use crate::engine::stock;
use crate::error::{DbError, DbResult};
use crate::pool::{begin_write, commit_within};
use crate::repository::{customer, history, location, product};

// =============================================================================
// Input
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSaleItem {
    pub product_id: i64,
    pub quantity: Quantity,
    pub unit_price: Money,
    #[serde(default)]
    pub source_kind: Option<LocationKind>,
    #[serde(default)]
    pub source_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSale {
    #[serde(default)]
    pub customer_id: Option<i64>,
    pub location_kind: LocationKind,
    pub location_id: i64,
    pub items: Vec<NewSaleItem>,
    #[serde(flatten)]
    pub payment: PaymentInstruction,
    pub currency_rate: CurrencyRate,
}

impl NewSale {
    pub fn location(&self) -> LocationRef {
        LocationRef::new(self.location_id, self.location_kind)
    }

    /// Where a line's stock comes from.
    pub fn source_of(&self, item: &NewSaleItem) -> LocationRef {
        match (item.source_kind, item.source_id) {
            (Some(kind), Some(id)) => LocationRef::new(id, kind),
            (None, Some(id)) => LocationRef::new(id, self.location_kind),
            _ => self.location(),
        }
    }

    /// Sum of line totals. A total outside the accepted amount range is a
    /// validation error, never a wrapped or clamped number.
    pub fn total(&self) -> DbResult<Money> {
        let mut total = Money::zero();
        for item in &self.items {
            total = item
                .unit_price
                .checked_multiply_quantity(item.quantity)
                .and_then(|line| total.checked_add(line))
                .ok_or_else(|| amount_too_large("total_amount"))?;
        }
        validate_price("total_amount", total)?;
        Ok(total)
    }
}

fn amount_too_large(field: &str) -> ValidationError {
    ValidationError::TooLarge {
        field: field.to_string(),
        max: Money::from_cents(MAX_AMOUNT_CENTS).to_string(),
    }
}

// =============================================================================
// Row Access (shared with settlement and returns)
// =============================================================================

const SELECT_SALE: &str = r#"
    SELECT id, customer_id, location_kind, location_id, total_amount, total_cost, total_profit,
           cash_usd, click_usd, terminal_usd, debt_usd, currency_rate, payment_status,
           created_by, created_at, updated_at
    FROM sales
"#;

pub(crate) async fn fetch_sale(conn: &mut SqliteConnection, id: i64) -> DbResult<Sale> {
    let sql = format!("{} WHERE id = ?1", SELECT_SALE);
    sqlx::query_as::<_, Sale>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Sale", id))
}

pub(crate) async fn fetch_items(conn: &mut SqliteConnection, sale_id: i64) -> DbResult<Vec<SaleItem>> {
    let items = sqlx::query_as::<_, SaleItem>(
        r#"
        SELECT id, sale_id, product_id, product_name, quantity, unit_price, total_price,
               cost_price, profit, source_kind, source_id
        FROM sale_items
        WHERE sale_id = ?1
        ORDER BY id
        "#,
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

/// Writes the header's totals, buckets, and status back.
pub(crate) async fn store_header(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE sales
        SET total_amount = ?1, total_cost = ?2, total_profit = ?3,
            cash_usd = ?4, click_usd = ?5, terminal_usd = ?6, debt_usd = ?7,
            payment_status = ?8, updated_at = ?9
        WHERE id = ?10
        "#,
    )
    .bind(sale.total_amount)
    .bind(sale.total_cost)
    .bind(sale.total_profit)
    .bind(sale.cash_usd)
    .bind(sale.click_usd)
    .bind(sale.terminal_usd)
    .bind(sale.debt_usd)
    .bind(sale.payment_status)
    .bind(sale.updated_at)
    .bind(sale.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone)]
pub struct SaleEngine {
    pool: SqlitePool,
    timeout: Duration,
}

impl SaleEngine {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        SaleEngine { pool, timeout }
    }

    /// Creates a sale, decrementing stock at every line's source.
    ///
    /// ## Errors
    /// - empty cart, bad quantity/price/rate, overpayment, debt without a
    ///   customer → `Validation` (nothing touched)
    /// - a line short on stock → `InsufficientStock` (whole sale rolled back)
    pub async fn create_sale(&self, ctx: &RequestContext, input: &NewSale) -> DbResult<SaleWithItems> {
        validate_line_count("items", input.items.len())?;
        validate_currency_rate(input.currency_rate)?;
        for item in &input.items {
            validate_quantity("quantity", item.quantity)?;
            validate_price("unit_price", item.unit_price)?;
        }

        let total = input.total()?;
        let buckets = split_sale_payment(total, &input.payment, input.customer_id.is_some())?;
        let status = PaymentStatus::from_debt(buckets.debt);

        let sale_location = input.location();
        ctx.ensure_location_access(&sale_location)?;
        for item in &input.items {
            ctx.ensure_location_access(&input.source_of(item))?;
        }

        commit_within(self.timeout, "sale", async {
            let mut tx = begin_write(&self.pool).await?;
            location::ensure_exists(&mut tx, sale_location).await?;
            if let Some(customer_id) = input.customer_id {
                customer::fetch(&mut tx, customer_id).await?;
            }

            struct Line {
                product_id: i64,
                product_name: String,
                quantity: Quantity,
                unit_price: Money,
                total_price: Money,
                cost_price: Money,
                profit: Money,
                source: LocationRef,
            }

            let mut lines = Vec::with_capacity(input.items.len());
            for item in &input.items {
                let source = input.source_of(item);
                if source != sale_location {
                    location::ensure_exists(&mut tx, source).await?;
                }
                let product = product::fetch(&mut tx, item.product_id).await?;
                stock::decrement(&mut tx, source, item.product_id, item.quantity).await?;

                let total_price = item.unit_price.multiply_quantity(item.quantity);
                let line_cost = product
                    .cost_price
                    .checked_multiply_quantity(item.quantity)
                    .filter(|cost| cost.cents() <= MAX_AMOUNT_CENTS)
                    .ok_or_else(|| amount_too_large("total_cost"))?;
                lines.push(Line {
                    product_id: product.id,
                    product_name: product.name,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    total_price,
                    cost_price: product.cost_price,
                    profit: total_price - line_cost,
                    source,
                });
            }

            let total_cost: Money = lines.iter().map(|l| l.total_price - l.profit).sum();
            let total_profit: Money = lines.iter().map(|l| l.profit).sum();
            let now = Utc::now();

            let sale_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO sales (
                    customer_id, location_kind, location_id, total_amount, total_cost, total_profit,
                    cash_usd, click_usd, terminal_usd, debt_usd, currency_rate, payment_status,
                    created_by, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
                RETURNING id
                "#,
            )
            .bind(input.customer_id)
            .bind(sale_location.kind)
            .bind(sale_location.id)
            .bind(total)
            .bind(total_cost)
            .bind(total_profit)
            .bind(buckets.cash)
            .bind(buckets.click)
            .bind(buckets.terminal)
            .bind(buckets.debt)
            .bind(input.currency_rate)
            .bind(status)
            .bind(ctx.user_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            for line in &lines {
                sqlx::query(
                    r#"
                    INSERT INTO sale_items (
                        sale_id, product_id, product_name, quantity, unit_price, total_price,
                        cost_price, profit, source_kind, source_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    "#,
                )
                .bind(sale_id)
                .bind(line.product_id)
                .bind(&line.product_name)
                .bind(line.quantity)
                .bind(line.unit_price)
                .bind(line.total_price)
                .bind(line.cost_price)
                .bind(line.profit)
                .bind(line.source.kind)
                .bind(line.source.id)
                .execute(&mut *tx)
                .await?;
            }

            let sale = fetch_sale(&mut tx, sale_id).await?;
            let items = fetch_items(&mut tx, sale_id).await?;
            let created = SaleWithItems { sale, items };

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::Sale,
                    "sales",
                    Some(sale_id),
                    format!(
                        "Sale #{} at {}: {} lines, total {}",
                        sale_id,
                        sale_location,
                        created.items.len(),
                        total
                    ),
                )
                .location(sale_location)
                .amount(total)
                .new_data(json!(created)),
            )
            .await;

            info!(
                sale_id,
                location = %sale_location,
                total = total.cents(),
                debt = buckets.debt.cents(),
                status = status.as_str(),
                "Sale created"
            );
            Ok((tx, created))
        })
        .await
    }

    pub async fn get(&self, sale_id: i64) -> DbResult<SaleWithItems> {
        let mut conn = self.pool.acquire().await?;
        let sale = fetch_sale(&mut conn, sale_id).await?;
        let items = fetch_items(&mut conn, sale_id).await?;
        Ok(SaleWithItems { sale, items })
    }

    /// Sale plus the display names a receipt needs.
    pub async fn snapshot(&self, sale_id: i64) -> DbResult<SaleSnapshot> {
        let mut conn = self.pool.acquire().await?;
        let sale = fetch_sale(&mut conn, sale_id).await?;
        let items = fetch_items(&mut conn, sale_id).await?;

        let customer_name = match sale.customer_id {
            Some(id) => customer::fetch(&mut conn, id).await.ok().map(|c| c.name),
            None => None,
        };
        let location_name = location::fetch(&mut conn, sale.location())
            .await
            .ok()
            .map(|l| l.name);

        Ok(SaleSnapshot {
            sale,
            items,
            customer_name,
            location_name,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
