//! # Stock Ledger
//!
//! Per-location product quantities. Every change is a single SQL statement
//! that applies a delta inside a `BEGIN IMMEDIATE` transaction, so two sales
//! racing on the same row queue on the write lock and both land.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  increment   INSERT ... ON CONFLICT DO UPDATE                           │
//! │              SET quantity = quantity + ?  RETURNING quantity            │
//! │                                                                         │
//! │  decrement   UPDATE ... SET quantity = quantity - ?                     │
//! │              WHERE ... AND quantity >= ?  RETURNING quantity            │
//! │              no row back ──► InsufficientStock { available, requested } │
//! │                                                                         │
//! │  overwrite   stock checks only: set to the counted value                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows are created lazily on the first increment. The `quantity >= 0` CHECK
//! in the schema backs up the guarded decrement.
//!
//! The connection-level functions are shared with the sale, return, and
//! transfer engines, which call them inside their own transactions.

use chrono::Utc;
use meridian_core::validation::{validate_counted_quantity, validate_price, validate_quantity};
use meridian_core::{
    CoreError, LocationRef, Money, NewOperation, OperationType, Quantity, RequestContext,
    StockChange, StockLevel,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::DbResult;
use crate::pool::{begin_write, commit_within};
use crate::repository::{history, location, product};

// =============================================================================
// Connection-Level Primitives
// =============================================================================

/// Current quantity, zero when the row does not exist yet.
pub(crate) async fn quantity(
    conn: &mut SqliteConnection,
    loc: LocationRef,
    product_id: i64,
) -> DbResult<Quantity> {
    let qty: Option<Quantity> = sqlx::query_scalar(
        r#"
        SELECT quantity FROM location_stock
        WHERE location_kind = ?1 AND location_id = ?2 AND product_id = ?3
        "#,
    )
    .bind(loc.kind)
    .bind(loc.id)
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(qty.unwrap_or_default())
}

pub(crate) async fn increment(
    conn: &mut SqliteConnection,
    loc: LocationRef,
    product_id: i64,
    qty: Quantity,
) -> DbResult<StockChange> {
    let new_quantity: Quantity = sqlx::query_scalar(
        r#"
        INSERT INTO location_stock (location_kind, location_id, product_id, quantity, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (location_kind, location_id, product_id)
        DO UPDATE SET quantity = quantity + excluded.quantity, updated_at = excluded.updated_at
        RETURNING quantity
        "#,
    )
    .bind(loc.kind)
    .bind(loc.id)
    .bind(product_id)
    .bind(qty)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    Ok(StockChange {
        product_id,
        location: loc,
        old_quantity: new_quantity - qty,
        new_quantity,
    })
}

pub(crate) async fn decrement(
    conn: &mut SqliteConnection,
    loc: LocationRef,
    product_id: i64,
    qty: Quantity,
) -> DbResult<StockChange> {
    let updated: Option<Quantity> = sqlx::query_scalar(
        r#"
        UPDATE location_stock
        SET quantity = quantity - ?4, updated_at = ?5
        WHERE location_kind = ?1 AND location_id = ?2 AND product_id = ?3
          AND quantity >= ?4
        RETURNING quantity
        "#,
    )
    .bind(loc.kind)
    .bind(loc.id)
    .bind(product_id)
    .bind(qty)
    .bind(Utc::now())
    .fetch_optional(&mut *conn)
    .await?;

    match updated {
        Some(new_quantity) => Ok(StockChange {
            product_id,
            location: loc,
            old_quantity: new_quantity + qty,
            new_quantity,
        }),
        None => {
            let available = quantity(conn, loc, product_id).await?;
            debug!(
                product_id,
                location = %loc,
                available = %available,
                requested = %qty,
                "Decrement refused"
            );
            Err(CoreError::InsufficientStock {
                product_id,
                location: loc,
                available,
                requested: qty,
            }
            .into())
        }
    }
}

/// Sets a quantity outright. Stock checks only.
pub(crate) async fn overwrite(
    conn: &mut SqliteConnection,
    loc: LocationRef,
    product_id: i64,
    counted: Quantity,
) -> DbResult<StockChange> {
    let old_quantity = quantity(conn, loc, product_id).await?;
    sqlx::query(
        r#"
        INSERT INTO location_stock (location_kind, location_id, product_id, quantity, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (location_kind, location_id, product_id)
        DO UPDATE SET quantity = excluded.quantity, updated_at = excluded.updated_at
        "#,
    )
    .bind(loc.kind)
    .bind(loc.id)
    .bind(product_id)
    .bind(counted)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(StockChange {
        product_id,
        location: loc,
        old_quantity,
        new_quantity: counted,
    })
}

/// Total on hand across every location.
async fn on_hand_everywhere(conn: &mut SqliteConnection, product_id: i64) -> DbResult<Quantity> {
    let total: Quantity = sqlx::query_scalar(
        "SELECT COALESCE(SUM(quantity), 0) FROM location_stock WHERE product_id = ?1",
    )
    .bind(product_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}

fn change_op(kind: OperationType, change: &StockChange, name: &str) -> NewOperation {
    let verb = match kind {
        OperationType::StockDecrement => "removed",
        OperationType::StockCheck => "counted",
        _ => "added",
    };
    NewOperation::new(
        kind,
        "location_stock",
        Some(change.product_id),
        format!(
            "{} {}: {} → {} at {}",
            name, verb, change.old_quantity, change.new_quantity, change.location
        ),
    )
    .location(change.location)
    .old_data(json!({ "quantity": change.old_quantity }))
    .new_data(json!({ "quantity": change.new_quantity }))
}

// =============================================================================
// Ledger
// =============================================================================

/// One counted line of a stock check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedLine {
    pub product_id: i64,
    pub quantity: Quantity,
}

/// Outcome of a restock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockInResult {
    #[serde(flatten)]
    pub change: StockChange,
    pub previous_cost: Money,
    pub cost_price: Money,
}

#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
    timeout: Duration,
}

impl StockLedger {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        StockLedger { pool, timeout }
    }

    pub async fn get(&self, loc: LocationRef, product_id: i64) -> DbResult<Quantity> {
        let mut conn = self.pool.acquire().await?;
        quantity(&mut conn, loc, product_id).await
    }

    /// Every stock row at a location.
    pub async fn list(&self, loc: LocationRef) -> DbResult<Vec<StockLevel>> {
        let rows = sqlx::query_as::<_, StockLevel>(
            r#"
            SELECT location_kind, location_id, product_id, quantity, updated_at
            FROM location_stock
            WHERE location_kind = ?1 AND location_id = ?2
            ORDER BY product_id
            "#,
        )
        .bind(loc.kind)
        .bind(loc.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn increment(
        &self,
        ctx: &RequestContext,
        loc: LocationRef,
        product_id: i64,
        qty: Quantity,
    ) -> DbResult<StockChange> {
        self.adjust(ctx, OperationType::StockIncrement, loc, product_id, qty)
            .await
    }

    /// Removes stock. Fails with `InsufficientStock` instead of going negative.
    pub async fn decrement(
        &self,
        ctx: &RequestContext,
        loc: LocationRef,
        product_id: i64,
        qty: Quantity,
    ) -> DbResult<StockChange> {
        self.adjust(ctx, OperationType::StockDecrement, loc, product_id, qty)
            .await
    }

    async fn adjust(
        &self,
        ctx: &RequestContext,
        kind: OperationType,
        loc: LocationRef,
        product_id: i64,
        qty: Quantity,
    ) -> DbResult<StockChange> {
        validate_quantity("quantity", qty)?;
        ctx.ensure_location_access(&loc)?;

        commit_within(self.timeout, kind.as_str(), async {
            let mut tx = begin_write(&self.pool).await?;
            location::ensure_exists(&mut tx, loc).await?;
            let product = product::fetch(&mut tx, product_id).await?;

            let change = if kind == OperationType::StockDecrement {
                decrement(&mut tx, loc, product_id, qty).await?
            } else {
                increment(&mut tx, loc, product_id, qty).await?
            };

            history::record(&mut tx, ctx, change_op(kind, &change, &product.name)).await;

            debug!(
                product_id,
                location = %loc,
                old = %change.old_quantity,
                new = %change.new_quantity,
                "Stock adjusted"
            );
            Ok((tx, change))
        })
        .await
    }

    /// Receives stock at a unit cost and folds that cost into the product's
    /// moving-average cost price across all locations.
    pub async fn stock_in(
        &self,
        ctx: &RequestContext,
        loc: LocationRef,
        product_id: i64,
        qty: Quantity,
        unit_cost: Money,
    ) -> DbResult<StockInResult> {
        validate_quantity("quantity", qty)?;
        validate_price("unit_cost", unit_cost)?;
        ctx.ensure_location_access(&loc)?;

        commit_within(self.timeout, "stock_in", async {
            let mut tx = begin_write(&self.pool).await?;
            location::ensure_exists(&mut tx, loc).await?;
            let product = product::fetch(&mut tx, product_id).await?;

            let on_hand = on_hand_everywhere(&mut tx, product_id).await?;
            let cost_price = Money::weighted_average(product.cost_price, on_hand, unit_cost, qty);

            sqlx::query("UPDATE products SET cost_price = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(cost_price)
                .bind(Utc::now())
                .bind(product_id)
                .execute(&mut *tx)
                .await?;

            let change = increment(&mut tx, loc, product_id, qty).await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::StockIn,
                    "location_stock",
                    Some(product_id),
                    format!(
                        "{} received: {} at {} (cost {} → {})",
                        product.name, qty, loc, product.cost_price, cost_price
                    ),
                )
                .location(loc)
                .amount(unit_cost.multiply_quantity(qty))
                .old_data(json!({ "quantity": change.old_quantity, "cost_price": product.cost_price }))
                .new_data(json!({ "quantity": change.new_quantity, "cost_price": cost_price })),
            )
            .await;

            info!(
                product_id,
                location = %loc,
                quantity = %qty,
                cost_price = cost_price.cents(),
                "Stock received"
            );
            Ok((tx, StockInResult {
                change,
                previous_cost: product.cost_price,
                cost_price,
            }))
        })
        .await
    }

    /// Applies a physical count: every listed product at `loc` is set to its
    /// counted quantity, in one transaction.
    pub async fn finish_stock_check(
        &self,
        ctx: &RequestContext,
        loc: LocationRef,
        counted: &[CountedLine],
    ) -> DbResult<Vec<StockChange>> {
        if counted.is_empty() {
            return Err(meridian_core::ValidationError::Empty {
                field: "counted".to_string(),
            }
            .into());
        }
        for line in counted {
            validate_counted_quantity(line.quantity)?;
        }
        ctx.ensure_location_access(&loc)?;

        commit_within(self.timeout, "stock_check", async {
            let mut tx = begin_write(&self.pool).await?;
            location::ensure_exists(&mut tx, loc).await?;

            let mut changes = Vec::with_capacity(counted.len());
            for line in counted {
                let product = product::fetch(&mut tx, line.product_id).await?;
                let change = overwrite(&mut tx, loc, line.product_id, line.quantity).await?;
                history::record(
                    &mut tx,
                    ctx,
                    change_op(OperationType::StockCheck, &change, &product.name),
                )
                .await;
                changes.push(change);
            }

            info!(location = %loc, lines = changes.len(), "Stock check finished");
            Ok((tx, changes))
        })
        .await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{put_stock, seed_location, seed_product, setup, stock_at};
    use crate::DbError;
    use meridian_core::{ErrorKind, LocationKind};

    #[tokio::test]
    async fn test_increment_creates_row_lazily() {
        let (db, ctx) = setup().await;
        let store = seed_location(&db, &ctx, LocationKind::Store, "Main").await;
        let tea = seed_product(&db, &ctx, "Tea", 100, 150).await;

        assert_eq!(stock_at(&db, store, tea).await, Quantity::zero());
        let change = db
            .stock()
            .increment(&ctx, store, tea, Quantity::from_milli(2500))
            .await
            .unwrap();
        assert_eq!(change.old_quantity, Quantity::zero());
        assert_eq!(change.new_quantity, Quantity::from_milli(2500));
    }

    #[tokio::test]
    async fn test_decrement_never_goes_negative() {
        let (db, ctx) = setup().await;
        let store = seed_location(&db, &ctx, LocationKind::Store, "Main").await;
        let tea = seed_product(&db, &ctx, "Tea", 100, 150).await;
        put_stock(&db, &ctx, store, tea, 3).await;

        let err = db
            .stock()
            .decrement(&ctx, store, tea, Quantity::from_units(4))
            .await
            .unwrap_err();
        match err {
            DbError::Domain(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, Quantity::from_units(3));
                assert_eq!(requested, Quantity::from_units(4));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(stock_at(&db, store, tea).await, Quantity::from_units(3));

        let change = db
            .stock()
            .decrement(&ctx, store, tea, Quantity::from_units(3))
            .await
            .unwrap();
        assert_eq!(change.new_quantity, Quantity::zero());
    }

    #[tokio::test]
    async fn test_decrement_on_missing_row() {
        let (db, ctx) = setup().await;
        let store = seed_location(&db, &ctx, LocationKind::Store, "Main").await;
        let tea = seed_product(&db, &ctx, "Tea", 100, 150).await;
        let err = db
            .stock()
            .decrement(&ctx, store, tea, Quantity::from_units(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_and_unknown_targets() {
        let (db, ctx) = setup().await;
        let store = seed_location(&db, &ctx, LocationKind::Store, "Main").await;
        let tea = seed_product(&db, &ctx, "Tea", 100, 150).await;

        let zero = db.stock().increment(&ctx, store, tea, Quantity::zero()).await;
        assert_eq!(zero.unwrap_err().kind(), ErrorKind::Validation);

        let missing = db
            .stock()
            .increment(&ctx, LocationRef::warehouse(1), tea, Quantity::from_units(1))
            .await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_staff_without_grant_is_denied() {
        let (db, ctx) = setup().await;
        let store = seed_location(&db, &ctx, LocationKind::Store, "Main").await;
        let tea = seed_product(&db, &ctx, "Tea", 100, 150).await;
        let user = db
            .users()
            .create("bek", meridian_core::Role::Staff, Some("[2]"), None)
            .await
            .unwrap();
        let staff = db.users().context_for(user.id).await.unwrap();

        let err = db
            .stock()
            .increment(&staff, store, tea, Quantity::from_units(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_stock_in_moving_average() {
        let (db, ctx) = setup().await;
        let store = seed_location(&db, &ctx, LocationKind::Store, "Main").await;
        let depot = seed_location(&db, &ctx, LocationKind::Warehouse, "Depot").await;
        let tea = seed_product(&db, &ctx, "Tea", 100, 150).await;
        put_stock(&db, &ctx, store, tea, 6).await;
        put_stock(&db, &ctx, depot, tea, 4).await;

        let result = db
            .stock()
            .stock_in(&ctx, depot, tea, Quantity::from_units(5), Money::from_cents(130))
            .await
            .unwrap();

        // (100 × 10 + 130 × 5) / 15 = 110
        assert_eq!(result.cost_price, Money::from_cents(110));
        assert_eq!(result.change.new_quantity, Quantity::from_units(9));
        let product = db.products().get_by_id(tea).await.unwrap().unwrap();
        assert_eq!(product.cost_price, Money::from_cents(110));
    }

    #[tokio::test]
    async fn test_stock_check_overwrites_and_audits_each_line() {
        let (db, ctx) = setup().await;
        let store = seed_location(&db, &ctx, LocationKind::Store, "Main").await;
        let tea = seed_product(&db, &ctx, "Tea", 100, 150).await;
        let rice = seed_product(&db, &ctx, "Rice", 200, 260).await;
        put_stock(&db, &ctx, store, tea, 10).await;

        let changes = db
            .stock()
            .finish_stock_check(
                &ctx,
                store,
                &[
                    CountedLine { product_id: tea, quantity: Quantity::from_units(8) },
                    CountedLine { product_id: rice, quantity: Quantity::from_milli(1500) },
                ],
            )
            .await
            .unwrap();

        assert_eq!(changes[0].old_quantity, Quantity::from_units(10));
        assert_eq!(stock_at(&db, store, tea).await, Quantity::from_units(8));
        assert_eq!(stock_at(&db, store, rice).await, Quantity::from_milli(1500));
        assert_eq!(
            db.history().count_by_type(OperationType::StockCheck).await.unwrap(),
            2
        );
        assert_eq!(db.stock().list(store).await.unwrap().len(), 2);
    }
}
