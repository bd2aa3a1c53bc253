//! # Return / Reversal Engine
//!
//! Takes goods back against an existing sale.
//!
//! ```text
//!   return (product 7, qty 2) on sale 41
//!        │
//!        ▼
//!   reverse_line ──► clamp qty, amount = unit × qty, cost/profit prorated
//!        │
//!        ├── sale_items: shrink line, or delete it when nothing remains
//!        ├── location_stock: increment at the line's original source
//!        ▼
//!   apply_refund(sale buckets, Σ amount)
//!        │  positive debt first, then the first funded of cash → click →
//!        │  terminal, anything left becomes negative debt
//!        ▼
//!   header totals -= Σ amount/cost/profit
//!   status: no lines left → cancelled, debt ≤ 0 → paid
//!   audit: one `payment_refund` per bucket touched, one `return`
//! ```

use chrono::Utc;
use meridian_core::reversal::{
    apply_refund, ensure_returnable, reverse_line, status_after_return, BucketAdjustment,
    LineReversal,
};
use meridian_core::validation::{validate_line_count, validate_quantity};
use meridian_core::{
    CoreError, Money, NewOperation, OperationType, Quantity, RequestContext, SaleItem,
    SaleWithItems,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::sale::{fetch_items, fetch_sale, store_header};
use crate::engine::stock;
use crate::error::DbResult;
use crate::pool::{begin_write, commit_within};
use crate::repository::history;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLine {
    pub product_id: i64,
    #[serde(alias = "quantity")]
    pub return_quantity: Quantity,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReturnOutcome {
    pub returned_items: Vec<LineReversal>,
    pub remaining_items: usize,
    pub returned_amount: Money,
    pub adjustments: Vec<BucketAdjustment>,
    pub sale: SaleWithItems,
}

/// Shrinks or removes a sale line after a reversal.
async fn write_line(
    conn: &mut SqliteConnection,
    item: &SaleItem,
    rev: &LineReversal,
) -> DbResult<()> {
    if rev.is_full() {
        sqlx::query("DELETE FROM sale_items WHERE id = ?1")
            .bind(item.id)
            .execute(&mut *conn)
            .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE sale_items
            SET quantity = ?1, total_price = ?2, profit = ?3
            WHERE id = ?4
            "#,
        )
        .bind(rev.remaining_quantity)
        .bind(item.total_price - rev.amount)
        .bind(item.profit - rev.profit)
        .bind(item.id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReturnEngine {
    pool: SqlitePool,
    timeout: Duration,
}

impl ReturnEngine {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        ReturnEngine { pool, timeout }
    }

    /// Processes a return against `sale_id`.
    ///
    /// Quantities above what remains on the sale are clamped. When a product
    /// appears on several lines, the oldest line is drawn down first.
    ///
    /// ## Errors
    /// - cancelled sale, non-positive quantity → `Validation`
    /// - unknown sale, product not on the sale → `NotFound`
    pub async fn process_return(
        &self,
        ctx: &RequestContext,
        sale_id: i64,
        lines: &[ReturnLine],
    ) -> DbResult<ReturnOutcome> {
        validate_line_count("items", lines.len())?;
        for line in lines {
            validate_quantity("return_quantity", line.return_quantity)?;
        }

        commit_within(self.timeout, "return", async {
            let mut tx = begin_write(&self.pool).await?;
            let mut sale = fetch_sale(&mut tx, sale_id).await?;
            ensure_returnable(&sale)?;
            ctx.ensure_location_access(&sale.location())?;

            let mut items = fetch_items(&mut tx, sale_id).await?;
            let mut reversals: Vec<LineReversal> = Vec::new();

            for line in lines {
                if !items.iter().any(|i| i.product_id == Some(line.product_id)) {
                    return Err(CoreError::not_found(
                        "Sale item",
                        format!("product {} on sale {}", line.product_id, sale_id),
                    )
                    .into());
                }

                let mut wanted = line.return_quantity;
                for item in items
                    .iter_mut()
                    .filter(|i| i.product_id == Some(line.product_id) && i.quantity.is_positive())
                {
                    if !wanted.is_positive() {
                        break;
                    }
                    let rev = reverse_line(item, wanted)?;
                    write_line(&mut tx, item, &rev).await?;
                    stock::increment(&mut tx, rev.source, line.product_id, rev.returned_quantity)
                        .await?;

                    wanted -= rev.returned_quantity;
                    item.quantity = rev.remaining_quantity;
                    item.total_price -= rev.amount;
                    item.profit -= rev.profit;
                    debug!(
                        sale_id,
                        sale_item_id = item.id,
                        returned = %rev.returned_quantity,
                        remaining = %rev.remaining_quantity,
                        "Line reversed"
                    );
                    reversals.push(rev);
                }
            }

            let returned_amount: Money = reversals.iter().map(|r| r.amount).sum();
            let returned_cost: Money = reversals.iter().map(|r| r.cost).sum();
            let returned_profit: Money = reversals.iter().map(|r| r.profit).sum();
            let remaining_items = items.iter().filter(|i| i.quantity.is_positive()).count();

            let refund = apply_refund(sale.buckets(), returned_amount);
            let before = sale.clone();
            sale.set_buckets(&refund.buckets);
            sale.total_amount -= returned_amount;
            sale.total_cost -= returned_cost;
            sale.total_profit -= returned_profit;
            sale.payment_status =
                status_after_return(sale.payment_status, remaining_items, sale.debt_usd);
            sale.updated_at = Utc::now();
            store_header(&mut tx, &sale).await?;

            for adj in &refund.adjustments {
                history::record(
                    &mut tx,
                    ctx,
                    NewOperation::new(
                        OperationType::PaymentRefund,
                        "sales",
                        Some(sale_id),
                        format!(
                            "Refund on sale #{} from {}: {} → {}",
                            sale_id, adj.bucket, adj.before, adj.after
                        ),
                    )
                    .location(sale.location())
                    .amount(adj.delta())
                    .old_data(json!({ "bucket": adj.bucket, "balance": adj.before }))
                    .new_data(json!({ "bucket": adj.bucket, "balance": adj.after })),
                )
                .await;
            }

            let names: Vec<&str> = reversals.iter().map(|r| r.product_name.as_str()).collect();
            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::Return,
                    "sales",
                    Some(sale_id),
                    format!(
                        "Return on sale #{}: {} ({} back)",
                        sale_id,
                        names.join(", "),
                        returned_amount
                    ),
                )
                .location(sale.location())
                .amount(returned_amount)
                .old_data(json!(before))
                .new_data(json!({ "sale": sale, "lines": reversals })),
            )
            .await;

            let remaining = fetch_items(&mut tx, sale_id).await?;

            info!(
                sale_id,
                returned = returned_amount.cents(),
                remaining_items,
                status = sale.payment_status.as_str(),
                "Return processed"
            );

            Ok((tx, ReturnOutcome {
                returned_items: reversals,
                remaining_items,
                returned_amount,
                adjustments: refund.adjustments,
                sale: SaleWithItems {
                    sale,
                    items: remaining,
                },
            }))
        })
        .await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
