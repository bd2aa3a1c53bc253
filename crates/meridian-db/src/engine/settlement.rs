//! # Debt Settlement
//!
//! Applies an incoming customer payment to that customer's open sales,
//! oldest first.
//!
//! ```text
//!   payment {cash 40, click 20}           open sales (FIFO)
//!        │                                 S1 debt 50  (oldest)
//!        ▼                                 S2 debt 30
//!   plan_settlement ───────────────► S1: cash 40 + click 10 → debt 0, paid
//!                                    S2: click 10          → debt 20, partial
//!        │
//!        ▼
//!   BEGIN
//!     UPDATE sales (buckets, status)   × touched sales
//!     audit `debt_payment`             × touched sales
//!     INSERT debt_payments             × 1
//!   COMMIT
//! ```
//!
//! The plan is computed before any write. A payment larger than everything
//! the customer owes is rejected whole.

use chrono::{DateTime, Utc};
use meridian_core::allocation::{plan_settlement, OpenDebt, PaymentInstruction, SaleSettlement};
use meridian_core::validation::validate_currency_rate;
use meridian_core::{
    CurrencyRate, DebtPayment, Money, NewOperation, OperationType, RequestContext,
};
use serde::Serialize;
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::sale::{fetch_sale, store_header};
use crate::error::{DbError, DbResult};
use crate::pool::{begin_write, commit_within};
use crate::repository::{customer, history};

/// Result of a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementOutcome {
    pub customer_id: i64,
    pub customer_name: String,
    pub updated_sale_ids: Vec<i64>,
    pub paid_amount: Money,
    pub debt_payment_id: i64,
    pub remaining_debt: Money,
    pub currency_rate: CurrencyRate,
    pub sales: Vec<SaleSettlement>,
}

async fn open_debts(conn: &mut SqliteConnection, customer_id: i64) -> DbResult<Vec<OpenDebt>> {
    let rows: Vec<(i64, Money, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT id, debt_usd, created_at
        FROM sales
        WHERE customer_id = ?1 AND debt_usd > 0 AND payment_status != 'cancelled'
        ORDER BY created_at, id
        "#,
    )
    .bind(customer_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(sale_id, debt, created_at)| OpenDebt {
            sale_id,
            debt,
            created_at,
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct SettlementEngine {
    pool: SqlitePool,
    timeout: Duration,
}

impl SettlementEngine {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        SettlementEngine { pool, timeout }
    }

    /// Settles debt for a customer.
    ///
    /// Without an explicit rate, the payment is stamped with the rate of the
    /// most recent sale it touches.
    ///
    /// ## Errors
    /// - zero or negative payment, payment above outstanding debt → `Validation`
    /// - unknown customer → `NotFound`
    /// - a touched sale at a location outside the caller's grants → `PermissionDenied`
    pub async fn settle(
        &self,
        ctx: &RequestContext,
        customer_id: i64,
        payment: &PaymentInstruction,
        currency_rate: Option<CurrencyRate>,
    ) -> DbResult<SettlementOutcome> {
        payment.validate()?;
        if let Some(rate) = currency_rate {
            validate_currency_rate(rate)?;
        }

        commit_within(self.timeout, "debt_payment", async {
            let mut tx = begin_write(&self.pool).await?;
            let customer = customer::fetch(&mut tx, customer_id).await?;

            let open = open_debts(&mut tx, customer_id).await?;
            let plan = plan_settlement(&open, payment)?;
            debug!(
                customer_id,
                open_sales = open.len(),
                touched = plan.sales.len(),
                "Settlement planned"
            );

            let now = Utc::now();
            let mut latest_rate = None;
            for step in &plan.sales {
                let mut sale = fetch_sale(&mut tx, step.sale_id).await?;
                ctx.ensure_location_access(&sale.location())?;
                let before = sale.buckets();

                sale.cash_usd += step.cash;
                sale.click_usd += step.click;
                sale.terminal_usd += step.terminal;
                sale.debt_usd = step.debt_after;
                sale.payment_status = step.status;
                sale.updated_at = now;
                store_header(&mut tx, &sale).await?;

                latest_rate = Some(sale.currency_rate);

                history::record(
                    &mut tx,
                    ctx,
                    NewOperation::new(
                        OperationType::DebtPayment,
                        "sales",
                        Some(sale.id),
                        format!(
                            "Debt payment from {} on sale #{}: {} applied, debt {} → {}",
                            customer.name,
                            sale.id,
                            step.applied(),
                            step.debt_before,
                            step.debt_after
                        ),
                    )
                    .location(sale.location())
                    .amount(step.applied())
                    .old_data(json!(before))
                    .new_data(json!(sale.buckets())),
                )
                .await;
            }

            let rate = currency_rate.or(latest_rate).ok_or_else(|| {
                DbError::Internal("settlement touched no sales".to_string())
            })?;

            let debt_payment_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO debt_payments (
                    customer_id, sale_id, cash_usd, click_usd, terminal_usd, total_usd,
                    currency_rate, created_by, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                RETURNING id
                "#,
            )
            .bind(customer_id)
            .bind(plan.sales.first().map(|s| s.sale_id))
            .bind(plan.applied.cash)
            .bind(plan.applied.click)
            .bind(plan.applied.terminal)
            .bind(plan.paid_amount())
            .bind(rate)
            .bind(ctx.user_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            info!(
                customer_id,
                debt_payment_id,
                paid = plan.paid_amount().cents(),
                remaining = plan.remaining_debt.cents(),
                sales = plan.sales.len(),
                "Debt settled"
            );

            Ok((tx, SettlementOutcome {
                customer_id,
                customer_name: customer.name,
                updated_sale_ids: plan.updated_sale_ids(),
                paid_amount: plan.paid_amount(),
                debt_payment_id,
                remaining_debt: plan.remaining_debt,
                currency_rate: rate,
                sales: plan.sales,
            }))
        })
        .await
    }

    /// A customer's payment history, newest first.
    pub async fn payments_for(&self, customer_id: i64) -> DbResult<Vec<DebtPayment>> {
        let rows = sqlx::query_as::<_, DebtPayment>(
            r#"
            SELECT id, customer_id, sale_id, cash_usd, click_usd, terminal_usd, total_usd,
                   currency_rate, created_by, created_at
            FROM debt_payments
            WHERE customer_id = ?1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cart, put_stock, seed_customer, seed_location, seed_product, setup};
    use crate::Database;
    use meridian_core::{ErrorKind, LocationKind, LocationRef, PaymentStatus};

    fn cash(dollars: i64) -> PaymentInstruction {
        PaymentInstruction {
            cash: Money::from_dollars(dollars),
            click: Money::zero(),
            terminal: Money::zero(),
        }
    }

    /// Creates a debt sale of `debt` dollars with nothing paid up front.
    async fn debt_sale(
        db: &Database,
        ctx: &RequestContext,
        store: LocationRef,
        product: i64,
        customer: i64,
        debt: i64,
    ) -> i64 {
        db.sales()
            .create_sale(ctx, &cart(store, Some(customer), &[(product, debt, 100)], 0))
            .await
            .unwrap()
            .sale
            .id
    }

    async fn shop(db: &Database, ctx: &RequestContext) -> (LocationRef, i64, i64) {
        let store = seed_location(db, ctx, LocationKind::Store, "Chorsu").await;
        let item = seed_product(db, ctx, "Dollar item", 50, 100).await;
        put_stock(db, ctx, store, item, 1000).await;
        let customer = seed_customer(db, ctx, "Aziz").await;
        (store, item, customer)
    }

    #[tokio::test]
    async fn test_fifo_pays_oldest_first() {
        let (db, ctx) = setup().await;
        let (store, item, aziz) = shop(&db, &ctx).await;
        let s1 = debt_sale(&db, &ctx, store, item, aziz, 50).await;
        let s2 = debt_sale(&db, &ctx, store, item, aziz, 30).await;

        let outcome = db.debts().settle(&ctx, aziz, &cash(60), None).await.unwrap();
        assert_eq!(outcome.updated_sale_ids, vec![s1, s2]);
        assert_eq!(outcome.paid_amount, Money::from_dollars(60));
        assert_eq!(outcome.remaining_debt, Money::from_dollars(20));

        let first = db.sales().get(s1).await.unwrap().sale;
        let second = db.sales().get(s2).await.unwrap().sale;
        assert_eq!(first.debt_usd, Money::zero());
        assert_eq!(first.payment_status, PaymentStatus::Paid);
        assert_eq!(second.debt_usd, Money::from_dollars(20));
        assert_eq!(second.payment_status, PaymentStatus::Partial);
        assert!(first.is_balanced() && second.is_balanced());
        assert_eq!(
            db.history().count_by_type(OperationType::DebtPayment).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_hundred_dollar_sale_settled() {
        let (db, ctx) = setup().await;
        let (store, item, aziz) = shop(&db, &ctx).await;
        let sale = db
            .sales()
            .create_sale(&ctx, &cart(store, Some(aziz), &[(item, 100, 100)], 40))
            .await
            .unwrap()
            .sale;
        assert_eq!(sale.debt_usd, Money::from_dollars(60));

        let outcome = db.debts().settle(&ctx, aziz, &cash(60), None).await.unwrap();
        assert_eq!(outcome.remaining_debt, Money::zero());

        let settled = db.sales().get(sale.id).await.unwrap().sale;
        assert_eq!(settled.debt_usd, Money::zero());
        assert_eq!(settled.cash_usd, Money::from_dollars(100));
        assert_eq!(settled.payment_status, PaymentStatus::Paid);
        assert!(settled.is_balanced());

        let payments = db.debts().payments_for(aziz).await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].id, outcome.debt_payment_id);
        assert_eq!(payments[0].total_usd, Money::from_dollars(60));
        assert_eq!(payments[0].currency_rate, sale.currency_rate);
    }

    #[tokio::test]
    async fn test_overpayment_rejected_without_mutation() {
        let (db, ctx) = setup().await;
        let (store, item, aziz) = shop(&db, &ctx).await;
        let s1 = debt_sale(&db, &ctx, store, item, aziz, 30).await;

        let err = db.debts().settle(&ctx, aziz, &cash(31), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            db.sales().get(s1).await.unwrap().sale.debt_usd,
            Money::from_dollars(30)
        );
        assert!(db.debts().payments_for(aziz).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_split_methods_fill_each_bucket() {
        let (db, ctx) = setup().await;
        let (store, item, aziz) = shop(&db, &ctx).await;
        let s1 = debt_sale(&db, &ctx, store, item, aziz, 50).await;

        let payment = PaymentInstruction {
            cash: Money::from_dollars(20),
            click: Money::from_dollars(15),
            terminal: Money::from_dollars(5),
        };
        db.debts()
            .settle(&ctx, aziz, &payment, Some(CurrencyRate::from_uzs_per_usd(12_800)))
            .await
            .unwrap();

        let sale = db.sales().get(s1).await.unwrap().sale;
        assert_eq!(sale.cash_usd, Money::from_dollars(20));
        assert_eq!(sale.click_usd, Money::from_dollars(15));
        assert_eq!(sale.terminal_usd, Money::from_dollars(5));
        assert_eq!(sale.debt_usd, Money::from_dollars(10));
        let payments = db.debts().payments_for(aziz).await.unwrap();
        assert_eq!(payments[0].currency_rate, CurrencyRate::from_uzs_per_usd(12_800));
    }

    #[tokio::test]
    async fn test_unknown_customer() {
        let (db, ctx) = setup().await;
        let err = db.debts().settle(&ctx, 404, &cash(1), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
