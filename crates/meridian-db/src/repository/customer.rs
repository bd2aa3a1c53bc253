//! # Customer Repository
//!
//! Customers carry debt across sales. Outstanding debt is never stored on the
//! customer row; it is always summed from the sales that still owe.

use chrono::Utc;
use meridian_core::validation::validate_customer;
use meridian_core::{
    Customer, DebtSummary, LocationKind, LocationRef, NewCustomer, NewOperation, OperationType,
    RequestContext,
};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::pool::{begin_write, commit_within};
use crate::repository::{history, location};

const SELECT_CUSTOMER: &str = r#"
    SELECT id, name, phone, home_location_kind, home_location_id, created_at
    FROM customers
"#;

const DEBT_SUMMARY: &str = r#"
    SELECT c.id AS customer_id,
           c.name AS customer_name,
           COALESCE(SUM(CASE WHEN s.debt_usd > 0 THEN s.debt_usd ELSE 0 END), 0) AS total_debt,
           COUNT(CASE WHEN s.debt_usd > 0 THEN 1 END) AS open_sales
    FROM customers c
    LEFT JOIN sales s ON s.customer_id = c.id AND s.payment_status != 'cancelled'
"#;

pub(crate) async fn fetch(conn: &mut SqliteConnection, id: i64) -> DbResult<Customer> {
    let sql = format!("{} WHERE id = ?1", SELECT_CUSTOMER);
    sqlx::query_as::<_, Customer>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", id))
}

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
    timeout: Duration,
}

impl CustomerRepository {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        CustomerRepository { pool, timeout }
    }

    pub async fn create(&self, ctx: &RequestContext, input: &NewCustomer) -> DbResult<Customer> {
        validate_customer(input)?;

        commit_within(self.timeout, "customer_create", async {
            let mut tx = begin_write(&self.pool).await?;
            if let Some(home) = input.home_location {
                location::ensure_exists(&mut tx, home).await?;
            }

            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO customers (name, phone, home_location_kind, home_location_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                RETURNING id
                "#,
            )
            .bind(input.name.trim())
            .bind(input.phone.as_deref().map(str::trim))
            .bind(input.home_location.map(|l| l.kind))
            .bind(input.home_location.map(|l| l.id))
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

            let customer = fetch(&mut tx, id).await?;

            let mut op = NewOperation::new(
                OperationType::CustomerCreate,
                "customers",
                Some(id),
                format!("Customer created: {}", customer.name),
            )
            .new_data(json!(customer));
            if let Some(home) = input.home_location {
                op = op.location(home);
            }
            history::record(&mut tx, ctx, op).await;

            info!(customer_id = id, "Customer created");
            Ok((tx, customer))
        })
        .await
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Customer>> {
        let sql = format!("{} WHERE id = ?1", SELECT_CUSTOMER);
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    /// Total outstanding debt and the number of sales still owing.
    pub async fn debt_summary(&self, customer_id: i64) -> DbResult<DebtSummary> {
        let sql = format!("{} WHERE c.id = ?1 GROUP BY c.id, c.name", DEBT_SUMMARY);
        sqlx::query_as::<_, DebtSummary>(&sql)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", customer_id))
    }

    /// Every customer with positive outstanding debt, largest first.
    pub async fn debtors(&self) -> DbResult<Vec<DebtSummary>> {
        let sql = format!(
            "{} GROUP BY c.id, c.name HAVING total_debt > 0 ORDER BY total_debt DESC, c.id",
            DEBT_SUMMARY
        );
        let rows = sqlx::query_as::<_, DebtSummary>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Debtors the caller may see: those homed at a granted location, plus
    /// customers with no home location.
    pub async fn debtors_for(&self, ctx: &RequestContext) -> DbResult<Vec<DebtSummary>> {
        let debtors = self.debtors().await?;
        if ctx.role.is_admin() {
            return Ok(debtors);
        }

        let homes: HashMap<i64, LocationRef> = sqlx::query_as::<_, (i64, LocationKind, i64)>(
            "SELECT id, home_location_kind, home_location_id FROM customers
             WHERE home_location_kind IS NOT NULL AND home_location_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(id, kind, location_id)| (id, LocationRef::new(location_id, kind)))
        .collect();

        Ok(debtors
            .into_iter()
            .filter(|d| match homes.get(&d.customer_id) {
                Some(home) => ctx.ensure_location_access(home).is_ok(),
                None => true,
            })
            .collect())
    }
}
