//! # Transfer Engine
//!
//! Moves stock between locations, either immediately or in two phases.
//!
//! ## Two-Phase Flow
//! ```text
//!            stage(from, to, items)
//!                     │  no stock touched
//!                     ▼
//!              ┌─────────────┐
//!              │   pending   │
//!              └──────┬──────┘
//!        confirm(id)  │  discard(id)
//!       ┌─────────────┴─────────────┐
//!       ▼                           ▼
//! ┌─────────────┐             ┌─────────────┐
//! │  confirmed  │             │  discarded  │
//! │ stock moved │             │  no effect  │
//! └─────────────┘             └─────────────┘
//! ```
//!
//! An immediate transfer and a confirm run the same movement: for every line,
//! decrement the source and increment the destination, then write the
//! transfer row and its audit entry. One failed line rolls back all of it.
//!
//! ## Permission
//! Admins may manage any transfer. Others need a grant on the source or the
//! destination; grants are normalized before the check, so legacy flat ids
//! and typed entries behave the same.

use chrono::{DateTime, Utc};
use meridian_core::validation::{validate_line_count, validate_quantity};
use meridian_core::{
    CoreError, LocationKind, LocationRef, NewOperation, OperationType, PendingTransfer,
    RequestContext, StockChange, Transfer, TransferItem, TransferStatus, ValidationError,
};
use serde_json::json;
use sqlx::{SqliteConnection, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::stock;
use crate::error::{DbError, DbResult};
use crate::pool::{begin_write, commit_within};
use crate::repository::{history, location, product};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct PendingRow {
    id: i64,
    from_kind: LocationKind,
    from_id: i64,
    to_kind: LocationKind,
    to_id: i64,
    items: String,
    status: TransferStatus,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PendingRow> for PendingTransfer {
    type Error = DbError;

    fn try_from(row: PendingRow) -> DbResult<Self> {
        Ok(PendingTransfer {
            id: row.id,
            from: LocationRef::new(row.from_id, row.from_kind),
            to: LocationRef::new(row.to_id, row.to_kind),
            items: serde_json::from_str(&row.items).map_err(|e| DbError::corrupt("items", e))?,
            status: row.status,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_PENDING: &str = r#"
    SELECT id, from_kind, from_id, to_kind, to_id, items, status, created_by, created_at, updated_at
    FROM pending_transfers
"#;

async fn fetch_pending(conn: &mut SqliteConnection, id: i64) -> DbResult<PendingTransfer> {
    let sql = format!("{} WHERE id = ?1", SELECT_PENDING);
    let row: PendingRow = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Pending transfer", id))?;
    PendingTransfer::try_from(row)
}

fn encode_items(items: &[TransferItem]) -> DbResult<String> {
    serde_json::to_string(items).map_err(|e| DbError::Internal(format!("encode items: {}", e)))
}

fn validate_request(from: LocationRef, to: LocationRef, items: &[TransferItem]) -> DbResult<()> {
    if from == to {
        return Err(ValidationError::SameLocation { location: from }.into());
    }
    validate_line_count("items", items.len())?;
    for item in items {
        validate_quantity("quantity", item.quantity)?;
    }
    Ok(())
}

fn ensure_pending(pending: &PendingTransfer) -> DbResult<()> {
    if pending.status != TransferStatus::Pending {
        return Err(CoreError::InvalidTransferStatus {
            transfer_id: pending.id,
            status: pending.status.as_str().to_string(),
        }
        .into());
    }
    Ok(())
}

// =============================================================================
// Movement
// =============================================================================

/// Moves every line and writes the transfer row plus its audit entry.
async fn execute(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
    from: LocationRef,
    to: LocationRef,
    items: &[TransferItem],
    staged_id: Option<i64>,
) -> DbResult<Transfer> {
    location::ensure_exists(conn, from).await?;
    location::ensure_exists(conn, to).await?;

    let mut moved: Vec<(String, StockChange, StockChange)> = Vec::with_capacity(items.len());
    for item in items {
        let product = product::fetch(conn, item.product_id).await?;
        let out = stock::decrement(conn, from, item.product_id, item.quantity).await?;
        let into = stock::increment(conn, to, item.product_id, item.quantity).await?;
        moved.push((product.name, out, into));
    }

    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO transfers (from_kind, from_id, to_kind, to_id, items, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING id
        "#,
    )
    .bind(from.kind)
    .bind(from.id)
    .bind(to.kind)
    .bind(to.id)
    .bind(encode_items(items)?)
    .bind(ctx.user_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    let transfer = Transfer {
        id,
        from,
        to,
        items: items.to_vec(),
        created_by: ctx.user_id,
        created_at: now,
    };

    let lines: Vec<_> = moved
        .iter()
        .map(|(name, out, into)| {
            json!({
                "product_id": out.product_id,
                "product_name": name,
                "quantity": out.old_quantity - out.new_quantity,
                "from_before": out.old_quantity,
                "from_after": out.new_quantity,
                "to_before": into.old_quantity,
                "to_after": into.new_quantity,
            })
        })
        .collect();
    let names: Vec<&str> = moved.iter().map(|(name, _, _)| name.as_str()).collect();
    let description = match staged_id {
        Some(pending) => format!(
            "Transfer {} → {} confirmed (pending #{}): {}",
            from,
            to,
            pending,
            names.join(", ")
        ),
        None => format!("Transfer {} → {}: {}", from, to, names.join(", ")),
    };

    history::record(
        conn,
        ctx,
        NewOperation::new(OperationType::Transfer, "transfers", Some(id), description)
            .location(from)
            .new_data(json!({ "transfer": transfer, "lines": lines })),
    )
    .await;

    Ok(transfer)
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone)]
pub struct TransferEngine {
    pool: SqlitePool,
    timeout: Duration,
}

impl TransferEngine {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        TransferEngine { pool, timeout }
    }

    /// Moves stock now. All lines move or none do.
    pub async fn transfer(
        &self,
        ctx: &RequestContext,
        from: LocationRef,
        to: LocationRef,
        items: &[TransferItem],
    ) -> DbResult<Transfer> {
        validate_request(from, to, items)?;
        ctx.ensure_can_manage_transfer(&from, &to)?;

        commit_within(self.timeout, "transfer", async {
            let mut tx = begin_write(&self.pool).await?;
            let transfer = execute(&mut tx, ctx, from, to, items, None).await?;
            info!(
                transfer_id = transfer.id,
                from = %from,
                to = %to,
                lines = items.len(),
                "Transfer completed"
            );
            Ok((tx, transfer))
        })
        .await
    }

    /// Persists a proposal without touching stock.
    pub async fn stage(
        &self,
        ctx: &RequestContext,
        from: LocationRef,
        to: LocationRef,
        items: &[TransferItem],
    ) -> DbResult<PendingTransfer> {
        validate_request(from, to, items)?;
        ctx.ensure_can_manage_transfer(&from, &to)?;

        commit_within(self.timeout, "transfer_stage", async {
            let mut tx = begin_write(&self.pool).await?;
            location::ensure_exists(&mut tx, from).await?;
            location::ensure_exists(&mut tx, to).await?;
            for item in items {
                product::fetch(&mut tx, item.product_id).await?;
            }

            let now = Utc::now();
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO pending_transfers
                    (from_kind, from_id, to_kind, to_id, items, status, created_by, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                RETURNING id
                "#,
            )
            .bind(from.kind)
            .bind(from.id)
            .bind(to.kind)
            .bind(to.id)
            .bind(encode_items(items)?)
            .bind(TransferStatus::Pending)
            .bind(ctx.user_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            let pending = fetch_pending(&mut tx, id).await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::TransferStaged,
                    "pending_transfers",
                    Some(id),
                    format!("Transfer {} → {} staged ({} lines)", from, to, items.len()),
                )
                .location(from)
                .new_data(json!(pending)),
            )
            .await;

            info!(pending_id = id, from = %from, to = %to, "Transfer staged");
            Ok((tx, pending))
        })
        .await
    }

    /// Performs a staged transfer and marks it confirmed.
    pub async fn confirm(&self, ctx: &RequestContext, pending_id: i64) -> DbResult<Transfer> {
        commit_within(self.timeout, "transfer_confirm", async {
            let mut tx = begin_write(&self.pool).await?;
            let pending = fetch_pending(&mut tx, pending_id).await?;
            ctx.ensure_can_manage_transfer(&pending.from, &pending.to)?;
            ensure_pending(&pending)?;

            let transfer = execute(
                &mut tx,
                ctx,
                pending.from,
                pending.to,
                &pending.items,
                Some(pending_id),
            )
            .await?;

            set_status(&mut tx, pending_id, TransferStatus::Confirmed).await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::TransferConfirmed,
                    "pending_transfers",
                    Some(pending_id),
                    format!("Pending transfer #{} confirmed as transfer #{}", pending_id, transfer.id),
                )
                .location(pending.from)
                .old_data(json!({ "status": TransferStatus::Pending }))
                .new_data(json!({ "status": TransferStatus::Confirmed, "transfer_id": transfer.id })),
            )
            .await;

            info!(pending_id, transfer_id = transfer.id, "Pending transfer confirmed");
            Ok((tx, transfer))
        })
        .await
    }

    /// Marks a staged transfer discarded. Stock is untouched.
    pub async fn discard(&self, ctx: &RequestContext, pending_id: i64) -> DbResult<PendingTransfer> {
        commit_within(self.timeout, "transfer_discard", async {
            let mut tx = begin_write(&self.pool).await?;
            let pending = fetch_pending(&mut tx, pending_id).await?;
            ctx.ensure_can_manage_transfer(&pending.from, &pending.to)?;
            ensure_pending(&pending)?;

            set_status(&mut tx, pending_id, TransferStatus::Discarded).await?;
            let discarded = fetch_pending(&mut tx, pending_id).await?;

            history::record(
                &mut tx,
                ctx,
                NewOperation::new(
                    OperationType::TransferDiscarded,
                    "pending_transfers",
                    Some(pending_id),
                    format!("Pending transfer #{} discarded", pending_id),
                )
                .location(pending.from)
                .old_data(json!(pending))
                .new_data(json!(discarded)),
            )
            .await;

            info!(pending_id, "Pending transfer discarded");
            Ok((tx, discarded))
        })
        .await
    }

    /// Pending proposals the caller may manage, oldest first.
    pub async fn list_pending(&self, ctx: &RequestContext) -> DbResult<Vec<PendingTransfer>> {
        let sql = format!("{} WHERE status = ?1 ORDER BY created_at, id", SELECT_PENDING);
        let rows: Vec<PendingRow> = sqlx::query_as(&sql)
            .bind(TransferStatus::Pending)
            .fetch_all(&self.pool)
            .await?;

        let mut visible = Vec::new();
        for row in rows {
            let pending = PendingTransfer::try_from(row)?;
            if ctx.ensure_can_manage_transfer(&pending.from, &pending.to).is_ok() {
                visible.push(pending);
            }
        }
        debug!(count = visible.len(), user_id = ?ctx.user_id, "Pending transfers listed");
        Ok(visible)
    }
}

async fn set_status(
    conn: &mut SqliteConnection,
    pending_id: i64,
    status: TransferStatus,
) -> DbResult<()> {
    let result = sqlx::query(
        "UPDATE pending_transfers SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
    )
    .bind(status)
    .bind(Utc::now())
    .bind(pending_id)
    .bind(TransferStatus::Pending)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        // Another request finished it between our read and this write.
        let current = fetch_pending(conn, pending_id).await?;
        return Err(CoreError::InvalidTransferStatus {
            transfer_id: pending_id,
            status: current.status.as_str().to_string(),
        }
        .into());
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{put_stock, seed_location, seed_product, setup, stock_at};
    use crate::Database;
    use meridian_core::{ErrorKind, Quantity, Role};

    async fn two_sites(db: &Database, ctx: &RequestContext) -> (LocationRef, LocationRef, i64) {
        let depot = seed_location(db, ctx, LocationKind::Warehouse, "Depot").await;
        let store = seed_location(db, ctx, LocationKind::Store, "Chorsu").await;
        let tea = seed_product(db, ctx, "Tea", 100, 150).await;
        (depot, store, tea)
    }

    fn line(product_id: i64, units: i64) -> Vec<TransferItem> {
        vec![TransferItem {
            product_id,
            quantity: Quantity::from_units(units),
        }]
    }

    #[tokio::test]
    async fn test_immediate_transfer_moves_stock() {
        let (db, ctx) = setup().await;
        let (depot, store, tea) = two_sites(&db, &ctx).await;
        put_stock(&db, &ctx, depot, tea, 10).await;

        let t = db.transfers().transfer(&ctx, depot, store, &line(tea, 4)).await.unwrap();
        assert_eq!(t.items.len(), 1);
        assert_eq!(stock_at(&db, depot, tea).await, Quantity::from_units(6));
        assert_eq!(stock_at(&db, store, tea).await, Quantity::from_units(4));
        assert_eq!(db.history().for_record("transfers", t.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_destination_failure_leaves_source_untouched() {
        let (db, ctx) = setup().await;
        let (depot, store, tea) = two_sites(&db, &ctx).await;
        put_stock(&db, &ctx, depot, tea, 5).await;

        sqlx::query(&format!(
            "CREATE TRIGGER block_destination BEFORE INSERT ON location_stock
             WHEN NEW.location_kind = 'store' AND NEW.location_id = {}
             BEGIN SELECT RAISE(ABORT, 'destination offline'); END",
            store.id
        ))
        .execute(db.pool())
        .await
        .unwrap();

        let result = db.transfers().transfer(&ctx, depot, store, &line(tea, 5)).await;
        assert!(result.is_err());
        assert_eq!(stock_at(&db, depot, tea).await, Quantity::from_units(5));
        assert_eq!(stock_at(&db, store, tea).await, Quantity::zero());
    }

    #[tokio::test]
    async fn test_insufficient_source_moves_nothing() {
        let (db, ctx) = setup().await;
        let (depot, store, tea) = two_sites(&db, &ctx).await;
        let rice = seed_product(&db, &ctx, "Rice", 200, 250).await;
        put_stock(&db, &ctx, depot, tea, 5).await;
        put_stock(&db, &ctx, depot, rice, 1).await;

        let items = vec![
            TransferItem { product_id: tea, quantity: Quantity::from_units(2) },
            TransferItem { product_id: rice, quantity: Quantity::from_units(3) },
        ];
        let err = db.transfers().transfer(&ctx, depot, store, &items).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(stock_at(&db, depot, tea).await, Quantity::from_units(5));
        assert_eq!(stock_at(&db, store, tea).await, Quantity::zero());
    }

    #[tokio::test]
    async fn test_same_location_rejected() {
        let (db, ctx) = setup().await;
        let (depot, _, tea) = two_sites(&db, &ctx).await;
        let err = db.transfers().transfer(&ctx, depot, depot, &line(tea, 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_stage_confirm_and_double_confirm() {
        let (db, ctx) = setup().await;
        let (depot, store, tea) = two_sites(&db, &ctx).await;
        put_stock(&db, &ctx, depot, tea, 10).await;

        let pending = db.transfers().stage(&ctx, depot, store, &line(tea, 3)).await.unwrap();
        assert_eq!(pending.status, TransferStatus::Pending);
        assert_eq!(stock_at(&db, depot, tea).await, Quantity::from_units(10));

        db.transfers().confirm(&ctx, pending.id).await.unwrap();
        assert_eq!(stock_at(&db, depot, tea).await, Quantity::from_units(7));
        assert_eq!(stock_at(&db, store, tea).await, Quantity::from_units(3));

        let again = db.transfers().confirm(&ctx, pending.id).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::Validation);
        assert_eq!(stock_at(&db, depot, tea).await, Quantity::from_units(7));
    }

    #[tokio::test]
    async fn test_discard_leaves_stock() {
        let (db, ctx) = setup().await;
        let (depot, store, tea) = two_sites(&db, &ctx).await;
        put_stock(&db, &ctx, depot, tea, 10).await;

        let pending = db.transfers().stage(&ctx, depot, store, &line(tea, 3)).await.unwrap();
        let discarded = db.transfers().discard(&ctx, pending.id).await.unwrap();
        assert_eq!(discarded.status, TransferStatus::Discarded);
        assert_eq!(stock_at(&db, depot, tea).await, Quantity::from_units(10));

        let err = db.transfers().confirm(&ctx, pending.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_legacy_and_typed_grants_manage_the_same_transfer() {
        let (db, ctx) = setup().await;
        let (depot, store, tea) = two_sites(&db, &ctx).await;
        put_stock(&db, &ctx, depot, tea, 10).await;
        let pending = db.transfers().stage(&ctx, depot, store, &line(tea, 1)).await.unwrap();

        let legacy = db
            .users()
            .create("legacy", Role::Staff, None, Some(&format!("[{}]", store.id)))
            .await
            .unwrap();
        let typed = db
            .users()
            .create(
                "typed",
                Role::Staff,
                Some(&format!(r#"[{{"id": {}, "kind": "store"}}]"#, store.id)),
                None,
            )
            .await
            .unwrap();
        let outsider = db
            .users()
            .create("outsider", Role::Staff, Some("[99]"), None)
            .await
            .unwrap();

        for user in [&legacy, &typed] {
            let user_ctx = db.users().context_for(user.id).await.unwrap();
            let visible = db.transfers().list_pending(&user_ctx).await.unwrap();
            assert_eq!(visible.len(), 1, "{} should see the proposal", user.username);
        }

        let outsider_ctx = db.users().context_for(outsider.id).await.unwrap();
        assert!(db.transfers().list_pending(&outsider_ctx).await.unwrap().is_empty());
        let denied = db.transfers().confirm(&outsider_ctx, pending.id).await.unwrap_err();
        assert_eq!(denied.kind(), ErrorKind::PermissionDenied);

        let typed_ctx = db.users().context_for(typed.id).await.unwrap();
        db.transfers().confirm(&typed_ctx, pending.id).await.unwrap();
        assert_eq!(stock_at(&db, store, tea).await, Quantity::from_units(1));
    }
}
