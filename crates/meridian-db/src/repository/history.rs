//! # Operation History
//!
//! Append-only audit ledger. Every mutating engine call writes its rows here
//! from inside its own transaction.
//!
//! ## Best-Effort Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN                                   (business transaction)         │
//! │    UPDATE location_stock ...                                            │
//! │    SAVEPOINT ──► INSERT operations_history ──► ok?  RELEASE             │
//! │                                            └─► err? ROLLBACK TO, warn!  │
//! │    ... business transaction continues                                   │
//! │  COMMIT                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The audit row is the only durable trace once a referenced record is
//! deleted, so descriptions carry names rather than just ids.

use chrono::{DateTime, Duration, Utc};
use meridian_core::{
    LocationKind, LocationRef, Money, NewOperation, OperationRecord, OperationType, RequestContext,
};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    id: i64,
    operation_type: OperationType,
    table_name: String,
    record_id: Option<i64>,
    description: String,
    old_data: Option<String>,
    new_data: Option<String>,
    user_id: Option<i64>,
    username: Option<String>,
    location_kind: Option<LocationKind>,
    location_id: Option<i64>,
    amount: Option<Money>,
    created_at: DateTime<Utc>,
}

fn decode_json(column: &'static str, raw: Option<String>) -> DbResult<Option<serde_json::Value>> {
    raw.map(|s| serde_json::from_str(&s).map_err(|e| DbError::corrupt(column, e)))
        .transpose()
}

impl TryFrom<OperationRow> for OperationRecord {
    type Error = DbError;

    fn try_from(row: OperationRow) -> DbResult<Self> {
        let location = match (row.location_id, row.location_kind) {
            (Some(id), Some(kind)) => Some(LocationRef::new(id, kind)),
            _ => None,
        };
        Ok(OperationRecord {
            id: row.id,
            operation_type: row.operation_type,
            table_name: row.table_name,
            record_id: row.record_id,
            description: row.description,
            old_data: decode_json("old_data", row.old_data)?,
            new_data: decode_json("new_data", row.new_data)?,
            user_id: row.user_id,
            username: row.username,
            location,
            amount: row.amount,
            created_at: row.created_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, operation_type, table_name, record_id, description, old_data, new_data,
           user_id, username, location_kind, location_id, amount, created_at
    FROM operations_history
"#;

// =============================================================================
// Writes (inside a caller's transaction)
// =============================================================================

/// Inserts one audit row. Fails loudly; prefer [`record`].
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    ctx: &RequestContext,
    op: &NewOperation,
) -> DbResult<i64> {
    let old_data = op.old_data.as_ref().map(|v| v.to_string());
    let new_data = op.new_data.as_ref().map(|v| v.to_string());

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO operations_history (
            operation_type, table_name, record_id, description, old_data, new_data,
            user_id, username, location_kind, location_id, amount, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        RETURNING id
        "#,
    )
    .bind(op.operation_type)
    .bind(op.table_name)
    .bind(op.record_id)
    .bind(&op.description)
    .bind(old_data)
    .bind(new_data)
    .bind(ctx.user_id)
    .bind(ctx.username.as_deref())
    .bind(op.location.map(|l| l.kind))
    .bind(op.location.map(|l| l.id))
    .bind(op.amount)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Appends an audit row under a savepoint.
///
/// A failure is rolled back to the savepoint and logged; the enclosing
/// business transaction is left intact and continues.
pub(crate) async fn record(conn: &mut SqliteConnection, ctx: &RequestContext, op: NewOperation) {
    let outcome: DbResult<i64> = async {
        let mut savepoint = conn.begin().await?;
        match append(&mut savepoint, ctx, &op).await {
            Ok(id) => {
                savepoint.commit().await?;
                Ok(id)
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e)
            }
        }
    }
    .await;

    match outcome {
        Ok(id) => debug!(
            history_id = id,
            operation = op.operation_type.as_str(),
            record_id = ?op.record_id,
            "Audit row written"
        ),
        Err(e) => warn!(
            error = %e,
            operation = op.operation_type.as_str(),
            table = op.table_name,
            record_id = ?op.record_id,
            request_id = %ctx.request_id,
            "Audit write failed, continuing without it"
        ),
    }
}

// =============================================================================
// Repository (queries, retention)
// =============================================================================

/// Read side of the audit ledger.
#[derive(Debug, Clone)]
pub struct HistoryRepository {
    pool: SqlitePool,
}

impl HistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        HistoryRepository { pool }
    }

    /// All audit rows for one record, oldest first.
    pub async fn for_record(&self, table: &str, record_id: i64) -> DbResult<Vec<OperationRecord>> {
        let sql = format!(
            "{} WHERE table_name = ?1 AND record_id = ?2 ORDER BY created_at, id",
            SELECT_COLUMNS
        );
        let rows: Vec<OperationRow> = sqlx::query_as(&sql)
            .bind(table)
            .bind(record_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OperationRecord::try_from).collect()
    }

    /// Most recent rows touching a location.
    pub async fn for_location(
        &self,
        location: LocationRef,
        limit: i64,
    ) -> DbResult<Vec<OperationRecord>> {
        let sql = format!(
            "{} WHERE location_kind = ?1 AND location_id = ?2 ORDER BY created_at DESC, id DESC LIMIT ?3",
            SELECT_COLUMNS
        );
        let rows: Vec<OperationRow> = sqlx::query_as(&sql)
            .bind(location.kind)
            .bind(location.id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OperationRecord::try_from).collect()
    }

    pub async fn recent(&self, limit: i64) -> DbResult<Vec<OperationRecord>> {
        let sql = format!("{} ORDER BY created_at DESC, id DESC LIMIT ?1", SELECT_COLUMNS);
        let rows: Vec<OperationRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OperationRecord::try_from).collect()
    }

    pub async fn count_by_type(&self, operation_type: OperationType) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM operations_history WHERE operation_type = ?1")
                .bind(operation_type)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Deletes rows older than `days`. Returns the number removed.
    pub async fn cleanup(&self, days: i64) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM operations_history WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        info!(removed = result.rows_affected(), days, "Operation history cleanup");
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
