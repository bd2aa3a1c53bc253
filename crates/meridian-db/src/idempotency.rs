//! # Idempotency Guard
//!
//! Deduplicates retried mutating requests by a client-supplied key, scoped by
//! operation type.
//!
//! ```text
//!   run(key, Sale, op)
//!     │
//!     ├── key seen for Sale? ──yes──► stored JSON, already_processed = true
//!     │
//!     └── no ──► op().await ──err──► error returned, nothing stored
//!                    │ ok
//!                    ▼
//!               serialize ──► INSERT api_operations (best effort, warn! on failure)
//!                    │
//!                    ▼
//!               fresh JSON, already_processed = false
//! ```
//!
//! The record is written after the business transaction has committed, in its
//! own statement. A failed write is logged and the result still returned.
//! Two concurrent first attempts with the same key can both run; the guard is
//! advisory.

use chrono::{DateTime, Duration, Utc};
use meridian_core::validation::validate_idempotency_key;
use meridian_core::{ApiOperation, OperationType, IDEMPOTENCY_RETENTION_DAYS};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};

/// Result of a guarded call.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded {
    pub payload: Value,
    pub already_processed: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct ApiOperationRow {
    id: i64,
    idempotency_key: String,
    operation_type: OperationType,
    result: String,
    user_id: Option<i64>,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ApiOperationRow> for ApiOperation {
    type Error = DbError;

    fn try_from(row: ApiOperationRow) -> DbResult<Self> {
        Ok(ApiOperation {
            id: row.id,
            idempotency_key: row.idempotency_key,
            operation_type: row.operation_type,
            result: serde_json::from_str(&row.result).map_err(|e| DbError::corrupt("result", e))?,
            user_id: row.user_id,
            status: row.status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    pool: SqlitePool,
}

impl IdempotencyGuard {
    pub fn new(pool: SqlitePool) -> Self {
        IdempotencyGuard { pool }
    }

    /// Runs `op` at most once per `(key, operation_type)`.
    ///
    /// Without a key the operation simply runs. The key is validated before
    /// anything else happens.
    pub async fn run<T, E, F, Fut>(
        &self,
        key: Option<&str>,
        operation_type: OperationType,
        user_id: Option<i64>,
        op: F,
    ) -> Result<Guarded, E>
    where
        T: Serialize,
        E: From<DbError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) => {
                validate_idempotency_key(k).map_err(DbError::from)?;
                Some(k)
            }
            None => None,
        };

        if let Some(k) = key {
            if let Some(previous) = self.lookup(k, operation_type).await? {
                info!(
                    idempotency_key = k,
                    operation = operation_type.as_str(),
                    "Replaying stored result"
                );
                return Ok(Guarded {
                    payload: previous.result,
                    already_processed: true,
                });
            }
        }

        let result = op().await?;
        let payload = serde_json::to_value(&result)
            .map_err(|e| DbError::Internal(format!("serialize result: {}", e)))?;

        if let Some(k) = key {
            self.remember(k, operation_type, user_id, &payload).await;
        }

        Ok(Guarded {
            payload,
            already_processed: false,
        })
    }

    pub async fn lookup(
        &self,
        key: &str,
        operation_type: OperationType,
    ) -> DbResult<Option<ApiOperation>> {
        let row: Option<ApiOperationRow> = sqlx::query_as(
            r#"
            SELECT id, idempotency_key, operation_type, result, user_id, status, created_at
            FROM api_operations
            WHERE idempotency_key = ?1 AND operation_type = ?2
            "#,
        )
        .bind(key)
        .bind(operation_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ApiOperation::try_from).transpose()
    }

    async fn remember(
        &self,
        key: &str,
        operation_type: OperationType,
        user_id: Option<i64>,
        payload: &Value,
    ) {
        let outcome = sqlx::query(
            r#"
            INSERT INTO api_operations (idempotency_key, operation_type, result, user_id, status, created_at)
            VALUES (?1, ?2, ?3, ?4, 'completed', ?5)
            ON CONFLICT (idempotency_key, operation_type) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(operation_type)
        .bind(payload.to_string())
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => debug!(idempotency_key = key, operation = operation_type.as_str(), "Idempotency record stored"),
            Err(e) => warn!(
                error = %e,
                idempotency_key = key,
                operation = operation_type.as_str(),
                "Failed to store idempotency record, result still returned"
            ),
        }
    }

    /// Deletes records older than `days`.
    pub async fn cleanup(&self, days: i64) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(days);
        let result = sqlx::query("DELETE FROM api_operations WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        info!(removed = result.rows_affected(), days, "Idempotency records cleanup");
        Ok(result.rows_affected())
    }

    pub async fn cleanup_default(&self) -> DbResult<u64> {
        self.cleanup(IDEMPOTENCY_RETENTION_DAYS).await
    }
}
