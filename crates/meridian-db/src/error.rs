//! # Database Error Types
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  sqlx::Error ──────────┐                                                │
//! │  MigrateError ─────────┼──► DbError (this module) ──► ApiError (api)    │
//! │  CoreError (planners) ─┘         │                                      │
//! │  tokio timeout ──────────────────┘                                      │
//! │                                                                         │
//! │  DbError::kind() maps everything onto the client taxonomy.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use meridian_core::{CoreError, ErrorKind};
use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Business rule failure raised while planning or applying an operation.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Duplicate barcode
    /// - Duplicate username
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key or CHECK constraint violation.
    ///
    /// ## When This Occurs
    /// - Deleting a location that still holds stock
    /// - A write that would drive a quantity below zero
    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    /// The operation did not finish within `DbConfig::operation_timeout`.
    /// Nothing was applied.
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// SQLite reported the database busy or locked.
    #[error("Database busy: {0}")]
    Busy(String),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A stored JSON column could not be decoded.
    #[error("Corrupt {column} column: {reason}")]
    CorruptColumn { column: &'static str, reason: String },

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DbError::Domain(CoreError::not_found(entity, id))
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn corrupt(column: &'static str, err: impl ToString) -> Self {
        DbError::CorruptColumn {
            column,
            reason: err.to_string(),
        }
    }

    /// Maps this error onto the client-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Domain(e) => e.kind(),
            DbError::UniqueViolation { .. } | DbError::ConstraintViolation { .. } => {
                ErrorKind::IntegrityConflict
            }
            DbError::Timeout { .. } | DbError::Busy(_) | DbError::PoolExhausted => {
                ErrorKind::Timeout
            }
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::CorruptColumn { .. }
            | DbError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same request may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<meridian_core::ValidationError> for DbError {
    fn from(err: meridian_core::ValidationError) -> Self {
        DbError::Domain(CoreError::Validation(err))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → NotFound
/// sqlx::Error::Database       → message decides: UNIQUE / FOREIGN KEY / CHECK / busy
/// sqlx::Error::PoolTimedOut   → PoolExhausted
/// Other                       → Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed")
                    || msg.contains("CHECK constraint failed")
                {
                    DbError::ConstraintViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("database is locked") || msg.contains("database is busy") {
                    DbError::Busy(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
