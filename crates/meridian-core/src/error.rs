//! # Error Types
//!
//! Domain-specific error types for meridian-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  meridian-core errors (this file)                                      │
//! │  ├── CoreError        - Business rule failures                         │
//! │  ├── ValidationError  - Input validation failures                      │
//! │  └── ErrorKind        - Stable `error_type` taxonomy                   │
//! │                                                                         │
//! │  meridian-db errors (separate crate)                                   │
//! │  └── DbError          - Storage failures, timeouts, wraps CoreError    │
//! │                                                                         │
//! │  apps/api errors                                                        │
//! │  └── ApiError         - {error_type, message, retryable} JSON          │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → ApiError → Client       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::location::LocationRef;
use crate::money::Money;
use crate::quantity::Quantity;

// =============================================================================
// Error Kind
// =============================================================================

/// The stable error taxonomy surfaced to clients as `error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    InsufficientStock,
    NotFound,
    PermissionDenied,
    Timeout,
    IntegrityConflict,
    Internal,
}

impl ErrorKind {
    /// The wire name of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Timeout => "timeout",
            ErrorKind::IntegrityConflict => "integrity_conflict",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether a client may retry the same request unchanged.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Timeout)
    }
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// None of these are raised after a mutation has been applied: engines check
/// and plan first, then write.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Selling or moving more than the location holds.
    ///
    /// ```text
    /// decrement(store 1, product 7, qty 5)
    ///      │
    ///      ▼
    /// on hand = 3  ──►  InsufficientStock { available: 3, requested: 5 }
    /// ```
    #[error(
        "Insufficient stock for product {product_id} at {location}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: i64,
        location: LocationRef,
        available: Quantity,
        requested: Quantity,
    },

    /// The caller's location grants do not cover the operation.
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// A sale would carry debt but has no customer to owe it.
    #[error("Debt of {debt} requires a customer")]
    DebtWithoutCustomer { debt: Money },

    /// cash + click + terminal exceeds the sale total.
    #[error("Payment {paid} exceeds sale total {total}")]
    Overpayment { total: Money, paid: Money },

    /// A settlement larger than everything the customer owes.
    #[error("Payment {payment} exceeds outstanding debt {outstanding}")]
    PaymentExceedsDebt { outstanding: Money, payment: Money },

    /// Sale is not in a state that allows the requested operation.
    #[error("Sale {sale_id} is {status}, cannot perform operation")]
    InvalidSaleStatus { sale_id: i64, status: String },

    /// Pending transfer was already confirmed or discarded.
    #[error("Transfer {transfer_id} is {status}, expected pending")]
    InvalidTransferStatus { transfer_id: i64, status: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Shorthand for [`CoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        CoreError::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Maps this error onto the client-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CoreError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            CoreError::DebtWithoutCustomer { .. }
            | CoreError::Overpayment { .. }
            | CoreError::PaymentExceedsDebt { .. }
            | CoreError::InvalidSaleStatus { .. }
            | CoreError::InvalidTransferStatus { .. }
            | CoreError::Validation(_) => ErrorKind::Validation,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Value is above the accepted range.
    #[error("{field} exceeds the maximum of {max}")]
    TooLarge { field: String, max: String },

    /// Collection is empty.
    #[error("{field} must not be empty")]
    Empty { field: String },

    /// Collection is too large.
    #[error("{field} cannot have more than {max} entries")]
    TooMany { field: String, max: usize },

    /// Invalid format (e.g., unknown location kind).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// sell_price below cost_price.
    #[error("sell price {sell} is below cost price {cost}")]
    SellBelowCost { sell: Money, cost: Money },

    /// Transfer source and destination are the same location.
    #[error("source and destination must differ ({location})")]
    SameLocation { location: LocationRef },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationKind;

    #[test]
    fn test_insufficient_stock_message() {
        let err = CoreError::InsufficientStock {
            product_id: 7,
            location: LocationRef::new(1, LocationKind::Store),
            available: Quantity::from_units(3),
            requested: Quantity::from_milli(5_500),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product 7 at store:1: available 3, requested 5.5"
        );
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "name".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(err.kind().as_str(), "validation_error");
    }

    #[test]
    fn test_only_timeout_is_retryable() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Internal.is_retryable());
    }
}
