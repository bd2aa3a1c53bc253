//! # meridian-core: Pure Business Logic for the Meridian Retail Ledger
//!
//! This crate holds the settlement and stock-consistency rules as pure
//! functions. It never touches a database, socket, or file.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Meridian Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    apps/api (axum)                              │   │
//! │  │   /sales  /debts/settle  /returns  /transfers  /stock  ...     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    meridian-db (engines)                        │   │
//! │  │   stock ledger • transfers • sale builder • settlement • returns│   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ plans, validation                      │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ meridian-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────┐ ┌────────────┐ ┌──────────┐ ┌──────────────┐    │   │
//! │  │   │  money   │ │ allocation │ │ reversal │ │   location   │    │   │
//! │  │   │ Quantity │ │ split/FIFO │ │ buckets  │ │ grants/perm  │    │   │
//! │  │   └──────────┘ └────────────┘ └──────────┘ └──────────────┘    │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - USD cents and the UZS currency-rate snapshot
//! - [`quantity`] - Fixed-point stock quantities
//! - [`types`] - Domain records (Sale, SaleItem, Transfer, ...)
//! - [`location`] - Canonical location refs, grant normalization, permissions
//! - [`context`] - Explicit per-request actor context
//! - [`allocation`] - Sale bucket split and FIFO debt settlement planning
//! - [`reversal`] - Return reversal planning against sale buckets
//! - [`validation`] - Input validation
//! - [`collaborators`] - Notifier and receipt renderer interfaces
//! - [`error`] - Domain error types
//!
//! ## Example
//!
//! ```rust
//! use meridian_core::allocation::{split_sale_payment, PaymentInstruction};
//! use meridian_core::money::Money;
//!
//! let total = Money::from_dollars(100);
//! let pay = PaymentInstruction {
//!     cash: Money::from_dollars(40),
//!     click: Money::zero(),
//!     terminal: Money::zero(),
//! };
//! let buckets = split_sale_payment(total, &pay, true).unwrap();
//! assert_eq!(buckets.debt, Money::from_dollars(60));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod collaborators;
pub mod context;
pub mod error;
pub mod location;
pub mod money;
pub mod quantity;
pub mod reversal;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use context::RequestContext;
pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use location::{LocationGrants, LocationKind, LocationRef, Role};
pub use money::{CurrencyRate, Money};
pub use quantity::Quantity;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Tolerance for bucket-sum checks, in cents.
///
/// `total_amount` must equal `cash + click + terminal + debt` within this.
pub const MONEY_EPSILON_CENTS: i64 = 1;

/// Largest amount accepted on input: one trillion dollars, in cents.
///
/// Keeps every bucket sum and line total well inside `i64`.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000_000;

/// Largest quantity accepted on input: one billion units, in thousandths.
pub const MAX_QUANTITY_MILLI: i64 = 1_000_000_000_000;

/// Maximum line items in a single sale.
pub const MAX_SALE_ITEMS: usize = 200;

/// Maximum length of a client-supplied idempotency key.
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 100;

/// Idempotency records older than this are eligible for cleanup.
pub const IDEMPOTENCY_RETENTION_DAYS: i64 = 30;

/// Operation history rows older than this are eligible for cleanup.
pub const HISTORY_RETENTION_DAYS: i64 = 90;
