//! # Domain Types
//!
//! Core records of the retail ledger.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │  DebtPayment    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  cost_price     │   │  total_amount   │   │  cash/click/    │       │
//! │  │  (moving avg)   │   │  cash  click    │   │  terminal       │       │
//! │  │  sell_price     │   │  terminal debt  │   │  currency_rate  │       │
//! │  └─────────────────┘   └────────┬────────┘   └─────────────────┘       │
//! │                                 │ 1..n                                  │
//! │  ┌─────────────────┐   ┌────────▼────────┐   ┌─────────────────┐       │
//! │  │  StockLevel     │   │    SaleItem     │   │ PendingTransfer │       │
//! │  │  (kind,id,prod) │   │  product_name   │   │  items (JSON)   │       │
//! │  │  quantity ≥ 0   │   │  snapshot       │   │  status         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  OperationRecord (audit)            ApiOperation (idempotency)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records whose columns are all scalars derive `sqlx::FromRow` behind the
//! `sqlx` feature. Records with JSON columns are decoded by meridian-db.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::allocation::PaymentBuckets;
use crate::location::{LocationKind, LocationRef, Role};
use crate::money::{CurrencyRate, Money};
use crate::quantity::Quantity;

// =============================================================================
// Product
// =============================================================================

/// A product in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub barcode: Option<String>,
    /// Quantity-weighted moving average across all restock batches.
    pub cost_price: Money,
    pub sell_price: Money,
    /// Display unit ("pcs", "kg", "m").
    pub unit_type: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or updating a product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub barcode: Option<String>,
    pub cost_price: Money,
    pub sell_price: Money,
    #[serde(default = "default_unit_type")]
    pub unit_type: String,
}

fn default_unit_type() -> String {
    "pcs".to_string()
}

// =============================================================================
// Locations and Stock
// =============================================================================

/// A store or warehouse.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Location {
    pub id: i64,
    pub kind: LocationKind,
    pub name: String,
    pub address: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Location {
    #[inline]
    pub fn location_ref(&self) -> LocationRef {
        LocationRef::new(self.id, self.kind)
    }
}

/// Input for creating or editing a location.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewLocation {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// Quantity of one product at one location.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockLevel {
    pub location_kind: LocationKind,
    pub location_id: i64,
    pub product_id: i64,
    pub quantity: Quantity,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    #[inline]
    pub fn location(&self) -> LocationRef {
        LocationRef::new(self.location_id, self.location_kind)
    }
}

/// Before/after view of a single stock mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockChange {
    pub product_id: i64,
    pub location: LocationRef,
    pub old_quantity: Quantity,
    pub new_quantity: Quantity,
}

// =============================================================================
// Customers and Users
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub home_location_kind: Option<LocationKind>,
    pub home_location_id: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn home_location(&self) -> Option<LocationRef> {
        match (self.home_location_id, self.home_location_kind) {
            (Some(id), Some(kind)) => Some(LocationRef::new(id, kind)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewCustomer {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub home_location: Option<LocationRef>,
}

/// Outstanding debt of one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DebtSummary {
    pub customer_id: i64,
    pub customer_name: String,
    pub total_debt: Money,
    pub open_sales: i64,
}

/// A user row. Grant lists stay raw JSON until normalized.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub allowed_locations: Option<String>,
    pub transfer_locations: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Sales
// =============================================================================

/// Lifecycle of a sale's settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// No debt outstanding.
    Paid,
    /// Some debt outstanding.
    Partial,
    /// Every line returned.
    Cancelled,
}

impl PaymentStatus {
    /// `paid` when debt is exactly zero, otherwise `partial`.
    pub fn from_debt(debt: Money) -> Self {
        if debt.is_zero() {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Partial
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

/// A sale header.
///
/// `total_amount == cash_usd + click_usd + terminal_usd + debt_usd` holds
/// after creation, after every settlement, and after every return.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: i64,
    pub customer_id: Option<i64>,
    pub location_kind: LocationKind,
    pub location_id: i64,
    pub total_amount: Money,
    pub total_cost: Money,
    pub total_profit: Money,
    pub cash_usd: Money,
    pub click_usd: Money,
    pub terminal_usd: Money,
    /// Negative when the shop owes the customer after a return.
    pub debt_usd: Money,
    pub currency_rate: CurrencyRate,
    pub payment_status: PaymentStatus,
    pub created_by: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn location(&self) -> LocationRef {
        LocationRef::new(self.location_id, self.location_kind)
    }

    pub fn buckets(&self) -> PaymentBuckets {
        PaymentBuckets {
            cash: self.cash_usd,
            click: self.click_usd,
            terminal: self.terminal_usd,
            debt: self.debt_usd,
        }
    }

    pub fn set_buckets(&mut self, buckets: &PaymentBuckets) {
        self.cash_usd = buckets.cash;
        self.click_usd = buckets.click;
        self.terminal_usd = buckets.terminal;
        self.debt_usd = buckets.debt;
    }

    /// Checks the bucket-sum invariant within one cent.
    pub fn is_balanced(&self) -> bool {
        self.buckets().total().approx_eq(self.total_amount)
    }
}

/// A sale line. Product data is snapshotted at sale time.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleItem {
    pub id: i64,
    pub sale_id: i64,
    /// Null once the product is deleted.
    pub product_id: Option<i64>,
    pub product_name: String,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub total_price: Money,
    /// Unit cost at sale time.
    pub cost_price: Money,
    /// Line profit: (unit_price - cost_price) × quantity.
    pub profit: Money,
    pub source_kind: LocationKind,
    pub source_id: i64,
}

impl SaleItem {
    #[inline]
    pub fn source(&self) -> LocationRef {
        LocationRef::new(self.source_id, self.source_kind)
    }
}

/// A sale together with its lines.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleWithItems {
    #[serde(flatten)]
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

/// An append-only debt settlement event.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct DebtPayment {
    pub id: i64,
    pub customer_id: i64,
    /// First sale the payment touched.
    pub sale_id: Option<i64>,
    pub cash_usd: Money,
    pub click_usd: Money,
    pub terminal_usd: Money,
    pub total_usd: Money,
    pub currency_rate: CurrencyRate,
    pub created_by: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Transfers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Confirmed,
    Discarded,
}

impl TransferStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Confirmed => "confirmed",
            TransferStatus::Discarded => "discarded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TransferItem {
    pub product_id: i64,
    pub quantity: Quantity,
}

/// A completed stock movement.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Transfer {
    pub id: i64,
    pub from: LocationRef,
    pub to: LocationRef,
    pub items: Vec<TransferItem>,
    pub created_by: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A staged transfer awaiting confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PendingTransfer {
    pub id: i64,
    pub from: LocationRef,
    pub to: LocationRef,
    pub items: Vec<TransferItem>,
    pub status: TransferStatus,
    pub created_by: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Audit and Idempotency
// =============================================================================

/// Kind of mutating operation, as written to the audit ledger and used to
/// scope idempotency keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Sale,
    DebtPayment,
    PaymentRefund,
    Return,
    Transfer,
    TransferStaged,
    TransferConfirmed,
    TransferDiscarded,
    StockIncrement,
    StockDecrement,
    StockIn,
    StockCheck,
    ProductCreate,
    ProductUpdate,
    ProductDelete,
    CustomerCreate,
    LocationCreate,
    LocationUpdate,
    LocationDelete,
}

impl OperationType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationType::Sale => "sale",
            OperationType::DebtPayment => "debt_payment",
            OperationType::PaymentRefund => "payment_refund",
            OperationType::Return => "return",
            OperationType::Transfer => "transfer",
            OperationType::TransferStaged => "transfer_staged",
            OperationType::TransferConfirmed => "transfer_confirmed",
            OperationType::TransferDiscarded => "transfer_discarded",
            OperationType::StockIncrement => "stock_increment",
            OperationType::StockDecrement => "stock_decrement",
            OperationType::StockIn => "stock_in",
            OperationType::StockCheck => "stock_check",
            OperationType::ProductCreate => "product_create",
            OperationType::ProductUpdate => "product_update",
            OperationType::ProductDelete => "product_delete",
            OperationType::CustomerCreate => "customer_create",
            OperationType::LocationCreate => "location_create",
            OperationType::LocationUpdate => "location_update",
            OperationType::LocationDelete => "location_delete",
        }
    }
}

/// An audit entry to be appended. Actor fields come from the request context.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub operation_type: OperationType,
    pub table_name: &'static str,
    pub record_id: Option<i64>,
    pub description: String,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub location: Option<LocationRef>,
    pub amount: Option<Money>,
}

impl NewOperation {
    pub fn new(
        operation_type: OperationType,
        table_name: &'static str,
        record_id: Option<i64>,
        description: impl Into<String>,
    ) -> Self {
        NewOperation {
            operation_type,
            table_name,
            record_id,
            description: description.into(),
            old_data: None,
            new_data: None,
            location: None,
            amount: None,
        }
    }

    pub fn old_data(mut self, data: serde_json::Value) -> Self {
        self.old_data = Some(data);
        self
    }

    pub fn new_data(mut self, data: serde_json::Value) -> Self {
        self.new_data = Some(data);
        self
    }

    pub fn location(mut self, location: LocationRef) -> Self {
        self.location = Some(location);
        self
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }
}

/// A persisted audit row.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OperationRecord {
    pub id: i64,
    pub operation_type: OperationType,
    pub table_name: String,
    pub record_id: Option<i64>,
    pub description: String,
    #[ts(type = "unknown")]
    pub old_data: Option<serde_json::Value>,
    #[ts(type = "unknown")]
    pub new_data: Option<serde_json::Value>,
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub location: Option<LocationRef>,
    pub amount: Option<Money>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A persisted idempotency record.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApiOperation {
    pub id: i64,
    pub idempotency_key: String,
    pub operation_type: OperationType,
    #[ts(type = "unknown")]
    pub result: serde_json::Value,
    pub user_id: Option<i64>,
    pub status: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sale() -> Sale {
        Sale {
            id: 1,
            customer_id: Some(3),
            location_kind: LocationKind::Store,
            location_id: 1,
            total_amount: Money::from_dollars(100),
            total_cost: Money::from_dollars(70),
            total_profit: Money::from_dollars(30),
            cash_usd: Money::from_dollars(40),
            click_usd: Money::zero(),
            terminal_usd: Money::zero(),
            debt_usd: Money::from_dollars(60),
            currency_rate: CurrencyRate::from_uzs_per_usd(12_700),
            payment_status: PaymentStatus::Partial,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_payment_status_from_debt() {
        assert_eq!(PaymentStatus::from_debt(Money::zero()), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::from_debt(Money::from_cents(1)), PaymentStatus::Partial);
        assert_eq!(PaymentStatus::from_debt(Money::from_cents(-1)), PaymentStatus::Partial);
    }

    #[test]
    fn test_sale_balance_check() {
        let mut sale = sample_sale();
        assert!(sale.is_balanced());
        sale.cash_usd = Money::from_dollars(39);
        assert!(!sale.is_balanced());
    }

    #[test]
    fn test_operation_type_wire_names() {
        assert_eq!(OperationType::PaymentRefund.as_str(), "payment_refund");
        let json = serde_json::to_string(&OperationType::TransferStaged).unwrap();
        assert_eq!(json, "\"transfer_staged\"");
    }

    #[test]
    fn test_new_product_defaults_unit_type() {
        let p: NewProduct =
            serde_json::from_str(r#"{"name":"Rice","cost_price":100,"sell_price":150}"#).unwrap();
        assert_eq!(p.unit_type, "pcs");
        assert!(p.barcode.is_none());
    }
}
