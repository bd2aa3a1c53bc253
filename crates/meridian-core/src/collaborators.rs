//! # Collaborator Interfaces
//!
//! Outbound notifications and receipt documents are produced outside the
//! ledger. The engines only know these traits; `apps/api` wires in the
//! default implementations.
//!
//! ```text
//!   settlement commit ──► DebtNotifier::payment_confirmation   (best effort)
//!   GET receipt       ──► ReceiptRenderer::render(SaleSnapshot, Currency)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::money::{CurrencyRate, Money};
use crate::types::{Sale, SaleItem};

/// Failure reported by a collaborator. Never unwinds a committed operation.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("rendering failed: {0}")]
    Render(String),
}

// =============================================================================
// Debt Notifications
// =============================================================================

/// Currency a document or message is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Usd,
    #[default]
    Uzs,
}

/// Amount in both currencies at a given rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct DualAmount {
    pub usd: Money,
    pub uzs: i64,
}

impl DualAmount {
    pub fn at_rate(usd: Money, rate: CurrencyRate) -> Self {
        DualAmount {
            usd,
            uzs: usd.to_uzs(rate),
        }
    }
}

/// A reminder that a customer still owes money.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct DebtReminder {
    /// Phone number or chat handle; `None` when the customer has none.
    pub recipient: Option<String>,
    pub customer_name: String,
    pub debt: DualAmount,
    pub location_name: Option<String>,
}

/// Confirmation sent after a debt payment commits.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct PaymentConfirmation {
    pub recipient: Option<String>,
    pub customer_name: String,
    pub paid: DualAmount,
    pub remaining: DualAmount,
    pub location_name: Option<String>,
}

pub trait DebtNotifier: Send + Sync {
    fn debt_reminder(&self, notice: &DebtReminder) -> Result<(), CollaboratorError>;

    fn payment_confirmation(&self, notice: &PaymentConfirmation) -> Result<(), CollaboratorError>;
}

// =============================================================================
// Receipts
// =============================================================================

/// Everything a receipt shows, frozen at render time.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct SaleSnapshot {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub customer_name: Option<String>,
    pub location_name: Option<String>,
}

impl SaleSnapshot {
    /// Converts an amount to the requested currency at the sale's own rate.
    pub fn amount_in(&self, amount: Money, currency: Currency) -> i64 {
        match currency {
            Currency::Usd => amount.cents(),
            Currency::Uzs => amount.to_uzs(self.sale.currency_rate),
        }
    }
}

/// A rendered receipt document.
#[derive(Debug, Clone)]
pub struct RenderedReceipt {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

pub trait ReceiptRenderer: Send + Sync {
    fn render(
        &self,
        snapshot: &SaleSnapshot,
        currency: Currency,
    ) -> Result<RenderedReceipt, CollaboratorError>;
}
