//! Shared application state and the default collaborator implementations.

use std::sync::Arc;

use meridian_core::collaborators::{
    CollaboratorError, Currency, DebtNotifier, DebtReminder, PaymentConfirmation, ReceiptRenderer,
    RenderedReceipt, SaleSnapshot,
};
use meridian_db::Database;
use serde_json::json;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Requests without `X-User-Id` run as the system user when set.
    pub allow_anonymous: bool,
    pub notifier: Arc<dyn DebtNotifier>,
    pub renderer: Arc<dyn ReceiptRenderer>,
}

impl AppState {
    pub fn new(db: Database) -> Self {
        AppState {
            db,
            allow_anonymous: false,
            notifier: Arc::new(LoggingNotifier),
            renderer: Arc::new(JsonReceiptRenderer),
        }
    }

    pub fn allow_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn DebtNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

// =============================================================================
// Default Collaborators
// =============================================================================

/// Writes notices to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl DebtNotifier for LoggingNotifier {
    fn debt_reminder(&self, notice: &DebtReminder) -> Result<(), CollaboratorError> {
        info!(
            recipient = notice.recipient.as_deref().unwrap_or("-"),
            customer = %notice.customer_name,
            debt_usd = %notice.debt.usd,
            debt_uzs = notice.debt.uzs,
            location = notice.location_name.as_deref().unwrap_or("-"),
            "Debt reminder"
        );
        Ok(())
    }

    fn payment_confirmation(&self, notice: &PaymentConfirmation) -> Result<(), CollaboratorError> {
        info!(
            recipient = notice.recipient.as_deref().unwrap_or("-"),
            customer = %notice.customer_name,
            paid_usd = %notice.paid.usd,
            remaining_usd = %notice.remaining.usd,
            location = notice.location_name.as_deref().unwrap_or("-"),
            "Payment confirmation"
        );
        Ok(())
    }
}

/// Renders the snapshot as JSON with amounts in the requested currency.
#[derive(Debug, Default)]
pub struct JsonReceiptRenderer;

impl ReceiptRenderer for JsonReceiptRenderer {
    fn render(
        &self,
        snapshot: &SaleSnapshot,
        currency: Currency,
    ) -> Result<RenderedReceipt, CollaboratorError> {
        let sale = &snapshot.sale;
        let lines: Vec<_> = snapshot
            .items
            .iter()
            .map(|item| {
                json!({
                    "product": item.product_name,
                    "quantity": item.quantity,
                    "unit_price": snapshot.amount_in(item.unit_price, currency),
                    "total": snapshot.amount_in(item.total_price, currency),
                })
            })
            .collect();

        let doc = json!({
            "sale_id": sale.id,
            "created_at": sale.created_at,
            "location": snapshot.location_name,
            "customer": snapshot.customer_name,
            "currency": currency,
            "items": lines,
            "total": snapshot.amount_in(sale.total_amount, currency),
            "paid": {
                "cash": snapshot.amount_in(sale.cash_usd, currency),
                "click": snapshot.amount_in(sale.click_usd, currency),
                "terminal": snapshot.amount_in(sale.terminal_usd, currency),
            },
            "debt": snapshot.amount_in(sale.debt_usd, currency),
            "status": sale.payment_status,
        });

        let body = serde_json::to_vec_pretty(&doc)
            .map_err(|e| CollaboratorError::Render(e.to_string()))?;
        Ok(RenderedReceipt {
            content_type: "application/json",
            body,
        })
    }
}
