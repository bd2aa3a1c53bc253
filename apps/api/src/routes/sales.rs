//! Sales, debt settlement, returns and receipts.

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use meridian_core::allocation::PaymentInstruction;
use meridian_core::collaborators::{Currency, DebtReminder, DualAmount, PaymentConfirmation};
use meridian_core::{
    CurrencyRate, Customer, LocationKind, OperationType, RequestContext, SaleWithItems,
};
use meridian_db::{DbError, NewSale, ReturnLine, SettlementOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::extract::{replayable, Body, Caller, IdempotencyKey, Keyed, PathParams};
use crate::state::AppState;

// =============================================================================
// Sales
// =============================================================================

pub async fn create(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<NewSale>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let sale = req.body;
    let sales = state.db.sales();
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::Sale, ctx.user_id, || {
            sales.create_sale(&ctx, &sale)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn get(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<SaleWithItems>> {
    let sale = state.db.sales().get(id).await?;
    ctx.ensure_location_access(&sale.sale.location())?;
    Ok(Json(sale))
}

#[derive(Debug, Deserialize)]
pub struct ReceiptQuery {
    #[serde(default)]
    pub currency: Currency,
}

pub async fn receipt(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams(id): PathParams<i64>,
    Query(query): Query<ReceiptQuery>,
) -> ApiResult<Response> {
    let snapshot = state.db.sales().snapshot(id).await?;
    ctx.ensure_location_access(&snapshot.sale.location())?;

    let rendered = state
        .renderer
        .render(&snapshot, query.currency)
        .map_err(|e| ApiError::new(meridian_core::ErrorKind::Internal, e.to_string()))?;
    Ok(([(CONTENT_TYPE, rendered.content_type)], rendered.body).into_response())
}

// =============================================================================
// Debt Settlement
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub customer_id: i64,
    #[serde(flatten)]
    pub payment: PaymentInstruction,
    #[serde(default)]
    pub currency_rate: Option<CurrencyRate>,
}

/// Sends the payment confirmation once the settlement has committed. A
/// delivery failure is logged only.
fn confirm_payment(state: &AppState, outcome: &SettlementOutcome, phone: Option<String>) {
    let notice = PaymentConfirmation {
        recipient: phone,
        customer_name: outcome.customer_name.clone(),
        paid: DualAmount::at_rate(outcome.paid_amount, outcome.currency_rate),
        remaining: DualAmount::at_rate(outcome.remaining_debt, outcome.currency_rate),
        location_name: None,
    };
    if let Err(e) = state.notifier.payment_confirmation(&notice) {
        warn!(customer_id = outcome.customer_id, error = %e, "Payment confirmation not delivered");
    }
}

pub async fn settle(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<SettleRequest>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let req = req.body;
    let debts = state.db.debts();
    let (ctx, req, st) = (&ctx, &req, &state);
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::DebtPayment, ctx.user_id, || async move {
            let outcome = debts
                .settle(ctx, req.customer_id, &req.payment, req.currency_rate)
                .await?;
            let phone = st
                .db
                .customers()
                .get_by_id(outcome.customer_id)
                .await
                .ok()
                .flatten()
                .and_then(|c| c.phone);
            confirm_payment(st, &outcome, phone);
            Ok::<_, DbError>(outcome)
        })
        .await?;
    Ok(replayable(guarded))
}

/// Loads a customer the caller may see: one homed at a granted location, or
/// one with no home location.
async fn visible_customer(state: &AppState, ctx: &RequestContext, id: i64) -> ApiResult<Customer> {
    let customer = state
        .db
        .customers()
        .get_by_id(id)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", id))?;
    if let Some(home) = customer.home_location() {
        ctx.ensure_location_access(&home)?;
    }
    Ok(customer)
}

pub async fn customer_debt(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<Value>> {
    visible_customer(&state, &ctx, id).await?;
    let summary = state.db.customers().debt_summary(id).await?;
    let payments = state.db.debts().payments_for(id).await?;
    Ok(Json(json!({ "summary": summary, "payments": payments })))
}

pub async fn debtors(State(state): State<AppState>, Caller(ctx): Caller) -> ApiResult<Json<Value>> {
    Ok(Json(json!({ "debtors": state.db.customers().debtors_for(&ctx).await? })))
}

/// Sends a debt reminder for one customer through the notifier.
pub async fn remind(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams(id): PathParams<i64>,
    Body(rate): Body<RateBody>,
) -> ApiResult<Json<Value>> {
    let customer = visible_customer(&state, &ctx, id).await?;
    let summary = state.db.customers().debt_summary(id).await?;

    let location_name = match customer.home_location() {
        Some(loc) => state.db.locations().get(loc).await.ok().map(|l| l.name),
        None => None,
    };

    let notice = DebtReminder {
        recipient: customer.phone.clone(),
        customer_name: customer.name.clone(),
        debt: DualAmount::at_rate(summary.total_debt, rate.currency_rate),
        location_name,
    };
    let delivered = match state.notifier.debt_reminder(&notice) {
        Ok(()) => true,
        Err(e) => {
            warn!(customer_id = id, error = %e, "Debt reminder not delivered");
            false
        }
    };
    Ok(Json(json!({ "reminder": notice, "delivered": delivered })))
}

#[derive(Debug, Deserialize)]
pub struct RateBody {
    pub currency_rate: CurrencyRate,
}

// =============================================================================
// Returns
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ReturnRequest {
    pub sale_id: i64,
    /// Where the customer brought the goods; informational, stock goes back
    /// to each line's original source.
    #[serde(default)]
    pub location_kind: Option<LocationKind>,
    #[serde(default)]
    pub location_id: Option<i64>,
    pub items: Vec<ReturnLine>,
}

pub async fn process_return(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<ReturnRequest>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let req = req.body;
    let returns = state.db.returns();
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::Return, ctx.user_id, || {
            returns.process_return(&ctx, req.sale_id, &req.items)
        })
        .await?;
    Ok(replayable(guarded))
}
