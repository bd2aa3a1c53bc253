//! Stock ledger routes.

use axum::extract::State;
use axum::Json;
use meridian_core::{LocationKind, LocationRef, Money, OperationType, Quantity, StockChange, StockLevel};
use meridian_db::{CountedLine, DbError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiResult;
use crate::extract::{replayable, Body, Caller, IdempotencyKey, Keyed, PathParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub product_id: i64,
    pub location_kind: LocationKind,
    pub location_id: i64,
    pub quantity: Quantity,
}

impl AdjustRequest {
    fn location(&self) -> LocationRef {
        LocationRef::new(self.location_id, self.location_kind)
    }
}

/// Flat form of a stock change, with the requested delta.
#[derive(Debug, Serialize)]
pub struct AdjustResponse {
    pub product_id: i64,
    pub location_kind: LocationKind,
    pub location_id: i64,
    pub quantity: Quantity,
    pub old_quantity: Quantity,
    pub new_quantity: Quantity,
}

impl AdjustResponse {
    fn new(change: StockChange, quantity: Quantity) -> Self {
        AdjustResponse {
            product_id: change.product_id,
            location_kind: change.location.kind,
            location_id: change.location.id,
            quantity,
            old_quantity: change.old_quantity,
            new_quantity: change.new_quantity,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StockInRequest {
    pub product_id: i64,
    pub location_kind: LocationKind,
    pub location_id: i64,
    pub quantity: Quantity,
    pub unit_cost: Money,
}

#[derive(Debug, Deserialize)]
pub struct StockCheckRequest {
    pub location_kind: LocationKind,
    pub location_id: i64,
    pub items: Vec<CountedLine>,
}

pub async fn increment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<AdjustRequest>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let req = req.body;
    let stock = state.db.stock();
    let (ctx, req) = (&ctx, &req);
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::StockIncrement, ctx.user_id, || async move {
            let change = stock
                .increment(ctx, req.location(), req.product_id, req.quantity)
                .await?;
            Ok::<_, DbError>(AdjustResponse::new(change, req.quantity))
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn decrement(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<AdjustRequest>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let req = req.body;
    let stock = state.db.stock();
    let (ctx, req) = (&ctx, &req);
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::StockDecrement, ctx.user_id, || async move {
            let change = stock
                .decrement(ctx, req.location(), req.product_id, req.quantity)
                .await?;
            Ok::<_, DbError>(AdjustResponse::new(change, req.quantity))
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn stock_in(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<StockInRequest>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let req = req.body;
    let location = LocationRef::new(req.location_id, req.location_kind);
    let stock = state.db.stock();
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::StockIn, ctx.user_id, || {
            stock.stock_in(&ctx, location, req.product_id, req.quantity, req.unit_cost)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn check(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<StockCheckRequest>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let req = req.body;
    let location = LocationRef::new(req.location_id, req.location_kind);
    let stock = state.db.stock();
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::StockCheck, ctx.user_id, || {
            stock.finish_stock_check(&ctx, location, &req.items)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn list(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams((kind, id)): PathParams<(LocationKind, i64)>,
) -> ApiResult<Json<Vec<StockLevel>>> {
    let location = LocationRef::new(id, kind);
    ctx.ensure_location_access(&location)?;
    Ok(Json(state.db.stock().list(location).await?))
}
