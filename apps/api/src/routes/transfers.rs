//! Transfer routes: immediate, staged, confirm and discard.

use axum::extract::State;
use axum::Json;
use meridian_core::{LocationKind, LocationRef, OperationType, PendingTransfer, TransferItem};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiResult;
use crate::extract::{replayable, Body, Caller, IdempotencyKey, Keyed, PathParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    #[serde(alias = "from_location_type")]
    pub from_kind: LocationKind,
    #[serde(alias = "from_location_id")]
    pub from_id: i64,
    #[serde(alias = "to_location_type")]
    pub to_kind: LocationKind,
    #[serde(alias = "to_location_id")]
    pub to_id: i64,
    pub items: Vec<TransferItem>,
}

impl TransferRequest {
    fn from(&self) -> LocationRef {
        LocationRef::new(self.from_id, self.from_kind)
    }

    fn to(&self) -> LocationRef {
        LocationRef::new(self.to_id, self.to_kind)
    }
}

pub async fn transfer(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<TransferRequest>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let req = req.body;
    let transfers = state.db.transfers();
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::Transfer, ctx.user_id, || {
            transfers.transfer(&ctx, req.from(), req.to(), &req.items)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn stage(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<TransferRequest>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let req = req.body;
    let transfers = state.db.transfers();
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::TransferStaged, ctx.user_id, || {
            transfers.stage(&ctx, req.from(), req.to(), &req.items)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn confirm(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<Value>> {
    let transfers = state.db.transfers();
    let guarded = state
        .db
        .idempotency()
        .run(key.0.as_deref(), OperationType::TransferConfirmed, ctx.user_id, || {
            transfers.confirm(&ctx, id)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn discard(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<Value>> {
    let transfers = state.db.transfers();
    let guarded = state
        .db
        .idempotency()
        .run(key.0.as_deref(), OperationType::TransferDiscarded, ctx.user_id, || {
            transfers.discard(&ctx, id)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn list_pending(
    State(state): State<AppState>,
    Caller(ctx): Caller,
) -> ApiResult<Json<Vec<PendingTransfer>>> {
    Ok(Json(state.db.transfers().list_pending(&ctx).await?))
}
