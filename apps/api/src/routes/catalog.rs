//! Products, customers, locations, audit history.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use meridian_core::{
    Customer, Location, LocationKind, LocationRef, NewCustomer, NewLocation, NewProduct,
    OperationRecord, OperationType, Product,
};
use meridian_db::DbError;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiResult;
use crate::extract::{replayable, Body, Caller, IdempotencyKey, Keyed, PathParams};
use crate::state::AppState;

// =============================================================================
// Products
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(state.db.products().list(query.limit).await?))
}

pub async fn get_product(
    State(state): State<AppState>,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<Product>> {
    let product = state
        .db
        .products()
        .get_by_id(id)
        .await?
        .ok_or_else(|| DbError::not_found("Product", id))?;
    Ok(Json(product))
}

pub async fn product_by_barcode(
    State(state): State<AppState>,
    PathParams(code): PathParams<String>,
) -> ApiResult<Json<Product>> {
    let product = state
        .db
        .products()
        .find_by_barcode(&code)
        .await?
        .ok_or_else(|| DbError::not_found("Product", &code))?;
    Ok(Json(product))
}

pub async fn create_product(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<NewProduct>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let input = req.body;
    let products = state.db.products();
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::ProductCreate, ctx.user_id, || {
            products.create(&ctx, &input)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn update_product(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams(id): PathParams<i64>,
    Body(input): Body<NewProduct>,
) -> ApiResult<Json<Product>> {
    Ok(Json(state.db.products().update(&ctx, id, &input).await?))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams(id): PathParams<i64>,
) -> ApiResult<StatusCode> {
    state.db.products().delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Customers
// =============================================================================

pub async fn create_customer(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    key: IdempotencyKey,
    Body(req): Body<Keyed<NewCustomer>>,
) -> ApiResult<Json<Value>> {
    let key = key.or_body(req.idempotency_key);
    let input = req.body;
    let customers = state.db.customers();
    let guarded = state
        .db
        .idempotency()
        .run(key.as_deref(), OperationType::CustomerCreate, ctx.user_id, || {
            customers.create(&ctx, &input)
        })
        .await?;
    Ok(replayable(guarded))
}

pub async fn get_customer(
    State(state): State<AppState>,
    PathParams(id): PathParams<i64>,
) -> ApiResult<Json<Customer>> {
    let customer = state
        .db
        .customers()
        .get_by_id(id)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", id))?;
    Ok(Json(customer))
}

// =============================================================================
// Locations
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateLocation {
    pub kind: LocationKind,
    #[serde(flatten)]
    pub location: NewLocation,
}

pub async fn list_locations(State(state): State<AppState>) -> ApiResult<Json<Vec<Location>>> {
    let cached = state.db.locations().list().await?;
    Ok(Json(cached.as_ref().clone()))
}

pub async fn create_location(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Body(req): Body<CreateLocation>,
) -> ApiResult<(StatusCode, Json<Location>)> {
    let location = state.db.locations().create(&ctx, req.kind, &req.location).await?;
    Ok((StatusCode::CREATED, Json(location)))
}

pub async fn update_location(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams((kind, id)): PathParams<(LocationKind, i64)>,
    Body(input): Body<NewLocation>,
) -> ApiResult<Json<Location>> {
    let location = LocationRef::new(id, kind);
    Ok(Json(state.db.locations().update(&ctx, location, &input).await?))
}

pub async fn delete_location(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    PathParams((kind, id)): PathParams<(LocationKind, i64)>,
) -> ApiResult<StatusCode> {
    state.db.locations().delete(&ctx, LocationRef::new(id, kind)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// History
// =============================================================================

pub async fn history_for_record(
    State(state): State<AppState>,
    PathParams((table, record_id)): PathParams<(String, i64)>,
) -> ApiResult<Json<Vec<OperationRecord>>> {
    Ok(Json(state.db.history().for_record(&table, record_id).await?))
}

pub async fn recent_history(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<OperationRecord>>> {
    Ok(Json(state.db.history().recent(query.limit).await?))
}
