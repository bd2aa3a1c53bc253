//! Router tests against an in-memory database.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use meridian_core::Role;
use meridian_db::{Database, DbConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{router, AppState};

/// Id of the admin every `app()` starts with.
const OWNER: &str = "1";

async fn app() -> (Router, Database) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let owner = db.users().create("owner", Role::Admin, None, None).await.unwrap();
    assert_eq!(owner.id.to_string(), OWNER);
    (router(AppState::new(db.clone())), db)
}

/// Calls as the owner unless the test names its own `x-user-id`.
async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut headers = headers.to_vec();
    if !headers.iter().any(|(name, _)| name.eq_ignore_ascii_case("x-user-id")) {
        headers.push(("x-user-id", OWNER));
    }
    send(app, method, uri, &headers, body).await
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let req = match body {
        Some(b) => req
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, json)
}

/// Store 1 with 10 units of tea (cost $6, sells at $10).
async fn stocked(app: &Router) -> (i64, i64) {
    let (status, _, store) = call(
        app,
        "POST",
        "/locations",
        &[],
        Some(json!({"kind": "store", "name": "Chorsu"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, tea) = call(
        app,
        "POST",
        "/products",
        &[],
        Some(json!({"name": "Tea", "cost_price": 600, "sell_price": 1000})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tea = tea["id"].as_i64().unwrap();

    let (status, _, change) = call(
        app,
        "POST",
        "/stock/increment",
        &[],
        Some(json!({"product_id": tea, "location_kind": "store", "location_id": 1, "quantity": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(change["old_quantity"], 0);
    assert_eq!(change["new_quantity"], 10);
    assert_eq!(change["quantity"], 10);

    (store["id"].as_i64().unwrap(), tea)
}

fn sale_body(tea: i64, units: i64, cash_cents: i64, customer: Option<i64>) -> Value {
    json!({
        "customer_id": customer,
        "location_kind": "store",
        "location_id": 1,
        "items": [{"product_id": tea, "quantity": units, "unit_price": 1000}],
        "cash_usd": cash_cents,
        "click_usd": 0,
        "terminal_usd": 0,
        "currency_rate": 12650
    })
}

#[tokio::test]
async fn test_health_echoes_request_id() {
    let (app, _) = app().await;
    let (status, headers, body) =
        call(&app, "GET", "/health", &[("x-request-id", "till-3/0007")], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(headers["x-request-id"], "till-3/0007");

    let (_, headers, _) = call(&app, "GET", "/health", &[], None).await;
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_sale_replay_with_same_key() {
    let (app, _) = app().await;
    let (_, tea) = stocked(&app).await;
    let key = [("idempotency-key", "till-1:0001")];

    let (status, _, first) = call(&app, "POST", "/sales", &key, Some(sale_body(tea, 2, 2000, None))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["already_processed"], false);
    assert_eq!(first["total_amount"], 2000);
    assert_eq!(first["payment_status"], "paid");

    let (status, _, second) = call(&app, "POST", "/sales", &key, Some(sale_body(tea, 2, 2000, None))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["already_processed"], true);
    assert_eq!(second["id"], first["id"]);

    let (_, _, levels) = call(&app, "GET", "/stock/store/1", &[], None).await;
    assert_eq!(levels[0]["quantity"], 8);
}

#[tokio::test]
async fn test_body_key_is_honoured() {
    let (app, _) = app().await;
    let (_, tea) = stocked(&app).await;
    let mut body = sale_body(tea, 1, 1000, None);
    body["idempotency_key"] = json!("body-key-1");

    call(&app, "POST", "/sales", &[], Some(body.clone())).await;
    let (_, _, again) = call(&app, "POST", "/sales", &[], Some(body)).await;
    assert_eq!(again["already_processed"], true);

    let (_, _, levels) = call(&app, "GET", "/stock/store/1", &[], None).await;
    assert_eq!(levels[0]["quantity"], 9);
}

#[tokio::test]
async fn test_insufficient_stock_error_shape() {
    let (app, _) = app().await;
    let (_, tea) = stocked(&app).await;

    let (status, _, err) = call(
        &app,
        "POST",
        "/stock/decrement",
        &[],
        Some(json!({"product_id": tea, "location_kind": "store", "location_id": 1, "quantity": 11})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error_type"], "insufficient_stock");
    assert_eq!(err["retryable"], false);
    assert!(err["message"].as_str().is_some());
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let (app, _) = app().await;
    let (status, _, err) = call(
        &app,
        "POST",
        "/stock/increment",
        &[],
        Some(json!({"product_id": "tea"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error_type"], "validation_error");
}

#[tokio::test]
async fn test_unknown_user_is_denied() {
    let (app, _) = app().await;
    let (status, _, err) = call(&app, "GET", "/transfers/pending", &[("x-user-id", "99")], None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error_type"], "permission_denied");
}

#[tokio::test]
async fn test_anonymous_transfer_is_denied() {
    let (app, _) = app().await;
    let (_, tea) = stocked(&app).await;
    call(&app, "POST", "/locations", &[], Some(json!({"kind": "store", "name": "Yunusobod"}))).await;

    let transfer = json!({
        "from_location_type": "store", "from_location_id": 1,
        "to_location_type": "store", "to_location_id": 2,
        "items": [{"product_id": tea, "quantity": 3}]
    });
    let (status, _, err) = send(&app, "POST", "/transfers", &[], Some(transfer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error_type"], "permission_denied");

    let (_, _, levels) = call(&app, "GET", "/stock/store/1", &[], None).await;
    assert_eq!(levels[0]["quantity"], 10);
}

#[tokio::test]
async fn test_anonymous_allowed_when_configured() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let app = router(AppState::new(db).allow_anonymous(true));
    let (status, _, store) = send(
        &app,
        "POST",
        "/locations",
        &[],
        Some(json!({"kind": "store", "name": "Chorsu"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(store["name"], "Chorsu");
}

#[tokio::test]
async fn test_debt_views_follow_home_location() {
    let (app, db) = app().await;
    let (_, tea) = stocked(&app).await;
    let (_, _, aziz) = call(
        &app,
        "POST",
        "/customers",
        &[],
        Some(json!({"name": "Aziz", "home_location": {"id": 1, "kind": "store"}})),
    )
    .await;
    let aziz = aziz["id"].as_i64().unwrap();
    call(&app, "POST", "/sales", &[], Some(sale_body(tea, 1, 0, Some(aziz)))).await;

    let clerk = db
        .users()
        .create("clerk", Role::Staff, Some("[7]"), None)
        .await
        .unwrap();
    let clerk_id = clerk.id.to_string();
    let as_clerk = [("x-user-id", clerk_id.as_str())];

    let debt_uri = format!("/customers/{}/debt", aziz);
    let (status, _, err) = call(&app, "GET", &debt_uri, &as_clerk, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error_type"], "permission_denied");

    let remind_uri = format!("/customers/{}/remind", aziz);
    let rate = json!({"currency_rate": 12650});
    let (status, _, _) = call(&app, "POST", &remind_uri, &as_clerk, Some(rate)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, _, listed) = call(&app, "GET", "/debts", &as_clerk, None).await;
    assert_eq!(listed["debtors"], json!([]));

    let (status, _, debt) = call(&app, "GET", &debt_uri, &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(debt["summary"]["total_debt"], 1000);
    let (_, _, listed) = call(&app, "GET", "/debts", &[], None).await;
    assert_eq!(listed["debtors"][0]["customer_id"], aziz);
}

#[tokio::test]
async fn test_staff_outside_grant_is_denied() {
    let (app, db) = app().await;
    let (_, tea) = stocked(&app).await;
    let clerk = db
        .users()
        .create("clerk", Role::Staff, Some("[7]"), None)
        .await
        .unwrap();
    let clerk_id = clerk.id.to_string();

    let (status, _, err) = call(
        &app,
        "POST",
        "/sales",
        &[("x-user-id", clerk_id.as_str())],
        Some(sale_body(tea, 1, 1000, None)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error_type"], "permission_denied");
}

#[tokio::test]
async fn test_debt_settle_and_return() {
    let (app, _) = app().await;
    let (_, tea) = stocked(&app).await;
    let (_, _, aziz) = call(&app, "POST", "/customers", &[], Some(json!({"name": "Aziz"}))).await;
    let aziz = aziz["id"].as_i64().unwrap();

    // $50 sale, $20 cash, $30 on credit
    let (_, _, sale) = call(&app, "POST", "/sales", &[], Some(sale_body(tea, 5, 2000, Some(aziz)))).await;
    assert_eq!(sale["debt_usd"], 3000);
    assert_eq!(sale["payment_status"], "partial");

    let (status, _, settled) = call(
        &app,
        "POST",
        "/debts/settle",
        &[],
        Some(json!({"customer_id": aziz, "cash_usd": 1000})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settled["paid_amount"], 1000);
    assert_eq!(settled["updated_sale_ids"], json!([sale["id"]]));

    let (_, _, debt) = call(&app, "GET", &format!("/customers/{}/debt", aziz), &[], None).await;
    assert_eq!(debt["summary"]["total_debt"], 2000);

    // two units back clears the remaining $20 of debt
    let (status, _, returned) = call(
        &app,
        "POST",
        "/returns",
        &[],
        Some(json!({
            "sale_id": sale["id"],
            "location_kind": "store",
            "location_id": 1,
            "items": [{"product_id": tea, "quantity": 2}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["returned_amount"], 2000);
    assert_eq!(returned["sale"]["debt_usd"], 0);
    assert_eq!(returned["sale"]["payment_status"], "paid");

    let (_, _, levels) = call(&app, "GET", "/stock/store/1", &[], None).await;
    assert_eq!(levels[0]["quantity"], 7);
}

#[tokio::test]
async fn test_overpayment_rejected() {
    let (app, _) = app().await;
    let (_, tea) = stocked(&app).await;
    let (_, _, aziz) = call(&app, "POST", "/customers", &[], Some(json!({"name": "Aziz"}))).await;
    let aziz = aziz["id"].as_i64().unwrap();
    call(&app, "POST", "/sales", &[], Some(sale_body(tea, 1, 0, Some(aziz)))).await;

    let (status, _, err) = call(
        &app,
        "POST",
        "/debts/settle",
        &[],
        Some(json!({"customer_id": aziz, "cash_usd": 5000})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error_type"], "validation_error");
}

#[tokio::test]
async fn test_staged_transfer_round_trip() {
    let (app, _) = app().await;
    let (_, tea) = stocked(&app).await;
    call(
        &app,
        "POST",
        "/locations",
        &[],
        Some(json!({"kind": "warehouse", "name": "Sergeli"})),
    )
    .await;

    let (status, _, pending) = call(
        &app,
        "POST",
        "/transfers/pending",
        &[],
        Some(json!({
            "from_location_type": "store", "from_location_id": 1,
            "to_location_type": "warehouse", "to_location_id": 1,
            "items": [{"product_id": tea, "quantity": 4}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["status"], "pending");

    let uri = format!("/transfers/pending/{}/confirm", pending["id"]);
    let (status, _, _) = call(&app, "POST", &uri, &[], None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, err) = call(&app, "POST", &uri, &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error_type"], "validation_error");

    let (_, _, levels) = call(&app, "GET", "/stock/warehouse/1", &[], None).await;
    assert_eq!(levels[0]["quantity"], 4);
}

#[tokio::test]
async fn test_receipt_and_history() {
    let (app, _) = app().await;
    let (_, tea) = stocked(&app).await;
    let (_, _, sale) = call(&app, "POST", "/sales", &[], Some(sale_body(tea, 1, 1000, None))).await;

    let (status, headers, receipt) = call(
        &app,
        "GET",
        &format!("/sales/{}/receipt?currency=usd", sale["id"]),
        &[],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(receipt["total"], 1000);
    assert_eq!(receipt["items"][0]["product"], "Tea");

    let (_, _, history) = call(&app, "GET", &format!("/history/sales/{}", sale["id"]), &[], None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["operation_type"], "sale");
}
