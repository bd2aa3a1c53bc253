//! # Request Extractors
//!
//! ```text
//!   X-Request-Id ──► request_id middleware ──► RequestId (extension, echoed)
//!   X-User-Id ─────► Caller ──► users().context_for(id) ──► RequestContext
//!   Idempotency-Key / X-Idempotency-Key / body.idempotency_key ──► key
//! ```
//!
//! A request without `X-User-Id` is denied unless the server allows anonymous
//! callers, in which case it runs as the system context.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use meridian_core::{ErrorKind, RequestContext};
use meridian_db::Guarded;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const USER_ID: HeaderName = HeaderName::from_static("x-user-id");
const IDEMPOTENCY_HEADERS: [&str; 2] = ["idempotency-key", "x-idempotency-key"];

// =============================================================================
// Request Id
// =============================================================================

/// The caller's request id as sent (echoed verbatim), plus the uuid used in
/// the audit ledger. A non-uuid header value gets a fresh uuid internally.
#[derive(Debug, Clone)]
pub struct RequestId {
    pub header: String,
    pub uuid: Uuid,
}

impl RequestId {
    fn from_headers(headers: &HeaderMap) -> Self {
        let sent = headers
            .get(&REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty());

        match sent {
            Some(raw) => RequestId {
                header: raw.to_string(),
                uuid: Uuid::parse_str(raw).unwrap_or_else(|_| Uuid::new_v4()),
            },
            None => {
                let uuid = Uuid::new_v4();
                RequestId {
                    header: uuid.to_string(),
                    uuid,
                }
            }
        }
    }
}

pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = RequestId::from_headers(req.headers());
    let echo = HeaderValue::from_str(&id.header).ok();
    req.extensions_mut().insert(id);

    let mut response = next.run(req).await;
    if let Some(value) = echo {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

// =============================================================================
// Caller
// =============================================================================

/// The resolved acting user.
#[derive(Debug, Clone)]
pub struct Caller(pub RequestContext);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.uuid)
            .unwrap_or_else(Uuid::new_v4);

        let ctx = match parts.headers.get(&USER_ID) {
            None if state.allow_anonymous => RequestContext::system(),
            None => {
                return Err(ApiError::new(
                    ErrorKind::PermissionDenied,
                    "X-User-Id is required",
                ));
            }
            Some(raw) => {
                let user_id: i64 = raw
                    .to_str()
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .ok_or_else(|| ApiError::validation("X-User-Id must be an integer"))?;

                match state.db.users().context_for(user_id).await {
                    Ok(ctx) => ctx,
                    Err(err) if err.kind() == ErrorKind::NotFound => {
                        return Err(ApiError::new(
                            ErrorKind::PermissionDenied,
                            format!("unknown user {}", user_id),
                        ));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        debug!(request_id = %request_id, user_id = ?ctx.user_id, "Caller resolved");
        Ok(Caller(ctx.with_request_id(request_id)))
    }
}

// =============================================================================
// Idempotency
// =============================================================================

/// Key sent in a header. The body field is consulted only when no header
/// carries one.
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKey(pub Option<String>);

impl IdempotencyKey {
    pub fn or_body(self, body: Option<String>) -> Option<String> {
        self.0.or(body)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for IdempotencyKey {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = IDEMPOTENCY_HEADERS
            .iter()
            .filter_map(|name| parts.headers.get(*name))
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string);
        Ok(IdempotencyKey(key))
    }
}

/// A request body that may carry `idempotency_key` next to its fields.
#[derive(Debug, Deserialize)]
pub struct Keyed<T> {
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

/// The stored or fresh result of a guarded operation, flagged with
/// `already_processed`.
pub fn replayable(guarded: Guarded) -> Json<Value> {
    let Guarded {
        payload,
        already_processed,
    } = guarded;

    let body = match payload {
        Value::Object(mut map) => {
            map.insert("already_processed".to_string(), Value::Bool(already_processed));
            Value::Object(map)
        }
        other => json!({ "result": other, "already_processed": already_processed }),
    };
    Json(body)
}

// =============================================================================
// JSON-error variants of axum's extractors
// =============================================================================

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct Body<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathParams<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}
