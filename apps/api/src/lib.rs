//! # Meridian API
//!
//! HTTP/JSON front of the retail ledger.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  TraceLayer ─► request_id ─► handler                                   │
//! │                                 │                                       │
//! │                                 ├─ Caller         (X-User-Id)          │
//! │                                 ├─ IdempotencyKey (header or body)     │
//! │                                 └─ one engine call in one transaction  │
//! │                                                                         │
//! │  Errors ─► {error_type, message, retryable}                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use axum::routing::{get, post, put};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

pub use config::{ApiConfig, ConfigError};
pub use error::{ApiError, ApiResult};
pub use state::AppState;

use routes::{catalog, sales, stock, transfers};

/// Builds the full router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        // Stock
        .route("/stock/increment", post(stock::increment))
        .route("/stock/decrement", post(stock::decrement))
        .route("/stock/in", post(stock::stock_in))
        .route("/stock/check", post(stock::check))
        .route("/stock/{kind}/{id}", get(stock::list))
        // Sales, debts, returns
        .route("/sales", post(sales::create))
        .route("/sales/{id}", get(sales::get))
        .route("/sales/{id}/receipt", get(sales::receipt))
        .route("/debts/settle", post(sales::settle))
        .route("/debts", get(sales::debtors))
        .route("/returns", post(sales::process_return))
        // Transfers
        .route("/transfers", post(transfers::transfer))
        .route(
            "/transfers/pending",
            post(transfers::stage).get(transfers::list_pending),
        )
        .route("/transfers/pending/{id}/confirm", post(transfers::confirm))
        .route("/transfers/pending/{id}/discard", post(transfers::discard))
        // Catalog
        .route(
            "/products",
            post(catalog::create_product).get(catalog::list_products),
        )
        .route(
            "/products/{id}",
            get(catalog::get_product)
                .put(catalog::update_product)
                .delete(catalog::delete_product),
        )
        .route("/products/barcode/{code}", get(catalog::product_by_barcode))
        .route("/customers", post(catalog::create_customer))
        .route("/customers/{id}", get(catalog::get_customer))
        .route("/customers/{id}/debt", get(sales::customer_debt))
        .route("/customers/{id}/remind", post(sales::remind))
        .route(
            "/locations",
            get(catalog::list_locations).post(catalog::create_location),
        )
        .route(
            "/locations/{kind}/{id}",
            put(catalog::update_location).delete(catalog::delete_location),
        )
        // History
        .route("/history", get(catalog::recent_history))
        .route("/history/{table}/{record_id}", get(catalog::history_for_record))
        .layer(middleware::from_fn(extract::request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests;
