//! # meridian-db: Persistence and Transactional Engines
//!
//! SQLite storage for the Meridian retail ledger, and the engines that turn
//! the pure plans from `meridian-core` into all-or-nothing transactions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Meridian Data Flow                                 │
//! │                                                                         │
//! │  POST /sales (apps/api)                                                 │
//! │       │  IdempotencyGuard::run(key, Sale, ...)                          │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  meridian-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────────┐   ┌────────────────┐   ┌────────────────┐    │   │
//! │  │   │  Database   │   │    Engines     │   │  Repositories  │    │   │
//! │  │   │  (pool.rs)  │   │ stock transfer │   │ product  user  │    │   │
//! │  │   │ SqlitePool  │◄──│ sale settlement│   │ customer  loc  │    │   │
//! │  │   │ timeouts    │   │ returns        │   │ history        │    │   │
//! │  │   └─────────────┘   └────────────────┘   └────────────────┘    │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │   SQLite (WAL)   migrations/sqlite/001_initial_schema.sql       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, configuration, operation timeout
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Record-level access (product, customer, location, ...)
//! - [`engine`] - Multi-table business transactions
//! - [`idempotency`] - Replay protection for mutating requests
//! - [`cache`] - TTL cache for the location list
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("meridian.db")).await?;
//! let ctx = db.users().context_for(user_id).await?;
//! let change = db.stock().increment(&ctx, store, product_id, qty).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod engine;
pub mod error;
pub mod idempotency;
pub mod migrations;
pub mod pool;
pub mod repository;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use idempotency::{Guarded, IdempotencyGuard};
pub use pool::{Database, DbConfig};

pub use engine::returns::{ReturnEngine, ReturnLine, ReturnOutcome};
pub use engine::sale::{NewSale, NewSaleItem, SaleEngine};
pub use engine::settlement::{SettlementEngine, SettlementOutcome};
pub use engine::stock::{CountedLine, StockLedger};
pub use engine::transfer::TransferEngine;
