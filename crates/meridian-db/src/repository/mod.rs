//! # Repository Module
//!
//! Record-level access for catalog, registry, and ledger tables.
//!
//! ```text
//!   db.products()   ──► ProductRepository   create / update / delete / find
//!   db.customers()  ──► CustomerRepository  create / debt_summary / debtors
//!   db.locations()  ──► LocationRepository  registry + LocationCache
//!   db.users()      ──► UserRepository      grants → RequestContext
//!   db.history()    ──► HistoryRepository   audit queries and retention
//! ```
//!
//! Multi-table business operations (sales, settlements, returns, transfers)
//! live in [`crate::engine`]. Repositories expose `pub(crate)` connection-level
//! helpers (`fetch`, `ensure_exists`) that engines call inside their own
//! transactions.

pub mod customer;
pub mod history;
pub mod location;
pub mod product;
pub mod user;
