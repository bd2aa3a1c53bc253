//! # Engines
//!
//! Multi-table business operations. Each public mutating call is one
//! transaction under the operation timeout; pure decisions (bucket splits,
//! FIFO plans, refund order) come from `meridian-core`.
//!
//! ```text
//!   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!   │ SaleEngine   │   │ReturnEngine  │   │TransferEngine│
//!   │ split_sale_  │   │ reverse_line │   │ permission   │
//!   │ payment      │   │ apply_refund │   │ stage/confirm│
//!   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!          │ decrement        │ increment        │ both
//!          ▼                  ▼                  ▼
//!   ┌─────────────────────────────────────────────────────┐
//!   │ stock::{increment, decrement, overwrite}            │
//!   │ single-statement deltas on location_stock           │
//!   └─────────────────────────────────────────────────────┘
//!
//!   SettlementEngine ── plan_settlement (FIFO) ── sales + debt_payments
//! ```

pub mod returns;
pub mod sale;
pub mod settlement;
pub mod stock;
pub mod transfer;
