//! # Repository Layer
//!
//! One repository per aggregate, all sharing the same connection pool.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Database                                     │
//! │                               │                                         │
//! │   ┌──────────┬──────────┬─────┴────┬──────────┬──────────┐             │
//! │   ▼          ▼          ▼          ▼          ▼          ▼             │
//! │ Product  Inventory  Customer    Order     Journal    Return            │
//! │   repo      repo      repo       repo       repo      repo             │
//! │                                                                         │
//! │              ▼          ▼                                               │
//! │           Outbox     Metrics                                            │
//! │            repo       repo                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Access Styles
//! Methods on `&self` read through the pool and are for queries outside
//! any transaction. Associated functions taking `&mut SqliteConnection`
//! participate in a caller-owned unit of work; every multi-table write in
//! the engine goes through those, so atomicity is visible in the call
//! signature.

pub mod customer;
pub mod inventory;
pub mod journal;
pub mod metrics;
pub mod order;
pub mod outbox;
pub mod product;
pub mod returns;

use uuid::Uuid;

/// Generates an entity id: UUID v4, stored as TEXT.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
