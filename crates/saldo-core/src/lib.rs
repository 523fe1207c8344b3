//! # saldo-core: Pure Business Logic for Saldo
//!
//! This crate is the **heart** of the order-fulfillment transaction engine.
//! It contains all business logic as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Saldo Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    saldo-engine                                 │   │
//! │  │   Order coordinator ── Return engine ── Event dispatcher        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    saldo-db                                     │   │
//! │  │   Unit of work, repositories, conditional writes                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ saldo-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌────────┐ ┌────────┐ ┌───────────┐ ┌─────────┐ ┌─────────┐  │   │
//! │  │   │ money  │ │ orders │ │ customers │ │ journal │ │  cogs   │  │   │
//! │  │   │ Money  │ │pricing │ │ balances  │ │ batches │ │ freeze  │  │   │
//! │  │   └────────┘ └────────┘ └───────────┘ └─────────┘ └─────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money and TaxRate with integer arithmetic (no floating point!)
//! - [`products`] - Catalog entries sales price against
//! - [`inventory`] - Stock levels, movement log, weighted-average cost
//! - [`customers`] - Balance ledger types and transition math
//! - [`journal`] - Double-entry posting batches and the chart of accounts
//! - [`cogs`] - The frozen cost snapshot and its fallback chain
//! - [`orders`] - Orders, line items, pricing
//! - [`returns`] - Return records and refund math
//! - [`events`] - Outbox event payloads
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64) to avoid float errors
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//!
//! ## Example Usage
//!
//! ```rust
//! use saldo_core::money::{Money, TaxRate};
//! use saldo_core::orders::price_line;
//!
//! // Create money from cents (never from floats!)
//! let unit_price = Money::from_cents(1000); // $10.00
//!
//! // Price a line: 3 units, no discount, 8.25% tax
//! let line = price_line(unit_price, 3, 0, TaxRate::from_bps(825));
//!
//! assert_eq!(line.subtotal.cents(), 3000);
//! assert_eq!(line.tax.cents(), 248);
//! assert_eq!(line.total.cents(), 3248);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cogs;
pub mod customers;
pub mod error;
pub mod events;
pub mod inventory;
pub mod journal;
pub mod money;
pub mod orders;
pub mod products;
pub mod returns;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use saldo_core::Money` instead of
// `use saldo_core::money::Money`

pub use cogs::{CostBasis, CostSource, FrozenCogs, FrozenCogsLine};
pub use customers::{BalanceSnapshot, CreditDecline, Customer, CustomerTransaction};
pub use error::{CoreError, CoreResult, ValidationError};
pub use events::{EventJob, JobStatus, OutboxEvent};
pub use inventory::{InventoryLevel, MovementKind, MovementReason, StockMovement};
pub use journal::{
    Account, AccountKind, AccountRole, AccountingPeriod, JournalEntry, PeriodStatus, Posting,
    PostingBatch,
};
pub use money::{Money, TaxRate};
pub use orders::{Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus};
pub use products::Product;
pub use returns::{ReturnItem, ReturnRecord, ReturnStatus};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Tenant used when a deployment runs single-tenant.
///
/// The schema scopes every row by tenant_id; installations that serve one
/// business pass this constant everywhere until real tenant resolution is
/// wired in front of the engine.
pub const DEFAULT_TENANT_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Maximum line items allowed on a single order
///
/// ## Business Reason
/// Prevents runaway orders and keeps the transactional critical path
/// bounded. Can be made configurable per-tenant in future versions.
pub const MAX_ORDER_ITEMS: usize = 100;

/// Maximum quantity of a single line item
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
/// Configurable per-tenant in future versions.
pub const MAX_ITEM_QUANTITY: i64 = 999;
