//! # saldo-engine: Fulfillment Engine for Saldo
//!
//! This crate orchestrates the money-touching operations of Saldo:
//! sales, payments, cancellations, returns, and the post-commit event
//! pipeline. Every operation commits atomically through `saldo-db` and
//! leaves the books balanced.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Fulfillment Engine                              │
//! │                                                                         │
//! │  ┌──────────────────────────┐   ┌──────────────────────────────────┐   │
//! │  │     OrderCoordinator     │   │          ReturnEngine            │   │
//! │  │                          │   │                                  │   │
//! │  │ Sale saga in one txn:    │   │ Return saga in one txn:          │   │
//! │  │ stock check → freeze     │   │ returnable check → restock at    │   │
//! │  │ COGS → order → decrement │   │ frozen cost → credit note →      │   │
//! │  │ → ledger → journal →     │   │ contra-revenue postings →        │   │
//! │  │ outbox event             │   │ outbox event                     │   │
//! │  │                          │   │                                  │   │
//! │  │ Also: payments, cancels, │   │ Handles closed-period shifts     │   │
//! │  │ stock receipts, periods  │   │ and restocking fees              │   │
//! │  └────────────┬─────────────┘   └────────────────┬─────────────────┘   │
//! │               │        commit + nudge            │                     │
//! │               ▼                                  ▼                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                       EventDispatcher                           │   │
//! │  │                                                                 │   │
//! │  │ Drains the transactional outbox on poll or nudge                │   │
//! │  │ Fans each event out to one job per interested handler          │   │
//! │  │ Retries failing jobs, parks them after the attempt budget      │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │                                         │
//! │         ┌─────────────────────┼──────────────────────┐                  │
//! │         ▼                     ▼                      ▼                  │
//! │  ┌────────────────┐  ┌─────────────────┐  ┌────────────────────────┐   │
//! │  │ InvoiceDocument│  │ SalesMetrics    │  │ ProfitDistribution     │   │
//! │  │ + Notification │  │ + StockAnalytics│  │                        │   │
//! │  │                │  │                 │  │ One profit row per     │   │
//! │  │ Document ref,  │  │ Daily + per-    │  │ fully paid order       │   │
//! │  │ then customer  │  │ product rollups │  │                        │   │
//! │  │ notification   │  │ (returns fold   │  │                        │   │
//! │  │ follow-up      │  │ back out)       │  │                        │   │
//! │  └────────────────┘  └─────────────────┘  └────────────────────────┘   │
//! │                                                                         │
//! │  Support: CogsFreezer (cost snapshots + backfill), EngineConfig        │
//! │  (TOML + env), RetryPolicy (transient-conflict retry)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`cogs`] - Cost-of-goods freezing and legacy backfill
//! - [`config`] - Engine configuration (database, retry, dispatcher)
//! - [`coordinator`] - Sale, payment, cancellation and period operations
//! - [`dispatcher`] - Outbox pump and handler job lifecycle
//! - [`error`] - Engine error types
//! - [`handlers`] - Post-commit event handlers
//! - [`retry`] - Bounded retry for transient conflicts
//! - [`returns`] - Return and credit-note processing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use saldo_engine::{
//!     default_handlers, EngineConfig, EventDispatcher, OrderCoordinator,
//! };
//! use saldo_db::Database;
//!
//! let config = EngineConfig::load_or_default(None);
//! let db = Database::new(config.db_config()).await?;
//!
//! let (dispatcher, handle) = EventDispatcher::new(db.clone(), &config, default_handlers());
//! tokio::spawn(dispatcher.run());
//!
//! let coordinator = OrderCoordinator::with_dispatcher(db, &config, handle.clone());
//! let completed = coordinator.create_order(request).await?;
//! println!("Committed {}", completed.order.order_number);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cogs;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod retry;
pub mod returns;

// =============================================================================
// Re-exports
// =============================================================================

// Core operations
pub use coordinator::{
    CompletedOrder, CreateOrderRequest, OrderCoordinator, OrderItemRequest, PaymentRequest,
    ReceiveStockRequest, SalePayment,
};
pub use returns::{ProcessedReturn, ReturnEngine, ReturnItemRequest, ReturnRequest};

// Event pipeline
pub use dispatcher::{DispatchStats, DispatcherHandle, EventDispatcher};
pub use handlers::{default_handlers, EventHandler};

// Support types
pub use cogs::CogsFreezer;
pub use config::{DatabaseSettings, DispatcherSettings, EngineConfig, RetrySettings};
pub use error::{EngineError, EngineResult};
pub use retry::RetryPolicy;
