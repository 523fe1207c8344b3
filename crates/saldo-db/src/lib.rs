//! # saldo-db: Storage Layer for the Saldo Engine
//!
//! SQLite persistence for the fulfillment engine: the connection pool,
//! embedded migrations, the unit of work, and one repository per
//! aggregate.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Saldo Data Flow                                  │
//! │                                                                         │
//! │  saldo-engine (create_order, process_return, dispatcher)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     saldo-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │  (8 modules)  │    │  (embedded)  │  │   │
//! │  │   │               │    │               │    │              │  │   │
//! │  │   │ SqlitePool    │    │ OrderRepo     │    │ 001_init.sql │  │   │
//! │  │   │ UnitOfWork    │◄───│ JournalRepo   │    │ 002_metrics  │  │   │
//! │  │   │ (uow.rs)      │    │ OutboxRepo …  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │                  SQLite (WAL), one file per installation                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`uow`] - The unit of work every multi-table write runs inside
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types and retryability
//! - [`repository`] - Repository implementations, one per aggregate
//!
//! ## Usage
//!
//! ```rust,ignore
//! use saldo_db::{Database, DbConfig};
//! use saldo_db::repository::product::ProductRepository;
//!
//! let db = Database::new(DbConfig::new("path/to/saldo.db")).await?;
//!
//! // Pool reads go through repository accessors
//! let product = db.products().get_by_sku("t1", "SKU-1").await?;
//!
//! // Writes run inside a unit of work
//! let mut uow = db.begin().await?;
//! ProductRepository::insert(uow.conn(), &product).await?;
//! uow.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod uow;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use uow::UnitOfWork;

// Repository re-exports for convenience
pub use repository::customer::CustomerRepository;
pub use repository::inventory::{DecrementOutcome, InventoryRepository};
pub use repository::journal::{JournalRepository, TrialBalanceRow};
pub use repository::metrics::{
    DailySalesDelta, DailySalesMetrics, MetricsRepository, ProductDailySales, ProfitDistribution,
    ProfitSummary,
};
pub use repository::order::OrderRepository;
pub use repository::outbox::{OutboxCounts, OutboxRepository};
pub use repository::product::ProductRepository;
pub use repository::returns::ReturnRepository;
