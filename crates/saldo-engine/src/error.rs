//! # Engine Error Types
//!
//! Error types for the fulfillment engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Pass-through   │  │  Sale Pipeline  │  │     Returns             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Core (rules)   │  │  PeriodLocked   │  │  FrozenCogsMissing      │ │
//! │  │  Db (storage)   │  │  Concurrency-   │  │  OriginalInvoiceMissing │ │
//! │  │  Serialization  │  │  Conflict       │  │  ReturnAlreadyProcessed │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │  Configuration  │  │  Runtime                                    │  │
//! │  │                 │  │                                             │  │
//! │  │  InvalidConfig  │  │  AccountNotConfigured                       │  │
//! │  │  Load/SaveFailed│  │  ChannelClosed                              │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use saldo_core::journal::AccountRole;
use saldo_core::CoreError;
use saldo_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type covering all fulfillment failures.
///
/// ## Design Principles
/// - Business rejections stay structured so callers can branch on them
/// - Storage conflicts keep their [`DbError`] classification for retry
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Pass-through Errors
    // =========================================================================
    /// A business rule rejected the request.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The storage layer failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// An event payload could not be serialized or parsed.
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // =========================================================================
    // Sale Pipeline Errors
    // =========================================================================
    /// The accounting period the entries would land in is closed.
    #[error("Accounting period {period} is closed")]
    PeriodLocked { period: String },

    /// Every retry attempt hit a concurrent write.
    #[error("Operation still conflicting after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    /// The tenant's chart of accounts has no account for a required role.
    #[error("No account is mapped to the '{}' role", .role.default_name())]
    AccountNotConfigured { role: AccountRole },

    // =========================================================================
    // Return Errors
    // =========================================================================
    /// The order predates COGS freezing and has no cost snapshot.
    #[error("Order {order_id} has no frozen cost snapshot; run a COGS backfill first")]
    FrozenCogsMissing { order_id: String },

    /// A credit sale's original invoice could not be found.
    #[error("No invoice ledger entry exists for order {order_id}")]
    OriginalInvoiceMissing { order_id: String },

    /// The request asks for more units than remain unreturned.
    #[error(
        "Return rejected for order {order_id}: requested {requested} of \
         product {product_id}, only {returnable} returnable"
    )]
    ReturnAlreadyProcessed {
        order_id: String,
        product_id: String,
        requested: i64,
        returnable: i64,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// A configuration value failed validation.
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Runtime Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelClosed(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl EngineError {
    /// Returns true if re-running the whole attempt against fresh reads
    /// can succeed.
    ///
    /// ## Retryable Errors
    /// - Optimistic version conflicts
    /// - `SQLITE_BUSY` lock contention
    /// - Pool exhaustion
    ///
    /// ## Non-Retryable Errors
    /// - Business rejections (insufficient stock, declined credit, ...)
    /// - Closed accounting periods
    /// - Configuration problems
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Db(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(EngineError::Db(DbError::version_conflict("Order", "o1")).is_retryable());
        assert!(EngineError::Db(DbError::Busy("database is locked".into())).is_retryable());
        assert!(EngineError::Db(DbError::PoolExhausted).is_retryable());

        assert!(!EngineError::Db(DbError::not_found("Order", "o1")).is_retryable());
        assert!(!EngineError::PeriodLocked { period: "2026-07".into() }.is_retryable());
        assert!(!EngineError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_business_rejections_are_final() {
        let stock = EngineError::Core(CoreError::InsufficientStock {
            product_id: "p1".into(),
            available: 2,
            requested: 5,
        });
        assert!(!stock.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::ReturnAlreadyProcessed {
            order_id: "ord-1".into(),
            product_id: "prod-9".into(),
            requested: 3,
            returnable: 1,
        };
        assert!(err.to_string().contains("ord-1"));
        assert!(err.to_string().contains("only 1 returnable"));

        let role = EngineError::AccountNotConfigured {
            role: AccountRole::CostOfGoodsSold,
        };
        assert!(role.to_string().contains("Cost of Goods Sold"));
    }

    #[test]
    fn test_io_errors_map_to_config_load() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(
            EngineError::from(io),
            EngineError::ConfigLoadFailed(_)
        ));
    }
}
