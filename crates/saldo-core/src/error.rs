//! # Error Types
//!
//! Domain-specific error types for saldo-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  saldo-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule violations                        │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  saldo-db errors (separate crate)                                       │
//! │  └── DbError          - Storage failures, version conflicts             │
//! │                                                                         │
//! │  saldo-engine errors (separate crate)                                   │
//! │  └── EngineError      - Operation surface (wraps both layers)           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error fields (product id, amounts, limits)
//! 3. Errors are enum variants, never String
//! 4. Invariant violations (unbalanced journal) are fatal, never coerced

use thiserror::Error;

use crate::customers::CreditDecline;
use crate::money::Money;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations or domain invariant
/// failures. Race-detected variants like [`CoreError::InsufficientStock`]
/// are terminal for the attempt: the surrounding unit of work aborts and
/// nothing retries them.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product cannot be found (unknown id or deactivated).
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Customer cannot be found.
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    /// Order cannot be found.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Not enough available stock to complete the sale.
    ///
    /// Raised from the fresh stock read *inside* the unit of work, so a
    /// pre-check that passed on stale data still ends here.
    ///
    /// ```text
    /// Create Order (qty: 11)
    ///      │
    ///      ▼
    /// In-work read: on_hand=10, reserved=0 → available=10
    ///      │
    ///      ▼
    /// InsufficientStock { product_id, available: 10, requested: 11 }
    ///      │
    ///      ▼
    /// Unit of work aborts, zero writes survive
    /// ```
    #[error(
        "Insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: String,
        available: i64,
        requested: i64,
    },

    /// No cost source could be resolved for a product at freeze time.
    ///
    /// The fallback chain (average cost, last purchase cost, list cost)
    /// came up empty. The sale aborts rather than freezing a zero cost.
    #[error("No cost basis available for product {product_id}")]
    CostUnavailable { product_id: String },

    /// The sale would push the customer past their credit limit.
    ///
    /// Detected before the transactional path writes anything. The detail
    /// block carries everything a caller needs to explain the decline.
    #[error("Credit limit exceeded for customer {customer_id}: {detail}")]
    CreditLimitExceeded {
        customer_id: String,
        detail: CreditDecline,
    },

    /// A journal batch does not balance.
    ///
    /// Always a programming error in posting construction, never user
    /// input. The unit of work aborts; nothing is coerced to fit.
    #[error("Unbalanced journal batch: debits {debits}, credits {credits}")]
    UnbalancedJournal { debits: Money, credits: Money },

    /// A journal batch contains no postings.
    #[error("Journal batch is empty")]
    EmptyJournalBatch,

    /// A single posting is malformed (zero amount, or both sides set).
    #[error("Invalid posting on account {account_code}: {reason}")]
    InvalidPosting {
        account_code: String,
        reason: String,
    },

    /// Order is not in a state that allows the requested operation.
    ///
    /// Cancelling a returned order, returning a cancelled order, etc.
    #[error("Order {order_id} is {current_status}, cannot perform operation")]
    InvalidOrderStatus {
        order_id: String,
        current_status: String,
    },

    /// Order has exceeded the maximum allowed line count.
    #[error("Order cannot have more than {max} items")]
    OrderTooLarge { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Payment amount is invalid (negative, or absurd for the method).
    #[error("Invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID, invalid period marker).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., duplicate SKU, duplicate account code).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_message() {
        let err = CoreError::InsufficientStock {
            product_id: "f4a1".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product f4a1: available 3, requested 5"
        );
    }

    #[test]
    fn test_unbalanced_journal_message() {
        let err = CoreError::UnbalancedJournal {
            debits: Money::from_cents(3000),
            credits: Money::from_cents(2999),
        };
        assert_eq!(
            err.to_string(),
            "Unbalanced journal batch: debits $30.00, credits $29.99"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "sku".to_string(),
        };
        assert_eq!(err.to_string(), "sku is required");

        let err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        assert_eq!(err.to_string(), "quantity must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "sku".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
