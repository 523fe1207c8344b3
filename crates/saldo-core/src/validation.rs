//! # Validation Module
//!
//! Input validation utilities for the transaction engine.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Coordinator pre-validation (Rust)                             │
//! │  ├── THIS MODULE: shape checks before any write                         │
//! │  └── Business checks (credit limit, period open) on fresh reads         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: In-work guards                                                │
//! │  ├── Conditional stock decrement                                        │
//! │  └── Version-guarded balance writes                                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── NOT NULL / UNIQUE / FK constraints                                 │
//! │  └── CHECK (on_hand >= 0, balances >= 0, one-sided postings)            │
//! │                                                                         │
//! │  Defense in depth: each layer catches a different failure mode          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use saldo_core::validation::{validate_quantity, validate_period};
//!
//! validate_quantity(5).unwrap();
//! validate_period("2026-08").unwrap();
//! ```

use crate::error::ValidationError;
use crate::{MAX_ITEM_QUANTITY, MAX_ORDER_ITEMS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - Must be between 1 and 50 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ## Example
/// ```rust
/// use saldo_core::validation::validate_sku;
///
/// assert!(validate_sku("WIDGET-12").is_ok());
/// assert!(validate_sku("").is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    if sku.is_empty() {
        return Err(ValidationError::Required {
            field: "sku".to_string(),
        });
    }

    if sku.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "sku".to_string(),
            max: 50,
        });
    }

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "sku".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a display name (product, customer, account).
///
/// ## Rules
/// - Must not be empty
/// - Must be between 1 and 200 characters
pub fn validate_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a tenant identifier.
///
/// The tenant id is opaque to the engine; only emptiness and length are
/// checked here.
pub fn validate_tenant_id(tenant_id: &str) -> ValidationResult<()> {
    let tenant_id = tenant_id.trim();

    if tenant_id.is_empty() {
        return Err(ValidationError::Required {
            field: "tenant_id".to_string(),
        });
    }

    if tenant_id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "tenant_id".to_string(),
            max: 64,
        });
    }

    Ok(())
}

/// Validates a `YYYY-MM` accounting period marker.
///
/// ## Example
/// ```rust
/// use saldo_core::validation::validate_period;
///
/// assert!(validate_period("2026-08").is_ok());
/// assert!(validate_period("2026-13").is_err());
/// assert!(validate_period("08-2026").is_err());
/// ```
pub fn validate_period(period: &str) -> ValidationResult<()> {
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "period".to_string(),
        reason: reason.to_string(),
    };

    let bytes = period.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return Err(invalid("must be YYYY-MM"));
    }

    let year = &period[..4];
    let month = &period[5..];
    if !year.bytes().all(|b| b.is_ascii_digit()) || !month.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("must be YYYY-MM"));
    }

    let month: u32 = month.parse().map_err(|_| invalid("must be YYYY-MM"))?;
    if !(1..=12).contains(&month) {
        return Err(invalid("month must be 01-12"));
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price or cost in cents.
///
/// ## Rules
/// - Must be non-negative (>= 0)
/// - Zero is allowed (promotional items)
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a payment amount in cents.
///
/// ## Rules
/// - Must be non-negative; zero means an entirely unpaid credit sale
pub fn validate_payment_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "payment amount".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a rate in basis points (tax or discount).
///
/// ## Rules
/// - Must be between 0 and 10000 (0% to 100%)
pub fn validate_bps(field: &str, bps: u32) -> ValidationResult<()> {
    if bps > 10000 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: 10000,
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates the number of lines on an order.
///
/// ## Rules
/// - At least one line
/// - Must not exceed MAX_ORDER_ITEMS (100)
pub fn validate_order_size(item_count: usize) -> ValidationResult<()> {
    if item_count == 0 {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }

    if item_count > MAX_ORDER_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "items".to_string(),
            min: 1,
            max: MAX_ORDER_ITEMS as i64,
        });
    }

    Ok(())
}

// =============================================================================
// UUID Validators
// =============================================================================

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use saldo_core::validation::validate_uuid;
///
/// assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("not-a-uuid").is_err());
/// ```
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("WIDGET-12").is_ok());
        assert!(validate_sku("ABC123").is_ok());
        assert!(validate_sku("part_1").is_ok());

        assert!(validate_sku("").is_err());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku("has space").is_err());
        assert!(validate_sku(&"A".repeat(100)).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("Industrial Widget 330mm").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"A".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_period() {
        assert!(validate_period("2026-01").is_ok());
        assert!(validate_period("2026-12").is_ok());

        assert!(validate_period("2026-13").is_err());
        assert!(validate_period("2026-00").is_err());
        assert!(validate_period("202601").is_err());
        assert!(validate_period("01-2026").is_err());
        assert!(validate_period("2026-1").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_payment_cents() {
        assert!(validate_payment_cents(0).is_ok());
        assert!(validate_payment_cents(5000).is_ok());
        assert!(validate_payment_cents(-1).is_err());
    }

    #[test]
    fn test_validate_order_size() {
        assert!(validate_order_size(1).is_ok());
        assert!(validate_order_size(100).is_ok());
        assert!(validate_order_size(0).is_err());
        assert!(validate_order_size(101).is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_uuid("").is_err());
        assert!(validate_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_validate_bps() {
        assert!(validate_bps("tax_rate", 0).is_ok());
        assert!(validate_bps("tax_rate", 825).is_ok());
        assert!(validate_bps("discount", 10000).is_ok());
        assert!(validate_bps("discount", 10001).is_err());
    }
}
