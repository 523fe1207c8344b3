//! # Inventory Types
//!
//! Stock levels, the append-only movement log, and weighted-average cost
//! math. The storage layer enforces the conditional writes; this module
//! owns the types and the arithmetic.
//!
//! ## Stock Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  on_hand     physical units in the warehouse                            │
//! │  reserved    units promised but not shipped                             │
//! │  available   on_hand − reserved   ← what a sale may consume             │
//! │                                                                         │
//! │  Invariant: on_hand ≥ 0 at all times. A sale that would break this      │
//! │  fails before any write happens.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Inventory Level
// =============================================================================

/// The stock position for one product.
///
/// One row per product. Mutated only through the conditional paths in the
/// storage layer (decrement on sale, restock on return/receiving); the
/// movement log is the audit trail for every change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InventoryLevel {
    pub product_id: String,
    pub tenant_id: String,

    /// Physical units on hand. Never negative.
    pub on_hand: i64,

    /// Units reserved for unshipped commitments.
    pub reserved: i64,

    /// Weighted-average unit cost in cents. None until the first priced
    /// receipt.
    pub average_cost_cents: Option<i64>,

    /// Unit cost of the most recent purchase receipt, in cents.
    pub last_purchase_cost_cents: Option<i64>,

    /// Flipped when available stock reaches zero.
    pub out_of_stock: bool,

    pub updated_at: DateTime<Utc>,
}

impl InventoryLevel {
    /// Units a sale may consume right now.
    #[inline]
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    /// Returns the weighted-average cost as Money, if one exists.
    #[inline]
    pub fn average_cost(&self) -> Option<Money> {
        self.average_cost_cents.map(Money::from_cents)
    }

    /// Returns the last purchase cost as Money, if one exists.
    #[inline]
    pub fn last_purchase_cost(&self) -> Option<Money> {
        self.last_purchase_cost_cents.map(Money::from_cents)
    }
}

// =============================================================================
// Stock Movements
// =============================================================================

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Stock entering the warehouse (purchase, adjustment up).
    In,
    /// Stock leaving the warehouse (sale, adjustment down).
    Out,
    /// Stock re-entering from a return or cancellation.
    Return,
}

/// Why a stock movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    Sale,
    Return,
    Cancellation,
    Purchase,
    Adjustment,
}

/// One entry in the append-only stock movement log.
///
/// Movements are never updated or deleted. Summing the signed deltas of a
/// product's movements reproduces its current stock exactly; tests rely on
/// that equivalence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: String,
    pub tenant_id: String,
    pub product_id: String,
    pub kind: MovementKind,

    /// Always positive; `kind` carries the direction.
    pub quantity: i64,

    /// Unit cost attached to the movement, in cents. Present for priced
    /// receipts and COGS-bearing outflows.
    pub unit_cost_cents: Option<i64>,

    pub reason: MovementReason,

    /// Originating order or return id, when one exists.
    pub reference_id: Option<String>,

    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Signed stock delta this movement applied.
    pub fn signed_delta(&self) -> i64 {
        match self.kind {
            MovementKind::In | MovementKind::Return => self.quantity,
            MovementKind::Out => -self.quantity,
        }
    }
}

// =============================================================================
// Weighted-Average Cost
// =============================================================================

/// Recomputes the weighted-average unit cost after receiving stock.
///
/// `new_avg = (on_hand × old_avg + received × unit_cost) / (on_hand + received)`
/// rounded half up in integer cents. When nothing is on hand (or no average
/// exists yet) the received cost becomes the average outright.
///
/// ## Example
/// ```rust
/// use saldo_core::inventory::weighted_average_cost;
/// use saldo_core::money::Money;
///
/// // 10 units @ $5.00, receive 10 @ $7.00 → 20 units @ $6.00
/// let avg = weighted_average_cost(10, Some(Money::from_cents(500)), 10, Money::from_cents(700));
/// assert_eq!(avg.cents(), 600);
/// ```
pub fn weighted_average_cost(
    on_hand: i64,
    current_average: Option<Money>,
    received: i64,
    unit_cost: Money,
) -> Money {
    debug_assert!(received > 0);

    let current_average = match current_average {
        Some(avg) if on_hand > 0 => avg,
        _ => return unit_cost,
    };

    let numerator =
        on_hand as i128 * current_average.cents() as i128 + received as i128 * unit_cost.cents() as i128;
    let denominator = (on_hand + received) as i128;
    // Half-up: scale by 2, add the denominator, divide by 2×denominator
    let cents = (numerator * 2 + denominator) / (denominator * 2);
    Money::from_cents(cents as i64)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn level(on_hand: i64, reserved: i64) -> InventoryLevel {
        InventoryLevel {
            product_id: "p1".to_string(),
            tenant_id: "t1".to_string(),
            on_hand,
            reserved,
            average_cost_cents: Some(500),
            last_purchase_cost_cents: Some(550),
            out_of_stock: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_available_subtracts_reserved() {
        assert_eq!(level(10, 0).available(), 10);
        assert_eq!(level(10, 4).available(), 6);
        assert_eq!(level(3, 3).available(), 0);
    }

    #[test]
    fn test_movement_signed_delta() {
        let mut m = StockMovement {
            id: "m1".to_string(),
            tenant_id: "t1".to_string(),
            product_id: "p1".to_string(),
            kind: MovementKind::Out,
            quantity: 3,
            unit_cost_cents: Some(500),
            reason: MovementReason::Sale,
            reference_id: Some("o1".to_string()),
            actor_id: "u1".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(m.signed_delta(), -3);

        m.kind = MovementKind::Return;
        assert_eq!(m.signed_delta(), 3);

        m.kind = MovementKind::In;
        assert_eq!(m.signed_delta(), 3);
    }

    #[test]
    fn test_weighted_average_even_split() {
        // 10 @ $5.00 + 10 @ $7.00 = 20 @ $6.00
        let avg = weighted_average_cost(10, Some(Money::from_cents(500)), 10, Money::from_cents(700));
        assert_eq!(avg.cents(), 600);
    }

    #[test]
    fn test_weighted_average_rounds_half_up() {
        // 1 @ $0.01 + 1 @ $0.02 = 1.5 cents → 2 cents
        let avg = weighted_average_cost(1, Some(Money::from_cents(1)), 1, Money::from_cents(2));
        assert_eq!(avg.cents(), 2);

        // 3 @ $1.00 + 1 @ $2.00 = 500/4 = 125 exactly
        let avg = weighted_average_cost(3, Some(Money::from_cents(100)), 1, Money::from_cents(200));
        assert_eq!(avg.cents(), 125);
    }

    #[test]
    fn test_weighted_average_resets_when_empty() {
        // Nothing on hand: received cost wins regardless of the stale average
        let avg = weighted_average_cost(0, Some(Money::from_cents(500)), 5, Money::from_cents(900));
        assert_eq!(avg.cents(), 900);

        // No average yet
        let avg = weighted_average_cost(10, None, 5, Money::from_cents(300));
        assert_eq!(avg.cents(), 300);
    }
}
