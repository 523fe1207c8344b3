//! # Return and Credit Note Types
//!
//! The records a processed return leaves behind, and the pure refund math.
//!
//! ## Cost Rule
//! A return reverses COGS at the **frozen** unit cost from the original
//! sale, never at today's cost. Selling at $5 average and returning after
//! the average moved to $7 reverses $5 per unit, exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Return Records
// =============================================================================

/// Lifecycle state of a return.
///
/// Returns commit atomically, so the engine writes them `Completed`.
/// `Pending` exists for staged approvals and `Cancelled` for administrative
/// reversal of the return itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Pending,
    Completed,
    Cancelled,
}

/// A processed return against one original order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ReturnRecord {
    pub id: String,
    pub tenant_id: String,
    pub order_id: String,

    /// Credit note transaction on the customer ledger. None for walk-in
    /// cash refunds.
    pub credit_note_id: Option<String>,

    pub status: ReturnStatus,

    /// Sum of per-item refunds before the fee, in cents.
    pub refund_gross_cents: i64,
    /// Restocking fee retained, in cents.
    pub restocking_fee_cents: i64,
    /// Amount actually credited/refunded, in cents.
    pub refund_net_cents: i64,
    /// COGS reversed at frozen unit costs, in cents.
    pub cogs_reversal_cents: i64,

    /// True when the original sale's period was already closed; the
    /// reversing entries then posted into `period` instead.
    pub is_after_period_close: bool,

    /// Period the reversing entries posted into, `YYYY-MM`.
    pub period: String,

    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

impl ReturnRecord {
    #[inline]
    pub fn refund_net(&self) -> Money {
        Money::from_cents(self.refund_net_cents)
    }

    #[inline]
    pub fn cogs_reversal(&self) -> Money {
        Money::from_cents(self.cogs_reversal_cents)
    }
}

/// One returned line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ReturnItem {
    pub id: String,
    pub return_id: String,
    pub order_item_id: String,
    pub product_id: String,

    pub quantity: i64,
    /// Per-unit refund in cents (original sale price unless overridden).
    pub refund_unit_price_cents: i64,
    pub refund_total_cents: i64,

    /// Frozen unit cost copied from the original COGS snapshot, in cents.
    pub frozen_unit_cost_cents: i64,
    pub cogs_reversal_cents: i64,
}

impl ReturnItem {
    #[inline]
    pub fn frozen_unit_cost(&self) -> Money {
        Money::from_cents(self.frozen_unit_cost_cents)
    }
}

// =============================================================================
// Refund Math
// =============================================================================

/// Refund and reversal money for one returned line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnLineAmounts {
    pub refund: Money,
    pub cogs_reversal: Money,
}

/// Computes one line: refund at the (possibly overridden) sale price,
/// reversal at the frozen cost.
pub fn return_line_amounts(refund_unit_price: Money, frozen_unit_cost: Money, quantity: i64) -> ReturnLineAmounts {
    ReturnLineAmounts {
        refund: refund_unit_price.multiply_quantity(quantity),
        cogs_reversal: frozen_unit_cost.multiply_quantity(quantity),
    }
}

/// Totals across a return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReturnTotals {
    pub refund_gross: Money,
    pub restocking_fee: Money,
    pub refund_net: Money,
    pub cogs_reversal: Money,
}

/// Sums line amounts and applies the restocking fee.
///
/// The fee is capped at the gross refund; a return never produces a
/// negative net refund.
pub fn return_totals(lines: &[ReturnLineAmounts], restocking_fee: Money) -> ReturnTotals {
    let refund_gross: Money = lines.iter().map(|l| l.refund).sum();
    let fee = restocking_fee.min(refund_gross);
    ReturnTotals {
        refund_gross,
        restocking_fee: fee,
        refund_net: refund_gross - fee,
        cogs_reversal: lines.iter().map(|l| l.cogs_reversal).sum(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
