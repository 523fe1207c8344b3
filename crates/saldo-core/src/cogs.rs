//! # Frozen Cost of Goods Sold
//!
//! Unit-cost resolution at sale time and the immutable snapshot that
//! records it.
//!
//! ## Why Freeze?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Costs drift. A restock next week changes the weighted average;         │
//! │  a price update changes the list cost. Profit on a sale made TODAY      │
//! │  must be computed with TODAY's cost forever.                            │
//! │                                                                         │
//! │  So the sale freezes its cost basis into the order at commit time.      │
//! │  Returns and profit reports read the snapshot, never current prices.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fallback Chain
//! ```text
//! weighted average cost ──► last purchase cost ──► product list cost ──► error
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Cost Resolution
// =============================================================================

/// Which rung of the fallback chain produced a unit cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    AverageCost,
    LastPurchase,
    ListCost,
}

/// The cost inputs available for one product at freeze time.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostBasis {
    pub average_cost: Option<Money>,
    pub last_purchase_cost: Option<Money>,
    pub list_cost: Option<Money>,
}

/// Resolves a unit cost through the fallback chain.
///
/// A rung counts only if it holds a strictly positive amount; zero-filled
/// columns are indistinguishable from "never costed" and must not freeze a
/// free cost basis. Returns None when the whole chain is empty, which the
/// caller turns into a hard error.
pub fn resolve_unit_cost(basis: &CostBasis) -> Option<(Money, CostSource)> {
    let usable = |m: Option<Money>| m.filter(|c| c.is_positive());

    if let Some(cost) = usable(basis.average_cost) {
        return Some((cost, CostSource::AverageCost));
    }
    if let Some(cost) = usable(basis.last_purchase_cost) {
        return Some((cost, CostSource::LastPurchase));
    }
    if let Some(cost) = usable(basis.list_cost) {
        return Some((cost, CostSource::ListCost));
    }
    None
}

// =============================================================================
// Frozen Snapshot
// =============================================================================

/// One line of a frozen COGS snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenCogsLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost_cents: i64,
    pub total_cost_cents: i64,
    pub source: CostSource,
}

impl FrozenCogsLine {
    pub fn new(product_id: impl Into<String>, quantity: i64, unit_cost: Money, source: CostSource) -> Self {
        FrozenCogsLine {
            product_id: product_id.into(),
            quantity,
            unit_cost_cents: unit_cost.cents(),
            total_cost_cents: unit_cost.multiply_quantity(quantity).cents(),
            source,
        }
    }

    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }

    #[inline]
    pub fn total_cost(&self) -> Money {
        Money::from_cents(self.total_cost_cents)
    }
}

/// The immutable cost snapshot written onto an order at commit time.
///
/// Once persisted this is never recomputed. `is_estimated` and
/// `is_backfilled` are set only by the backfill path and ride along into
/// every consumer: the order payload, profit summaries, return reversals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrozenCogs {
    pub lines: Vec<FrozenCogsLine>,
    pub total_cost_cents: i64,
    pub frozen_at: DateTime<Utc>,
    pub is_estimated: bool,
    pub is_backfilled: bool,
}

impl FrozenCogs {
    /// Freezes a snapshot at sale time. Flags are clean.
    pub fn freeze(lines: Vec<FrozenCogsLine>, frozen_at: DateTime<Utc>) -> Self {
        let total_cost_cents = lines.iter().map(|l| l.total_cost_cents).sum();
        FrozenCogs {
            lines,
            total_cost_cents,
            frozen_at,
            is_estimated: false,
            is_backfilled: false,
        }
    }

    /// Synthesizes a snapshot for a legacy order after the fact.
    ///
    /// The costs come from the *current* fallback chain, not the sale
    /// date, so the snapshot is marked estimated and backfilled.
    pub fn backfill(lines: Vec<FrozenCogsLine>, frozen_at: DateTime<Utc>) -> Self {
        let mut snapshot = FrozenCogs::freeze(lines, frozen_at);
        snapshot.is_estimated = true;
        snapshot.is_backfilled = true;
        snapshot
    }

    #[inline]
    pub fn total_cost(&self) -> Money {
        Money::from_cents(self.total_cost_cents)
    }

    /// The frozen line for a product, if the order carried it.
    pub fn line_for(&self, product_id: &str) -> Option<&FrozenCogsLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
