//! # COGS Freezing
//!
//! Profit on a sale is priced against what the goods cost when they left
//! the shelf. At sale time each line's unit cost is resolved through the
//! fallback chain (weighted average, then last purchase, then list cost)
//! and pinned onto the order as a [`FrozenCogs`] snapshot. Later cost
//! changes never rewrite history: returns, cancellations and profit
//! reports all read the snapshot, not current costs.
//!
//! Orders that predate freezing get their snapshot from [`CogsFreezer::backfill`],
//! which runs the same chain against today's costs and marks the result
//! estimated.

use chrono::Utc;
use tracing::warn;

use saldo_core::cogs::resolve_unit_cost;
use saldo_core::{CoreError, CostBasis, FrozenCogs, FrozenCogsLine, InventoryLevel, Money, Product};
use saldo_db::{Database, DbError, InventoryRepository, OrderRepository, ProductRepository};

use crate::error::EngineResult;
use crate::retry::RetryPolicy;

/// Resolves and pins unit costs for order lines.
pub struct CogsFreezer {
    db: Database,
    retry: RetryPolicy,
}

impl CogsFreezer {
    /// Creates a freezer over the given database.
    pub fn new(db: Database, retry: RetryPolicy) -> Self {
        CogsFreezer { db, retry }
    }

    /// Assembles the cost fallback chain for one product.
    pub fn cost_basis(level: Option<&InventoryLevel>, product: &Product) -> CostBasis {
        CostBasis {
            average_cost: level
                .and_then(|l| l.average_cost_cents)
                .map(Money::from_cents),
            last_purchase_cost: level
                .and_then(|l| l.last_purchase_cost_cents)
                .map(Money::from_cents),
            list_cost: product.list_cost_cents.map(Money::from_cents),
        }
    }

    /// Resolves one order line's frozen cost.
    ///
    /// ## Errors
    /// [`CoreError::CostUnavailable`] when every source in the chain is
    /// absent or zero. The sale must not proceed without a cost.
    pub fn freeze_line(
        level: Option<&InventoryLevel>,
        product: &Product,
        quantity: i64,
    ) -> EngineResult<FrozenCogsLine> {
        let basis = Self::cost_basis(level, product);
        let (unit_cost, source) =
            resolve_unit_cost(&basis).ok_or_else(|| CoreError::CostUnavailable {
                product_id: product.id.clone(),
            })?;

        Ok(FrozenCogsLine::new(&product.id, quantity, unit_cost, source))
    }

    /// Backfills a cost snapshot for an order that predates freezing.
    ///
    /// The fallback chain is evaluated against today's costs, so the
    /// snapshot is marked estimated and backfilled. If the order already
    /// carries a snapshot, that one is returned untouched.
    pub async fn backfill(&self, tenant_id: &str, order_id: &str) -> EngineResult<FrozenCogs> {
        self.retry
            .run("backfill_cogs", || self.try_backfill(tenant_id, order_id))
            .await
    }

    async fn try_backfill(&self, tenant_id: &str, order_id: &str) -> EngineResult<FrozenCogs> {
        let mut uow = self.db.begin().await?;

        let order = OrderRepository::find(uow.conn(), tenant_id, order_id).await?;
        if let Some(existing) = order.frozen_cogs {
            uow.abort().await?;
            return Ok(existing);
        }

        let items = OrderRepository::load_items(uow.conn(), &order.id).await?;
        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let product = ProductRepository::find(uow.conn(), tenant_id, &item.product_id)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;
            let level =
                InventoryRepository::level_for_update(uow.conn(), tenant_id, &item.product_id)
                    .await?;
            lines.push(Self::freeze_line(level.as_ref(), &product, item.quantity)?);
        }

        let snapshot = FrozenCogs::backfill(lines, Utc::now());
        let claimed =
            OrderRepository::set_frozen_cogs(uow.conn(), tenant_id, order_id, &snapshot).await?;
        if !claimed {
            // Another writer filled the snapshot first; the retry loop
            // re-reads and returns theirs.
            return Err(DbError::version_conflict("Order", order_id).into());
        }
        uow.commit().await?;

        warn!(
            order_id,
            total_cents = snapshot.total_cost().cents(),
            "Backfilled estimated COGS snapshot from today's costs"
        );
        Ok(snapshot)
    }
}
