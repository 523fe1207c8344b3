//! # Inventory Repository
//!
//! Stock levels, the append-only movement log, and the conditional writes
//! that keep stock non-negative under concurrent sellers.
//!
//! ## The Conditional Decrement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              Why a guarded UPDATE instead of read-then-write            │
//! │                                                                         │
//! │  Seller A (stock 10)                Seller B (stock 10)                │
//! │       │ read: available 10               │ read: available 10          │
//! │       │ wants 8                          │ wants 8                     │
//! │       ▼                                  ▼                             │
//! │  UPDATE inventory                   UPDATE inventory                   │
//! │  SET on_hand = on_hand - 8          SET on_hand = on_hand - 8          │
//! │  WHERE on_hand - reserved >= 8      WHERE on_hand - reserved >= 8      │
//! │       │                                  │                             │
//! │       ▼                                  ▼                             │
//! │  rows_affected = 1 (stock 2)        rows_affected = 0 → conflict,      │
//! │                                     transaction retries, re-reads,     │
//! │                                     sees available 2 → Insufficient    │
//! │                                                                         │
//! │  The CHECK (on_hand >= 0) in the schema backs this up: nothing can     │
//! │  drive stock negative even if a guard is bypassed.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutating functions take the unit-of-work connection, so a failure
//! later in the sale rolls the stock change back automatically.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use saldo_core::inventory::weighted_average_cost;
use saldo_core::{InventoryLevel, Money, MovementKind, MovementReason, StockMovement};

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone)]
pub enum DecrementOutcome {
    /// Stock was taken; the level reflects the post-decrement state.
    Applied(InventoryLevel),
    /// Not enough available stock. Nothing was written.
    Insufficient { available: i64 },
}

/// Repository for inventory levels and stock movements.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

const LEVEL_COLUMNS: &str = "product_id, tenant_id, on_hand, reserved, average_cost_cents, \
     last_purchase_cost_cents, out_of_stock, updated_at";

const MOVEMENT_COLUMNS: &str = "id, tenant_id, product_id, kind, quantity, unit_cost_cents, \
     reason, reference_id, actor_id, created_at";

impl InventoryRepository {
    /// Creates a new InventoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Gets the stock level for a product.
    ///
    /// ## Returns
    /// * `Ok(None)` - Product has no inventory row yet (never stocked)
    pub async fn level(&self, tenant_id: &str, product_id: &str) -> DbResult<Option<InventoryLevel>> {
        let level = sqlx::query_as::<_, InventoryLevel>(&format!(
            "SELECT {LEVEL_COLUMNS} FROM inventory WHERE tenant_id = ?1 AND product_id = ?2"
        ))
        .bind(tenant_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(level)
    }

    /// Lists recent movements for a product, newest first.
    pub async fn movements(
        &self,
        tenant_id: &str,
        product_id: &str,
        limit: u32,
    ) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE tenant_id = ?1 AND product_id = ?2 \
             ORDER BY created_at DESC LIMIT ?3"
        ))
        .bind(tenant_id)
        .bind(product_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Net signed movement for a product: in and return add, out subtracts.
    ///
    /// For a product whose row started at zero this reproduces `on_hand`
    /// exactly; tests lean on that equivalence.
    pub async fn net_movement(&self, tenant_id: &str, product_id: &str) -> DbResult<i64> {
        let net: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(CASE kind WHEN 'out' THEN -quantity ELSE quantity END) \
             FROM stock_movements WHERE tenant_id = ?1 AND product_id = ?2",
        )
        .bind(tenant_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(net.unwrap_or(0))
    }

    // =========================================================================
    // Unit-of-work functions
    // =========================================================================

    /// Reads the stock level inside an open unit of work.
    ///
    /// This is the authoritative read: pre-validation reads from the pool
    /// may be stale by the time the transaction opens.
    pub async fn level_for_update(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        product_id: &str,
    ) -> DbResult<Option<InventoryLevel>> {
        let level = sqlx::query_as::<_, InventoryLevel>(&format!(
            "SELECT {LEVEL_COLUMNS} FROM inventory WHERE tenant_id = ?1 AND product_id = ?2"
        ))
        .bind(tenant_id)
        .bind(product_id)
        .fetch_optional(conn)
        .await?;

        Ok(level)
    }

    /// Creates a zero-stock inventory row if none exists.
    pub async fn ensure_level(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        product_id: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO inventory (\
                 product_id, tenant_id, on_hand, reserved, average_cost_cents, \
                 last_purchase_cost_cents, out_of_stock, updated_at\
             ) VALUES (?1, ?2, 0, 0, NULL, NULL, 1, ?3) \
             ON CONFLICT (tenant_id, product_id) DO NOTHING",
        )
        .bind(product_id)
        .bind(tenant_id)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Takes `quantity` units of stock, or reports why it cannot.
    ///
    /// ## Contract
    /// 1. Re-reads the level inside the unit of work
    /// 2. `available = on_hand - reserved`; if `available < quantity`,
    ///    returns [`DecrementOutcome::Insufficient`] without writing
    /// 3. Decrements with a guarded UPDATE, appends an `out` movement,
    ///    flips `out_of_stock` when available hits zero
    ///
    /// ## Errors
    /// * `DbError::VersionConflict` - the guard matched zero rows, meaning
    ///   a concurrent writer got between read and write; retry the whole
    ///   unit of work
    pub async fn reserve_and_decrement(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        product_id: &str,
        quantity: i64,
        reason: MovementReason,
        reference_id: Option<&str>,
        actor_id: &str,
    ) -> DbResult<DecrementOutcome> {
        let Some(mut level) = Self::level_for_update(&mut *conn, tenant_id, product_id).await?
        else {
            return Ok(DecrementOutcome::Insufficient { available: 0 });
        };

        let available = level.available();
        if available < quantity {
            return Ok(DecrementOutcome::Insufficient { available });
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE inventory SET \
                 on_hand = on_hand - ?3, \
                 out_of_stock = CASE WHEN (on_hand - ?3) - reserved <= 0 THEN 1 ELSE 0 END, \
                 updated_at = ?4 \
             WHERE tenant_id = ?1 AND product_id = ?2 AND on_hand - reserved >= ?3",
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::version_conflict("Inventory", product_id));
        }

        debug!(
            product_id = %product_id,
            quantity = quantity,
            remaining = level.on_hand - quantity,
            "Stock decremented"
        );

        let movement = StockMovement {
            id: crate::repository::new_id(),
            tenant_id: tenant_id.to_string(),
            product_id: product_id.to_string(),
            kind: MovementKind::Out,
            quantity,
            unit_cost_cents: level.average_cost_cents,
            reason,
            reference_id: reference_id.map(str::to_string),
            actor_id: actor_id.to_string(),
            created_at: now,
        };
        Self::append_movement(&mut *conn, &movement).await?;

        level.on_hand -= quantity;
        level.out_of_stock = level.available() <= 0;
        level.updated_at = now;
        Ok(DecrementOutcome::Applied(level))
    }

    /// Puts stock back in, recomputing the weighted-average cost.
    ///
    /// Used by goods receiving, returns and cancellations. The movement
    /// kind follows the reason: purchases and adjustments come `in`,
    /// returns and cancellations come back as `return`.
    ///
    /// ## Arguments
    /// * `unit_cost` - Cost per unit for the average. For returns this is
    ///   the *frozen* unit cost from the original sale, never today's.
    pub async fn restock(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        product_id: &str,
        quantity: i64,
        unit_cost: Money,
        reason: MovementReason,
        reference_id: Option<&str>,
        actor_id: &str,
    ) -> DbResult<InventoryLevel> {
        Self::ensure_level(&mut *conn, tenant_id, product_id).await?;

        let Some(mut level) = Self::level_for_update(&mut *conn, tenant_id, product_id).await?
        else {
            return Err(DbError::not_found("Inventory", product_id));
        };

        let new_average = weighted_average_cost(
            level.on_hand,
            level.average_cost_cents.map(Money::from_cents),
            quantity,
            unit_cost,
        );
        let new_last_purchase = if reason == MovementReason::Purchase {
            Some(unit_cost.cents())
        } else {
            level.last_purchase_cost_cents
        };

        let now = Utc::now();
        sqlx::query(
            "UPDATE inventory SET \
                 on_hand = on_hand + ?3, \
                 average_cost_cents = ?4, \
                 last_purchase_cost_cents = ?5, \
                 out_of_stock = CASE WHEN (on_hand + ?3) - reserved <= 0 THEN 1 ELSE 0 END, \
                 updated_at = ?6 \
             WHERE tenant_id = ?1 AND product_id = ?2",
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(quantity)
        .bind(new_average.cents())
        .bind(new_last_purchase)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(
            product_id = %product_id,
            quantity = quantity,
            average_cost = new_average.cents(),
            "Stock received"
        );

        let kind = match reason {
            MovementReason::Return | MovementReason::Cancellation => MovementKind::Return,
            _ => MovementKind::In,
        };
        let movement = StockMovement {
            id: crate::repository::new_id(),
            tenant_id: tenant_id.to_string(),
            product_id: product_id.to_string(),
            kind,
            quantity,
            unit_cost_cents: Some(unit_cost.cents()),
            reason,
            reference_id: reference_id.map(str::to_string),
            actor_id: actor_id.to_string(),
            created_at: now,
        };
        Self::append_movement(&mut *conn, &movement).await?;

        level.on_hand += quantity;
        level.average_cost_cents = Some(new_average.cents());
        level.last_purchase_cost_cents = new_last_purchase;
        level.out_of_stock = level.available() <= 0;
        level.updated_at = now;
        Ok(level)
    }

    /// Appends one row to the movement log.
    async fn append_movement(
        conn: &mut SqliteConnection,
        movement: &StockMovement,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO stock_movements (\
                 id, tenant_id, product_id, kind, quantity, unit_cost_cents, \
                 reason, reference_id, actor_id, created_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&movement.id)
        .bind(&movement.tenant_id)
        .bind(&movement.product_id)
        .bind(movement.kind)
        .bind(movement.quantity)
        .bind(movement.unit_cost_cents)
        .bind(movement.reason)
        .bind(&movement.reference_id)
        .bind(&movement.actor_id)
        .bind(movement.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
