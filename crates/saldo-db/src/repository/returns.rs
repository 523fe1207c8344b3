//! # Return Repository
//!
//! Persistence for processed returns and their line items.
//!
//! Return rows are the audit skeleton of a reversal: the money and stock
//! effects live in the journal, the customer ledger and the movement log,
//! all written in the same unit of work that inserts these records.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};
use saldo_core::returns::{ReturnItem, ReturnRecord};

/// Repository for return records.
#[derive(Debug, Clone)]
pub struct ReturnRepository {
    pool: SqlitePool,
}

const RETURN_COLUMNS: &str = "id, tenant_id, order_id, credit_note_id, status, \
     refund_gross_cents, restocking_fee_cents, refund_net_cents, cogs_reversal_cents, \
     is_after_period_close, period, actor_id, created_at";

const ITEM_COLUMNS: &str = "id, return_id, order_item_id, product_id, quantity, \
     refund_unit_price_cents, refund_total_cents, frozen_unit_cost_cents, cogs_reversal_cents";

impl ReturnRepository {
    /// Creates a new ReturnRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReturnRepository { pool }
    }

    /// Gets a return by id.
    pub async fn get_by_id(&self, tenant_id: &str, id: &str) -> DbResult<Option<ReturnRecord>> {
        let record = sqlx::query_as::<_, ReturnRecord>(&format!(
            "SELECT {RETURN_COLUMNS} FROM returns WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// All returns processed against one order, oldest first.
    pub async fn list_for_order(
        &self,
        tenant_id: &str,
        order_id: &str,
    ) -> DbResult<Vec<ReturnRecord>> {
        let records = sqlx::query_as::<_, ReturnRecord>(&format!(
            "SELECT {RETURN_COLUMNS} FROM returns \
             WHERE tenant_id = ?1 AND order_id = ?2 ORDER BY created_at, id"
        ))
        .bind(tenant_id)
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// The line items of one return.
    pub async fn items(&self, return_id: &str) -> DbResult<Vec<ReturnItem>> {
        let items = sqlx::query_as::<_, ReturnItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM return_items WHERE return_id = ?1 ORDER BY id"
        ))
        .bind(return_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    // =========================================================================
    // Unit-of-work functions
    // =========================================================================

    /// Inserts a return and all of its line items.
    pub async fn insert(
        conn: &mut SqliteConnection,
        record: &ReturnRecord,
        items: &[ReturnItem],
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO returns (\
                 id, tenant_id, order_id, credit_note_id, status, refund_gross_cents, \
                 restocking_fee_cents, refund_net_cents, cogs_reversal_cents, \
                 is_after_period_close, period, actor_id, created_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(&record.order_id)
        .bind(&record.credit_note_id)
        .bind(record.status)
        .bind(record.refund_gross_cents)
        .bind(record.restocking_fee_cents)
        .bind(record.refund_net_cents)
        .bind(record.cogs_reversal_cents)
        .bind(record.is_after_period_close)
        .bind(&record.period)
        .bind(&record.actor_id)
        .bind(record.created_at)
        .execute(&mut *conn)
        .await?;

        for item in items {
            sqlx::query(
                "INSERT INTO return_items (\
                     id, return_id, order_item_id, product_id, quantity, \
                     refund_unit_price_cents, refund_total_cents, \
                     frozen_unit_cost_cents, cogs_reversal_cents\
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(&item.id)
            .bind(&item.return_id)
            .bind(&item.order_item_id)
            .bind(&item.product_id)
            .bind(item.quantity)
            .bind(item.refund_unit_price_cents)
            .bind(item.refund_total_cents)
            .bind(item.frozen_unit_cost_cents)
            .bind(item.cogs_reversal_cents)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Reads a return inside an open unit of work.
    pub async fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> DbResult<ReturnRecord> {
        sqlx::query_as::<_, ReturnRecord>(&format!(
            "SELECT {RETURN_COLUMNS} FROM returns WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| DbError::not_found("Return", id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
