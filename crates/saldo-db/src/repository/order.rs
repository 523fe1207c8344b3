//! # Order Repository
//!
//! Committed orders, their line items, and the per-day order number
//! counter.
//!
//! ## Order Number Allocation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  One counter row per (tenant, day). Allocation is a single upsert:     │
//! │                                                                         │
//! │    INSERT INTO order_counters (tenant_id, counter_date, seq)           │
//! │    VALUES (?, ?, 1)                                                     │
//! │    ON CONFLICT (tenant_id, counter_date) DO UPDATE SET seq = seq + 1   │
//! │    RETURNING seq                                                        │
//! │                                                                         │
//! │  Two concurrent sales serialize on the row and get distinct            │
//! │  sequences. An aborted sale burns its number; gaps are fine,           │
//! │  collisions are not (UNIQUE (tenant_id, order_number) backs this up).  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The frozen COGS snapshot is stored as JSON text on the order row, so
//! orders map through a private row type.

use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use saldo_core::cogs::FrozenCogs;
use saldo_core::orders::{
    format_order_number, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
};
use saldo_core::Money;

/// Repository for orders, order items and order numbers.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

const ORDER_COLUMNS: &str = "id, tenant_id, order_number, customer_id, status, subtotal_cents, \
     discount_cents, tax_cents, total_cents, payment_method, amount_paid_cents, payment_status, \
     frozen_cogs, period, actor_id, version, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, sku_snapshot, name_snapshot, quantity, \
     unit_price_cents, discount_bps, tax_rate_bps, unit_cost_cents, line_subtotal_cents, \
     line_discount_cents, line_tax_cents, line_total_cents, returned_quantity, created_at";

/// Database image of an order: `frozen_cogs` is stored as JSON text.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    tenant_id: String,
    order_number: String,
    customer_id: Option<String>,
    status: OrderStatus,
    subtotal_cents: i64,
    discount_cents: i64,
    tax_cents: i64,
    total_cents: i64,
    payment_method: PaymentMethod,
    amount_paid_cents: i64,
    payment_status: PaymentStatus,
    frozen_cogs: Option<String>,
    period: String,
    actor_id: String,
    version: i64,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> DbResult<Order> {
        let frozen_cogs = match self.frozen_cogs {
            Some(json) => Some(serde_json::from_str::<FrozenCogs>(&json)?),
            None => None,
        };
        Ok(Order {
            id: self.id,
            tenant_id: self.tenant_id,
            order_number: self.order_number,
            customer_id: self.customer_id,
            status: self.status,
            subtotal_cents: self.subtotal_cents,
            discount_cents: self.discount_cents,
            tax_cents: self.tax_cents,
            total_cents: self.total_cents,
            payment_method: self.payment_method,
            amount_paid_cents: self.amount_paid_cents,
            payment_status: self.payment_status,
            frozen_cogs,
            period: self.period,
            actor_id: self.actor_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl OrderRepository {
    /// Creates a new OrderRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Gets an order by id.
    pub async fn get_by_id(&self, tenant_id: &str, id: &str) -> DbResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrderRow::into_order).transpose()
    }

    /// Gets an order by its human-readable number.
    pub async fn get_by_number(
        &self,
        tenant_id: &str,
        order_number: &str,
    ) -> DbResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE tenant_id = ?1 AND order_number = ?2"
        ))
        .bind(tenant_id)
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OrderRow::into_order).transpose()
    }

    /// Lists recent orders, newest first.
    pub async fn list_recent(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE tenant_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OrderRow::into_order).collect()
    }

    /// Lists an order's line items in insertion order.
    pub async fn items(&self, order_id: &str) -> DbResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY created_at, id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    // =========================================================================
    // Unit-of-work functions
    // =========================================================================

    /// Allocates the next order number for a tenant and sale date.
    ///
    /// The counter increments inside the caller's unit of work: if the sale
    /// aborts, the increment rolls back with everything else.
    pub async fn next_order_number(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        date: NaiveDate,
    ) -> DbResult<String> {
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO order_counters (tenant_id, counter_date, seq) VALUES (?1, ?2, 1) \
             ON CONFLICT (tenant_id, counter_date) DO UPDATE SET seq = seq + 1 \
             RETURNING seq",
        )
        .bind(tenant_id)
        .bind(date)
        .fetch_one(conn)
        .await?;

        let number = format_order_number(date, seq);
        debug!(order_number = %number, "Order number allocated");
        Ok(number)
    }

    /// Inserts an order and all of its line items.
    pub async fn insert(
        conn: &mut SqliteConnection,
        order: &Order,
        items: &[OrderItem],
    ) -> DbResult<()> {
        let frozen_cogs = order
            .frozen_cogs
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO orders (\
                 id, tenant_id, order_number, customer_id, status, subtotal_cents, \
                 discount_cents, tax_cents, total_cents, payment_method, amount_paid_cents, \
                 payment_status, frozen_cogs, period, actor_id, version, created_at, updated_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        )
        .bind(&order.id)
        .bind(&order.tenant_id)
        .bind(&order.order_number)
        .bind(&order.customer_id)
        .bind(order.status)
        .bind(order.subtotal_cents)
        .bind(order.discount_cents)
        .bind(order.tax_cents)
        .bind(order.total_cents)
        .bind(order.payment_method)
        .bind(order.amount_paid_cents)
        .bind(order.payment_status)
        .bind(frozen_cogs)
        .bind(&order.period)
        .bind(&order.actor_id)
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *conn)
        .await?;

        for item in items {
            sqlx::query(
                "INSERT INTO order_items (\
                     id, order_id, product_id, sku_snapshot, name_snapshot, quantity, \
                     unit_price_cents, discount_bps, tax_rate_bps, unit_cost_cents, \
                     line_subtotal_cents, line_discount_cents, line_tax_cents, \
                     line_total_cents, returned_quantity, created_at\
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.product_id)
            .bind(&item.sku_snapshot)
            .bind(&item.name_snapshot)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.discount_bps)
            .bind(item.tax_rate_bps)
            .bind(item.unit_cost_cents)
            .bind(item.line_subtotal_cents)
            .bind(item.line_discount_cents)
            .bind(item.line_tax_cents)
            .bind(item.line_total_cents)
            .bind(item.returned_quantity)
            .bind(item.created_at)
            .execute(&mut *conn)
            .await?;
        }

        debug!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = items.len(),
            "Order inserted"
        );
        Ok(())
    }

    /// Reads an order inside an open unit of work.
    pub async fn find(conn: &mut SqliteConnection, tenant_id: &str, id: &str) -> DbResult<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| DbError::not_found("Order", id))?;

        row.into_order()
    }

    /// Reads an order's items inside an open unit of work.
    pub async fn load_items(
        conn: &mut SqliteConnection,
        order_id: &str,
    ) -> DbResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ?1 ORDER BY created_at, id"
        ))
        .bind(order_id)
        .fetch_all(conn)
        .await?;

        Ok(items)
    }

    /// Transitions an order's status, guarded by the version the caller read.
    pub async fn update_status(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        order_id: &str,
        expected_version: i64,
        status: OrderStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE orders SET status = ?4, version = version + 1, updated_at = ?5 \
             WHERE tenant_id = ?1 AND id = ?2 AND version = ?3",
        )
        .bind(tenant_id)
        .bind(order_id)
        .bind(expected_version)
        .bind(status)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::version_conflict("Order", order_id));
        }
        Ok(())
    }

    /// Records money received against an order, guarded by version.
    pub async fn update_payment(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        order_id: &str,
        expected_version: i64,
        amount_paid: Money,
        payment_status: PaymentStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE orders SET amount_paid_cents = ?4, payment_status = ?5, \
                 version = version + 1, updated_at = ?6 \
             WHERE tenant_id = ?1 AND id = ?2 AND version = ?3",
        )
        .bind(tenant_id)
        .bind(order_id)
        .bind(expected_version)
        .bind(amount_paid.cents())
        .bind(payment_status)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::version_conflict("Order", order_id));
        }
        Ok(())
    }

    /// Writes a backfilled COGS snapshot onto a legacy order.
    ///
    /// Guarded on the column still being NULL, so a snapshot frozen at sale
    /// time can never be overwritten. Returns false when another writer
    /// already filled it; the caller re-reads and uses theirs.
    pub async fn set_frozen_cogs(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        order_id: &str,
        snapshot: &FrozenCogs,
    ) -> DbResult<bool> {
        let json = serde_json::to_string(snapshot)?;
        let result = sqlx::query(
            "UPDATE orders SET frozen_cogs = ?3, updated_at = ?4 \
             WHERE tenant_id = ?1 AND id = ?2 AND frozen_cogs IS NULL",
        )
        .bind(tenant_id)
        .bind(order_id)
        .bind(json)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Adds returned units to a line item.
    ///
    /// Guarded so the running total can never pass the purchased quantity;
    /// a zero-row update means a concurrent return took the remaining units
    /// first, and the caller retries against fresh reads.
    pub async fn add_returned_quantity(
        conn: &mut SqliteConnection,
        order_item_id: &str,
        quantity: i64,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE order_items SET returned_quantity = returned_quantity + ?2 \
             WHERE id = ?1 AND returned_quantity + ?2 <= quantity",
        )
        .bind(order_item_id)
        .bind(quantity)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::version_conflict("OrderItem", order_item_id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use crate::repository::product::ProductRepository;
    use saldo_core::cogs::{CostSource, FrozenCogsLine};
    use saldo_core::Product;

    async fn db_with_product() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let product = Product {
            id: "p1".to_string(),
            tenant_id: "t1".to_string(),
            sku: "SKU-1".to_string(),
            name: "Widget".to_string(),
            price_cents: 1000,
            list_cost_cents: Some(500),
            tax_rate_bps: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let mut uow = db.begin().await.unwrap();
        ProductRepository::insert(uow.conn(), &product).await.unwrap();
        uow.commit().await.unwrap();
        db
    }

    fn sample_order(id: &str, number: &str) -> (Order, Vec<OrderItem>) {
        let now = Utc::now();
        let snapshot = FrozenCogs::freeze(
            vec![FrozenCogsLine::new(
                "p1",
                3,
                Money::from_cents(500),
                CostSource::AverageCost,
            )],
            now,
        );
        let order = Order {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            order_number: number.to_string(),
            customer_id: None,
            status: OrderStatus::Completed,
            subtotal_cents: 3000,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: 3000,
            payment_method: PaymentMethod::Cash,
            amount_paid_cents: 3000,
            payment_status: PaymentStatus::Paid,
            frozen_cogs: Some(snapshot),
            period: "2026-08".to_string(),
            actor_id: "u1".to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let items = vec![OrderItem {
            id: format!("{id}-item-1"),
            order_id: id.to_string(),
            product_id: "p1".to_string(),
            sku_snapshot: "SKU-1".to_string(),
            name_snapshot: "Widget".to_string(),
            quantity: 3,
            unit_price_cents: 1000,
            discount_bps: 0,
            tax_rate_bps: 0,
            unit_cost_cents: 500,
            line_subtotal_cents: 3000,
            line_discount_cents: 0,
            line_tax_cents: 0,
            line_total_cents: 3000,
            returned_quantity: 0,
            created_at: now,
        }];
        (order, items)
    }

    #[tokio::test]
    async fn test_order_numbers_increment_per_day_and_tenant() {
        let db = db_with_product().await;
        let date = NaiveDate::from_ymd_opt(2026, 8, 22).unwrap();
        let next_day = NaiveDate::from_ymd_opt(2026, 8, 23).unwrap();

        let mut uow = db.begin().await.unwrap();
        let first = OrderRepository::next_order_number(uow.conn(), "t1", date)
            .await
            .unwrap();
        let second = OrderRepository::next_order_number(uow.conn(), "t1", date)
            .await
            .unwrap();
        let fresh_day = OrderRepository::next_order_number(uow.conn(), "t1", next_day)
            .await
            .unwrap();
        let other_tenant = OrderRepository::next_order_number(uow.conn(), "t2", date)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(first, "SI-20260822-0001");
        assert_eq!(second, "SI-20260822-0002");
        assert_eq!(fresh_day, "SI-20260823-0001");
        assert_eq!(other_tenant, "SI-20260822-0001");
    }

    #[tokio::test]
    async fn test_aborted_sale_rolls_the_counter_back() {
        let db = db_with_product().await;
        let date = NaiveDate::from_ymd_opt(2026, 8, 22).unwrap();

        let mut uow = db.begin().await.unwrap();
        OrderRepository::next_order_number(uow.conn(), "t1", date)
            .await
            .unwrap();
        uow.abort().await.unwrap();

        let mut uow = db.begin().await.unwrap();
        let number = OrderRepository::next_order_number(uow.conn(), "t1", date)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(number, "SI-20260822-0001");
    }

    #[tokio::test]
    async fn test_insert_and_read_back_with_snapshot() {
        let db = db_with_product().await;
        let (order, items) = sample_order("o1", "SI-20260822-0001");

        let mut uow = db.begin().await.unwrap();
        OrderRepository::insert(uow.conn(), &order, &items).await.unwrap();
        uow.commit().await.unwrap();

        let found = db.orders().get_by_id("t1", "o1").await.unwrap().unwrap();
        assert_eq!(found.order_number, "SI-20260822-0001");
        let snapshot = found.frozen_cogs.unwrap();
        assert_eq!(snapshot.total_cost_cents, 1500);
        assert_eq!(snapshot.lines[0].source, CostSource::AverageCost);

        let by_number = db
            .orders()
            .get_by_number("t1", "SI-20260822-0001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_number.id, "o1");

        let items = db.orders().items("o1").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].unit_cost_cents, 500);
    }

    #[tokio::test]
    async fn test_status_transition_guards_on_version() {
        let db = db_with_product().await;
        let (order, items) = sample_order("o1", "SI-20260822-0001");

        let mut uow = db.begin().await.unwrap();
        OrderRepository::insert(uow.conn(), &order, &items).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = db.begin().await.unwrap();
        OrderRepository::update_status(uow.conn(), "t1", "o1", 1, OrderStatus::Returned)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        // The stale version that was just consumed no longer matches
        let mut uow = db.begin().await.unwrap();
        let err = OrderRepository::update_status(uow.conn(), "t1", "o1", 1, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn test_backfill_never_overwrites_a_snapshot() {
        let db = db_with_product().await;
        let (mut order, items) = sample_order("o1", "SI-20260822-0001");
        let frozen = order.frozen_cogs.take().unwrap();

        let mut uow = db.begin().await.unwrap();
        OrderRepository::insert(uow.conn(), &order, &items).await.unwrap();

        // First fill lands
        let wrote = OrderRepository::set_frozen_cogs(uow.conn(), "t1", "o1", &frozen)
            .await
            .unwrap();
        assert!(wrote);

        // Second fill is refused
        let wrote = OrderRepository::set_frozen_cogs(uow.conn(), "t1", "o1", &frozen)
            .await
            .unwrap();
        assert!(!wrote);
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_returned_quantity_cannot_pass_purchased() {
        let db = db_with_product().await;
        let (order, items) = sample_order("o1", "SI-20260822-0001");

        let mut uow = db.begin().await.unwrap();
        OrderRepository::insert(uow.conn(), &order, &items).await.unwrap();

        OrderRepository::add_returned_quantity(uow.conn(), "o1-item-1", 2)
            .await
            .unwrap();
        let err = OrderRepository::add_returned_quantity(uow.conn(), "o1-item-1", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { .. }));

        OrderRepository::add_returned_quantity(uow.conn(), "o1-item-1", 1)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let items = db.orders().items("o1").await.unwrap();
        assert_eq!(items[0].returned_quantity, 3);
        assert_eq!(items[0].returnable_quantity(), 0);
    }
}
