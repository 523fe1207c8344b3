//! # Metrics Repository
//!
//! Projection tables the event handlers maintain: daily sales rollups,
//! per-product movement, and per-order profit distributions.
//!
//! ## Idempotency Under At-Least-Once Delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Additive rollups (daily sales, product daily) would double-count on   │
//! │  redelivery, so handlers bracket them:                                 │
//! │                                                                         │
//! │    if try_mark_applied(event, handler) {   ← INSERT OR IGNORE          │
//! │        apply_daily_sales(…delta…)          ← same unit of work         │
//! │    }                                        else: already applied      │
//! │                                                                         │
//! │  Profit distributions key on order_id; the PRIMARY KEY is the dedup.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deltas are signed: a return applies negative revenue against the day it
//! is processed.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;

/// Repository for sales metric projections.
#[derive(Debug, Clone)]
pub struct MetricsRepository {
    pool: SqlitePool,
}

/// One tenant-day sales rollup row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailySalesMetrics {
    pub tenant_id: String,
    pub metric_date: NaiveDate,
    pub orders_count: i64,
    pub revenue_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub cogs_cents: i64,
    pub profit_cents: i64,
    /// True once any order with estimated COGS landed in this day.
    pub includes_estimated: bool,
    pub updated_at: DateTime<Utc>,
}

/// Signed changes to apply to a day's rollup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailySalesDelta {
    pub orders_count: i64,
    pub revenue_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub cogs_cents: i64,
    pub profit_cents: i64,
    pub includes_estimated: bool,
}

/// One product-day movement row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductDailySales {
    pub tenant_id: String,
    pub product_id: String,
    pub metric_date: NaiveDate,
    pub quantity_sold: i64,
    pub revenue_cents: i64,
    pub cogs_cents: i64,
    pub updated_at: DateTime<Utc>,
}

/// Per-order profit snapshot, written once when the order is fully paid.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProfitDistribution {
    pub order_id: String,
    pub tenant_id: String,
    pub revenue_cents: i64,
    pub cogs_cents: i64,
    pub profit_cents: i64,
    pub is_estimated: bool,
    pub created_at: DateTime<Utc>,
}

/// Aggregated profit over a date range.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfitSummary {
    pub orders: i64,
    pub revenue_cents: i64,
    pub cogs_cents: i64,
    pub profit_cents: i64,
    /// True when any contributing order carried estimated COGS.
    pub includes_estimated: bool,
}

/// A product's aggregated movement over a date range.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductSalesTotal {
    pub product_id: String,
    pub quantity_sold: i64,
    pub revenue_cents: i64,
    pub cogs_cents: i64,
}

impl MetricsRepository {
    /// Creates a new MetricsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MetricsRepository { pool }
    }

    /// Gets one day's sales rollup.
    pub async fn daily_sales(
        &self,
        tenant_id: &str,
        date: NaiveDate,
    ) -> DbResult<Option<DailySalesMetrics>> {
        let row = sqlx::query_as::<_, DailySalesMetrics>(
            "SELECT tenant_id, metric_date, orders_count, revenue_cents, discount_cents, \
                    tax_cents, cogs_cents, profit_cents, includes_estimated, updated_at \
             FROM daily_sales_metrics WHERE tenant_id = ?1 AND metric_date = ?2",
        )
        .bind(tenant_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Gets one product-day movement row.
    pub async fn product_daily(
        &self,
        tenant_id: &str,
        product_id: &str,
        date: NaiveDate,
    ) -> DbResult<Option<ProductDailySales>> {
        let row = sqlx::query_as::<_, ProductDailySales>(
            "SELECT tenant_id, product_id, metric_date, quantity_sold, revenue_cents, \
                    cogs_cents, updated_at \
             FROM product_daily_sales \
             WHERE tenant_id = ?1 AND product_id = ?2 AND metric_date = ?3",
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Sums profit distributions created in `[from, to)`.
    pub async fn profit_summary(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<ProfitSummary> {
        let (orders, revenue, cogs, profit, estimated): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                "SELECT COUNT(*), \
                        COALESCE(SUM(revenue_cents), 0), \
                        COALESCE(SUM(cogs_cents), 0), \
                        COALESCE(SUM(profit_cents), 0), \
                        COALESCE(MAX(is_estimated), 0) \
                 FROM profit_distributions \
                 WHERE tenant_id = ?1 AND created_at >= ?2 AND created_at < ?3",
            )
            .bind(tenant_id)
            .bind(from)
            .bind(to)
            .fetch_one(&self.pool)
            .await?;

        Ok(ProfitSummary {
            orders,
            revenue_cents: revenue,
            cogs_cents: cogs,
            profit_cents: profit,
            includes_estimated: estimated != 0,
        })
    }

    /// Products ranked by revenue over a date range, inclusive.
    pub async fn top_products(
        &self,
        tenant_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        limit: u32,
    ) -> DbResult<Vec<ProductSalesTotal>> {
        let rows = sqlx::query_as::<_, ProductSalesTotal>(
            "SELECT product_id, \
                    COALESCE(SUM(quantity_sold), 0) AS quantity_sold, \
                    COALESCE(SUM(revenue_cents), 0) AS revenue_cents, \
                    COALESCE(SUM(cogs_cents), 0) AS cogs_cents \
             FROM product_daily_sales \
             WHERE tenant_id = ?1 AND metric_date BETWEEN ?2 AND ?3 \
             GROUP BY product_id \
             ORDER BY revenue_cents DESC, product_id \
             LIMIT ?4",
        )
        .bind(tenant_id)
        .bind(from)
        .bind(to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Gets one order's profit distribution.
    pub async fn profit_distribution(
        &self,
        order_id: &str,
    ) -> DbResult<Option<ProfitDistribution>> {
        let row = sqlx::query_as::<_, ProfitDistribution>(
            "SELECT order_id, tenant_id, revenue_cents, cogs_cents, profit_cents, \
                    is_estimated, created_at \
             FROM profit_distributions WHERE order_id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // =========================================================================
    // Unit-of-work functions
    // =========================================================================

    /// Claims an (event, handler) application slot.
    ///
    /// ## Returns
    /// * `Ok(true)` - first time; apply the delta in this same unit of work
    /// * `Ok(false)` - already applied; skip without writing
    pub async fn try_mark_applied(
        conn: &mut SqliteConnection,
        event_id: &str,
        handler: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO metrics_applied (event_id, handler, applied_at) \
             VALUES (?1, ?2, ?3)",
        )
        .bind(event_id)
        .bind(handler)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Adds a signed delta into a day's rollup, creating the row on first
    /// touch. `includes_estimated` is sticky once set.
    pub async fn apply_daily_sales(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        date: NaiveDate,
        delta: &DailySalesDelta,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO daily_sales_metrics (\
                 tenant_id, metric_date, orders_count, revenue_cents, discount_cents, \
                 tax_cents, cogs_cents, profit_cents, includes_estimated, updated_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT (tenant_id, metric_date) DO UPDATE SET \
                 orders_count = orders_count + excluded.orders_count, \
                 revenue_cents = revenue_cents + excluded.revenue_cents, \
                 discount_cents = discount_cents + excluded.discount_cents, \
                 tax_cents = tax_cents + excluded.tax_cents, \
                 cogs_cents = cogs_cents + excluded.cogs_cents, \
                 profit_cents = profit_cents + excluded.profit_cents, \
                 includes_estimated = MAX(includes_estimated, excluded.includes_estimated), \
                 updated_at = excluded.updated_at",
        )
        .bind(tenant_id)
        .bind(date)
        .bind(delta.orders_count)
        .bind(delta.revenue_cents)
        .bind(delta.discount_cents)
        .bind(delta.tax_cents)
        .bind(delta.cogs_cents)
        .bind(delta.profit_cents)
        .bind(delta.includes_estimated)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Adds a signed delta into a product-day row.
    pub async fn apply_product_daily(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        product_id: &str,
        date: NaiveDate,
        quantity_delta: i64,
        revenue_delta: i64,
        cogs_delta: i64,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO product_daily_sales (\
                 tenant_id, product_id, metric_date, quantity_sold, revenue_cents, \
                 cogs_cents, updated_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT (tenant_id, product_id, metric_date) DO UPDATE SET \
                 quantity_sold = quantity_sold + excluded.quantity_sold, \
                 revenue_cents = revenue_cents + excluded.revenue_cents, \
                 cogs_cents = cogs_cents + excluded.cogs_cents, \
                 updated_at = excluded.updated_at",
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(date)
        .bind(quantity_delta)
        .bind(revenue_delta)
        .bind(cogs_delta)
        .bind(Utc::now())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Writes an order's profit distribution once.
    ///
    /// ## Returns
    /// * `Ok(false)` - a distribution for this order already exists
    pub async fn insert_profit_distribution(
        conn: &mut SqliteConnection,
        distribution: &ProfitDistribution,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO profit_distributions (\
                 order_id, tenant_id, revenue_cents, cogs_cents, profit_cents, \
                 is_estimated, created_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&distribution.order_id)
        .bind(&distribution.tenant_id)
        .bind(distribution.revenue_cents)
        .bind(distribution.cogs_cents)
        .bind(distribution.profit_cents)
        .bind(distribution.is_estimated)
        .bind(distribution.created_at)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
