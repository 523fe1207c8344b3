//! Per-product daily sales analytics.
//!
//! Breaks each sale down by product: units moved, gross revenue at sale
//! price, cost at the frozen snapshot. Feeds the top-products report.
//!
//! Returns are not folded back in; the rows answer "what sold today",
//! not net position. Same applied-marker fence as the daily rollup.

use async_trait::async_trait;
use tracing::debug;

use saldo_core::events::{OrderCreatedEvent, EVENT_ORDER_CREATED};
use saldo_core::OutboxEvent;
use saldo_db::{Database, MetricsRepository};

use crate::error::EngineResult;
use crate::handlers::EventHandler;

pub struct StockAnalyticsHandler;

#[async_trait]
impl EventHandler for StockAnalyticsHandler {
    fn name(&self) -> &'static str {
        "stock_analytics"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        event_type == EVENT_ORDER_CREATED
    }

    async fn handle(&self, db: &Database, event: &OutboxEvent) -> EngineResult<Vec<OutboxEvent>> {
        let payload: OrderCreatedEvent = serde_json::from_str(&event.payload)?;
        let date = event.created_at.date_naive();

        let mut uow = db.begin().await?;
        if MetricsRepository::try_mark_applied(uow.conn(), &event.id, self.name()).await? {
            for item in &payload.items {
                MetricsRepository::apply_product_daily(
                    uow.conn(),
                    &event.tenant_id,
                    &item.product_id,
                    date,
                    item.quantity,
                    item.unit_price_cents * item.quantity,
                    item.unit_cost_cents * item.quantity,
                )
                .await?;
            }
        } else {
            debug!(event_id = %event.id, "Stock analytics already applied");
        }
        uow.commit().await?;

        Ok(Vec::new())
    }
}
