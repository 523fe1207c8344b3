//! Daily sales rollup.
//!
//! Folds each sale into the tenant's per-day metrics row and folds
//! returns back out as negative deltas. Revenue and profit therefore
//! reflect net trade, and a day that saw only a return can go negative.
//!
//! ## Idempotency
//! Redelivery is fenced by an applied-marker written in the same
//! transaction as the delta. A re-run finds the marker and applies
//! nothing.

use async_trait::async_trait;
use tracing::debug;

use saldo_core::events::{
    OrderCreatedEvent, ReturnProcessedEvent, EVENT_ORDER_CREATED, EVENT_RETURN_PROCESSED,
};
use saldo_core::OutboxEvent;
use saldo_db::{DailySalesDelta, Database, MetricsRepository};

use crate::error::EngineResult;
use crate::handlers::EventHandler;

pub struct SalesMetricsHandler;

#[async_trait]
impl EventHandler for SalesMetricsHandler {
    fn name(&self) -> &'static str {
        "daily_sales_metrics"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        event_type == EVENT_ORDER_CREATED || event_type == EVENT_RETURN_PROCESSED
    }

    async fn handle(&self, db: &Database, event: &OutboxEvent) -> EngineResult<Vec<OutboxEvent>> {
        let delta = match event.event_type.as_str() {
            EVENT_ORDER_CREATED => {
                let payload: OrderCreatedEvent = serde_json::from_str(&event.payload)?;
                let cogs = payload.frozen_cogs.total_cost().cents();
                DailySalesDelta {
                    orders_count: 1,
                    revenue_cents: payload.total_cents,
                    discount_cents: payload.discount_cents,
                    tax_cents: payload.tax_cents,
                    cogs_cents: cogs,
                    profit_cents: payload.total_cents - cogs,
                    includes_estimated: payload.frozen_cogs.is_estimated,
                }
            }
            EVENT_RETURN_PROCESSED => {
                let payload: ReturnProcessedEvent = serde_json::from_str(&event.payload)?;
                DailySalesDelta {
                    orders_count: 0,
                    revenue_cents: -payload.refund_net_cents,
                    discount_cents: 0,
                    tax_cents: 0,
                    cogs_cents: -payload.cogs_reversal_cents,
                    profit_cents: -(payload.refund_net_cents - payload.cogs_reversal_cents),
                    includes_estimated: false,
                }
            }
            _ => return Ok(Vec::new()),
        };

        let mut uow = db.begin().await?;
        if MetricsRepository::try_mark_applied(uow.conn(), &event.id, self.name()).await? {
            MetricsRepository::apply_daily_sales(
                uow.conn(),
                &event.tenant_id,
                event.created_at.date_naive(),
                &delta,
            )
            .await?;
        } else {
            debug!(event_id = %event.id, "Sales metrics already applied");
        }
        uow.commit().await?;

        Ok(Vec::new())
    }
}
