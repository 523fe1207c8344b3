//! Per-order profit distribution.
//!
//! Writes one profit row per fully paid order; the profit report sums
//! these rows. Unpaid and partially paid orders contribute nothing
//! until settled, keeping reported profit backed by money actually
//! received.
//!
//! The row is keyed on the order id, so the insert itself is the
//! idempotency fence; no applied-marker needed.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use saldo_core::events::{OrderCreatedEvent, EVENT_ORDER_CREATED};
use saldo_core::{OutboxEvent, PaymentStatus};
use saldo_db::{Database, MetricsRepository, ProfitDistribution};

use crate::error::EngineResult;
use crate::handlers::EventHandler;

pub struct ProfitDistributionHandler;

#[async_trait]
impl EventHandler for ProfitDistributionHandler {
    fn name(&self) -> &'static str {
        "profit_distribution"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        event_type == EVENT_ORDER_CREATED
    }

    async fn handle(&self, db: &Database, event: &OutboxEvent) -> EngineResult<Vec<OutboxEvent>> {
        let payload: OrderCreatedEvent = serde_json::from_str(&event.payload)?;
        if payload.payment_status != PaymentStatus::Paid {
            debug!(
                order_number = %payload.order_number,
                status = ?payload.payment_status,
                "Order not fully paid, no profit distributed"
            );
            return Ok(Vec::new());
        }

        let cogs = payload.frozen_cogs.total_cost().cents();
        let distribution = ProfitDistribution {
            order_id: payload.order_id,
            tenant_id: payload.tenant_id,
            revenue_cents: payload.total_cents,
            cogs_cents: cogs,
            profit_cents: payload.total_cents - cogs,
            is_estimated: payload.frozen_cogs.is_estimated,
            created_at: Utc::now(),
        };

        let mut uow = db.begin().await?;
        let inserted =
            MetricsRepository::insert_profit_distribution(uow.conn(), &distribution).await?;
        uow.commit().await?;
        if !inserted {
            debug!(order_id = %distribution.order_id, "Profit already distributed");
        }

        Ok(Vec::new())
    }
}
