//! # Event Handlers
//!
//! Side effects that follow a committed transaction, driven off the
//! outbox by the dispatcher. Each handler owns one concern and is
//! tracked as its own job per event.
//!
//! ## Contract
//! Delivery is at-least-once: a crash between running a handler and
//! recording its completion re-runs it. Handlers must therefore be
//! idempotent, either naturally (deterministic output keyed on the
//! event) or through an applied-marker inside their own transaction.
//!
//! Follow-up events are returned, not enqueued directly. The dispatcher
//! writes them in the same transaction that records completion, so a
//! follow-up exists exactly when its parent job is marked done.

use std::sync::Arc;

use async_trait::async_trait;

use saldo_core::OutboxEvent;
use saldo_db::Database;

use crate::error::EngineResult;

mod invoice_document;
mod notification;
mod profit_distribution;
mod sales_metrics;
mod stock_analytics;

pub use invoice_document::InvoiceDocumentHandler;
pub use notification::NotificationHandler;
pub use profit_distribution::ProfitDistributionHandler;
pub use sales_metrics::SalesMetricsHandler;
pub use stock_analytics::StockAnalyticsHandler;

/// One post-commit concern.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identifier, recorded on each job row. Renaming a handler
    /// orphans its pending jobs.
    fn name(&self) -> &'static str;

    /// Whether this handler gets a job for the given event type.
    fn interested_in(&self, event_type: &str) -> bool;

    /// Processes one event, returning any follow-up events to publish.
    async fn handle(&self, db: &Database, event: &OutboxEvent) -> EngineResult<Vec<OutboxEvent>>;
}

/// The standard handler set, in fan-out order.
pub fn default_handlers() -> Vec<Arc<dyn EventHandler>> {
    vec![
        Arc::new(InvoiceDocumentHandler),
        Arc::new(NotificationHandler),
        Arc::new(SalesMetricsHandler),
        Arc::new(StockAnalyticsHandler),
        Arc::new(ProfitDistributionHandler),
    ]
}
