//! Customer notification on invoice readiness.
//!
//! Emits a structured log record where a delivery integration (SMS,
//! email) would plug in. Walk-in sales carry no customer and are
//! skipped. Logging twice on redelivery is harmless, so this handler
//! needs no applied-marker.

use async_trait::async_trait;
use tracing::{debug, info};

use saldo_core::events::{InvoiceDocumentReadyEvent, EVENT_INVOICE_DOCUMENT_READY};
use saldo_core::OutboxEvent;
use saldo_db::Database;

use crate::error::EngineResult;
use crate::handlers::EventHandler;

pub struct NotificationHandler;

#[async_trait]
impl EventHandler for NotificationHandler {
    fn name(&self) -> &'static str {
        "customer_notification"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        event_type == EVENT_INVOICE_DOCUMENT_READY
    }

    async fn handle(&self, _db: &Database, event: &OutboxEvent) -> EngineResult<Vec<OutboxEvent>> {
        let payload: InvoiceDocumentReadyEvent = serde_json::from_str(&event.payload)?;
        match payload.customer_id {
            Some(customer_id) => info!(
                customer_id = %customer_id,
                order_number = %payload.order_number,
                document_ref = %payload.document_ref,
                "Customer invoice notification queued"
            ),
            None => debug!(
                order_number = %payload.order_number,
                "Walk-in sale, no customer to notify"
            ),
        }
        Ok(Vec::new())
    }
}
