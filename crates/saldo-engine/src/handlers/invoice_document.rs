//! Invoice document generation.
//!
//! Turns a committed sale into a stable document reference and announces
//! it as `invoice.document_ready`. The reference is derived from the
//! order number alone, so re-running the handler after a crash produces
//! the same document, not a second one.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use saldo_core::events::{
    InvoiceDocumentReadyEvent, OrderCreatedEvent, EVENT_INVOICE_DOCUMENT_READY,
    EVENT_ORDER_CREATED,
};
use saldo_core::OutboxEvent;
use saldo_db::repository::new_id;
use saldo_db::Database;

use crate::error::EngineResult;
use crate::handlers::EventHandler;

pub struct InvoiceDocumentHandler;

impl InvoiceDocumentHandler {
    /// The stable reference for an order's invoice document.
    pub fn document_ref(order_number: &str) -> String {
        format!("INV-{order_number}")
    }
}

#[async_trait]
impl EventHandler for InvoiceDocumentHandler {
    fn name(&self) -> &'static str {
        "invoice_document"
    }

    fn interested_in(&self, event_type: &str) -> bool {
        event_type == EVENT_ORDER_CREATED
    }

    async fn handle(&self, _db: &Database, event: &OutboxEvent) -> EngineResult<Vec<OutboxEvent>> {
        let payload: OrderCreatedEvent = serde_json::from_str(&event.payload)?;
        let document_ref = Self::document_ref(&payload.order_number);
        info!(
            order_number = %payload.order_number,
            document_ref = %document_ref,
            "Invoice document prepared"
        );

        let ready = InvoiceDocumentReadyEvent {
            order_id: payload.order_id.clone(),
            order_number: payload.order_number,
            tenant_id: payload.tenant_id.clone(),
            customer_id: payload.customer_id,
            document_ref,
        };
        Ok(vec![OutboxEvent {
            id: new_id(),
            tenant_id: payload.tenant_id,
            event_type: EVENT_INVOICE_DOCUMENT_READY.to_string(),
            entity_id: payload.order_id,
            payload: serde_json::to_string(&ready)?,
            created_at: Utc::now(),
            dispatched_at: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_ref_is_deterministic() {
        assert_eq!(
            InvoiceDocumentHandler::document_ref("SI-20260822-0001"),
            "INV-SI-20260822-0001"
        );
        assert_eq!(
            InvoiceDocumentHandler::document_ref("SI-20260822-0001"),
            InvoiceDocumentHandler::document_ref("SI-20260822-0001"),
        );
    }

    #[test]
    fn test_interest_is_limited_to_sales() {
        let handler = InvoiceDocumentHandler;
        assert!(handler.interested_in(EVENT_ORDER_CREATED));
        assert!(!handler.interested_in(EVENT_INVOICE_DOCUMENT_READY));
        assert!(!handler.interested_in("return.processed"));
    }
}
