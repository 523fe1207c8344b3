//! # Event Payloads
//!
//! The JSON payloads written to the transactional outbox. Consumers see
//! only these payloads, never live database rows, so they carry everything
//! a handler needs.
//!
//! Payloads serialize camelCase: they are the engine's outward-facing
//! surface, like the order snapshots they embed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cogs::FrozenCogs;
use crate::orders::{PaymentMethod, PaymentStatus};

/// Emitted in the same transaction as a committed sale.
pub const EVENT_ORDER_CREATED: &str = "order.created";

/// Emitted by the invoice document handler once a document reference
/// exists, to chain the customer notification.
pub const EVENT_INVOICE_DOCUMENT_READY: &str = "invoice.document_ready";

/// Emitted in the same transaction as a processed return.
pub const EVENT_RETURN_PROCESSED: &str = "return.processed";

// =============================================================================
// order.created
// =============================================================================

/// One item of an [`OrderCreatedEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedItem {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub unit_cost_cents: i64,
}

/// Payload of [`EVENT_ORDER_CREATED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedEvent {
    pub order_id: String,
    pub order_number: String,
    pub tenant_id: String,
    pub customer_id: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub items: Vec<OrderCreatedItem>,
    pub actor_id: String,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// The frozen snapshot, estimation flags included.
    pub frozen_cogs: FrozenCogs,
}

// =============================================================================
// invoice.document_ready
// =============================================================================

/// Payload of [`EVENT_INVOICE_DOCUMENT_READY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDocumentReadyEvent {
    pub order_id: String,
    pub order_number: String,
    pub tenant_id: String,
    pub customer_id: Option<String>,
    /// Stable reference to the rendered document.
    pub document_ref: String,
}

// =============================================================================
// return.processed
// =============================================================================

/// Payload of [`EVENT_RETURN_PROCESSED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnProcessedEvent {
    pub return_id: String,
    pub order_id: String,
    pub order_number: String,
    pub tenant_id: String,
    pub customer_id: Option<String>,
    pub refund_net_cents: i64,
    pub cogs_reversal_cents: i64,
    pub is_after_period_close: bool,
}

// =============================================================================
// Outbox Envelope
// =============================================================================

/// A committed event waiting in the outbox.
///
/// Written in the same transaction as the business change it describes;
/// `dispatched_at` is set once the dispatcher fanned it out into jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OutboxEvent {
    pub id: String,
    pub tenant_id: String,
    /// e.g. [`EVENT_ORDER_CREATED`].
    pub event_type: String,
    /// The aggregate the event is about (order id, return id).
    pub entity_id: String,
    /// JSON payload; the only thing consumers ever see.
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Delivery state of one handler's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

/// One handler's delivery attempt state for one event.
///
/// At-least-once: a job may run again after a crash between the handler's
/// side effect and the status update, so handlers must be idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct EventJob {
    pub id: String,
    pub event_id: String,
    /// Registered handler name, e.g. `daily_sales_metrics`.
    pub handler: String,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl EventJob {
    /// Whether the job still wants a delivery attempt under `max_attempts`.
    pub fn wants_attempt(&self, max_attempts: i64) -> bool {
        self.status == JobStatus::Pending && self.attempts < max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cogs::{CostSource, FrozenCogs, FrozenCogsLine};
    use crate::money::Money;
    use chrono::Utc;

    #[test]
    fn test_order_created_payload_serializes_camel_case() {
        let event = OrderCreatedEvent {
            order_id: "o1".to_string(),
            order_number: "SI-20260105-0001".to_string(),
            tenant_id: "t1".to_string(),
            customer_id: None,
            subtotal_cents: 3000,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: 3000,
            items: vec![OrderCreatedItem {
                product_id: "p1".to_string(),
                quantity: 3,
                unit_price_cents: 1000,
                unit_cost_cents: 500,
            }],
            actor_id: "u1".to_string(),
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::Paid,
            frozen_cogs: FrozenCogs::freeze(
                vec![FrozenCogsLine::new(
                    "p1",
                    3,
                    Money::from_cents(500),
                    CostSource::AverageCost,
                )],
                Utc::now(),
            ),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"orderNumber\":\"SI-20260105-0001\""));
        assert!(json.contains("\"frozenCogs\""));

        let parsed: OrderCreatedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
