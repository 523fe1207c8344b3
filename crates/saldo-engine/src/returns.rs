//! # Return Engine
//!
//! Reverses sold goods back onto the shelf and unwinds the money trail,
//! all inside one transaction.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                 process_return (one transaction)                   │
//! │                                                                    │
//! │  1. load order + items, require the frozen COGS snapshot          │
//! │  2. per line: quantity within the returnable remainder            │
//! │  3. refund math: sale price (or override) out, frozen cost back   │
//! │  4. pick the posting period (shifted if the original closed)      │
//! │  5. restock at frozen unit cost                                   │
//! │  6. customer ledger: credit note, invoice remainder shrinks       │
//! │  7. journal: returns contra-revenue, fee income, COGS reversal    │
//! │  8. persist the return record, enqueue return.processed           │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Refund Routing
//! Walk-in refunds leave as cash. Customer refunds credit the account:
//! an unsettled invoice shrinks first, anything past it becomes advance
//! credit. Cash never leaves for a customer return.
//!
//! ## Cost Rule
//! Reversal always uses the frozen unit cost from the sale. Today's
//! average cost is irrelevant here.

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;

use saldo_core::customers::{
    apply_credit, settlement_status, CustomerTransactionKind, SettlementStatus, TransactionLine,
};
use saldo_core::events::{ReturnProcessedEvent, EVENT_RETURN_PROCESSED};
use saldo_core::returns::{return_line_amounts, return_totals, ReturnLineAmounts};
use saldo_core::validation::{validate_price_cents, validate_quantity, validate_tenant_id};
use saldo_core::{
    AccountRole, CoreError, CustomerTransaction, Money, MovementReason, OrderStatus, OutboxEvent,
    PostingBatch, ReturnItem, ReturnRecord, ReturnStatus, ValidationError,
};
use saldo_db::repository::new_id;
use saldo_db::{
    CustomerRepository, Database, DbError, InventoryRepository, JournalRepository, OrderRepository,
    OutboxRepository, ReturnRepository,
};

use crate::config::EngineConfig;
use crate::coordinator::{account_code, resolve_posting_period};
use crate::dispatcher::DispatcherHandle;
use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Request / Response Types
// =============================================================================

/// One line of a return request.
#[derive(Debug, Clone)]
pub struct ReturnItemRequest {
    pub order_item_id: String,
    pub quantity: i64,

    /// Refunds at this per-unit price instead of the sale price when set.
    pub refund_unit_price_override_cents: Option<i64>,
}

/// A return against one order.
#[derive(Debug, Clone)]
pub struct ReturnRequest {
    pub tenant_id: String,
    pub order_id: String,
    pub items: Vec<ReturnItemRequest>,

    /// Fee retained from the refund. Capped at the gross refund.
    pub restocking_fee_cents: i64,

    pub actor_id: String,
}

/// A committed return.
#[derive(Debug, Clone)]
pub struct ProcessedReturn {
    pub record: ReturnRecord,
    pub items: Vec<ReturnItem>,

    /// The ledger credit, when the original sale was on a customer
    /// account. None for walk-in cash refunds.
    pub credit_note: Option<CustomerTransaction>,
}

// =============================================================================
// Engine
// =============================================================================

/// Processes returns against completed orders.
pub struct ReturnEngine {
    db: Database,
    retry: RetryPolicy,
    dispatcher: Option<DispatcherHandle>,
}

impl ReturnEngine {
    pub fn new(db: Database, config: &EngineConfig) -> Self {
        ReturnEngine {
            db,
            retry: config.retry_policy(),
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(db: Database, config: &EngineConfig, dispatcher: DispatcherHandle) -> Self {
        ReturnEngine {
            db,
            retry: config.retry_policy(),
            dispatcher: Some(dispatcher),
        }
    }

    /// Commits a return.
    ///
    /// ## Returns
    /// The return record, its lines, and the credit note when one was
    /// issued.
    ///
    /// ## Errors
    /// * [`EngineError::ReturnAlreadyProcessed`] - a line exceeds what is
    ///   still returnable
    /// * [`EngineError::FrozenCogsMissing`] - the order has no COGS
    ///   snapshot; backfill it first
    /// * [`EngineError::PeriodLocked`] - both the original and the
    ///   current period are closed
    pub async fn process_return(&self, request: ReturnRequest) -> EngineResult<ProcessedReturn> {
        validate_return_shape(&request)?;

        let processed = self
            .retry
            .run("process_return", || self.try_process_return(&request))
            .await?;

        if let Some(handle) = &self.dispatcher {
            handle.nudge();
        }
        info!(
            return_id = %processed.record.id,
            order_id = %processed.record.order_id,
            refund_net_cents = processed.record.refund_net_cents,
            shifted_period = processed.record.is_after_period_close,
            "Return committed"
        );
        Ok(processed)
    }

    async fn try_process_return(&self, request: &ReturnRequest) -> EngineResult<ProcessedReturn> {
        let now = Utc::now();
        let tenant_id = &request.tenant_id;
        let mut uow = self.db.begin().await?;

        let order = OrderRepository::find(uow.conn(), tenant_id, &request.order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(CoreError::InvalidOrderStatus {
                order_id: request.order_id.clone(),
                current_status: order.status.as_str().to_string(),
            }
            .into());
        }
        let frozen = order
            .frozen_cogs
            .clone()
            .ok_or_else(|| EngineError::FrozenCogsMissing {
                order_id: request.order_id.clone(),
            })?;
        let order_items = OrderRepository::load_items(uow.conn(), &order.id).await?;

        // A line may appear more than once; the returnable check runs
        // against the summed quantity
        let mut requested: HashMap<&str, i64> = HashMap::new();
        for line in &request.items {
            if !order_items.iter().any(|i| i.id == line.order_item_id) {
                return Err(DbError::not_found("OrderItem", &line.order_item_id).into());
            }
            *requested.entry(line.order_item_id.as_str()).or_insert(0) += line.quantity;
        }
        for item in &order_items {
            let Some(total) = requested.get(item.id.as_str()).copied() else {
                continue;
            };
            let returnable = item.returnable_quantity();
            if total > returnable {
                return Err(EngineError::ReturnAlreadyProcessed {
                    order_id: request.order_id.clone(),
                    product_id: item.product_id.clone(),
                    requested: total,
                    returnable,
                });
            }
        }

        // Refund at sale price (or override), reverse at frozen cost
        let return_id = new_id();
        let mut line_amounts: Vec<ReturnLineAmounts> = Vec::with_capacity(request.items.len());
        let mut return_items: Vec<ReturnItem> = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let item = order_items
                .iter()
                .find(|i| i.id == line.order_item_id)
                .ok_or_else(|| DbError::not_found("OrderItem", &line.order_item_id))?;
            let frozen_line = frozen.line_for(&item.product_id).ok_or_else(|| {
                EngineError::FrozenCogsMissing {
                    order_id: request.order_id.clone(),
                }
            })?;
            let refund_unit_price = Money::from_cents(
                line.refund_unit_price_override_cents
                    .unwrap_or(item.unit_price_cents),
            );
            let amounts = return_line_amounts(
                refund_unit_price,
                frozen_line.unit_cost(),
                line.quantity,
            );
            return_items.push(ReturnItem {
                id: new_id(),
                return_id: return_id.clone(),
                order_item_id: item.id.clone(),
                product_id: item.product_id.clone(),
                quantity: line.quantity,
                refund_unit_price_cents: refund_unit_price.cents(),
                refund_total_cents: amounts.refund.cents(),
                frozen_unit_cost_cents: frozen_line.unit_cost_cents,
                cogs_reversal_cents: amounts.cogs_reversal.cents(),
            });
            line_amounts.push(amounts);
        }
        let totals = return_totals(&line_amounts, Money::from_cents(request.restocking_fee_cents));

        let (posting_period, is_after_period_close) =
            resolve_posting_period(uow.conn(), tenant_id, &order.period, now).await?;

        // Goods back on the shelf at the cost they left with
        for item in &return_items {
            InventoryRepository::restock(
                uow.conn(),
                tenant_id,
                &item.product_id,
                item.quantity,
                item.frozen_unit_cost(),
                MovementReason::Return,
                Some(&return_id),
                &request.actor_id,
            )
            .await?;
        }
        for line in &request.items {
            OrderRepository::add_returned_quantity(uow.conn(), &line.order_item_id, line.quantity)
                .await?;
        }
        let fully_returned = order_items.iter().all(|item| {
            let now_returned = requested.get(item.id.as_str()).copied().unwrap_or(0);
            item.returned_quantity + now_returned == item.quantity
        });

        // Customer ledger: the credit drains the unsettled invoice first,
        // the rest becomes advance credit
        let mut credit_note = None;
        if let Some(customer_id) = order.customer_id.clone() {
            let invoice = CustomerRepository::invoice_for_order(uow.conn(), tenant_id, &order.id)
                .await?
                .ok_or_else(|| EngineError::OriginalInvoiceMissing {
                    order_id: order.id.clone(),
                })?;

            if totals.refund_net.is_positive() {
                let fresh = CustomerRepository::find(uow.conn(), tenant_id, &customer_id).await?;
                let change = apply_credit(fresh.balances(), totals.refund_net);
                CustomerRepository::update_balances(
                    uow.conn(),
                    tenant_id,
                    &customer_id,
                    fresh.version,
                    change.after,
                )
                .await?;

                let lines = return_items
                    .iter()
                    .map(|item| {
                        let name = order_items
                            .iter()
                            .find(|i| i.id == item.order_item_id)
                            .map(|i| i.name_snapshot.clone())
                            .unwrap_or_else(|| item.product_id.clone());
                        TransactionLine {
                            description: name,
                            quantity: item.quantity,
                            amount_cents: item.refund_total_cents,
                        }
                    })
                    .collect();
                let note = CustomerTransaction {
                    id: new_id(),
                    tenant_id: tenant_id.clone(),
                    customer_id: customer_id.clone(),
                    kind: CustomerTransactionKind::CreditNote,
                    amount_cents: totals.refund_net.cents(),
                    pending_before_cents: change.before.pending.cents(),
                    advance_before_cents: change.before.advance.cents(),
                    pending_after_cents: change.after.pending.cents(),
                    advance_after_cents: change.after.advance.cents(),
                    remaining_cents: 0,
                    status: SettlementStatus::Settled,
                    lines,
                    reference_type: Some("return".to_string()),
                    reference_id: Some(return_id.clone()),
                    notes: Some(format!("Return against {}", order.order_number)),
                    created_at: now,
                };
                CustomerRepository::insert_transaction(uow.conn(), &note).await?;
                credit_note = Some(note);
            }

            if fully_returned {
                CustomerRepository::settle_invoice(
                    uow.conn(),
                    tenant_id,
                    &invoice.id,
                    Money::zero(),
                    SettlementStatus::Reversed,
                )
                .await?;
            } else {
                let new_remaining = Money::from_cents(
                    (invoice.remaining().cents() - totals.refund_net.cents()).max(0),
                );
                CustomerRepository::settle_invoice(
                    uow.conn(),
                    tenant_id,
                    &invoice.id,
                    new_remaining,
                    settlement_status(invoice.amount(), new_remaining),
                )
                .await?;
            }
        }

        if fully_returned {
            OrderRepository::update_status(
                uow.conn(),
                tenant_id,
                &order.id,
                order.version,
                OrderStatus::Returned,
            )
            .await?;
        }

        // Contra-revenue for the gross, fee kept as other income, the
        // net leaves as cash or comes off the receivable
        let sales_returns = account_code(uow.conn(), tenant_id, AccountRole::SalesReturns).await?;
        let other_income = account_code(uow.conn(), tenant_id, AccountRole::OtherIncome).await?;
        let cogs = account_code(uow.conn(), tenant_id, AccountRole::CostOfGoodsSold).await?;
        let inventory = account_code(uow.conn(), tenant_id, AccountRole::Inventory).await?;
        let refund_account = if order.customer_id.is_some() {
            account_code(uow.conn(), tenant_id, AccountRole::AccountsReceivable).await?
        } else {
            account_code(uow.conn(), tenant_id, AccountRole::Cash).await?
        };

        let note = format!("Return against {}", order.order_number);
        let batch = PostingBatch::new()
            .debit(sales_returns.as_str(), totals.refund_gross, note.as_str())
            .credit(refund_account.as_str(), totals.refund_net, note.as_str())
            .credit(other_income.as_str(), totals.restocking_fee, note.as_str())
            .debit(inventory.as_str(), totals.cogs_reversal, note.as_str())
            .credit(cogs.as_str(), totals.cogs_reversal, note.as_str());
        batch.validate()?;
        JournalRepository::post(
            uow.conn(),
            tenant_id,
            &batch,
            Some("return"),
            Some(&return_id),
            &posting_period,
            now,
        )
        .await?;

        let record = ReturnRecord {
            id: return_id.clone(),
            tenant_id: tenant_id.clone(),
            order_id: order.id.clone(),
            credit_note_id: credit_note.as_ref().map(|n| n.id.clone()),
            status: ReturnStatus::Completed,
            refund_gross_cents: totals.refund_gross.cents(),
            restocking_fee_cents: totals.restocking_fee.cents(),
            refund_net_cents: totals.refund_net.cents(),
            cogs_reversal_cents: totals.cogs_reversal.cents(),
            is_after_period_close,
            period: posting_period,
            actor_id: request.actor_id.clone(),
            created_at: now,
        };
        ReturnRepository::insert(uow.conn(), &record, &return_items).await?;

        let event = ReturnProcessedEvent {
            return_id: return_id.clone(),
            order_id: order.id.clone(),
            order_number: order.order_number.clone(),
            tenant_id: tenant_id.clone(),
            customer_id: order.customer_id.clone(),
            refund_net_cents: totals.refund_net.cents(),
            cogs_reversal_cents: totals.cogs_reversal.cents(),
            is_after_period_close,
        };
        let outbox_event = OutboxEvent {
            id: new_id(),
            tenant_id: tenant_id.clone(),
            event_type: EVENT_RETURN_PROCESSED.to_string(),
            entity_id: return_id,
            payload: serde_json::to_string(&event)?,
            created_at: now,
            dispatched_at: None,
        };
        OutboxRepository::enqueue(uow.conn(), &outbox_event).await?;

        uow.commit().await?;

        Ok(ProcessedReturn {
            record,
            items: return_items,
            credit_note,
        })
    }
}

fn validate_return_shape(request: &ReturnRequest) -> EngineResult<()> {
    validate_tenant_id(&request.tenant_id).map_err(CoreError::from)?;
    if request.actor_id.trim().is_empty() {
        return Err(CoreError::Validation(ValidationError::Required {
            field: "actor_id".to_string(),
        })
        .into());
    }
    if request.items.is_empty() {
        return Err(CoreError::Validation(ValidationError::Required {
            field: "items".to_string(),
        })
        .into());
    }
    validate_price_cents(request.restocking_fee_cents).map_err(CoreError::from)?;
    for line in &request.items {
        validate_quantity(line.quantity).map_err(CoreError::from)?;
        if let Some(cents) = line.refund_unit_price_override_cents {
            validate_price_cents(cents).map_err(CoreError::from)?;
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cogs::CogsFreezer;
    use crate::coordinator::{
        CreateOrderRequest, OrderCoordinator, OrderItemRequest, SalePayment,
    };
    use saldo_core::{Customer, PaymentMethod, Product, DEFAULT_TENANT_ID};
    use saldo_db::{DbConfig, ProductRepository};

    const TENANT: &str = DEFAULT_TENANT_ID;

    async fn test_db() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut uow = db.begin().await.unwrap();
        JournalRepository::install_default_chart(uow.conn(), TENANT)
            .await
            .unwrap();
        uow.commit().await.unwrap();
        db
    }

    async fn seed_catalog(db: &Database) {
        let now = Utc::now();
        let product = Product {
            id: "p1".to_string(),
            tenant_id: TENANT.to_string(),
            sku: "SKU-p1".to_string(),
            name: "Product p1".to_string(),
            price_cents: 1000,
            list_cost_cents: Some(450),
            tax_rate_bps: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let mut uow = db.begin().await.unwrap();
        ProductRepository::insert(uow.conn(), &product).await.unwrap();
        InventoryRepository::restock(
            uow.conn(),
            TENANT,
            "p1",
            10,
            Money::from_cents(500),
            MovementReason::Purchase,
            None,
            "seed",
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();
    }

    async fn seed_customer(db: &Database) {
        let now = Utc::now();
        let customer = Customer {
            id: "c1".to_string(),
            tenant_id: TENANT.to_string(),
            name: "Customer c1".to_string(),
            phone: None,
            pending_balance_cents: 0,
            advance_balance_cents: 0,
            credit_limit_cents: 1_000_000,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let mut uow = db.begin().await.unwrap();
        CustomerRepository::insert(uow.conn(), &customer).await.unwrap();
        uow.commit().await.unwrap();
    }

    async fn sell(db: &Database, customer_id: Option<&str>, quantity: i64, paid_cents: i64) -> (String, String) {
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());
        let completed = coordinator
            .create_order(CreateOrderRequest {
                tenant_id: TENANT.to_string(),
                customer_id: customer_id.map(str::to_string),
                items: vec![OrderItemRequest {
                    product_id: "p1".to_string(),
                    quantity,
                    unit_price_override_cents: None,
                    discount_bps: 0,
                }],
                payment: SalePayment {
                    method: PaymentMethod::Cash,
                    amount_cents: paid_cents,
                },
                tax_exempt: false,
                actor_id: "cashier-1".to_string(),
            })
            .await
            .unwrap();
        (completed.order.id, completed.items[0].id.clone())
    }

    fn return_all(order_id: &str, order_item_id: &str, quantity: i64) -> ReturnRequest {
        ReturnRequest {
            tenant_id: TENANT.to_string(),
            order_id: order_id.to_string(),
            items: vec![ReturnItemRequest {
                order_item_id: order_item_id.to_string(),
                quantity,
                refund_unit_price_override_cents: None,
            }],
            restocking_fee_cents: 0,
            actor_id: "cashier-1".to_string(),
        }
    }

    async fn on_hand(db: &Database) -> i64 {
        db.inventory()
            .level(TENANT, "p1")
            .await
            .unwrap()
            .map(|l| l.on_hand)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_full_return_restores_stock_and_reverses_everything() {
        let db = test_db().await;
        seed_catalog(&db).await;
        seed_customer(&db).await;
        let (order_id, item_id) = sell(&db, Some("c1"), 3, 0).await;
        assert_eq!(on_hand(&db).await, 7);

        let engine = ReturnEngine::new(db.clone(), &EngineConfig::default());
        let processed = engine.process_return(return_all(&order_id, &item_id, 3)).await.unwrap();

        assert_eq!(processed.record.refund_gross_cents, 3000);
        assert_eq!(processed.record.refund_net_cents, 3000);
        assert_eq!(processed.record.cogs_reversal_cents, 1500);
        assert!(!processed.record.is_after_period_close);
        assert_eq!(on_hand(&db).await, 10);

        // Invoice reversed, pending released, order marked returned
        let customer = db.customers().get_by_id(TENANT, "c1").await.unwrap().unwrap();
        assert_eq!(customer.pending_balance_cents, 0);
        let order = db.orders().get_by_id(TENANT, &order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Returned);
        let transactions = db.customers().transactions(TENANT, "c1", 10).await.unwrap();
        let invoice = transactions
            .iter()
            .find(|t| t.kind == CustomerTransactionKind::Invoice)
            .unwrap();
        assert_eq!(invoice.status, SettlementStatus::Reversed);

        let entries = db
            .journal()
            .entries_for_reference(TENANT, "return", &processed.record.id)
            .await
            .unwrap();
        let debits: i64 = entries.iter().map(|e| e.debit_cents).sum();
        let credits: i64 = entries.iter().map(|e| e.credit_cents).sum();
        assert_eq!(debits, 4500);
        assert_eq!(debits, credits);
        assert!(entries
            .iter()
            .any(|e| e.account_code == "4050" && e.debit_cents == 3000));
        assert!(entries
            .iter()
            .any(|e| e.account_code == "1100" && e.credit_cents == 3000));
    }

    #[tokio::test]
    async fn test_partial_return_keeps_fee_as_other_income() {
        let db = test_db().await;
        seed_catalog(&db).await;
        seed_customer(&db).await;
        let (order_id, item_id) = sell(&db, Some("c1"), 3, 0).await;

        let engine = ReturnEngine::new(db.clone(), &EngineConfig::default());
        let mut request = return_all(&order_id, &item_id, 1);
        request.restocking_fee_cents = 100;
        let processed = engine.process_return(request).await.unwrap();

        assert_eq!(processed.record.refund_gross_cents, 1000);
        assert_eq!(processed.record.restocking_fee_cents, 100);
        assert_eq!(processed.record.refund_net_cents, 900);
        assert_eq!(on_hand(&db).await, 8);

        let order = db.orders().get_by_id(TENANT, &order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);

        // 3000 invoiced, 900 credited back
        let customer = db.customers().get_by_id(TENANT, "c1").await.unwrap().unwrap();
        assert_eq!(customer.pending_balance_cents, 2100);
        let transactions = db.customers().transactions(TENANT, "c1", 10).await.unwrap();
        let invoice = transactions
            .iter()
            .find(|t| t.kind == CustomerTransactionKind::Invoice)
            .unwrap();
        assert_eq!(invoice.remaining_cents, 2100);
        assert_eq!(invoice.status, SettlementStatus::Partial);

        let entries = db
            .journal()
            .entries_for_reference(TENANT, "return", &processed.record.id)
            .await
            .unwrap();
        assert!(entries
            .iter()
            .any(|e| e.account_code == "4900" && e.credit_cents == 100));
    }

    #[tokio::test]
    async fn test_walk_in_refund_leaves_as_cash() {
        let db = test_db().await;
        seed_catalog(&db).await;
        let (order_id, item_id) = sell(&db, None, 2, 2000).await;

        let engine = ReturnEngine::new(db.clone(), &EngineConfig::default());
        let processed = engine.process_return(return_all(&order_id, &item_id, 1)).await.unwrap();

        assert!(processed.credit_note.is_none());
        assert!(processed.record.credit_note_id.is_none());

        let entries = db
            .journal()
            .entries_for_reference(TENANT, "return", &processed.record.id)
            .await
            .unwrap();
        assert!(entries
            .iter()
            .any(|e| e.account_code == "1000" && e.credit_cents == 1000));
    }

    #[tokio::test]
    async fn test_return_cannot_exceed_returnable_quantity() {
        let db = test_db().await;
        seed_catalog(&db).await;
        let (order_id, item_id) = sell(&db, None, 3, 3000).await;

        let engine = ReturnEngine::new(db.clone(), &EngineConfig::default());
        engine.process_return(return_all(&order_id, &item_id, 2)).await.unwrap();

        // Only one unit left to return
        let result = engine.process_return(return_all(&order_id, &item_id, 2)).await;
        assert!(matches!(
            result,
            Err(EngineError::ReturnAlreadyProcessed {
                requested: 2,
                returnable: 1,
                ..
            })
        ));

        // Split lines for the same item are summed before the check
        let mut split = return_all(&order_id, &item_id, 1);
        split.items.push(ReturnItemRequest {
            order_item_id: item_id.clone(),
            quantity: 1,
            refund_unit_price_override_cents: None,
        });
        let result = engine.process_return(split).await;
        assert!(matches!(
            result,
            Err(EngineError::ReturnAlreadyProcessed { requested: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_second_full_return_is_rejected() {
        let db = test_db().await;
        seed_catalog(&db).await;
        let (order_id, item_id) = sell(&db, None, 2, 2000).await;

        let engine = ReturnEngine::new(db.clone(), &EngineConfig::default());
        engine.process_return(return_all(&order_id, &item_id, 2)).await.unwrap();

        let result = engine.process_return(return_all(&order_id, &item_id, 1)).await;
        assert!(matches!(
            result,
            Err(EngineError::ReturnAlreadyProcessed { returnable: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_return_on_cancelled_order_is_rejected() {
        let db = test_db().await;
        seed_catalog(&db).await;
        let (order_id, item_id) = sell(&db, None, 2, 2000).await;

        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());
        coordinator.cancel_order(TENANT, &order_id, "manager-1").await.unwrap();

        let engine = ReturnEngine::new(db.clone(), &EngineConfig::default());
        let result = engine.process_return(return_all(&order_id, &item_id, 1)).await;
        assert!(matches!(
            result,
            Err(EngineError::Core(CoreError::InvalidOrderStatus { .. }))
        ));
    }

    #[tokio::test]
    async fn test_return_after_period_close_shifts_postings() {
        let db = test_db().await;
        seed_catalog(&db).await;
        let (order_id, item_id) = sell(&db, None, 2, 2000).await;

        // Age the sale into a prior period and close it
        sqlx::query("UPDATE orders SET period = '2026-07' WHERE id = ?1")
            .bind(&order_id)
            .execute(db.pool())
            .await
            .unwrap();
        {
            let mut uow = db.begin().await.unwrap();
            JournalRepository::close_period(uow.conn(), TENANT, "2026-07", "manager-1", Utc::now())
                .await
                .unwrap();
            uow.commit().await.unwrap();
        }

        let engine = ReturnEngine::new(db.clone(), &EngineConfig::default());
        let processed = engine.process_return(return_all(&order_id, &item_id, 1)).await.unwrap();

        assert!(processed.record.is_after_period_close);
        assert_ne!(processed.record.period, "2026-07");

        let entries = db
            .journal()
            .entries_for_reference(TENANT, "return", &processed.record.id)
            .await
            .unwrap();
        assert!(entries.iter().all(|e| e.period == processed.record.period));
    }

    #[tokio::test]
    async fn test_missing_snapshot_blocks_until_backfilled() {
        let db = test_db().await;
        seed_catalog(&db).await;
        let (order_id, item_id) = sell(&db, None, 2, 2000).await;

        // Simulate a legacy order that predates freezing
        sqlx::query("UPDATE orders SET frozen_cogs = NULL WHERE id = ?1")
            .bind(&order_id)
            .execute(db.pool())
            .await
            .unwrap();

        let engine = ReturnEngine::new(db.clone(), &EngineConfig::default());
        let result = engine.process_return(return_all(&order_id, &item_id, 1)).await;
        assert!(matches!(result, Err(EngineError::FrozenCogsMissing { .. })));

        let freezer = CogsFreezer::new(db.clone(), crate::retry::RetryPolicy::default());
        let snapshot = freezer.backfill(TENANT, &order_id).await.unwrap();
        assert!(snapshot.is_estimated);
        assert!(snapshot.is_backfilled);

        let processed = engine.process_return(return_all(&order_id, &item_id, 1)).await.unwrap();
        // Reversal at the backfilled (current average) cost
        assert_eq!(processed.record.cogs_reversal_cents, 500);
    }
}
