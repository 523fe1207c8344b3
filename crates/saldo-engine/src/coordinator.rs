//! # Order Coordinator
//!
//! Drives every money-touching operation through one strictly ordered,
//! all-or-nothing transaction.
//!
//! ## Sale Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      create_order (one transaction)                     │
//! │                                                                         │
//! │  Pre-validation (no writes):                                           │
//! │    products exist and are active · customer exists · period open       │
//! │    credit limit covers the unpaid portion · payment shape is sane      │
//! │                                                                         │
//! │  Inside the unit of work, in this order:                               │
//! │    1. re-read stock per product          (race guard)                  │
//! │    2. freeze COGS per line               (cost chain)                  │
//! │    3. reserve the order number           (per-tenant daily counter)    │
//! │    4. insert order + items                                             │
//! │    5. decrement inventory per line       (guarded update)              │
//! │    6. customer ledger: invoice, payment                                │
//! │    7. post the journal batch             (debits == credits)           │
//! │    8. enqueue order.created              (transactional outbox)        │
//! │    9. commit, then nudge the dispatcher                                │
//! │                                                                         │
//! │  Any failure before 9 rolls back every step, the order number          │
//! │  counter included.                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A version conflict or `SQLITE_BUSY` anywhere in the pipeline re-runs
//! the whole attempt (validation included) under the retry policy.
//! Business rejections fail immediately and permanently.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::info;

use saldo_core::customers::{
    apply_credit, apply_invoice, apply_payment, check_credit_limit, settlement_status,
    CustomerTransactionKind, SettlementStatus, TransactionLine,
};
use saldo_core::events::{OrderCreatedEvent, OrderCreatedItem, EVENT_ORDER_CREATED};
use saldo_core::journal::period_for;
use saldo_core::orders::{payment_status_for, price_line, price_order};
use saldo_core::validation::{
    validate_bps, validate_order_size, validate_payment_cents, validate_price_cents,
    validate_quantity, validate_tenant_id,
};
use saldo_core::{
    AccountRole, CoreError, CustomerTransaction, FrozenCogs, InventoryLevel, Money, MovementReason,
    Order, OrderItem, OrderStatus, OutboxEvent, PaymentMethod, PostingBatch, TaxRate,
    ValidationError,
};
use saldo_db::repository::new_id;
use saldo_db::{
    CustomerRepository, Database, DecrementOutcome, InventoryRepository, JournalRepository,
    OrderRepository, OutboxRepository, ProductRepository, ProfitSummary,
};

use crate::cogs::CogsFreezer;
use crate::config::EngineConfig;
use crate::dispatcher::DispatcherHandle;
use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Request / Response Types
// =============================================================================

/// One requested line of a sale.
#[derive(Debug, Clone)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub quantity: i64,

    /// Overrides the catalog price for this line when set.
    pub unit_price_override_cents: Option<i64>,

    /// Line discount in basis points (10000 = 100%).
    pub discount_bps: u32,
}

/// Payment tendered with a sale.
#[derive(Debug, Clone, Copy)]
pub struct SalePayment {
    pub method: PaymentMethod,
    pub amount_cents: i64,
}

/// A complete sale request.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub tenant_id: String,

    /// None for walk-in sales, which must be paid in full.
    pub customer_id: Option<String>,

    pub items: Vec<OrderItemRequest>,
    pub payment: SalePayment,

    /// Zeroes every line's tax when set.
    pub tax_exempt: bool,

    pub actor_id: String,
}

/// A standalone customer payment, outside any sale.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub tenant_id: String,
    pub customer_id: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub actor_id: String,
}

/// A priced stock receipt.
#[derive(Debug, Clone)]
pub struct ReceiveStockRequest {
    pub tenant_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost_cents: i64,
    pub actor_id: String,
}

/// A committed sale: the order row plus its item rows.
#[derive(Debug, Clone)]
pub struct CompletedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Orchestrates sales, payments, cancellations and stock receipts.
///
/// Holds the database and retry policy by value; cloning the pool is
/// cheap and every public method takes `&self`, so one coordinator can
/// serve concurrent callers.
pub struct OrderCoordinator {
    db: Database,
    retry: RetryPolicy,
    dispatcher: Option<DispatcherHandle>,
}

impl OrderCoordinator {
    /// Creates a coordinator without a dispatcher attached. Outbox events
    /// still enqueue; they wait for the next dispatcher poll.
    pub fn new(db: Database, config: &EngineConfig) -> Self {
        OrderCoordinator {
            db,
            retry: config.retry_policy(),
            dispatcher: None,
        }
    }

    /// Creates a coordinator whose commits nudge the dispatcher awake.
    pub fn with_dispatcher(
        db: Database,
        config: &EngineConfig,
        dispatcher: DispatcherHandle,
    ) -> Self {
        OrderCoordinator {
            db,
            retry: config.retry_policy(),
            dispatcher: Some(dispatcher),
        }
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Commits a sale.
    ///
    /// ## Returns
    /// The persisted order and its items, costs frozen and books posted.
    ///
    /// ## Errors
    /// * [`CoreError::InsufficientStock`] - a line exceeds available stock
    /// * [`CoreError::CreditLimitExceeded`] - the unpaid portion would
    ///   push the customer past their limit
    /// * [`EngineError::PeriodLocked`] - the current period is closed
    /// * [`EngineError::ConcurrencyConflict`] - retries exhausted
    pub async fn create_order(&self, request: CreateOrderRequest) -> EngineResult<CompletedOrder> {
        validate_sale_shape(&request)?;

        let completed = self
            .retry
            .run("create_order", || self.try_create_order(&request))
            .await?;

        self.nudge_dispatcher();
        info!(
            order_number = %completed.order.order_number,
            total_cents = completed.order.total_cents,
            items = completed.items.len(),
            "Order committed"
        );
        Ok(completed)
    }

    /// One complete sale attempt. Everything re-runs on retry so a
    /// second attempt prices and checks against fresh state.
    async fn try_create_order(&self, request: &CreateOrderRequest) -> EngineResult<CompletedOrder> {
        let now = Utc::now();
        let tenant_id = &request.tenant_id;

        // Pre-validation reads, before any write
        let mut products = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = self
                .db
                .products()
                .get_by_id(tenant_id, &item.product_id)
                .await?
                .filter(|p| p.is_active)
                .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;
            products.push(product);
        }

        let customer = match &request.customer_id {
            Some(id) => Some(
                self.db
                    .customers()
                    .get_by_id(tenant_id, id)
                    .await?
                    .filter(|c| c.is_active)
                    .ok_or_else(|| CoreError::CustomerNotFound(id.clone()))?,
            ),
            None => None,
        };

        let period = period_for(now);
        if let Some(p) = self.db.journal().period(tenant_id, &period).await? {
            if p.is_closed() {
                return Err(EngineError::PeriodLocked { period });
            }
        }

        // Price every line against the catalog (or its override)
        let mut line_pricings = Vec::with_capacity(request.items.len());
        for (item, product) in request.items.iter().zip(&products) {
            let unit_price =
                Money::from_cents(item.unit_price_override_cents.unwrap_or(product.price_cents));
            let tax_rate = if request.tax_exempt {
                TaxRate::zero()
            } else {
                TaxRate::from_bps(product.tax_rate_bps)
            };
            line_pricings.push(price_line(
                unit_price,
                item.quantity,
                item.discount_bps,
                tax_rate,
            ));
        }
        let pricing = price_order(&line_pricings);

        // Walk-ins settle at the register: excess cash is change, not
        // credit, and an unpaid remainder has no ledger to live on
        let tendered = Money::from_cents(request.payment.amount_cents);
        let amount_paid = match &customer {
            None => {
                if tendered.cents() < pricing.total.cents() {
                    return Err(CoreError::InvalidPaymentAmount {
                        reason: "walk-in sales must be paid in full".to_string(),
                    }
                    .into());
                }
                pricing.total
            }
            Some(_) => tendered,
        };
        let unpaid = if amount_paid.cents() >= pricing.total.cents() {
            Money::zero()
        } else {
            pricing.total - amount_paid
        };

        // Credit check on the unpaid portion only
        if let Some(customer) = &customer {
            if unpaid.is_positive() {
                check_credit_limit(customer.balances(), customer.credit_limit(), unpaid).map_err(
                    |detail| CoreError::CreditLimitExceeded {
                        customer_id: customer.id.clone(),
                        detail,
                    },
                )?;
            }
        }

        let mut uow = self.db.begin().await?;

        // 1. Re-read stock inside the transaction; a product may span
        //    several lines, so availability is checked per product
        let mut levels: HashMap<String, Option<InventoryLevel>> = HashMap::new();
        for item in &request.items {
            if !levels.contains_key(&item.product_id) {
                let level =
                    InventoryRepository::level_for_update(uow.conn(), tenant_id, &item.product_id)
                        .await?;
                levels.insert(item.product_id.clone(), level);
            }
        }
        let mut required: HashMap<&str, i64> = HashMap::new();
        for item in &request.items {
            *required.entry(item.product_id.as_str()).or_insert(0) += item.quantity;
        }
        for item in &request.items {
            let Some(requested) = required.remove(item.product_id.as_str()) else {
                continue;
            };
            let available = levels[&item.product_id]
                .as_ref()
                .map(|l| l.available())
                .unwrap_or(0);
            if available < requested {
                return Err(CoreError::InsufficientStock {
                    product_id: item.product_id.clone(),
                    available,
                    requested,
                }
                .into());
            }
        }

        // 2. Freeze COGS per line
        let mut frozen_lines = Vec::with_capacity(request.items.len());
        for (item, product) in request.items.iter().zip(&products) {
            let level = levels[&item.product_id].as_ref();
            frozen_lines.push(CogsFreezer::freeze_line(level, product, item.quantity)?);
        }
        let frozen = FrozenCogs::freeze(frozen_lines, now);

        // 3. Reserve the order number
        let order_number =
            OrderRepository::next_order_number(uow.conn(), tenant_id, now.date_naive()).await?;

        // 4. Insert the order and its items
        let order_id = new_id();
        let order = Order {
            id: order_id.clone(),
            tenant_id: tenant_id.clone(),
            order_number,
            customer_id: request.customer_id.clone(),
            status: OrderStatus::Completed,
            subtotal_cents: pricing.subtotal.cents(),
            discount_cents: pricing.discount.cents(),
            tax_cents: pricing.tax.cents(),
            total_cents: pricing.total.cents(),
            payment_method: request.payment.method,
            amount_paid_cents: amount_paid.cents(),
            payment_status: payment_status_for(pricing.total, amount_paid),
            frozen_cogs: Some(frozen.clone()),
            period: period.clone(),
            actor_id: request.actor_id.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut items = Vec::with_capacity(request.items.len());
        for (((req_item, product), line), frozen_line) in request
            .items
            .iter()
            .zip(&products)
            .zip(&line_pricings)
            .zip(&frozen.lines)
        {
            items.push(OrderItem {
                id: new_id(),
                order_id: order_id.clone(),
                product_id: req_item.product_id.clone(),
                sku_snapshot: product.sku.clone(),
                name_snapshot: product.name.clone(),
                quantity: req_item.quantity,
                unit_price_cents: req_item
                    .unit_price_override_cents
                    .unwrap_or(product.price_cents),
                discount_bps: req_item.discount_bps,
                tax_rate_bps: if request.tax_exempt {
                    0
                } else {
                    product.tax_rate_bps
                },
                unit_cost_cents: frozen_line.unit_cost_cents,
                line_subtotal_cents: line.subtotal.cents(),
                line_discount_cents: line.discount.cents(),
                line_tax_cents: line.tax.cents(),
                line_total_cents: line.total.cents(),
                returned_quantity: 0,
                created_at: now,
            });
        }
        OrderRepository::insert(uow.conn(), &order, &items).await?;

        // 5. Decrement inventory per line; the update re-checks
        //    availability under the write lock
        for item in &items {
            let outcome = InventoryRepository::reserve_and_decrement(
                uow.conn(),
                tenant_id,
                &item.product_id,
                item.quantity,
                MovementReason::Sale,
                Some(&order_id),
                &request.actor_id,
            )
            .await?;
            if let DecrementOutcome::Insufficient { available } = outcome {
                return Err(CoreError::InsufficientStock {
                    product_id: item.product_id.clone(),
                    available,
                    requested: item.quantity,
                }
                .into());
            }
        }

        // 6. Customer ledger: invoice the full amount, then apply any
        //    payment against it
        if let Some(customer) = &customer {
            let fresh = CustomerRepository::find(uow.conn(), tenant_id, &customer.id).await?;
            let mut version = fresh.version;

            let invoice_change = apply_invoice(fresh.balances(), pricing.total);
            CustomerRepository::update_balances(
                uow.conn(),
                tenant_id,
                &customer.id,
                version,
                invoice_change.after,
            )
            .await?;
            version += 1;

            let lines = items
                .iter()
                .map(|i| TransactionLine {
                    description: i.name_snapshot.clone(),
                    quantity: i.quantity,
                    amount_cents: i.line_total_cents,
                })
                .collect();
            let invoice = CustomerTransaction {
                id: new_id(),
                tenant_id: tenant_id.clone(),
                customer_id: customer.id.clone(),
                kind: CustomerTransactionKind::Invoice,
                amount_cents: pricing.total.cents(),
                pending_before_cents: invoice_change.before.pending.cents(),
                advance_before_cents: invoice_change.before.advance.cents(),
                pending_after_cents: invoice_change.after.pending.cents(),
                advance_after_cents: invoice_change.after.advance.cents(),
                remaining_cents: unpaid.cents(),
                status: settlement_status(pricing.total, unpaid),
                lines,
                reference_type: Some("order".to_string()),
                reference_id: Some(order_id.clone()),
                notes: None,
                created_at: now,
            };
            CustomerRepository::insert_transaction(uow.conn(), &invoice).await?;

            if amount_paid.is_positive() {
                let payment_change = apply_payment(invoice_change.after, amount_paid);
                CustomerRepository::update_balances(
                    uow.conn(),
                    tenant_id,
                    &customer.id,
                    version,
                    payment_change.after,
                )
                .await?;

                let payment = CustomerTransaction {
                    id: new_id(),
                    tenant_id: tenant_id.clone(),
                    customer_id: customer.id.clone(),
                    kind: CustomerTransactionKind::Payment,
                    amount_cents: amount_paid.cents(),
                    pending_before_cents: payment_change.before.pending.cents(),
                    advance_before_cents: payment_change.before.advance.cents(),
                    pending_after_cents: payment_change.after.pending.cents(),
                    advance_after_cents: payment_change.after.advance.cents(),
                    remaining_cents: 0,
                    status: SettlementStatus::Settled,
                    lines: Vec::new(),
                    reference_type: Some("order".to_string()),
                    reference_id: Some(order_id.clone()),
                    notes: None,
                    created_at: now,
                };
                CustomerRepository::insert_transaction(uow.conn(), &payment).await?;
            }
        }

        // 7. Journal batch. Cash for what was received, receivable for
        //    the unpaid remainder, receivable credit for any overpayment
        //    (mirroring the advance balance), revenue for the total, and
        //    the COGS pair at frozen cost
        let cash = account_code(uow.conn(), tenant_id, AccountRole::Cash).await?;
        let receivable =
            account_code(uow.conn(), tenant_id, AccountRole::AccountsReceivable).await?;
        let revenue = account_code(uow.conn(), tenant_id, AccountRole::SalesRevenue).await?;
        let cogs = account_code(uow.conn(), tenant_id, AccountRole::CostOfGoodsSold).await?;
        let inventory = account_code(uow.conn(), tenant_id, AccountRole::Inventory).await?;

        let excess = if amount_paid.cents() > pricing.total.cents() {
            amount_paid - pricing.total
        } else {
            Money::zero()
        };
        let sale_note = format!("Sale {}", order.order_number);
        let cogs_note = format!("COGS {}", order.order_number);
        let batch = PostingBatch::new()
            .debit(cash.as_str(), amount_paid, sale_note.as_str())
            .debit(receivable.as_str(), unpaid, sale_note.as_str())
            .credit(revenue.as_str(), pricing.total, sale_note.as_str())
            .credit(receivable.as_str(), excess, sale_note.as_str())
            .debit(cogs.as_str(), frozen.total_cost(), cogs_note.as_str())
            .credit(inventory.as_str(), frozen.total_cost(), cogs_note.as_str());
        batch.validate()?;
        JournalRepository::post(
            uow.conn(),
            tenant_id,
            &batch,
            Some("order"),
            Some(&order_id),
            &period,
            now,
        )
        .await?;

        // 8. Enqueue order.created in the same transaction
        let event = OrderCreatedEvent {
            order_id: order_id.clone(),
            order_number: order.order_number.clone(),
            tenant_id: tenant_id.clone(),
            customer_id: request.customer_id.clone(),
            subtotal_cents: pricing.subtotal.cents(),
            discount_cents: pricing.discount.cents(),
            tax_cents: pricing.tax.cents(),
            total_cents: pricing.total.cents(),
            items: items
                .iter()
                .map(|i| OrderCreatedItem {
                    product_id: i.product_id.clone(),
                    quantity: i.quantity,
                    unit_price_cents: i.unit_price_cents,
                    unit_cost_cents: i.unit_cost_cents,
                })
                .collect(),
            actor_id: request.actor_id.clone(),
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            frozen_cogs: frozen.clone(),
        };
        let outbox_event = OutboxEvent {
            id: new_id(),
            tenant_id: tenant_id.clone(),
            event_type: EVENT_ORDER_CREATED.to_string(),
            entity_id: order_id.clone(),
            payload: serde_json::to_string(&event)?,
            created_at: now,
            dispatched_at: None,
        };
        OutboxRepository::enqueue(uow.conn(), &outbox_event).await?;

        // 9. Commit
        uow.commit().await?;

        Ok(CompletedOrder { order, items })
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Cancels a completed order: stock returns at frozen cost, the
    /// receivable reverses, paid money refunds in cash, and every sale
    /// posting gets its mirror entry.
    ///
    /// Advance credit from an overpaid sale stays on the customer's
    /// account. Orders with partial returns cannot be cancelled; process
    /// the remainder as a return instead.
    pub async fn cancel_order(
        &self,
        tenant_id: &str,
        order_id: &str,
        actor_id: &str,
    ) -> EngineResult<Order> {
        require_actor(actor_id)?;
        let order = self
            .retry
            .run("cancel_order", || {
                self.try_cancel_order(tenant_id, order_id, actor_id)
            })
            .await?;
        info!(order_number = %order.order_number, "Order cancelled");
        Ok(order)
    }

    async fn try_cancel_order(
        &self,
        tenant_id: &str,
        order_id: &str,
        actor_id: &str,
    ) -> EngineResult<Order> {
        let now = Utc::now();
        let mut uow = self.db.begin().await?;

        let mut order = OrderRepository::find(uow.conn(), tenant_id, order_id).await?;
        if order.status != OrderStatus::Completed {
            return Err(CoreError::InvalidOrderStatus {
                order_id: order_id.to_string(),
                current_status: order.status.as_str().to_string(),
            }
            .into());
        }
        let items = OrderRepository::load_items(uow.conn(), &order.id).await?;
        if items.iter().any(|i| i.returned_quantity > 0) {
            return Err(CoreError::InvalidOrderStatus {
                order_id: order_id.to_string(),
                current_status: "partially returned".to_string(),
            }
            .into());
        }
        let frozen = order
            .frozen_cogs
            .clone()
            .ok_or_else(|| EngineError::FrozenCogsMissing {
                order_id: order_id.to_string(),
            })?;

        let (posting_period, _) =
            resolve_posting_period(uow.conn(), tenant_id, &order.period, now).await?;

        // Stock comes back at the cost it left with
        for item in &items {
            InventoryRepository::restock(
                uow.conn(),
                tenant_id,
                &item.product_id,
                item.quantity,
                Money::from_cents(item.unit_cost_cents),
                MovementReason::Cancellation,
                Some(order_id),
                actor_id,
            )
            .await?;
        }

        // Reverse the receivable. The unsettled remainder comes off
        // pending; paid money refunds in cash below.
        let mut invoice_remaining = Money::zero();
        if let Some(customer_id) = order.customer_id.clone() {
            let invoice = CustomerRepository::invoice_for_order(uow.conn(), tenant_id, order_id)
                .await?
                .ok_or_else(|| EngineError::OriginalInvoiceMissing {
                    order_id: order_id.to_string(),
                })?;
            invoice_remaining = invoice.remaining();

            CustomerRepository::settle_invoice(
                uow.conn(),
                tenant_id,
                &invoice.id,
                Money::zero(),
                SettlementStatus::Reversed,
            )
            .await?;

            if invoice_remaining.is_positive() {
                let fresh = CustomerRepository::find(uow.conn(), tenant_id, &customer_id).await?;
                let change = apply_credit(fresh.balances(), invoice_remaining);
                CustomerRepository::update_balances(
                    uow.conn(),
                    tenant_id,
                    &customer_id,
                    fresh.version,
                    change.after,
                )
                .await?;

                let credit_note = CustomerTransaction {
                    id: new_id(),
                    tenant_id: tenant_id.to_string(),
                    customer_id,
                    kind: CustomerTransactionKind::CreditNote,
                    amount_cents: invoice_remaining.cents(),
                    pending_before_cents: change.before.pending.cents(),
                    advance_before_cents: change.before.advance.cents(),
                    pending_after_cents: change.after.pending.cents(),
                    advance_after_cents: change.after.advance.cents(),
                    remaining_cents: 0,
                    status: SettlementStatus::Settled,
                    lines: Vec::new(),
                    reference_type: Some("order".to_string()),
                    reference_id: Some(order_id.to_string()),
                    notes: Some(format!("Cancellation of {}", order.order_number)),
                    created_at: now,
                };
                CustomerRepository::insert_transaction(uow.conn(), &credit_note).await?;
            }
        }

        // Mirror every sale posting
        let cash = account_code(uow.conn(), tenant_id, AccountRole::Cash).await?;
        let receivable =
            account_code(uow.conn(), tenant_id, AccountRole::AccountsReceivable).await?;
        let revenue = account_code(uow.conn(), tenant_id, AccountRole::SalesRevenue).await?;
        let cogs = account_code(uow.conn(), tenant_id, AccountRole::CostOfGoodsSold).await?;
        let inventory = account_code(uow.conn(), tenant_id, AccountRole::Inventory).await?;

        let note = format!("Cancellation {}", order.order_number);
        let frozen_total = frozen.total_cost();
        let batch = PostingBatch::new()
            .debit(revenue.as_str(), order.total(), note.as_str())
            .credit(cash.as_str(), order.paid_portion(), note.as_str())
            .credit(receivable.as_str(), invoice_remaining, note.as_str())
            .debit(inventory.as_str(), frozen_total, note.as_str())
            .credit(cogs.as_str(), frozen_total, note.as_str());
        batch.validate()?;
        JournalRepository::post(
            uow.conn(),
            tenant_id,
            &batch,
            Some("order"),
            Some(order_id),
            &posting_period,
            now,
        )
        .await?;

        OrderRepository::update_status(
            uow.conn(),
            tenant_id,
            order_id,
            order.version,
            OrderStatus::Cancelled,
        )
        .await?;
        uow.commit().await?;

        order.status = OrderStatus::Cancelled;
        order.version += 1;
        order.updated_at = now;
        Ok(order)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Records a standalone customer payment.
    ///
    /// The amount drains the pending balance (any excess becomes advance
    /// credit) and allocates across open invoices oldest-first, keeping
    /// each linked order's payment fields in step.
    pub async fn record_payment(
        &self,
        request: PaymentRequest,
    ) -> EngineResult<CustomerTransaction> {
        require_actor(&request.actor_id)?;
        validate_tenant_id(&request.tenant_id).map_err(CoreError::from)?;
        if request.amount_cents <= 0 {
            return Err(CoreError::InvalidPaymentAmount {
                reason: "payment amount must be positive".to_string(),
            }
            .into());
        }

        let tx = self
            .retry
            .run("record_payment", || self.try_record_payment(&request))
            .await?;
        info!(
            customer_id = %request.customer_id,
            amount_cents = tx.amount_cents,
            "Payment recorded"
        );
        Ok(tx)
    }

    async fn try_record_payment(
        &self,
        request: &PaymentRequest,
    ) -> EngineResult<CustomerTransaction> {
        let now = Utc::now();
        let tenant_id = &request.tenant_id;
        let amount = Money::from_cents(request.amount_cents);

        let mut uow = self.db.begin().await?;

        let customer = CustomerRepository::find(uow.conn(), tenant_id, &request.customer_id).await?;
        let change = apply_payment(customer.balances(), amount);
        CustomerRepository::update_balances(
            uow.conn(),
            tenant_id,
            &customer.id,
            customer.version,
            change.after,
        )
        .await?;

        // Oldest invoice first; each allocation keeps its order's
        // payment fields in step
        let invoices = CustomerRepository::open_invoices(uow.conn(), tenant_id, &customer.id).await?;
        let mut left = amount;
        for invoice in &invoices {
            if !left.is_positive() {
                break;
            }
            let alloc = left.min(invoice.remaining());
            if !alloc.is_positive() {
                continue;
            }
            let new_remaining = invoice.remaining() - alloc;
            CustomerRepository::settle_invoice(
                uow.conn(),
                tenant_id,
                &invoice.id,
                new_remaining,
                settlement_status(invoice.amount(), new_remaining),
            )
            .await?;

            if let (Some(ref_type), Some(order_id)) =
                (&invoice.reference_type, &invoice.reference_id)
            {
                if ref_type == "order" {
                    let order = OrderRepository::find(uow.conn(), tenant_id, order_id).await?;
                    let new_paid = order.amount_paid() + alloc;
                    OrderRepository::update_payment(
                        uow.conn(),
                        tenant_id,
                        order_id,
                        order.version,
                        new_paid,
                        payment_status_for(order.total(), new_paid),
                    )
                    .await?;
                }
            }
            left = left - alloc;
        }

        let period = period_for(now);
        if let Some(p) =
            JournalRepository::period_for_update(uow.conn(), tenant_id, &period).await?
        {
            if p.is_closed() {
                return Err(EngineError::PeriodLocked { period });
            }
        }
        let cash = account_code(uow.conn(), tenant_id, AccountRole::Cash).await?;
        let receivable =
            account_code(uow.conn(), tenant_id, AccountRole::AccountsReceivable).await?;

        let tx_id = new_id();
        let note = format!("Customer payment ({:?})", request.method);
        let batch = PostingBatch::new()
            .debit(cash.as_str(), amount, note.as_str())
            .credit(receivable.as_str(), amount, note.as_str());
        batch.validate()?;
        JournalRepository::post(
            uow.conn(),
            tenant_id,
            &batch,
            Some("payment"),
            Some(&tx_id),
            &period,
            now,
        )
        .await?;

        let tx = CustomerTransaction {
            id: tx_id,
            tenant_id: tenant_id.clone(),
            customer_id: customer.id.clone(),
            kind: CustomerTransactionKind::Payment,
            amount_cents: amount.cents(),
            pending_before_cents: change.before.pending.cents(),
            advance_before_cents: change.before.advance.cents(),
            pending_after_cents: change.after.pending.cents(),
            advance_after_cents: change.after.advance.cents(),
            remaining_cents: 0,
            status: SettlementStatus::Settled,
            lines: Vec::new(),
            reference_type: None,
            reference_id: None,
            notes: None,
            created_at: now,
        };
        CustomerRepository::insert_transaction(uow.conn(), &tx).await?;
        uow.commit().await?;

        Ok(tx)
    }

    // =========================================================================
    // Stock Receipts
    // =========================================================================

    /// Receives priced stock: on-hand rises, the weighted-average and
    /// last-purchase costs update, and the inventory asset account books
    /// the received value.
    pub async fn receive_stock(
        &self,
        request: ReceiveStockRequest,
    ) -> EngineResult<InventoryLevel> {
        require_actor(&request.actor_id)?;
        validate_quantity(request.quantity).map_err(CoreError::from)?;
        validate_price_cents(request.unit_cost_cents).map_err(CoreError::from)?;

        let level = self
            .retry
            .run("receive_stock", || self.try_receive_stock(&request))
            .await?;
        info!(
            product_id = %request.product_id,
            quantity = request.quantity,
            on_hand = level.on_hand,
            "Stock received"
        );
        Ok(level)
    }

    async fn try_receive_stock(
        &self,
        request: &ReceiveStockRequest,
    ) -> EngineResult<InventoryLevel> {
        let now = Utc::now();
        let tenant_id = &request.tenant_id;
        let unit_cost = Money::from_cents(request.unit_cost_cents);

        let mut uow = self.db.begin().await?;

        let product = ProductRepository::find(uow.conn(), tenant_id, &request.product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(request.product_id.clone()))?;
        let level = InventoryRepository::restock(
            uow.conn(),
            tenant_id,
            &request.product_id,
            request.quantity,
            unit_cost,
            MovementReason::Purchase,
            None,
            &request.actor_id,
        )
        .await?;

        // Free goods carry no value to book
        let total = unit_cost.multiply_quantity(request.quantity);
        if total.is_positive() {
            let period = period_for(now);
            if let Some(p) =
                JournalRepository::period_for_update(uow.conn(), tenant_id, &period).await?
            {
                if p.is_closed() {
                    return Err(EngineError::PeriodLocked { period });
                }
            }
            let inventory = account_code(uow.conn(), tenant_id, AccountRole::Inventory).await?;
            let cash = account_code(uow.conn(), tenant_id, AccountRole::Cash).await?;

            let note = format!("Stock receipt {}", product.sku);
            let batch = PostingBatch::new()
                .debit(inventory.as_str(), total, note.as_str())
                .credit(cash.as_str(), total, note.as_str());
            batch.validate()?;
            JournalRepository::post(
                uow.conn(),
                tenant_id,
                &batch,
                Some("receipt"),
                Some(&request.product_id),
                &period,
                now,
            )
            .await?;
        }

        uow.commit().await?;
        Ok(level)
    }

    // =========================================================================
    // Periods and Reporting
    // =========================================================================

    /// Closes an accounting period. Posting into it afterwards is
    /// rejected; reversals for its sales shift into the current period.
    pub async fn close_period(
        &self,
        tenant_id: &str,
        period: &str,
        actor_id: &str,
    ) -> EngineResult<()> {
        require_actor(actor_id)?;
        saldo_core::validation::validate_period(period).map_err(CoreError::from)?;

        self.retry
            .run("close_period", || async {
                let mut uow = self.db.begin().await?;
                JournalRepository::close_period(uow.conn(), tenant_id, period, actor_id, Utc::now())
                    .await?;
                uow.commit().await?;
                Ok(())
            })
            .await?;
        info!(period, "Accounting period closed");
        Ok(())
    }

    /// Reopens a closed period.
    pub async fn reopen_period(&self, tenant_id: &str, period: &str) -> EngineResult<()> {
        saldo_core::validation::validate_period(period).map_err(CoreError::from)?;

        self.retry
            .run("reopen_period", || async {
                let mut uow = self.db.begin().await?;
                JournalRepository::reopen_period(uow.conn(), tenant_id, period).await?;
                uow.commit().await?;
                Ok(())
            })
            .await?;
        info!(period, "Accounting period reopened");
        Ok(())
    }

    /// Profit over a date range, summed from the per-order distributions
    /// the dispatcher maintains.
    pub async fn profit_summary(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<ProfitSummary> {
        Ok(self.db.metrics().profit_summary(tenant_id, from, to).await?)
    }

    fn nudge_dispatcher(&self) {
        if let Some(handle) = &self.dispatcher {
            handle.nudge();
        }
    }
}

// =============================================================================
// Shape Validation
// =============================================================================

fn validate_sale_shape(request: &CreateOrderRequest) -> EngineResult<()> {
    validate_tenant_id(&request.tenant_id).map_err(CoreError::from)?;
    require_actor(&request.actor_id)?;
    validate_order_size(request.items.len()).map_err(CoreError::from)?;
    validate_payment_cents(request.payment.amount_cents).map_err(CoreError::from)?;

    for item in &request.items {
        validate_quantity(item.quantity).map_err(CoreError::from)?;
        validate_bps("discount_bps", item.discount_bps).map_err(CoreError::from)?;
        if let Some(cents) = item.unit_price_override_cents {
            validate_price_cents(cents).map_err(CoreError::from)?;
        }
    }
    Ok(())
}

fn require_actor(actor_id: &str) -> EngineResult<()> {
    if actor_id.trim().is_empty() {
        return Err(CoreError::Validation(ValidationError::Required {
            field: "actor_id".to_string(),
        })
        .into());
    }
    Ok(())
}

// =============================================================================
// Shared Posting Helpers
// =============================================================================

/// Resolves a role to its account code, in-transaction.
pub(crate) async fn account_code(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    role: AccountRole,
) -> EngineResult<String> {
    let account = JournalRepository::account_for_role(conn, tenant_id, role)
        .await?
        .ok_or(EngineError::AccountNotConfigured { role })?;
    Ok(account.code)
}

/// Picks the period reversal entries post into.
///
/// An open original period takes its own reversals. A closed one stays
/// untouched: entries shift into the current period, and the caller
/// learns about the shift from the second tuple field. A closed current
/// period blocks the operation outright.
pub(crate) async fn resolve_posting_period(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    original_period: &str,
    now: DateTime<Utc>,
) -> EngineResult<(String, bool)> {
    let original_closed = JournalRepository::period_for_update(conn, tenant_id, original_period)
        .await?
        .map(|p| p.is_closed())
        .unwrap_or(false);
    if !original_closed {
        return Ok((original_period.to_string(), false));
    }

    let current = period_for(now);
    let current_closed = JournalRepository::period_for_update(conn, tenant_id, &current)
        .await?
        .map(|p| p.is_closed())
        .unwrap_or(false);
    if current_closed {
        return Err(EngineError::PeriodLocked { period: current });
    }
    Ok((current, true))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use saldo_core::{Customer, JournalEntry, PaymentStatus, Product, DEFAULT_TENANT_ID};
    use saldo_db::DbConfig;

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

    async fn seed_product(db: &Database, id: &str, price_cents: i64, tax_rate_bps: u32) {
        let now = Utc::now();
        let product = Product {
            id: id.to_string(),
            tenant_id: TENANT.to_string(),
            sku: format!("SKU-{id}"),
            name: format!("Product {id}"),
            price_cents,
            list_cost_cents: None,
            tax_rate_bps,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let mut uow = db.begin().await.unwrap();
        ProductRepository::insert(uow.conn(), &product).await.unwrap();
        uow.commit().await.unwrap();
    }

    async fn seed_stock(db: &Database, product_id: &str, quantity: i64, unit_cost_cents: i64) {
        let mut uow = db.begin().await.unwrap();
        InventoryRepository::restock(
            uow.conn(),
            TENANT,
            product_id,
            quantity,
            Money::from_cents(unit_cost_cents),
            MovementReason::Purchase,
            None,
            "seed",
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();
    }

    async fn seed_customer(db: &Database, id: &str, credit_limit_cents: i64) {
        let now = Utc::now();
        let customer = Customer {
            id: id.to_string(),
            tenant_id: TENANT.to_string(),
            name: format!("Customer {id}"),
            phone: None,
            pending_balance_cents: 0,
            advance_balance_cents: 0,
            credit_limit_cents,
            is_active: true,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let mut uow = db.begin().await.unwrap();
        CustomerRepository::insert(uow.conn(), &customer).await.unwrap();
        uow.commit().await.unwrap();
    }

    fn walk_in(items: Vec<(&str, i64)>, paid_cents: i64) -> CreateOrderRequest {
        CreateOrderRequest {
            tenant_id: TENANT.to_string(),
            customer_id: None,
            items: items
                .into_iter()
                .map(|(product_id, quantity)| OrderItemRequest {
                    product_id: product_id.to_string(),
                    quantity,
                    unit_price_override_cents: None,
                    discount_bps: 0,
                })
                .collect(),
            payment: SalePayment {
                method: PaymentMethod::Cash,
                amount_cents: paid_cents,
            },
            tax_exempt: false,
            actor_id: "cashier-1".to_string(),
        }
    }

    fn credit_sale(customer_id: &str, items: Vec<(&str, i64)>, paid_cents: i64) -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: Some(customer_id.to_string()),
            payment: SalePayment {
                method: PaymentMethod::BankTransfer,
                amount_cents: paid_cents,
            },
            ..walk_in(items, paid_cents)
        }
    }

    fn entry_for<'a>(entries: &'a [JournalEntry], account_code: &str) -> &'a JournalEntry {
        entries
            .iter()
            .find(|e| e.account_code == account_code)
            .unwrap_or_else(|| panic!("no entry for account {account_code}"))
    }

    async fn on_hand(db: &Database, product_id: &str) -> i64 {
        db.inventory()
            .level(TENANT, product_id)
            .await
            .unwrap()
            .map(|l| l.on_hand)
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_cash_sale_decrements_stock_and_balances_books() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let completed = coordinator
            .create_order(walk_in(vec![("p1", 3)], 3000))
            .await
            .unwrap();

        assert!(completed.order.order_number.ends_with("0001"));
        assert_eq!(completed.order.total_cents, 3000);
        assert_eq!(completed.order.payment_status, PaymentStatus::Paid);
        assert_eq!(on_hand(&db, "p1").await, 7);

        let frozen = completed.order.frozen_cogs.as_ref().unwrap();
        assert_eq!(frozen.total_cost(), Money::from_cents(1500));
        assert!(!frozen.is_estimated);

        // Sale 3000 + COGS 1500, debits equal to credits
        let entries = db
            .journal()
            .entries_for_reference(TENANT, "order", &completed.order.id)
            .await
            .unwrap();
        let debits: i64 = entries.iter().map(|e| e.debit_cents).sum();
        let credits: i64 = entries.iter().map(|e| e.credit_cents).sum();
        assert_eq!(debits, 4500);
        assert_eq!(credits, 4500);
        assert_eq!(entry_for(&entries, "1000").debit_cents, 3000);
        assert_eq!(entry_for(&entries, "4000").credit_cents, 3000);
        assert_eq!(entry_for(&entries, "5000").debit_cents, 1500);
        assert_eq!(entry_for(&entries, "1200").credit_cents, 1500);

        // The event waits in the outbox
        let counts = db.outbox().counts().await.unwrap();
        assert_eq!(counts.undispatched_events, 1);
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_everything() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let result = coordinator.create_order(walk_in(vec![("p1", 11)], 11000)).await;
        assert!(matches!(
            result,
            Err(EngineError::Core(CoreError::InsufficientStock {
                available: 10,
                requested: 11,
                ..
            }))
        ));

        assert_eq!(on_hand(&db, "p1").await, 10);
        assert!(db.orders().list_recent(TENANT, 10).await.unwrap().is_empty());
        assert_eq!(db.outbox().counts().await.unwrap().undispatched_events, 0);

        // The failed attempt burned nothing, not even a sequence number
        let completed = coordinator
            .create_order(walk_in(vec![("p1", 1)], 1000))
            .await
            .unwrap();
        assert!(completed.order.order_number.ends_with("0001"));
    }

    #[tokio::test]
    async fn test_aggregates_duplicate_product_lines_before_checking_stock() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        // 6 + 6 across two lines exceeds the 10 on hand
        let result = coordinator
            .create_order(walk_in(vec![("p1", 6), ("p1", 6)], 12000))
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Core(CoreError::InsufficientStock {
                requested: 12,
                ..
            }))
        ));
        assert_eq!(on_hand(&db, "p1").await, 10);
    }

    #[tokio::test]
    async fn test_credit_sale_posts_receivable_and_open_invoice() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        seed_customer(&db, "c1", 1_000_000).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let completed = coordinator
            .create_order(credit_sale("c1", vec![("p1", 3)], 0))
            .await
            .unwrap();
        assert_eq!(completed.order.payment_status, PaymentStatus::Unpaid);

        let customer = db.customers().get_by_id(TENANT, "c1").await.unwrap().unwrap();
        assert_eq!(customer.pending_balance_cents, 3000);
        assert_eq!(customer.advance_balance_cents, 0);

        let entries = db
            .journal()
            .entries_for_reference(TENANT, "order", &completed.order.id)
            .await
            .unwrap();
        assert_eq!(entry_for(&entries, "1100").debit_cents, 3000);
        assert_eq!(entry_for(&entries, "4000").credit_cents, 3000);

        let transactions = db.customers().transactions(TENANT, "c1", 10).await.unwrap();
        let invoice = transactions
            .iter()
            .find(|t| t.kind == CustomerTransactionKind::Invoice)
            .unwrap();
        assert_eq!(invoice.remaining_cents, 3000);
        assert_eq!(invoice.status, SettlementStatus::Open);
    }

    #[tokio::test]
    async fn test_overpayment_rolls_into_advance() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        seed_customer(&db, "c1", 1_000_000).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let completed = coordinator
            .create_order(credit_sale("c1", vec![("p1", 3)], 5000))
            .await
            .unwrap();
        assert_eq!(completed.order.payment_status, PaymentStatus::Paid);
        assert_eq!(completed.order.amount_paid_cents, 5000);

        let customer = db.customers().get_by_id(TENANT, "c1").await.unwrap().unwrap();
        assert_eq!(customer.pending_balance_cents, 0);
        assert_eq!(customer.advance_balance_cents, 2000);

        // Cash in 5000, revenue 3000, the 2000 excess credits the
        // receivable and mirrors the advance
        let entries = db
            .journal()
            .entries_for_reference(TENANT, "order", &completed.order.id)
            .await
            .unwrap();
        assert_eq!(entry_for(&entries, "1000").debit_cents, 5000);
        assert_eq!(entry_for(&entries, "4000").credit_cents, 3000);
        assert_eq!(entry_for(&entries, "1100").credit_cents, 2000);
    }

    #[tokio::test]
    async fn test_credit_limit_rejects_before_any_write() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        seed_customer(&db, "c1", 1000).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let result = coordinator.create_order(credit_sale("c1", vec![("p1", 3)], 0)).await;
        assert!(matches!(
            result,
            Err(EngineError::Core(CoreError::CreditLimitExceeded { .. }))
        ));

        assert_eq!(on_hand(&db, "p1").await, 10);
        assert!(db.orders().list_recent(TENANT, 10).await.unwrap().is_empty());
        let customer = db.customers().get_by_id(TENANT, "c1").await.unwrap().unwrap();
        assert_eq!(customer.pending_balance_cents, 0);
    }

    #[tokio::test]
    async fn test_walk_in_must_pay_in_full() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let result = coordinator.create_order(walk_in(vec![("p1", 3)], 2000)).await;
        assert!(matches!(
            result,
            Err(EngineError::Core(CoreError::InvalidPaymentAmount { .. }))
        ));
    }

    #[tokio::test]
    async fn test_sale_into_closed_period_is_locked() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let current = period_for(Utc::now());
        coordinator.close_period(TENANT, &current, "manager-1").await.unwrap();

        let result = coordinator.create_order(walk_in(vec![("p1", 1)], 1000)).await;
        assert!(matches!(result, Err(EngineError::PeriodLocked { .. })));

        // Reopening clears the lock
        coordinator.reopen_period(TENANT, &current).await.unwrap();
        assert!(coordinator.create_order(walk_in(vec![("p1", 1)], 1000)).await.is_ok());
    }

    #[tokio::test]
    async fn test_payment_allocates_oldest_invoice_first() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        seed_customer(&db, "c1", 1_000_000).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let first = coordinator
            .create_order(credit_sale("c1", vec![("p1", 3)], 0))
            .await
            .unwrap();
        let second = coordinator
            .create_order(credit_sale("c1", vec![("p1", 2)], 0))
            .await
            .unwrap();

        coordinator
            .record_payment(PaymentRequest {
                tenant_id: TENANT.to_string(),
                customer_id: "c1".to_string(),
                amount_cents: 4000,
                method: PaymentMethod::Cash,
                actor_id: "cashier-1".to_string(),
            })
            .await
            .unwrap();

        let customer = db.customers().get_by_id(TENANT, "c1").await.unwrap().unwrap();
        assert_eq!(customer.pending_balance_cents, 1000);

        let transactions = db.customers().transactions(TENANT, "c1", 10).await.unwrap();
        let invoices: Vec<_> = transactions
            .iter()
            .filter(|t| t.kind == CustomerTransactionKind::Invoice)
            .collect();
        let oldest = invoices
            .iter()
            .find(|t| t.reference_id.as_deref() == Some(first.order.id.as_str()))
            .unwrap();
        let newest = invoices
            .iter()
            .find(|t| t.reference_id.as_deref() == Some(second.order.id.as_str()))
            .unwrap();
        assert_eq!(oldest.status, SettlementStatus::Settled);
        assert_eq!(newest.status, SettlementStatus::Partial);
        assert_eq!(newest.remaining_cents, 1000);

        // Orders mirror the allocation
        let first_order = db.orders().get_by_id(TENANT, &first.order.id).await.unwrap().unwrap();
        let second_order = db.orders().get_by_id(TENANT, &second.order.id).await.unwrap().unwrap();
        assert_eq!(first_order.payment_status, PaymentStatus::Paid);
        assert_eq!(first_order.amount_paid_cents, 3000);
        assert_eq!(second_order.payment_status, PaymentStatus::Partial);
        assert_eq!(second_order.amount_paid_cents, 1000);
    }

    #[tokio::test]
    async fn test_payment_requires_positive_amount() {
        let db = test_db().await;
        seed_customer(&db, "c1", 1_000_000).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let result = coordinator
            .record_payment(PaymentRequest {
                tenant_id: TENANT.to_string(),
                customer_id: "c1".to_string(),
                amount_cents: 0,
                method: PaymentMethod::Cash,
                actor_id: "cashier-1".to_string(),
            })
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Core(CoreError::InvalidPaymentAmount { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_restores_stock_and_reverses_books() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let completed = coordinator
            .create_order(walk_in(vec![("p1", 3)], 3000))
            .await
            .unwrap();
        assert_eq!(on_hand(&db, "p1").await, 7);

        let cancelled = coordinator
            .cancel_order(TENANT, &completed.order.id, "manager-1")
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(on_hand(&db, "p1").await, 10);

        // Sale entries plus their mirrors net to zero per account
        let entries = db
            .journal()
            .entries_for_reference(TENANT, "order", &completed.order.id)
            .await
            .unwrap();
        for code in ["1000", "1200", "4000", "5000"] {
            let net: i64 = entries
                .iter()
                .filter(|e| e.account_code == code)
                .map(|e| e.debit_cents - e.credit_cents)
                .sum();
            assert_eq!(net, 0, "account {code} did not net to zero");
        }

        // A cancelled order cannot cancel twice
        let again = coordinator.cancel_order(TENANT, &completed.order.id, "manager-1").await;
        assert!(matches!(
            again,
            Err(EngineError::Core(CoreError::InvalidOrderStatus { .. }))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_of_credit_sale_releases_pending() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        seed_customer(&db, "c1", 1_000_000).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let completed = coordinator
            .create_order(credit_sale("c1", vec![("p1", 3)], 1000))
            .await
            .unwrap();
        let customer = db.customers().get_by_id(TENANT, "c1").await.unwrap().unwrap();
        assert_eq!(customer.pending_balance_cents, 2000);

        coordinator
            .cancel_order(TENANT, &completed.order.id, "manager-1")
            .await
            .unwrap();

        let customer = db.customers().get_by_id(TENANT, "c1").await.unwrap().unwrap();
        assert_eq!(customer.pending_balance_cents, 0);

        let transactions = db.customers().transactions(TENANT, "c1", 10).await.unwrap();
        let invoice = transactions
            .iter()
            .find(|t| t.kind == CustomerTransactionKind::Invoice)
            .unwrap();
        assert_eq!(invoice.status, SettlementStatus::Reversed);
        assert!(transactions
            .iter()
            .any(|t| t.kind == CustomerTransactionKind::CreditNote && t.amount_cents == 2000));
    }

    #[tokio::test]
    async fn test_receive_stock_updates_weighted_average() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let level = coordinator
            .receive_stock(ReceiveStockRequest {
                tenant_id: TENANT.to_string(),
                product_id: "p1".to_string(),
                quantity: 10,
                unit_cost_cents: 700,
                actor_id: "manager-1".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(level.on_hand, 20);
        assert_eq!(level.average_cost_cents, Some(600));
        assert_eq!(level.last_purchase_cost_cents, Some(700));

        let entries = db
            .journal()
            .entries_for_reference(TENANT, "receipt", "p1")
            .await
            .unwrap();
        assert_eq!(entry_for(&entries, "1200").debit_cents, 7000);
        assert_eq!(entry_for(&entries, "1000").credit_cents, 7000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sales_cannot_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("race.db")).max_connections(4))
            .await
            .unwrap();
        {
            let mut uow = db.begin().await.unwrap();
            JournalRepository::install_default_chart(uow.conn(), TENANT)
                .await
                .unwrap();
            uow.commit().await.unwrap();
        }
        seed_product(&db, "p1", 1000, 0).await;
        seed_stock(&db, "p1", 10, 500).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        let (a, b) = tokio::join!(
            coordinator.create_order(walk_in(vec![("p1", 6)], 6000)),
            coordinator.create_order(walk_in(vec![("p1", 6)], 6000)),
        );

        let succeeded = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1, "exactly one of two competing sales must win");
        let lost = if a.is_err() { a } else { b };
        assert!(matches!(
            lost,
            Err(EngineError::Core(CoreError::InsufficientStock { .. }))
        ));
        assert_eq!(on_hand(&db, "p1").await, 4);
    }

    #[tokio::test]
    async fn test_discount_and_tax_price_through_to_books() {
        let db = test_db().await;
        seed_product(&db, "p1", 1000, 500).await; // 5% tax
        seed_stock(&db, "p1", 10, 400).await;
        let coordinator = OrderCoordinator::new(db.clone(), &EngineConfig::default());

        // 2 x 1000, 10% line discount, 5% tax on the net
        let mut request = walk_in(vec![("p1", 2)], 1890);
        request.items[0].discount_bps = 1000;
        let completed = coordinator.create_order(request).await.unwrap();

        assert_eq!(completed.order.subtotal_cents, 2000);
        assert_eq!(completed.order.discount_cents, 200);
        assert_eq!(completed.order.tax_cents, 90);
        assert_eq!(completed.order.total_cents, 1890);

        let entries = db
            .journal()
            .entries_for_reference(TENANT, "order", &completed.order.id)
            .await
            .unwrap();
        assert_eq!(entry_for(&entries, "4000").credit_cents, 1890);
    }
}
