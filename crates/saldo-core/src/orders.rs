//! # Order Types and Pricing
//!
//! Orders, line items, and the pure pricing math the coordinator runs
//! before anything touches storage.
//!
//! ## Pricing Flow
//! ```text
//! unit price × quantity ──► line subtotal
//!        - line discount (bps of subtotal)
//!        ──► net ──► + tax (bps of net) ──► line total
//!
//! Order totals are the exact sums of the line values. No order-level
//! re-rounding: what the lines say is what the order says.
//! ```
//!
//! ## Dual-Key Identity
//! Every order has:
//! - `id`: UUID v4 - immutable, used for relations
//! - `order_number`: `SI-YYYYMMDD-0001` - human-readable, from a per-day
//!   atomic counter

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cogs::FrozenCogs;
use crate::money::{Money, TaxRate};

/// Prefix on every order number.
pub const ORDER_NUMBER_PREFIX: &str = "SI";

// =============================================================================
// Status Enums
// =============================================================================

/// Lifecycle state of an order.
///
/// Orders are committed atomically and never drafted. Partial returns keep
/// the order `Completed`; only a full reversal marks it `Returned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Completed,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        }
    }
}

/// How much of the order total has been received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Partial,
    Unpaid,
}

/// How the payment arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash.
    Cash,
    /// Bank transfer against the invoice.
    BankTransfer,
    /// Card payment on an external terminal.
    ExternalCard,
}

// =============================================================================
// Order
// =============================================================================

/// A committed order.
///
/// Items and pricing are immutable after commit; the only later writes are
/// status transitions and per-item `returned_quantity` updates, both done
/// by the return/cancellation paths through their own compensating records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub tenant_id: String,
    pub order_number: String,
    /// None for walk-in cash sales.
    pub customer_id: Option<String>,
    pub status: OrderStatus,

    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,

    pub payment_method: PaymentMethod,
    pub amount_paid_cents: i64,
    pub payment_status: PaymentStatus,

    /// Cost snapshot frozen at commit. None only on legacy rows awaiting
    /// backfill.
    pub frozen_cogs: Option<FrozenCogs>,

    /// Accounting period the sale posted into, `YYYY-MM`.
    pub period: String,

    pub actor_id: String,

    /// Optimistic concurrency counter for status transitions.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn amount_paid(&self) -> Money {
        Money::from_cents(self.amount_paid_cents)
    }

    /// Unpaid remainder at commit time. Overpayment clamps to zero; the
    /// excess lives on the customer's advance balance, not the order.
    pub fn unpaid_amount(&self) -> Money {
        let due = self.total() - self.amount_paid();
        if due.is_negative() {
            Money::zero()
        } else {
            due
        }
    }

    /// Paid portion capped at the order total.
    pub fn paid_portion(&self) -> Money {
        self.amount_paid().min(self.total())
    }
}

/// A line item on an order, with the usual snapshot pattern: sku, name,
/// price and cost are frozen at sale time and survive later product edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,

    /// SKU at time of sale (frozen).
    pub sku_snapshot: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,

    pub quantity: i64,
    /// Unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,
    pub discount_bps: u32,
    pub tax_rate_bps: u32,
    /// Frozen unit cost in cents, from the COGS snapshot.
    pub unit_cost_cents: i64,

    pub line_subtotal_cents: i64,
    pub line_discount_cents: i64,
    pub line_tax_cents: i64,
    pub line_total_cents: i64,

    /// Units already returned against this line.
    pub returned_quantity: i64,

    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }

    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.line_total_cents)
    }

    /// Units still eligible for return.
    #[inline]
    pub fn returnable_quantity(&self) -> i64 {
        self.quantity - self.returned_quantity
    }
}

// =============================================================================
// Pricing
// =============================================================================

/// Computed money for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinePricing {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

/// Prices one line: extend, discount, then tax the net.
///
/// ## Example
/// ```rust
/// use saldo_core::orders::price_line;
/// use saldo_core::money::{Money, TaxRate};
///
/// // 3 × $10.00, no discount, no tax
/// let line = price_line(Money::from_cents(1000), 3, 0, TaxRate::zero());
/// assert_eq!(line.total.cents(), 3000);
///
/// // 2 × $50.00, 10% off, 17% tax on the net
/// let line = price_line(Money::from_cents(5000), 2, 1000, TaxRate::from_bps(1700));
/// assert_eq!(line.subtotal.cents(), 10000);
/// assert_eq!(line.discount.cents(), 1000);
/// assert_eq!(line.tax.cents(), 1530);
/// assert_eq!(line.total.cents(), 10530);
/// ```
pub fn price_line(unit_price: Money, quantity: i64, discount_bps: u32, tax_rate: TaxRate) -> LinePricing {
    let subtotal = unit_price.multiply_quantity(quantity);
    let discount = subtotal.percentage_of(discount_bps);
    let net = subtotal - discount;
    let tax = net.calculate_tax(tax_rate);
    LinePricing {
        subtotal,
        discount,
        tax,
        total: net + tax,
    }
}

/// Computed money for a whole order: exact sums of its lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderPricing {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

pub fn price_order(lines: &[LinePricing]) -> OrderPricing {
    OrderPricing {
        subtotal: lines.iter().map(|l| l.subtotal).sum(),
        discount: lines.iter().map(|l| l.discount).sum(),
        tax: lines.iter().map(|l| l.tax).sum(),
        total: lines.iter().map(|l| l.total).sum(),
    }
}

/// Payment status for an order total and the amount received.
pub fn payment_status_for(total: Money, paid: Money) -> PaymentStatus {
    if paid.cents() >= total.cents() {
        PaymentStatus::Paid
    } else if paid.is_positive() {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Unpaid
    }
}

// =============================================================================
// Order Numbers
// =============================================================================

/// Formats an order number from the sale date and the day's sequence.
///
/// ## Example
/// ```rust
/// use chrono::NaiveDate;
/// use saldo_core::orders::format_order_number;
///
/// let date = NaiveDate::from_ymd_opt(2026, 8, 22).unwrap();
/// assert_eq!(format_order_number(date, 1), "SI-20260822-0001");
/// assert_eq!(format_order_number(date, 731), "SI-20260822-0731");
/// ```
pub fn format_order_number(date: NaiveDate, sequence: i64) -> String {
    format!(
        "{}-{}-{:04}",
        ORDER_NUMBER_PREFIX,
        date.format("%Y%m%d"),
        sequence
    )
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_line_no_discount_no_tax() {
        let line = price_line(Money::from_cents(1000), 3, 0, TaxRate::zero());
        assert_eq!(line.subtotal.cents(), 3000);
        assert_eq!(line.discount.cents(), 0);
        assert_eq!(line.tax.cents(), 0);
        assert_eq!(line.total.cents(), 3000);
    }

    #[test]
    fn test_price_line_tax_applies_to_discounted_net() {
        // $100.00 × 2 = $200.00, 10% off → $180.00, 17% tax → $30.60
        let line = price_line(Money::from_cents(10000), 2, 1000, TaxRate::from_bps(1700));
        assert_eq!(line.subtotal.cents(), 20000);
        assert_eq!(line.discount.cents(), 2000);
        assert_eq!(line.tax.cents(), 3060);
        assert_eq!(line.total.cents(), 21060);
    }

    #[test]
    fn test_order_totals_are_line_sums() {
        let lines = vec![
            price_line(Money::from_cents(1000), 3, 0, TaxRate::zero()),
            price_line(Money::from_cents(5000), 1, 500, TaxRate::from_bps(825)),
        ];
        let pricing = price_order(&lines);
        assert_eq!(pricing.subtotal.cents(), 8000);
        assert_eq!(pricing.discount.cents(), 250);
        assert_eq!(pricing.tax.cents(), 392);
        assert_eq!(
            pricing.total.cents(),
            lines.iter().map(|l| l.total.cents()).sum::<i64>()
        );
    }

    #[test]
    fn test_payment_status() {
        let total = Money::from_cents(3000);
        assert_eq!(payment_status_for(total, Money::from_cents(3000)), PaymentStatus::Paid);
        assert_eq!(payment_status_for(total, Money::from_cents(5000)), PaymentStatus::Paid);
        assert_eq!(payment_status_for(total, Money::from_cents(1000)), PaymentStatus::Partial);
        assert_eq!(payment_status_for(total, Money::zero()), PaymentStatus::Unpaid);
    }

    #[test]
    fn test_unpaid_amount_clamps_overpayment() {
        let order = sample_order(3000, 5000);
        assert_eq!(order.unpaid_amount().cents(), 0);
        assert_eq!(order.paid_portion().cents(), 3000);

        let order = sample_order(3000, 1000);
        assert_eq!(order.unpaid_amount().cents(), 2000);
        assert_eq!(order.paid_portion().cents(), 1000);
    }

    #[test]
    fn test_order_number_format() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        assert_eq!(format_order_number(date, 1), "SI-20260105-0001");
        assert_eq!(format_order_number(date, 42), "SI-20260105-0042");
        // Past 9999 the number simply widens; the counter never wraps
        assert_eq!(format_order_number(date, 12345), "SI-20260105-12345");
    }

    #[test]
    fn test_returnable_quantity() {
        let mut item = sample_item(5);
        assert_eq!(item.returnable_quantity(), 5);
        item.returned_quantity = 3;
        assert_eq!(item.returnable_quantity(), 2);
    }

    fn sample_order(total: i64, paid: i64) -> Order {
        Order {
            id: "o1".to_string(),
            tenant_id: "t1".to_string(),
            order_number: "SI-20260105-0001".to_string(),
            customer_id: None,
            status: OrderStatus::Completed,
            subtotal_cents: total,
            discount_cents: 0,
            tax_cents: 0,
            total_cents: total,
            payment_method: PaymentMethod::Cash,
            amount_paid_cents: paid,
            payment_status: payment_status_for(Money::from_cents(total), Money::from_cents(paid)),
            frozen_cogs: None,
            period: "2026-01".to_string(),
            actor_id: "u1".to_string(),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_item(quantity: i64) -> OrderItem {
        OrderItem {
            id: "i1".to_string(),
            order_id: "o1".to_string(),
            product_id: "p1".to_string(),
            sku_snapshot: "SKU-1".to_string(),
            name_snapshot: "Widget".to_string(),
            quantity,
            unit_price_cents: 1000,
            discount_bps: 0,
            tax_rate_bps: 0,
            unit_cost_cents: 500,
            line_subtotal_cents: 1000 * quantity,
            line_discount_cents: 0,
            line_tax_cents: 0,
            line_total_cents: 1000 * quantity,
            returned_quantity: 0,
            created_at: Utc::now(),
        }
    }
}
