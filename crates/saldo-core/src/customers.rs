//! # Customer Balance Ledger Types
//!
//! The running receivable/advance position per customer, and the pure
//! transition math every balance write goes through.
//!
//! ## Balance Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pending_balance   what the customer owes us          (≥ 0 always)      │
//! │  advance_balance   what we owe the customer (credit)  (≥ 0 always)      │
//! │  current_balance   pending − advance                  (derived)         │
//! │                                                                         │
//! │  Payments and credits drain pending FIRST; only the excess spills       │
//! │  into advance. Neither side ever goes negative.                         │
//! │                                                                         │
//! │  Example: owes $0, pays $50 against a $30 invoice                       │
//! │    invoice:  pending 0 → 30                                             │
//! │    payment:  pending 30 → 0, advance 0 → 20                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Customer
// =============================================================================

/// A customer with a running balance position.
///
/// `version` is the optimistic concurrency counter: every balance write is
/// conditional on the version it read, so two concurrent sales to the same
/// customer cannot both apply against the same starting balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub phone: Option<String>,

    /// What the customer owes, in cents. Never negative.
    pub pending_balance_cents: i64,

    /// Credit we hold for the customer, in cents. Never negative.
    pub advance_balance_cents: i64,

    /// Maximum allowed current balance, in cents.
    pub credit_limit_cents: i64,

    pub is_active: bool,

    /// Optimistic concurrency counter.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    #[inline]
    pub fn pending(&self) -> Money {
        Money::from_cents(self.pending_balance_cents)
    }

    #[inline]
    pub fn advance(&self) -> Money {
        Money::from_cents(self.advance_balance_cents)
    }

    #[inline]
    pub fn credit_limit(&self) -> Money {
        Money::from_cents(self.credit_limit_cents)
    }

    /// Net position: positive means the customer owes us.
    #[inline]
    pub fn current_balance(&self) -> Money {
        self.pending() - self.advance()
    }

    /// The balance pair as a snapshot, for transition math.
    #[inline]
    pub fn balances(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            pending: self.pending(),
            advance: self.advance(),
        }
    }
}

// =============================================================================
// Balance Snapshots and Transitions
// =============================================================================

/// A customer's balance pair at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub pending: Money,
    pub advance: Money,
}

impl BalanceSnapshot {
    pub fn new(pending: Money, advance: Money) -> Self {
        BalanceSnapshot { pending, advance }
    }

    pub fn zero() -> Self {
        BalanceSnapshot {
            pending: Money::zero(),
            advance: Money::zero(),
        }
    }

    /// Net position: `pending - advance`.
    #[inline]
    pub fn current(&self) -> Money {
        self.pending - self.advance
    }
}

/// The before/after pair produced by a balance transition.
///
/// Persisted verbatim on the customer transaction so the ledger is
/// auditable without replaying history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub before: BalanceSnapshot,
    pub after: BalanceSnapshot,
}

/// Applies an invoice: the owed amount lands on pending.
///
/// Held advance credit is not consumed implicitly; the derived current
/// balance already nets the two sides.
pub fn apply_invoice(before: BalanceSnapshot, amount: Money) -> BalanceChange {
    debug_assert!(!amount.is_negative());
    BalanceChange {
        before,
        after: BalanceSnapshot {
            pending: before.pending + amount,
            advance: before.advance,
        },
    }
}

/// Applies a payment: drains pending first, excess becomes advance.
///
/// ## Example
/// ```rust
/// use saldo_core::customers::{apply_payment, BalanceSnapshot};
/// use saldo_core::money::Money;
///
/// // Owes $30, pays $50 → pending 0, advance $20
/// let before = BalanceSnapshot::new(Money::from_cents(3000), Money::zero());
/// let change = apply_payment(before, Money::from_cents(5000));
/// assert_eq!(change.after.pending.cents(), 0);
/// assert_eq!(change.after.advance.cents(), 2000);
/// ```
pub fn apply_payment(before: BalanceSnapshot, amount: Money) -> BalanceChange {
    debug_assert!(!amount.is_negative());
    let applied = amount.min(before.pending);
    BalanceChange {
        before,
        after: BalanceSnapshot {
            pending: before.pending - applied,
            advance: before.advance + (amount - applied),
        },
    }
}

/// Applies a credit note. Same drain rule as a payment: pending first,
/// excess into advance.
pub fn apply_credit(before: BalanceSnapshot, amount: Money) -> BalanceChange {
    apply_payment(before, amount)
}

// =============================================================================
// Credit Limit Check
// =============================================================================

/// Everything a caller needs to explain a credit decline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditDecline {
    pub pending: Money,
    pub advance: Money,
    pub credit_limit: Money,
    /// The unpaid amount the sale attempted to add.
    pub attempted: Money,
    /// Room left under the limit before this attempt (floored at zero).
    pub available: Money,
}

impl fmt::Display for CreditDecline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balance {} (pending {}, advance {}), limit {}, attempted {}, available {}",
            self.pending - self.advance,
            self.pending,
            self.advance,
            self.credit_limit,
            self.attempted,
            self.available
        )
    }
}

/// Checks whether an unpaid amount fits under the customer's credit limit.
///
/// The projected balance is `current + unpaid`; strictly exceeding the
/// limit declines. Callers skip the check entirely for fully paid sales.
///
/// ## Example
/// ```rust
/// use saldo_core::customers::{check_credit_limit, BalanceSnapshot};
/// use saldo_core::money::Money;
///
/// let balances = BalanceSnapshot::new(Money::from_cents(40000), Money::zero());
/// let limit = Money::from_cents(50000);
///
/// assert!(check_credit_limit(balances, limit, Money::from_cents(10000)).is_ok());
/// assert!(check_credit_limit(balances, limit, Money::from_cents(10001)).is_err());
/// ```
pub fn check_credit_limit(
    balances: BalanceSnapshot,
    credit_limit: Money,
    unpaid: Money,
) -> Result<(), CreditDecline> {
    let projected = balances.current() + unpaid;
    if projected.cents() <= credit_limit.cents() {
        return Ok(());
    }

    let headroom = credit_limit - balances.current();
    Err(CreditDecline {
        pending: balances.pending,
        advance: balances.advance,
        credit_limit,
        attempted: unpaid,
        available: if headroom.is_negative() {
            Money::zero()
        } else {
            headroom
        },
    })
}

// =============================================================================
// Customer Transactions
// =============================================================================

/// What a customer transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum CustomerTransactionKind {
    /// The customer now owes us this amount.
    Invoice,
    /// The customer paid us.
    Payment,
    /// We owe the customer (return, cancellation).
    CreditNote,
}

/// Settlement state of an invoice transaction.
///
/// Payments and credit notes are settled on creation; only invoices move
/// through this lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Open,
    Partial,
    Settled,
    Reversed,
}

/// A line on a customer transaction snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLine {
    pub description: String,
    pub quantity: i64,
    pub amount_cents: i64,
}

/// One append-only entry in a customer's ledger.
///
/// Carries the balance pair before and after, so any single row proves its
/// own arithmetic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerTransaction {
    pub id: String,
    pub tenant_id: String,
    pub customer_id: String,
    pub kind: CustomerTransactionKind,

    /// Net amount of this transaction, in cents.
    pub amount_cents: i64,

    pub pending_before_cents: i64,
    pub advance_before_cents: i64,
    pub pending_after_cents: i64,
    pub advance_after_cents: i64,

    /// For invoices: the unsettled remainder. Zero otherwise.
    pub remaining_cents: i64,
    pub status: SettlementStatus,

    /// Line item snapshot (order items for invoices, returned items for
    /// credit notes).
    pub lines: Vec<TransactionLine>,

    /// Originating record: "order" or "return".
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,

    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CustomerTransaction {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    #[inline]
    pub fn remaining(&self) -> Money {
        Money::from_cents(self.remaining_cents)
    }
}

/// Settlement status for an invoice with the given remainder.
pub fn settlement_status(total: Money, remaining: Money) -> SettlementStatus {
    if remaining.is_zero() {
        SettlementStatus::Settled
    } else if remaining == total {
        SettlementStatus::Open
    } else {
        SettlementStatus::Partial
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pending: i64, advance: i64) -> BalanceSnapshot {
        BalanceSnapshot::new(Money::from_cents(pending), Money::from_cents(advance))
    }

    #[test]
    fn test_invoice_adds_to_pending() {
        let change = apply_invoice(snapshot(1000, 500), Money::from_cents(3000));
        assert_eq!(change.after.pending.cents(), 4000);
        assert_eq!(change.after.advance.cents(), 500);
    }

    #[test]
    fn test_payment_drains_pending_first() {
        let change = apply_payment(snapshot(3000, 0), Money::from_cents(2000));
        assert_eq!(change.after.pending.cents(), 1000);
        assert_eq!(change.after.advance.cents(), 0);
    }

    #[test]
    fn test_overpayment_spills_into_advance() {
        // Owes $30, pays $50: pending 0, advance $20
        let change = apply_payment(snapshot(3000, 0), Money::from_cents(5000));
        assert_eq!(change.after.pending.cents(), 0);
        assert_eq!(change.after.advance.cents(), 2000);
        assert_eq!(change.after.current().cents(), -2000);
    }

    #[test]
    fn test_payment_with_zero_pending_is_pure_advance() {
        let change = apply_payment(snapshot(0, 100), Money::from_cents(500));
        assert_eq!(change.after.pending.cents(), 0);
        assert_eq!(change.after.advance.cents(), 600);
    }

    #[test]
    fn test_balances_never_go_negative() {
        let change = apply_payment(snapshot(50, 0), Money::from_cents(5000));
        assert!(!change.after.pending.is_negative());
        assert!(!change.after.advance.is_negative());

        let change = apply_credit(snapshot(0, 0), Money::from_cents(700));
        assert_eq!(change.after.pending.cents(), 0);
        assert_eq!(change.after.advance.cents(), 700);
    }

    #[test]
    fn test_current_is_pending_minus_advance() {
        assert_eq!(snapshot(3000, 1000).current().cents(), 2000);
        assert_eq!(snapshot(0, 2000).current().cents(), -2000);
    }

    #[test]
    fn test_credit_limit_allows_up_to_limit() {
        let balances = snapshot(40000, 0);
        let limit = Money::from_cents(50000);

        assert!(check_credit_limit(balances, limit, Money::from_cents(10000)).is_ok());
    }

    #[test]
    fn test_credit_limit_decline_carries_detail() {
        let balances = snapshot(45000, 5000);
        let limit = Money::from_cents(50000);

        let decline = check_credit_limit(balances, limit, Money::from_cents(20000)).unwrap_err();
        assert_eq!(decline.attempted.cents(), 20000);
        assert_eq!(decline.available.cents(), 10000);
        assert_eq!(decline.pending.cents(), 45000);
        assert_eq!(decline.advance.cents(), 5000);
    }

    #[test]
    fn test_credit_limit_advance_creates_headroom() {
        // Limit 0, but $20 of advance credit: a $15 unpaid sale fits
        let balances = snapshot(0, 2000);
        let limit = Money::zero();

        assert!(check_credit_limit(balances, limit, Money::from_cents(1500)).is_ok());
        assert!(check_credit_limit(balances, limit, Money::from_cents(2500)).is_err());
    }

    #[test]
    fn test_settlement_status() {
        let total = Money::from_cents(3000);
        assert_eq!(
            settlement_status(total, Money::from_cents(3000)),
            SettlementStatus::Open
        );
        assert_eq!(
            settlement_status(total, Money::from_cents(1000)),
            SettlementStatus::Partial
        );
        assert_eq!(
            settlement_status(total, Money::zero()),
            SettlementStatus::Settled
        );
    }
}
