//! # Double-Entry Journal Types
//!
//! Posting batches, the chart of accounts, and the balance validation that
//! guards every write to the books.
//!
//! ## The One Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Within one batch:  sum(debits) == sum(credits)  EXACTLY.               │
//! │                                                                         │
//! │  Integer cents make "exactly" exact. An unbalanced batch is a           │
//! │  programming error in posting construction; it aborts the whole         │
//! │  unit of work and is never coerced to fit.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sale Posting Shape
//! ```text
//! debit  Cash                 (paid portion)
//! debit  Accounts Receivable  (unpaid portion)
//!     credit  Sales Revenue       (order total)
//! debit  Cost of Goods Sold   (frozen COGS total)
//!     credit  Inventory           (frozen COGS total)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

// =============================================================================
// Chart of Accounts
// =============================================================================

/// Accounting classification of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    ContraRevenue,
    Expense,
}

/// The structural roles the engine posts against.
///
/// Postings never hardcode account codes; they resolve a role through the
/// tenant's chart. A tenant may renumber accounts freely as long as every
/// role is mapped. A missing mapping is a configuration error that aborts
/// the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Cash,
    AccountsReceivable,
    Inventory,
    SalesRevenue,
    SalesReturns,
    CostOfGoodsSold,
    OtherIncome,
}

impl AccountRole {
    /// All roles the engine requires a chart to map.
    pub fn all() -> [AccountRole; 7] {
        [
            AccountRole::Cash,
            AccountRole::AccountsReceivable,
            AccountRole::Inventory,
            AccountRole::SalesRevenue,
            AccountRole::SalesReturns,
            AccountRole::CostOfGoodsSold,
            AccountRole::OtherIncome,
        ]
    }

    /// Conventional code used when installing a default chart.
    pub fn default_code(&self) -> &'static str {
        match self {
            AccountRole::Cash => "1000",
            AccountRole::AccountsReceivable => "1100",
            AccountRole::Inventory => "1200",
            AccountRole::SalesRevenue => "4000",
            AccountRole::SalesReturns => "4050",
            AccountRole::OtherIncome => "4900",
            AccountRole::CostOfGoodsSold => "5000",
        }
    }

    /// Display name used when installing a default chart.
    pub fn default_name(&self) -> &'static str {
        match self {
            AccountRole::Cash => "Cash",
            AccountRole::AccountsReceivable => "Accounts Receivable",
            AccountRole::Inventory => "Inventory",
            AccountRole::SalesRevenue => "Sales Revenue",
            AccountRole::SalesReturns => "Sales Returns & Allowances",
            AccountRole::OtherIncome => "Other Income",
            AccountRole::CostOfGoodsSold => "Cost of Goods Sold",
        }
    }

    /// Accounting classification this role belongs to.
    pub fn kind(&self) -> AccountKind {
        match self {
            AccountRole::Cash | AccountRole::AccountsReceivable | AccountRole::Inventory => {
                AccountKind::Asset
            }
            AccountRole::SalesRevenue | AccountRole::OtherIncome => AccountKind::Revenue,
            AccountRole::SalesReturns => AccountKind::ContraRevenue,
            AccountRole::CostOfGoodsSold => AccountKind::Expense,
        }
    }
}

/// One account in a tenant's chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Account {
    pub code: String,
    pub tenant_id: String,
    pub name: String,
    pub kind: AccountKind,
    /// Structural role, for accounts the engine posts against directly.
    pub role: Option<AccountRole>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Postings
// =============================================================================

/// One side of a double entry, before persistence.
///
/// Construct through [`Posting::debit`] / [`Posting::credit`] so exactly
/// one side is ever set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub account_code: String,
    pub debit: Money,
    pub credit: Money,
    pub description: String,
}

impl Posting {
    pub fn debit(account_code: impl Into<String>, amount: Money, description: impl Into<String>) -> Self {
        Posting {
            account_code: account_code.into(),
            debit: amount,
            credit: Money::zero(),
            description: description.into(),
        }
    }

    pub fn credit(account_code: impl Into<String>, amount: Money, description: impl Into<String>) -> Self {
        Posting {
            account_code: account_code.into(),
            debit: Money::zero(),
            credit: amount,
            description: description.into(),
        }
    }

    /// Checks the one-sided-and-positive rule for this posting.
    pub fn validate(&self) -> CoreResult<()> {
        let invalid = |reason: &str| CoreError::InvalidPosting {
            account_code: self.account_code.clone(),
            reason: reason.to_string(),
        };

        if self.debit.is_negative() || self.credit.is_negative() {
            return Err(invalid("negative amount"));
        }
        if self.debit.is_zero() && self.credit.is_zero() {
            return Err(invalid("both sides zero"));
        }
        if !self.debit.is_zero() && !self.credit.is_zero() {
            return Err(invalid("both sides set"));
        }
        Ok(())
    }
}

/// A balanced set of postings for one business event.
///
/// Built with the fluent `debit`/`credit` methods, validated once, then
/// handed to the journal repository for persistence inside the active
/// unit of work.
///
/// ## Example
/// ```rust
/// use saldo_core::journal::PostingBatch;
/// use saldo_core::money::Money;
///
/// let batch = PostingBatch::new()
///     .debit("1000", Money::from_cents(3000), "Cash received")
///     .credit("4000", Money::from_cents(3000), "Sales revenue");
/// assert!(batch.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PostingBatch {
    postings: Vec<Posting>,
}

impl PostingBatch {
    pub fn new() -> Self {
        PostingBatch::default()
    }

    /// Adds a debit posting. Zero amounts are skipped so callers can pass
    /// optional legs (e.g. the unpaid portion of a fully paid sale)
    /// without branching.
    pub fn debit(
        mut self,
        account_code: impl Into<String>,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        if !amount.is_zero() {
            self.postings.push(Posting::debit(account_code, amount, description));
        }
        self
    }

    /// Adds a credit posting. Zero amounts are skipped, like [`Self::debit`].
    pub fn credit(
        mut self,
        account_code: impl Into<String>,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        if !amount.is_zero() {
            self.postings.push(Posting::credit(account_code, amount, description));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn debit_total(&self) -> Money {
        self.postings.iter().map(|p| p.debit).sum()
    }

    pub fn credit_total(&self) -> Money {
        self.postings.iter().map(|p| p.credit).sum()
    }

    /// Validates the whole batch: non-empty, every posting well-formed,
    /// and debits equal to credits exactly.
    pub fn validate(&self) -> CoreResult<()> {
        if self.postings.is_empty() {
            return Err(CoreError::EmptyJournalBatch);
        }
        for posting in &self.postings {
            posting.validate()?;
        }

        let debits = self.debit_total();
        let credits = self.credit_total();
        if debits != credits {
            return Err(CoreError::UnbalancedJournal { debits, credits });
        }
        Ok(())
    }

    pub fn postings(&self) -> &[Posting] {
        &self.postings
    }

    pub fn into_postings(self) -> Vec<Posting> {
        self.postings
    }
}

// =============================================================================
// Persisted Journal Entries
// =============================================================================

/// One persisted journal line.
///
/// Append-only. Corrections are new reversing entries, never updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct JournalEntry {
    pub id: String,
    pub tenant_id: String,
    /// Groups the lines of one business event.
    pub batch_id: String,
    pub account_code: String,
    pub debit_cents: i64,
    pub credit_cents: i64,
    pub description: String,
    /// Originating record: "order", "return", "payment".
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    /// Accounting period marker, `YYYY-MM`.
    pub period: String,
    pub posted_at: DateTime<Utc>,
}

impl JournalEntry {
    #[inline]
    pub fn debit(&self) -> Money {
        Money::from_cents(self.debit_cents)
    }

    #[inline]
    pub fn credit(&self) -> Money {
        Money::from_cents(self.credit_cents)
    }
}

// =============================================================================
// Accounting Periods
// =============================================================================

/// Open/closed state of an accounting period.
///
/// Absent rows count as open; closing writes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Open,
    Closed,
}

/// The `YYYY-MM` period marker for a timestamp.
pub fn period_for(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// A closable accounting period.
///
/// Rows exist only for periods that were explicitly closed (or reopened).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AccountingPeriod {
    pub tenant_id: String,
    /// `YYYY-MM` marker.
    pub period: String,
    pub status: PeriodStatus,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<String>,
}

impl AccountingPeriod {
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.status == PeriodStatus::Closed
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
