//! # Customer Repository
//!
//! Customers, their balance pair, and the append-only transaction ledger.
//!
//! ## Optimistic Concurrency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every balance write is conditional on the version it read:            │
//! │                                                                         │
//! │    UPDATE customers SET pending = …, advance = …, version = version+1  │
//! │    WHERE id = ? AND version = ?            ← version read in this uow  │
//! │                                                                         │
//! │  rows_affected = 0 means another sale applied against the same         │
//! │  starting balance first. The caller aborts the unit of work and        │
//! │  retries from the top with fresh reads.                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transactions carry a JSON line-item snapshot, so they map through a
//! private row type instead of deriving `FromRow` directly.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use saldo_core::customers::{
    BalanceSnapshot, Customer, CustomerTransaction, CustomerTransactionKind, SettlementStatus,
    TransactionLine,
};
use saldo_core::Money;

/// Repository for customers and their transaction ledger.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

const CUSTOMER_COLUMNS: &str = "id, tenant_id, name, phone, pending_balance_cents, \
     advance_balance_cents, credit_limit_cents, is_active, version, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, tenant_id, customer_id, kind, amount_cents, \
     pending_before_cents, advance_before_cents, pending_after_cents, advance_after_cents, \
     remaining_cents, status, lines, reference_type, reference_id, notes, created_at";

/// Database image of a customer transaction: `lines` is stored as JSON text.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: String,
    tenant_id: String,
    customer_id: String,
    kind: CustomerTransactionKind,
    amount_cents: i64,
    pending_before_cents: i64,
    advance_before_cents: i64,
    pending_after_cents: i64,
    advance_after_cents: i64,
    remaining_cents: i64,
    status: SettlementStatus,
    lines: String,
    reference_type: Option<String>,
    reference_id: Option<String>,
    notes: Option<String>,
    created_at: chrono::DateTime<Utc>,
}

impl TransactionRow {
    fn into_transaction(self) -> DbResult<CustomerTransaction> {
        let lines: Vec<TransactionLine> = serde_json::from_str(&self.lines)?;
        Ok(CustomerTransaction {
            id: self.id,
            tenant_id: self.tenant_id,
            customer_id: self.customer_id,
            kind: self.kind,
            amount_cents: self.amount_cents,
            pending_before_cents: self.pending_before_cents,
            advance_before_cents: self.advance_before_cents,
            pending_after_cents: self.pending_after_cents,
            advance_after_cents: self.advance_after_cents,
            remaining_cents: self.remaining_cents,
            status: self.status,
            lines,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Gets a customer by id.
    pub async fn get_by_id(&self, tenant_id: &str, id: &str) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    /// Lists active customers, most recently updated first.
    pub async fn list_active(&self, tenant_id: &str, limit: u32) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers \
             WHERE tenant_id = ?1 AND is_active = 1 \
             ORDER BY updated_at DESC LIMIT ?2"
        ))
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(customers)
    }

    /// Lists a customer's ledger, newest first.
    pub async fn transactions(
        &self,
        tenant_id: &str,
        customer_id: &str,
        limit: u32,
    ) -> DbResult<Vec<CustomerTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM customer_transactions \
             WHERE tenant_id = ?1 AND customer_id = ?2 \
             ORDER BY created_at DESC LIMIT ?3"
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    // =========================================================================
    // Unit-of-work functions
    // =========================================================================

    /// Reads a customer inside an open unit of work.
    ///
    /// The returned `version` is what balance writes in this unit of work
    /// must be guarded on.
    pub async fn find(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        id: &str,
    ) -> DbResult<Customer> {
        sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE tenant_id = ?1 AND id = ?2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| DbError::not_found("Customer", id))
    }

    /// Inserts a new customer.
    pub async fn insert(conn: &mut SqliteConnection, customer: &Customer) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO customers (\
                 id, tenant_id, name, phone, pending_balance_cents, advance_balance_cents, \
                 credit_limit_cents, is_active, version, created_at, updated_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&customer.id)
        .bind(&customer.tenant_id)
        .bind(&customer.name)
        .bind(&customer.phone)
        .bind(customer.pending_balance_cents)
        .bind(customer.advance_balance_cents)
        .bind(customer.credit_limit_cents)
        .bind(customer.is_active)
        .bind(customer.version)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Writes a new balance pair, guarded by the version the caller read.
    ///
    /// ## Errors
    /// * `DbError::VersionConflict` - another writer bumped the version
    ///   since `expected_version` was read; abort and retry the unit of work
    pub async fn update_balances(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        customer_id: &str,
        expected_version: i64,
        after: BalanceSnapshot,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE customers SET \
                 pending_balance_cents = ?4, \
                 advance_balance_cents = ?5, \
                 version = version + 1, \
                 updated_at = ?6 \
             WHERE tenant_id = ?1 AND id = ?2 AND version = ?3",
        )
        .bind(tenant_id)
        .bind(customer_id)
        .bind(expected_version)
        .bind(after.pending.cents())
        .bind(after.advance.cents())
        .bind(Utc::now())
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::version_conflict("Customer", customer_id));
        }

        debug!(
            customer_id = %customer_id,
            pending = after.pending.cents(),
            advance = after.advance.cents(),
            "Customer balances updated"
        );
        Ok(())
    }

    /// Appends one transaction to the customer's ledger.
    pub async fn insert_transaction(
        conn: &mut SqliteConnection,
        transaction: &CustomerTransaction,
    ) -> DbResult<()> {
        let lines = serde_json::to_string(&transaction.lines)?;
        sqlx::query(
            "INSERT INTO customer_transactions (\
                 id, tenant_id, customer_id, kind, amount_cents, \
                 pending_before_cents, advance_before_cents, \
                 pending_after_cents, advance_after_cents, \
                 remaining_cents, status, lines, reference_type, reference_id, \
                 notes, created_at\
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )
        .bind(&transaction.id)
        .bind(&transaction.tenant_id)
        .bind(&transaction.customer_id)
        .bind(transaction.kind)
        .bind(transaction.amount_cents)
        .bind(transaction.pending_before_cents)
        .bind(transaction.advance_before_cents)
        .bind(transaction.pending_after_cents)
        .bind(transaction.advance_after_cents)
        .bind(transaction.remaining_cents)
        .bind(transaction.status)
        .bind(lines)
        .bind(&transaction.reference_type)
        .bind(&transaction.reference_id)
        .bind(&transaction.notes)
        .bind(transaction.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Unsettled invoices for a customer, oldest first.
    ///
    /// Payment allocation walks this list front to back.
    pub async fn open_invoices(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        customer_id: &str,
    ) -> DbResult<Vec<CustomerTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM customer_transactions \
             WHERE tenant_id = ?1 AND customer_id = ?2 \
               AND kind = 'invoice' AND status IN ('open', 'partial') \
             ORDER BY created_at ASC"
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_all(conn)
        .await?;

        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    /// The invoice transaction an order produced, if any.
    pub async fn invoice_for_order(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        order_id: &str,
    ) -> DbResult<Option<CustomerTransaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM customer_transactions \
             WHERE tenant_id = ?1 AND kind = 'invoice' \
               AND reference_type = 'order' AND reference_id = ?2"
        ))
        .bind(tenant_id)
        .bind(order_id)
        .fetch_optional(conn)
        .await?;

        row.map(TransactionRow::into_transaction).transpose()
    }

    /// Rewrites an invoice's unsettled remainder and settlement status.
    pub async fn settle_invoice(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        transaction_id: &str,
        remaining: Money,
        status: SettlementStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE customer_transactions SET remaining_cents = ?3, status = ?4 \
             WHERE tenant_id = ?1 AND id = ?2 AND kind = 'invoice'",
        )
        .bind(tenant_id)
        .bind(transaction_id)
        .bind(remaining.cents())
        .bind(status)
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CustomerTransaction", transaction_id));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    fn customer(id: &str, pending: i64) -> Customer {
        let now = Utc::now();
        Customer {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            name: "Ayesha Khan".to_string(),
            phone: Some("+92-300-5550123".to_string()),
            pending_balance_cents: pending,
            advance_balance_cents: 0,
            credit_limit_cents: 100_000,
            is_active: true,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn invoice(id: &str, customer_id: &str, total: i64, created_at: chrono::DateTime<Utc>) -> CustomerTransaction {
        CustomerTransaction {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            customer_id: customer_id.to_string(),
            kind: CustomerTransactionKind::Invoice,
            amount_cents: total,
            pending_before_cents: 0,
            advance_before_cents: 0,
            pending_after_cents: total,
            advance_after_cents: 0,
            remaining_cents: total,
            status: SettlementStatus::Open,
            lines: vec![TransactionLine {
                description: "Widget".to_string(),
                quantity: 1,
                amount_cents: total,
            }],
            reference_type: Some("order".to_string()),
            reference_id: Some(format!("order-{id}")),
            notes: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        CustomerRepository::insert(uow.conn(), &customer("c1", 2500))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let found = db.customers().get_by_id("t1", "c1").await.unwrap().unwrap();
        assert_eq!(found.name, "Ayesha Khan");
        assert_eq!(found.pending_balance_cents, 2500);
        assert_eq!(found.version, 1);

        // Other tenants cannot see it
        assert!(db.customers().get_by_id("t2", "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_balance_write_guards_on_version() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        CustomerRepository::insert(uow.conn(), &customer("c1", 0))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let after = BalanceSnapshot::new(Money::from_cents(3000), Money::zero());

        // Correct version applies and bumps
        let mut uow = db.begin().await.unwrap();
        CustomerRepository::update_balances(uow.conn(), "t1", "c1", 1, after)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let found = db.customers().get_by_id("t1", "c1").await.unwrap().unwrap();
        assert_eq!(found.pending_balance_cents, 3000);
        assert_eq!(found.version, 2);

        // Stale version conflicts and leaves the row alone
        let mut uow = db.begin().await.unwrap();
        let err = CustomerRepository::update_balances(
            uow.conn(),
            "t1",
            "c1",
            1,
            BalanceSnapshot::zero(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::VersionConflict { .. }));
        assert!(err.is_retryable());
        uow.abort().await.unwrap();

        let found = db.customers().get_by_id("t1", "c1").await.unwrap().unwrap();
        assert_eq!(found.pending_balance_cents, 3000);
    }

    #[tokio::test]
    async fn test_transaction_lines_survive_json_roundtrip() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        CustomerRepository::insert(uow.conn(), &customer("c1", 0))
            .await
            .unwrap();
        CustomerRepository::insert_transaction(uow.conn(), &invoice("tx1", "c1", 3000, Utc::now()))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let ledger = db.customers().transactions("t1", "c1", 10).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].lines.len(), 1);
        assert_eq!(ledger[0].lines[0].description, "Widget");
        assert_eq!(ledger[0].lines[0].amount_cents, 3000);
    }

    #[tokio::test]
    async fn test_open_invoices_come_back_oldest_first() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let base = Utc::now();

        let mut uow = db.begin().await.unwrap();
        CustomerRepository::insert(uow.conn(), &customer("c1", 0))
            .await
            .unwrap();

        let old = invoice("tx-old", "c1", 1000, base - chrono::Duration::hours(2));
        let new = invoice("tx-new", "c1", 2000, base);
        let mut settled = invoice("tx-settled", "c1", 500, base - chrono::Duration::hours(1));
        settled.remaining_cents = 0;
        settled.status = SettlementStatus::Settled;

        // Insert out of order on purpose
        CustomerRepository::insert_transaction(uow.conn(), &new).await.unwrap();
        CustomerRepository::insert_transaction(uow.conn(), &settled).await.unwrap();
        CustomerRepository::insert_transaction(uow.conn(), &old).await.unwrap();

        let open = CustomerRepository::open_invoices(uow.conn(), "t1", "c1")
            .await
            .unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, "tx-old");
        assert_eq!(open[1].id, "tx-new");
    }

    #[tokio::test]
    async fn test_settle_invoice_updates_remainder() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        CustomerRepository::insert(uow.conn(), &customer("c1", 0))
            .await
            .unwrap();
        CustomerRepository::insert_transaction(uow.conn(), &invoice("tx1", "c1", 3000, Utc::now()))
            .await
            .unwrap();

        CustomerRepository::settle_invoice(
            uow.conn(),
            "t1",
            "tx1",
            Money::from_cents(1000),
            SettlementStatus::Partial,
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();

        let ledger = db.customers().transactions("t1", "c1", 10).await.unwrap();
        assert_eq!(ledger[0].remaining_cents, 1000);
        assert_eq!(ledger[0].status, SettlementStatus::Partial);
    }
}
