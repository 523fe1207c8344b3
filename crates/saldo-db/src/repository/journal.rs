//! # Journal Repository
//!
//! The chart of accounts, append-only journal entries, and accounting
//! periods.
//!
//! ## Role Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Postings are built against structural roles, never literal codes:     │
//! │                                                                         │
//! │    AccountRole::Cash ──► chart lookup ──► Account { code: "1000", … }  │
//! │                                                                         │
//! │  A tenant may renumber its chart freely; the partial unique index on   │
//! │  (tenant_id, role) guarantees at most one active mapping per role.     │
//! │  A missing mapping surfaces as None and the engine turns it into a     │
//! │  configuration error before any row is written.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are append-only: corrections are new reversing batches. The
//! caller validates batch balance before posting; the schema CHECK on
//! journal rows backs up the one-sided-posting rule.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use saldo_core::journal::{
    Account, AccountKind, AccountRole, AccountingPeriod, JournalEntry, PostingBatch,
};

/// Repository for the chart of accounts, journal entries and periods.
#[derive(Debug, Clone)]
pub struct JournalRepository {
    pool: SqlitePool,
}

const ACCOUNT_COLUMNS: &str = "code, tenant_id, name, kind, role, is_active, created_at";

const ENTRY_COLUMNS: &str = "id, tenant_id, batch_id, account_code, debit_cents, credit_cents, \
     description, reference_type, reference_id, period, posted_at";

const PERIOD_COLUMNS: &str = "tenant_id, period, status, closed_at, closed_by";

/// One line of a trial balance: an account's summed activity in a period.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrialBalanceRow {
    pub account_code: String,
    pub account_name: String,
    pub kind: AccountKind,
    pub debit_cents: i64,
    pub credit_cents: i64,
}

impl JournalRepository {
    /// Creates a new JournalRepository.
    pub fn new(pool: SqlitePool) -> Self {
        JournalRepository { pool }
    }

    /// Lists a tenant's chart of accounts ordered by code.
    pub async fn chart(&self, tenant_id: &str) -> DbResult<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM chart_of_accounts \
             WHERE tenant_id = ?1 ORDER BY code"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(accounts)
    }

    /// All journal lines written for one business record.
    pub async fn entries_for_reference(
        &self,
        tenant_id: &str,
        reference_type: &str,
        reference_id: &str,
    ) -> DbResult<Vec<JournalEntry>> {
        let entries = sqlx::query_as::<_, JournalEntry>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries \
             WHERE tenant_id = ?1 AND reference_type = ?2 AND reference_id = ?3 \
             ORDER BY posted_at, id"
        ))
        .bind(tenant_id)
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Per-account debit/credit sums for one period.
    ///
    /// A correct ledger always balances: total debits equal total credits
    /// across the returned rows.
    pub async fn trial_balance(
        &self,
        tenant_id: &str,
        period: &str,
    ) -> DbResult<Vec<TrialBalanceRow>> {
        let rows = sqlx::query_as::<_, TrialBalanceRow>(
            "SELECT je.account_code, coa.name AS account_name, coa.kind, \
                    COALESCE(SUM(je.debit_cents), 0) AS debit_cents, \
                    COALESCE(SUM(je.credit_cents), 0) AS credit_cents \
             FROM journal_entries je \
             JOIN chart_of_accounts coa \
               ON coa.tenant_id = je.tenant_id AND coa.code = je.account_code \
             WHERE je.tenant_id = ?1 AND je.period = ?2 \
             GROUP BY je.account_code, coa.name, coa.kind \
             ORDER BY je.account_code",
        )
        .bind(tenant_id)
        .bind(period)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Gets a period row. Absent rows mean the period has never been
    /// closed and counts as open.
    pub async fn period(
        &self,
        tenant_id: &str,
        period: &str,
    ) -> DbResult<Option<AccountingPeriod>> {
        let row = sqlx::query_as::<_, AccountingPeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM accounting_periods \
             WHERE tenant_id = ?1 AND period = ?2"
        ))
        .bind(tenant_id)
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // =========================================================================
    // Unit-of-work functions
    // =========================================================================

    /// Installs the default chart: one account per structural role, using
    /// the conventional codes. Idempotent, and a no-op for any role the
    /// tenant has already mapped to a custom account.
    pub async fn install_default_chart(
        conn: &mut SqliteConnection,
        tenant_id: &str,
    ) -> DbResult<()> {
        let now = Utc::now();
        for role in AccountRole::all() {
            sqlx::query(
                "INSERT OR IGNORE INTO chart_of_accounts \
                     (code, tenant_id, name, kind, role, is_active, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            )
            .bind(role.default_code())
            .bind(tenant_id)
            .bind(role.default_name())
            .bind(role.kind())
            .bind(role)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        debug!(tenant_id = %tenant_id, "Default chart installed");
        Ok(())
    }

    /// Inserts one account.
    pub async fn insert_account(conn: &mut SqliteConnection, account: &Account) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO chart_of_accounts \
                 (code, tenant_id, name, kind, role, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&account.code)
        .bind(&account.tenant_id)
        .bind(&account.name)
        .bind(account.kind)
        .bind(account.role)
        .bind(account.is_active)
        .bind(account.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Resolves the active account mapped to a structural role.
    ///
    /// ## Returns
    /// * `Ok(None)` - no active account carries this role; the caller
    ///   treats it as a chart configuration error
    pub async fn account_for_role(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        role: AccountRole,
    ) -> DbResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM chart_of_accounts \
             WHERE tenant_id = ?1 AND role = ?2 AND is_active = 1"
        ))
        .bind(tenant_id)
        .bind(role)
        .fetch_optional(conn)
        .await?;

        Ok(account)
    }

    /// Persists a validated posting batch as journal entries.
    ///
    /// One `batch_id` groups the lines; all rows share the reference,
    /// period and timestamp. Callers validate balance beforehand (see
    /// [`PostingBatch::validate`]); this function writes verbatim.
    ///
    /// ## Returns
    /// The generated batch id.
    pub async fn post(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        batch: &PostingBatch,
        reference_type: Option<&str>,
        reference_id: Option<&str>,
        period: &str,
        posted_at: DateTime<Utc>,
    ) -> DbResult<String> {
        let batch_id = crate::repository::new_id();

        for posting in batch.postings() {
            sqlx::query(
                "INSERT INTO journal_entries (\
                     id, tenant_id, batch_id, account_code, debit_cents, credit_cents, \
                     description, reference_type, reference_id, period, posted_at\
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(crate::repository::new_id())
            .bind(tenant_id)
            .bind(&batch_id)
            .bind(&posting.account_code)
            .bind(posting.debit.cents())
            .bind(posting.credit.cents())
            .bind(&posting.description)
            .bind(reference_type)
            .bind(reference_id)
            .bind(period)
            .bind(posted_at)
            .execute(&mut *conn)
            .await?;
        }

        debug!(
            batch_id = %batch_id,
            postings = batch.postings().len(),
            debits = batch.debit_total().cents(),
            "Journal batch posted"
        );
        Ok(batch_id)
    }

    /// Reads a period row inside an open unit of work.
    pub async fn period_for_update(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        period: &str,
    ) -> DbResult<Option<AccountingPeriod>> {
        let row = sqlx::query_as::<_, AccountingPeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM accounting_periods \
             WHERE tenant_id = ?1 AND period = ?2"
        ))
        .bind(tenant_id)
        .bind(period)
        .fetch_optional(conn)
        .await?;

        Ok(row)
    }

    /// Closes a period. Idempotent: closing a closed period refreshes the
    /// close metadata.
    pub async fn close_period(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        period: &str,
        closed_by: &str,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO accounting_periods (tenant_id, period, status, closed_at, closed_by) \
             VALUES (?1, ?2, 'closed', ?3, ?4) \
             ON CONFLICT (tenant_id, period) DO UPDATE \
                 SET status = 'closed', closed_at = ?3, closed_by = ?4",
        )
        .bind(tenant_id)
        .bind(period)
        .bind(at)
        .bind(closed_by)
        .execute(conn)
        .await?;

        debug!(period = %period, closed_by = %closed_by, "Accounting period closed");
        Ok(())
    }

    /// Reopens a closed period. The last close metadata stays on the row
    /// for audit.
    pub async fn reopen_period(
        conn: &mut SqliteConnection,
        tenant_id: &str,
        period: &str,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE accounting_periods SET status = 'open' \
             WHERE tenant_id = ?1 AND period = ?2",
        )
        .bind(tenant_id)
        .bind(period)
        .execute(conn)
        .await?;

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
    use saldo_core::journal::PeriodStatus;
    use saldo_core::Money;

    async fn db_with_chart() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut uow = db.begin().await.unwrap();
        JournalRepository::install_default_chart(uow.conn(), "t1")
            .await
            .unwrap();
        uow.commit().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_default_chart_maps_every_role() {
        let db = db_with_chart().await;

        let mut uow = db.begin().await.unwrap();
        for role in AccountRole::all() {
            let account = JournalRepository::account_for_role(uow.conn(), "t1", role)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(account.code, role.default_code());
            assert_eq!(account.kind, role.kind());
        }

        // Reinstalling changes nothing
        JournalRepository::install_default_chart(uow.conn(), "t1")
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(db.journal().chart("t1").await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_missing_role_resolves_to_none() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        let account = JournalRepository::account_for_role(uow.conn(), "t1", AccountRole::Cash)
            .await
            .unwrap();
        assert!(account.is_none());
    }

    #[tokio::test]
    async fn test_posted_batch_shares_one_batch_id() {
        let db = db_with_chart().await;

        let batch = PostingBatch::new()
            .debit("1000", Money::from_cents(3000), "Cash received")
            .credit("4000", Money::from_cents(3000), "Sales revenue")
            .debit("5000", Money::from_cents(1500), "Cost of goods sold")
            .credit("1200", Money::from_cents(1500), "Inventory relieved");
        batch.validate().unwrap();

        let mut uow = db.begin().await.unwrap();
        let batch_id = JournalRepository::post(
            uow.conn(),
            "t1",
            &batch,
            Some("order"),
            Some("o1"),
            "2026-08",
            Utc::now(),
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();

        let entries = db
            .journal()
            .entries_for_reference("t1", "order", "o1")
            .await
            .unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.batch_id == batch_id));

        let debits: i64 = entries.iter().map(|e| e.debit_cents).sum();
        let credits: i64 = entries.iter().map(|e| e.credit_cents).sum();
        assert_eq!(debits, 4500);
        assert_eq!(credits, 4500);
    }

    #[tokio::test]
    async fn test_trial_balance_balances() {
        let db = db_with_chart().await;

        let batch = PostingBatch::new()
            .debit("1000", Money::from_cents(3000), "Cash")
            .credit("4000", Money::from_cents(3000), "Revenue")
            .debit("5000", Money::from_cents(1500), "COGS")
            .credit("1200", Money::from_cents(1500), "Inventory");

        let mut uow = db.begin().await.unwrap();
        JournalRepository::post(
            uow.conn(),
            "t1",
            &batch,
            Some("order"),
            Some("o1"),
            "2026-08",
            Utc::now(),
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();

        let rows = db.journal().trial_balance("t1", "2026-08").await.unwrap();
        assert_eq!(rows.len(), 4);

        let debits: i64 = rows.iter().map(|r| r.debit_cents).sum();
        let credits: i64 = rows.iter().map(|r| r.credit_cents).sum();
        assert_eq!(debits, credits);

        let cash = rows.iter().find(|r| r.account_code == "1000").unwrap();
        assert_eq!(cash.account_name, "Cash");
        assert_eq!(cash.kind, AccountKind::Asset);
        assert_eq!(cash.debit_cents, 3000);

        // Another period sees nothing
        assert!(db.journal().trial_balance("t1", "2026-09").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_and_reopen_period() {
        let db = db_with_chart().await;

        // Never-closed periods have no row
        assert!(db.journal().period("t1", "2026-07").await.unwrap().is_none());

        let mut uow = db.begin().await.unwrap();
        JournalRepository::close_period(uow.conn(), "t1", "2026-07", "admin", Utc::now())
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let period = db.journal().period("t1", "2026-07").await.unwrap().unwrap();
        assert!(period.is_closed());
        assert_eq!(period.closed_by.as_deref(), Some("admin"));

        let mut uow = db.begin().await.unwrap();
        JournalRepository::reopen_period(uow.conn(), "t1", "2026-07").await.unwrap();
        uow.commit().await.unwrap();

        let period = db.journal().period("t1", "2026-07").await.unwrap().unwrap();
        assert_eq!(period.status, PeriodStatus::Open);
        // Last close metadata survives for audit
        assert!(period.closed_at.is_some());
    }
}
