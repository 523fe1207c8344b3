//! # Unit of Work
//!
//! One database transaction, passed explicitly through every repository
//! call that belongs to the same business event.
//!
//! ## Atomic Scope
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Unit of Work Lifecycle                               │
//! │                                                                         │
//! │  let mut uow = db.begin().await?;          ← BEGIN                     │
//! │       │                                                                 │
//! │       ├── OrderRepository::insert(uow.conn(), ..)                      │
//! │       ├── InventoryRepository::decrement(uow.conn(), ..)               │
//! │       ├── CustomerRepository::apply_invoice(uow.conn(), ..)            │
//! │       ├── JournalRepository::post(uow.conn(), ..)                      │
//! │       └── OutboxRepository::enqueue(uow.conn(), ..)                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  uow.commit().await?                       ← COMMIT (all visible)      │
//! │                                                                         │
//! │  ANY failure / early return / caller timeout:                          │
//! │  uow dropped without commit                ← ROLLBACK (nothing visible)│
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Participation is visible in every repository signature: functions that
//! take `&mut SqliteConnection` run inside whatever unit of work handed
//! them the connection. Functions on the pooled repositories do not.

use sqlx::{Sqlite, SqliteConnection, Transaction};

use crate::error::DbResult;

/// An open database transaction with explicit commit.
///
/// Created by [`Database::begin`](crate::pool::Database::begin). Dropping
/// a `UnitOfWork` without calling [`commit`](UnitOfWork::commit) rolls the
/// transaction back, which is what makes a mid-sequence `?` safe: the
/// error propagates, the unit of work drops, no partial writes survive.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        UnitOfWork { tx }
    }

    /// The transaction's connection, for handing to repository functions.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let level = InventoryRepository::level_for_update(uow.conn(), &tenant, &pid).await?;
    /// ```
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Commits the transaction, making every write visible at once.
    pub async fn commit(self) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Explicitly rolls the transaction back.
    ///
    /// Dropping has the same effect; `abort` exists for the paths where
    /// discarding work is the *decision*, so it reads as one.
    pub async fn abort(self) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork").finish_non_exhaustive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::pool::{Database, DbConfig};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let db = test_db().await;

        let mut uow = db.begin().await.unwrap();
        sqlx::query("INSERT INTO order_counters (tenant_id, counter_date, seq) VALUES (?1, ?2, 1)")
            .bind("t1")
            .bind("2026-01-15")
            .execute(uow.conn())
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_counters")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let db = test_db().await;

        {
            let mut uow = db.begin().await.unwrap();
            sqlx::query(
                "INSERT INTO order_counters (tenant_id, counter_date, seq) VALUES (?1, ?2, 1)",
            )
            .bind("t1")
            .bind("2026-01-15")
            .execute(uow.conn())
            .await
            .unwrap();
            // No commit: dropping the unit of work discards the insert
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_counters")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_abort_rolls_back() {
        let db = test_db().await;

        let mut uow = db.begin().await.unwrap();
        sqlx::query("INSERT INTO order_counters (tenant_id, counter_date, seq) VALUES (?1, ?2, 1)")
            .bind("t1")
            .bind("2026-01-15")
            .execute(uow.conn())
            .await
            .unwrap();
        uow.abort().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM order_counters")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
