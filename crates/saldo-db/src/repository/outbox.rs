//! # Outbox Repository
//!
//! The transactional outbox and the per-handler job queue behind it.
//!
//! ## Two Tables, Two Stages
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  event_outbox   written INSIDE the business transaction; an event      │
//! │                 exists if and only if the work it describes committed  │
//! │                                                                         │
//! │  event_jobs     fan-out: one row per (event, handler), created by the  │
//! │                 dispatcher AFTER commit. UNIQUE (event_id, handler)    │
//! │                 makes fan-out idempotent across dispatcher restarts.   │
//! │                                                                         │
//! │  dispatched_at on the event marks fan-out, not handler completion;    │
//! │  per-handler progress lives on the job row.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once. Handlers own their own dedup.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use saldo_core::events::{EventJob, OutboxEvent};

/// Repository for outbox events and handler jobs.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

const EVENT_COLUMNS: &str = "id, tenant_id, event_type, entity_id, payload, created_at, \
     dispatched_at";

const JOB_COLUMNS: &str = "id, event_id, handler, status, attempts, last_error, created_at, \
     updated_at, completed_at";

/// Queue depths, for the dispatcher's periodic stats line.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxCounts {
    pub undispatched_events: i64,
    pub pending_jobs: i64,
    pub failed_jobs: i64,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Events not yet fanned out into jobs, oldest first. Spans tenants:
    /// the dispatcher drains one queue for the whole process.
    pub async fn pending_events(&self, limit: u32) -> DbResult<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<_, OutboxEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_outbox \
             WHERE dispatched_at IS NULL ORDER BY created_at, id LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Jobs still wanting an attempt, oldest first.
    pub async fn pending_jobs(&self, max_attempts: i64, limit: u32) -> DbResult<Vec<EventJob>> {
        let jobs = sqlx::query_as::<_, EventJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM event_jobs \
             WHERE status = 'pending' AND attempts < ?1 \
             ORDER BY created_at, id LIMIT ?2"
        ))
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    /// Loads the event a job points at.
    pub async fn load_event(&self, event_id: &str) -> DbResult<Option<OutboxEvent>> {
        let event = sqlx::query_as::<_, OutboxEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_outbox WHERE id = ?1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    /// Current queue depths.
    pub async fn counts(&self) -> DbResult<OutboxCounts> {
        let undispatched_events: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_outbox WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        let pending_jobs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_jobs WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;
        let failed_jobs: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_jobs WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;

        Ok(OutboxCounts {
            undispatched_events,
            pending_jobs,
            failed_jobs,
        })
    }

    /// Deletes completed jobs and their fully-handled events older than the
    /// cutoff. Failed jobs are kept for inspection.
    pub async fn prune_completed(&self, older_than: DateTime<Utc>) -> DbResult<u64> {
        let jobs = sqlx::query(
            "DELETE FROM event_jobs WHERE status = 'completed' AND completed_at < ?1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        let events = sqlx::query(
            "DELETE FROM event_outbox WHERE dispatched_at < ?1 \
             AND NOT EXISTS (SELECT 1 FROM event_jobs WHERE event_jobs.event_id = event_outbox.id)",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(jobs.rows_affected() + events.rows_affected())
    }

    // =========================================================================
    // Unit-of-work functions
    // =========================================================================

    /// Appends an event to the outbox inside the business transaction.
    ///
    /// If the transaction aborts, the event vanishes with it; committed
    /// work always leaves its event behind.
    pub async fn enqueue(conn: &mut SqliteConnection, event: &OutboxEvent) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO event_outbox \
                 (id, tenant_id, event_type, entity_id, payload, created_at, dispatched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
        )
        .bind(&event.id)
        .bind(&event.tenant_id)
        .bind(&event.event_type)
        .bind(&event.entity_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(conn)
        .await?;

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Outbox event enqueued"
        );
        Ok(())
    }

    /// Creates one pending job per handler for an event. Idempotent:
    /// re-running after a crash skips jobs that already exist.
    pub async fn ensure_jobs(
        conn: &mut SqliteConnection,
        event_id: &str,
        handlers: &[&str],
    ) -> DbResult<()> {
        let now = Utc::now();
        for handler in handlers {
            sqlx::query(
                "INSERT OR IGNORE INTO event_jobs \
                     (id, event_id, handler, status, attempts, last_error, \
                      created_at, updated_at, completed_at) \
                 VALUES (?1, ?2, ?3, 'pending', 0, NULL, ?4, ?4, NULL)",
            )
            .bind(crate::repository::new_id())
            .bind(event_id)
            .bind(handler)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Marks an event fanned out.
    pub async fn mark_dispatched(conn: &mut SqliteConnection, event_id: &str) -> DbResult<()> {
        sqlx::query("UPDATE event_outbox SET dispatched_at = ?2 WHERE id = ?1")
            .bind(event_id)
            .bind(Utc::now())
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Marks a job done.
    pub async fn mark_job_completed(conn: &mut SqliteConnection, job_id: &str) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE event_jobs SET status = 'completed', completed_at = ?2, updated_at = ?2 \
             WHERE id = ?1",
        )
        .bind(job_id)
        .bind(now)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Records a failed attempt. The job stays pending until it burns
    /// through `max_attempts`, then parks as failed.
    pub async fn mark_job_failed(
        conn: &mut SqliteConnection,
        job_id: &str,
        error: &str,
        max_attempts: i64,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE event_jobs SET \
                 attempts = attempts + 1, \
                 last_error = ?2, \
                 status = CASE WHEN attempts + 1 >= ?3 THEN 'failed' ELSE 'pending' END, \
                 updated_at = ?4 \
             WHERE id = ?1",
        )
        .bind(job_id)
        .bind(error)
        .bind(max_attempts)
        .bind(Utc::now())
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
    use saldo_core::events::JobStatus;

    fn event(id: &str) -> OutboxEvent {
        OutboxEvent {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            event_type: "order.created".to_string(),
            entity_id: "o1".to_string(),
            payload: r#"{"orderId":"o1"}"#.to_string(),
            created_at: Utc::now(),
            dispatched_at: None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_rolls_back_with_the_business_transaction() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        OutboxRepository::enqueue(uow.conn(), &event("e1")).await.unwrap();
        uow.abort().await.unwrap();

        assert!(db.outbox().pending_events(10).await.unwrap().is_empty());

        let mut uow = db.begin().await.unwrap();
        OutboxRepository::enqueue(uow.conn(), &event("e2")).await.unwrap();
        uow.commit().await.unwrap();

        let pending = db.outbox().pending_events(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "e2");
    }

    #[tokio::test]
    async fn test_fan_out_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        OutboxRepository::enqueue(uow.conn(), &event("e1")).await.unwrap();
        OutboxRepository::ensure_jobs(uow.conn(), "e1", &["documents", "metrics"])
            .await
            .unwrap();
        // A crashed dispatcher would re-run fan-out; nothing doubles
        OutboxRepository::ensure_jobs(uow.conn(), "e1", &["documents", "metrics"])
            .await
            .unwrap();
        OutboxRepository::mark_dispatched(uow.conn(), "e1").await.unwrap();
        uow.commit().await.unwrap();

        let jobs = db.outbox().pending_jobs(3, 10).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(db.outbox().pending_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_job_parks_as_failed_after_max_attempts() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        OutboxRepository::enqueue(uow.conn(), &event("e1")).await.unwrap();
        OutboxRepository::ensure_jobs(uow.conn(), "e1", &["documents"]).await.unwrap();
        uow.commit().await.unwrap();

        let job_id = db.outbox().pending_jobs(3, 10).await.unwrap()[0].id.clone();

        for attempt in 1..=3 {
            let mut uow = db.begin().await.unwrap();
            OutboxRepository::mark_job_failed(uow.conn(), &job_id, "renderer offline", 3)
                .await
                .unwrap();
            uow.commit().await.unwrap();

            let remaining = db.outbox().pending_jobs(3, 10).await.unwrap();
            if attempt < 3 {
                assert_eq!(remaining.len(), 1, "attempt {attempt} should leave it pending");
                assert_eq!(remaining[0].attempts, attempt);
                assert!(remaining[0].wants_attempt(3));
            } else {
                assert!(remaining.is_empty(), "third failure parks the job");
            }
        }

        let counts = db.outbox().counts().await.unwrap();
        assert_eq!(counts.failed_jobs, 1);
        assert_eq!(counts.pending_jobs, 0);
    }

    #[tokio::test]
    async fn test_completed_jobs_prune_with_their_events() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        OutboxRepository::enqueue(uow.conn(), &event("e1")).await.unwrap();
        OutboxRepository::ensure_jobs(uow.conn(), "e1", &["documents"]).await.unwrap();
        OutboxRepository::mark_dispatched(uow.conn(), "e1").await.unwrap();
        uow.commit().await.unwrap();

        let job_id = db.outbox().pending_jobs(3, 10).await.unwrap()[0].id.clone();
        let mut uow = db.begin().await.unwrap();
        OutboxRepository::mark_job_completed(uow.conn(), &job_id).await.unwrap();
        uow.commit().await.unwrap();

        let pruned = db
            .outbox()
            .prune_completed(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(pruned, 2);

        assert!(db.outbox().load_event("e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_status_parses() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        OutboxRepository::enqueue(uow.conn(), &event("e1")).await.unwrap();
        OutboxRepository::ensure_jobs(uow.conn(), "e1", &["documents"]).await.unwrap();
        uow.commit().await.unwrap();

        let jobs = db.outbox().pending_jobs(3, 10).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Pending);
        assert_eq!(jobs[0].handler, "documents");
        assert_eq!(jobs[0].event_id, "e1");
    }
}
