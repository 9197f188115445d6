//! Job dispatch queue (§4.H): at-most-one-leaseholder job assignment with
//! retry-on-fail. `jobs` and `leased_jobs` are genuine relational tables
//! (not KV-JSON blobs), listed alongside backends/pools/models as
//! first-class rows; the invariant "a job is either in pending or in
//! leased, never both" is cheapest to enforce as two tables moved between
//! inside one transaction, following a check-existence → act → commit
//! discipline.

use crate::error::StoreError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// `{id, taskType, payload, scheduledFor, validUntil, createdAt, retryCount}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub scheduled_for: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl Job {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
            scheduled_for: now,
            valid_until: None,
            created_at: now,
            retry_count: 0,
        }
    }
}

/// `Job ⊕ {leaser, leaseExpiration}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeasedJob {
    pub job: Job,
    pub leaser: String,
    pub lease_expiration: DateTime<Utc>,
}

pub struct DispatchQueue {
    pool: SqlitePool,
}

impl DispatchQueue {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY NOT NULL,
                task_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                scheduled_for TEXT NOT NULL,
                valid_until TEXT,
                created_at TEXT NOT NULL,
                retry_count INTEGER NOT NULL
            );",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS leased_jobs (
                job_id TEXT PRIMARY KEY NOT NULL,
                task_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                scheduled_for TEXT NOT NULL,
                valid_until TEXT,
                created_at TEXT NOT NULL,
                retry_count INTEGER NOT NULL,
                leaser TEXT NOT NULL,
                lease_expiration TEXT NOT NULL
            );",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_task_type ON jobs(task_type, scheduled_for);")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Enqueues a job producers have created.
    pub async fn enqueue(&self, job: Job) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO jobs (id, task_type, payload, scheduled_for, valid_until, created_at, retry_count)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.task_type)
        .bind(job.payload.to_string())
        .bind(job.scheduled_for.to_rfc3339())
        .bind(job.valid_until.map(|v| v.to_rfc3339()))
        .bind(job.created_at.to_rfc3339())
        .bind(job.retry_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Picks one `jobType` uniformly at random among `job_types`, pops the
    /// oldest pending job of that type, and leases it to `leaser_id`. If
    /// no job of the chosen type exists, returns `NotFound` — callers may
    /// retry with a different selection (§4.H, §9 open question on the
    /// uniform-random bias).
    pub async fn assign_pending_job(
        &self,
        leaser_id: &str,
        lease_duration: std::time::Duration,
        job_types: &[&str],
    ) -> Result<LeasedJob, StoreError> {
        if job_types.is_empty() {
            return Err(StoreError::Other("assign_pending_job requires at least one job type".into()));
        }
        let chosen = job_types
            .choose(&mut rand::thread_rng())
            .expect("job_types is non-empty");

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, task_type, payload, scheduled_for, valid_until, created_at, retry_count
             FROM jobs WHERE task_type = ? ORDER BY scheduled_for ASC, created_at ASC LIMIT 1",
        )
        .bind(chosen)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("no pending job of type {chosen}")));
        };

        let job = row_to_job(&row)?;

        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(&job.id)
            .execute(&mut *tx)
            .await?;

        let lease_expiration = Utc::now() + ChronoDuration::from_std(lease_duration)
            .map_err(|e| StoreError::Other(e.to_string()))?;

        sqlx::query(
            "INSERT INTO leased_jobs (job_id, task_type, payload, scheduled_for, valid_until, created_at, retry_count, leaser, lease_expiration)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.task_type)
        .bind(job.payload.to_string())
        .bind(job.scheduled_for.to_rfc3339())
        .bind(job.valid_until.map(|v| v.to_rfc3339()))
        .bind(job.created_at.to_rfc3339())
        .bind(job.retry_count as i64)
        .bind(leaser_id)
        .bind(lease_expiration.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LeasedJob {
            job,
            leaser: leaser_id.to_string(),
            lease_expiration,
        })
    }

    /// Deletes the lease iff `leaser == leaserID`; not-owner otherwise.
    pub async fn mark_job_as_done(&self, job_id: &str, leaser_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let leaser: Option<String> = sqlx::query_scalar("SELECT leaser FROM leased_jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

        match leaser {
            None => {
                tx.rollback().await?;
                Err(StoreError::NotFound(format!("leased job {job_id}")))
            }
            Some(owner) if owner != leaser_id => {
                tx.rollback().await?;
                Err(StoreError::NotOwner)
            }
            Some(_) => {
                sqlx::query("DELETE FROM leased_jobs WHERE job_id = ?")
                    .bind(job_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                Ok(())
            }
        }
    }

    /// Atomically deletes the lease, increments `retryCount`, and
    /// reappends the job to `jobs`.
    pub async fn mark_job_as_failed(&self, job_id: &str, leaser_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT task_type, payload, scheduled_for, valid_until, created_at, retry_count, leaser
             FROM leased_jobs WHERE job_id = ?",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(StoreError::NotFound(format!("leased job {job_id}")));
        };

        let owner: String = row.get("leaser");
        if owner != leaser_id {
            tx.rollback().await?;
            return Err(StoreError::NotOwner);
        }

        let retry_count: i64 = row.get("retry_count");
        let task_type: String = row.get("task_type");
        let payload: String = row.get("payload");
        let scheduled_for: String = row.get("scheduled_for");
        let valid_until: Option<String> = row.get("valid_until");
        let created_at: String = row.get("created_at");

        sqlx::query("DELETE FROM leased_jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO jobs (id, task_type, payload, scheduled_for, valid_until, created_at, retry_count)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(task_type)
        .bind(payload)
        .bind(scheduled_for)
        .bind(valid_until)
        .bind(created_at)
        .bind(retry_count + 1)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Moves every lease whose `lease_expiration` has passed back to
    /// `jobs`, incrementing `retry_count`. Intended as a routine-group
    /// `op` (§4.H "Lease expiry").
    pub async fn sweep_expired_leases(&self) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let expired = sqlx::query(
            "SELECT job_id, task_type, payload, scheduled_for, valid_until, created_at, retry_count
             FROM leased_jobs WHERE lease_expiration < ?",
        )
        .bind(&now)
        .fetch_all(&mut *tx)
        .await?;

        let count = expired.len() as u64;
        for row in &expired {
            let job_id: String = row.get("job_id");
            let task_type: String = row.get("task_type");
            let payload: String = row.get("payload");
            let scheduled_for: String = row.get("scheduled_for");
            let valid_until: Option<String> = row.get("valid_until");
            let created_at: String = row.get("created_at");
            let retry_count: i64 = row.get("retry_count");

            sqlx::query("DELETE FROM leased_jobs WHERE job_id = ?")
                .bind(&job_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO jobs (id, task_type, payload, scheduled_for, valid_until, created_at, retry_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&job_id)
            .bind(task_type)
            .bind(payload)
            .bind(scheduled_for)
            .bind(valid_until)
            .bind(created_at)
            .bind(retry_count + 1)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        if count > 0 {
            tracing::info!(count, "swept expired job leases back to pending");
        }
        Ok(count)
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, StoreError> {
    let id: String = row.get("id");
    let task_type: String = row.get("task_type");
    let payload_str: String = row.get("payload");
    let scheduled_for_str: String = row.get("scheduled_for");
    let valid_until_str: Option<String> = row.get("valid_until");
    let created_at_str: String = row.get("created_at");
    let retry_count: i64 = row.get("retry_count");

    Ok(Job {
        id,
        task_type,
        payload: serde_json::from_str(&payload_str)?,
        scheduled_for: DateTime::parse_from_rfc3339(&scheduled_for_str)
            .map_err(|e| StoreError::CodecError(e.to_string()))?
            .with_timezone(&Utc),
        valid_until: valid_until_str
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| StoreError::CodecError(e.to_string()))?,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)
            .map_err(|e| StoreError::CodecError(e.to_string()))?
            .with_timezone(&Utc),
        retry_count: retry_count as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn dispatch_happy_path() {
        let queue = DispatchQueue::new(memory_pool().await).await.unwrap();
        queue.enqueue(Job::new("t", serde_json::json!({"id": "j1"}))).await.unwrap();

        let leased = queue
            .assign_pending_job("A", std::time::Duration::from_secs(10), &["t"])
            .await
            .unwrap();
        assert_eq!(leased.leaser, "A");

        let second = queue
            .assign_pending_job("B", std::time::Duration::from_secs(10), &["t"])
            .await;
        assert!(matches!(second, Err(StoreError::NotFound(_))));

        queue.mark_job_as_done(&leased.job.id, "A").await.unwrap();

        let leftover = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        assert_eq!(leftover, 0);
        let leased_leftover = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM leased_jobs")
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        assert_eq!(leased_leftover, 0);
    }

    #[tokio::test]
    async fn dispatch_failure_path_requeues_with_incremented_retry_count() {
        let queue = DispatchQueue::new(memory_pool().await).await.unwrap();
        queue.enqueue(Job::new("t", serde_json::json!({}))).await.unwrap();
        let leased = queue
            .assign_pending_job("A", std::time::Duration::from_secs(10), &["t"])
            .await
            .unwrap();

        queue.mark_job_as_failed(&leased.job.id, "A").await.unwrap();

        let row = sqlx::query("SELECT retry_count FROM jobs WHERE id = ?")
            .bind(&leased.job.id)
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        let retry_count: i64 = row.get("retry_count");
        assert_eq!(retry_count, 1);
    }

    #[tokio::test]
    async fn mark_done_with_wrong_leaser_is_not_owner() {
        let queue = DispatchQueue::new(memory_pool().await).await.unwrap();
        queue.enqueue(Job::new("t", serde_json::json!({}))).await.unwrap();
        let leased = queue
            .assign_pending_job("A", std::time::Duration::from_secs(10), &["t"])
            .await
            .unwrap();

        let err = queue.mark_job_as_done(&leased.job.id, "B").await.unwrap_err();
        assert!(matches!(err, StoreError::NotOwner));

        // Lease untouched at the store.
        let still_leased: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leased_jobs WHERE job_id = ?")
            .bind(&leased.job.id)
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        assert_eq!(still_leased, 1);
    }

    #[tokio::test]
    async fn sweeper_requeues_expired_leases() {
        let queue = DispatchQueue::new(memory_pool().await).await.unwrap();
        queue.enqueue(Job::new("t", serde_json::json!({}))).await.unwrap();
        // Lease for a negative duration so it is immediately "expired".
        let _ = queue
            .assign_pending_job("A", std::time::Duration::from_millis(0), &["t"])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let swept = queue.sweep_expired_leases().await.unwrap();
        assert_eq!(swept, 1);

        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&queue.pool)
            .await
            .unwrap();
        assert_eq!(pending, 1);
    }
}
