//! # Job Queue
//!
//! Durable queue of jobs stored in the indexer's SQLite database.
//!
//! ## Features
//!
//! - **Persistence**: jobs survive process restarts
//! - **Leases**: a claimed job belongs to its worker until the lease expires,
//!   after which any worker may claim it again. A job whose lease expires on
//!   its last attempt is failed instead
//! - **Ownership**: a result is recorded only while the claim that produced
//!   it still holds the job; a worker that lost its lease gets
//!   [`IndexingError::LeaseLost`]
//! - **Retry Logic**: failed jobs are re-queued with exponential backoff
//!   until their attempts are exhausted
//! - **Atomic Claims**: claiming is a single `UPDATE ... RETURNING`, so two
//!   workers never claim the same due job
//!
//! ## Usage
//!
//! ```ignore
//! let queue = JobQueue::new(pool, 3).await?;
//! let id = queue.enqueue("index_user", vec![username, token]).await?;
//!
//! if let Some(job) = queue.claim("lastfm_worker", Duration::from_secs(900)).await? {
//!     match run(&job).await {
//!         Ok(()) => queue.mark_complete(&job).await?,
//!         Err(e) => {
//!             queue.mark_failed(&job, e.to_string(), e.is_retryable()).await?;
//!         }
//!     }
//! }
//! ```

use crate::error::{IndexingError, Result};
use crate::job::{now_ms, Job, JobId, JobStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Repository trait for persisting the job queue
#[async_trait]
pub trait JobQueueRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Write `job` back if the row is still running under the claim
    /// `job` came from (same worker, same attempt). Returns whether it was.
    async fn update_claimed(&self, job: &Job) -> Result<bool>;

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>>;

    /// Atomically claim the oldest due job for `worker`.
    ///
    /// Due means pending with `available_at <= now`, or running with an
    /// expired lease and attempts left. The claim increments `attempts` and
    /// sets the lease.
    async fn claim_next(&self, worker: &str, now: i64, lease_until: i64) -> Result<Option<Job>>;

    /// Fail running jobs whose lease expired on their last attempt.
    async fn fail_expired(&self, now: i64) -> Result<u64>;

    async fn count_by_status(&self, status: JobStatus) -> Result<u64>;

    /// Delete completed jobs that finished before `cutoff`.
    async fn delete_completed_before(&self, cutoff: i64) -> Result<u64>;

    async fn find_failed(&self) -> Result<Vec<Job>>;
}

/// SQLite implementation of the job queue repository
pub struct SqliteJobQueueRepository {
    pool: SqlitePool,
}

const JOB_COLUMNS: &str = "id, task_name, args, status, attempts, max_attempts, last_error, \
                           worker, created_at, updated_at, available_at, lease_expires_at, finished_at";

impl SqliteJobQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the queue table if it doesn't exist
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_queue (
                id TEXT PRIMARY KEY,
                task_name TEXT NOT NULL,
                args TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                last_error TEXT,
                worker TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                available_at INTEGER NOT NULL,
                lease_expires_at INTEGER,
                finished_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_job_queue_due
            ON job_queue(status, available_at, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn job_from_row(row: &SqliteRow) -> Result<Job> {
        Ok(Job {
            id: JobId::from_string(&row.get::<String, _>("id"))?,
            task_name: row.get("task_name"),
            args: serde_json::from_str(&row.get::<String, _>("args"))?,
            status: row.get::<String, _>("status").parse()?,
            attempts: row.get::<i64, _>("attempts") as u32,
            max_attempts: row.get::<i64, _>("max_attempts") as u32,
            last_error: row.get("last_error"),
            worker: row.get("worker"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            available_at: row.get("available_at"),
            lease_expires_at: row.get("lease_expires_at"),
            finished_at: row.get("finished_at"),
        })
    }
}

#[async_trait]
impl JobQueueRepository for SqliteJobQueueRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_queue (
                id, task_name, args, status, attempts, max_attempts, last_error,
                worker, created_at, updated_at, available_at, lease_expires_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.task_name)
        .bind(serde_json::to_string(&job.args)?)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(&job.last_error)
        .bind(&job.worker)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.available_at)
        .bind(job.lease_expires_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_claimed(&self, job: &Job) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue SET
                status = ?,
                attempts = ?,
                last_error = ?,
                worker = ?,
                updated_at = ?,
                available_at = ?,
                lease_expires_at = ?,
                finished_at = ?
            WHERE id = ? AND status = 'running' AND worker = ? AND attempts = ?
            "#,
        )
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(&job.last_error)
        .bind(&job.worker)
        .bind(job.updated_at)
        .bind(job.available_at)
        .bind(job.lease_expires_at)
        .bind(job.finished_at)
        .bind(job.id.as_str())
        .bind(&job.worker)
        .bind(job.attempts as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {} FROM job_queue WHERE id = ?", JOB_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn claim_next(&self, worker: &str, now: i64, lease_until: i64) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE job_queue SET
                status = 'running',
                attempts = attempts + 1,
                worker = ?,
                updated_at = ?,
                lease_expires_at = ?
            WHERE id = (
                SELECT id FROM job_queue
                WHERE (status = 'pending' AND available_at <= ?)
                   OR (status = 'running' AND lease_expires_at <= ? AND attempts < max_attempts)
                ORDER BY available_at ASC, created_at ASC
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(worker)
        .bind(now)
        .bind(lease_until)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::job_from_row).transpose()
    }

    async fn fail_expired(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE job_queue SET
                status = 'failed',
                last_error = 'Lease expired on final attempt',
                updated_at = ?,
                lease_expires_at = NULL,
                finished_at = ?
            WHERE status = 'running'
              AND lease_expires_at <= ?
              AND attempts >= max_attempts
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn delete_completed_before(&self, cutoff: i64) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM job_queue WHERE status = 'completed' AND finished_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn find_failed(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM job_queue WHERE status = 'failed' ORDER BY updated_at DESC",
            JOB_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::job_from_row).collect()
    }
}

/// Durable job queue
pub struct JobQueue {
    repository: Arc<dyn JobQueueRepository>,
    max_attempts: u32,
}

impl JobQueue {
    /// Queue backed by the `job_queue` table in `pool`, created if missing.
    pub async fn new(pool: SqlitePool, max_attempts: u32) -> Result<Self> {
        let repository = SqliteJobQueueRepository::new(pool);
        repository.initialize().await?;

        Ok(Self::with_repository(Arc::new(repository), max_attempts))
    }

    pub fn with_repository(repository: Arc<dyn JobQueueRepository>, max_attempts: u32) -> Self {
        Self {
            repository,
            max_attempts,
        }
    }

    /// Write a job and return its id without waiting for it to run.
    pub async fn enqueue(&self, task_name: &str, args: Vec<String>) -> Result<JobId> {
        let job = Job::new(task_name, args, self.max_attempts);

        debug!(
            job_id = %job.id,
            task = %job.task_name,
            args = job.args.len(),
            "Enqueuing job"
        );

        self.repository.insert(&job).await?;
        Ok(job.id)
    }

    /// Claim the next due job for `worker`, leasing it for `lease`.
    pub async fn claim(&self, worker: &str, lease: Duration) -> Result<Option<Job>> {
        let now = now_ms();
        let lease_until = now.saturating_add(lease.as_millis().min(i64::MAX as u128) as i64);

        let expired = self.repository.fail_expired(now).await?;
        if expired > 0 {
            warn!(count = expired, "Failed jobs whose lease expired on their last attempt");
        }

        let job = self.repository.claim_next(worker, now, lease_until).await?;
        if let Some(job) = &job {
            debug!(
                job_id = %job.id,
                task = %job.task_name,
                worker,
                attempt = job.attempts,
                "Claimed job"
            );
        }

        Ok(job)
    }

    /// Record success of the delivery `claimed` came from.
    pub async fn mark_complete(&self, claimed: &Job) -> Result<()> {
        let mut job = claimed.clone();
        job.complete();
        self.store_result(&job).await?;

        info!(job_id = %job.id, task = %job.task_name, "Job completed successfully");
        Ok(())
    }

    /// Record failure of the delivery `claimed` came from. Returns whether
    /// the job will be retried.
    pub async fn mark_failed(&self, claimed: &Job, message: String, retryable: bool) -> Result<bool> {
        let mut job = claimed.clone();
        let id = job.id;
        let will_retry = job.fail(message, retryable);
        self.store_result(&job).await?;

        if will_retry {
            warn!(
                job_id = %id,
                task = %job.task_name,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                backoff_ms = job.next_retry_delay_ms(),
                error = ?job.last_error,
                "Job failed, will retry"
            );
        } else {
            warn!(
                job_id = %id,
                task = %job.task_name,
                attempt = job.attempts,
                error = ?job.last_error,
                "Job failed permanently"
            );
        }

        Ok(will_retry)
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.repository.find_by_id(id).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.repository.count_by_status(JobStatus::Pending).await?,
            running: self.repository.count_by_status(JobStatus::Running).await?,
            completed: self.repository.count_by_status(JobStatus::Completed).await?,
            failed: self.repository.count_by_status(JobStatus::Failed).await?,
        })
    }

    /// Delete completed jobs that finished more than `older_than` ago.
    pub async fn cleanup_completed(&self, older_than: Duration) -> Result<u64> {
        let cutoff = now_ms().saturating_sub(older_than.as_millis().min(i64::MAX as u128) as i64);
        let deleted = self.repository.delete_completed_before(cutoff).await?;
        info!(deleted_count = deleted, "Cleaned up completed jobs");
        Ok(deleted)
    }

    pub async fn failed_jobs(&self) -> Result<Vec<Job>> {
        self.repository.find_failed().await
    }

    async fn store_result(&self, job: &Job) -> Result<()> {
        if self.repository.update_claimed(job).await? {
            return Ok(());
        }

        let job_id = job.id.to_string();
        match self.repository.find_by_id(job.id).await? {
            Some(_) => Err(IndexingError::LeaseLost { job_id }),
            None => Err(IndexingError::JobNotFound { job_id }),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed
    }

    /// No job is waiting or running
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::db::create_test_pool;

    async fn queue(max_attempts: u32) -> JobQueue {
        let pool = create_test_pool().await.unwrap();
        JobQueue::new(pool, max_attempts).await.unwrap()
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_enqueue_and_claim() {
        let queue = queue(3).await;
        let id = queue
            .enqueue("index_user", args(&["flicker", "t0k3n"]))
            .await
            .unwrap();

        let job = queue
            .claim("lastfm_worker", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.args, args(&["flicker", "t0k3n"]));
        assert_eq!(job.worker.as_deref(), Some("lastfm_worker"));

        assert!(queue
            .claim("lastfm_worker", Duration::from_secs(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_is_fifo() {
        let queue = queue(3).await;
        let first = queue.enqueue("test_task", args(&["one"])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.enqueue("test_task", args(&["two"])).await.unwrap();

        let lease = Duration::from_secs(60);
        assert_eq!(queue.claim("w", lease).await.unwrap().unwrap().id, first);
        assert_eq!(queue.claim("w", lease).await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = queue(3).await;
        let id = queue.enqueue("index_user", args(&["flicker", "t"])).await.unwrap();

        let first = queue.claim("w1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.id, id);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.claim("w2", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(second.id, id);
        assert_eq!(second.attempts, 2);
        assert_eq!(second.worker.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn test_failed_job_backs_off_then_retries() {
        let queue = queue(3).await;
        let id = queue.enqueue("index_user", args(&["flicker", "t"])).await.unwrap();
        let lease = Duration::from_secs(60);

        let job = queue.claim("w", lease).await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert!(queue.mark_failed(&job, "source down".to_string(), true).await.unwrap());

        // Backoff of 200ms has not elapsed yet
        assert!(queue.claim("w", lease).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let retried = queue.claim("w", lease).await.unwrap().unwrap();
        assert_eq!(retried.attempts, 2);
        assert_eq!(retried.last_error.as_deref(), Some("source down"));
    }

    #[tokio::test]
    async fn test_job_fails_permanently_after_max_attempts() {
        let queue = queue(1).await;
        let id = queue.enqueue("index_user", args(&["flicker", "t"])).await.unwrap();

        let job = queue.claim("w", Duration::from_secs(60)).await.unwrap().unwrap();
        assert!(!queue.mark_failed(&job, "boom".to_string(), true).await.unwrap());

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert!(stats.is_idle());

        let failed = queue.failed_jobs().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);
    }

    #[tokio::test]
    async fn test_complete_and_cleanup() {
        let queue = queue(3).await;
        let id = queue.enqueue("test_task", args(&["hello", "t"])).await.unwrap();
        let claimed = queue.claim("w", Duration::from_secs(60)).await.unwrap().unwrap();
        queue.mark_complete(&claimed).await.unwrap();

        let job = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.finished_at.is_some());

        assert_eq!(queue.cleanup_completed(Duration::from_secs(3600)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.cleanup_completed(Duration::ZERO).await.unwrap(), 1);
        assert!(queue.get_job(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_unknown_job() {
        let queue = queue(3).await;
        let mut unknown = Job::new("test_task", vec![], 3);
        unknown.status = JobStatus::Running;
        unknown.worker = Some("w".to_string());
        unknown.attempts = 1;

        let result = queue.mark_complete(&unknown).await;
        assert!(matches!(result, Err(IndexingError::JobNotFound { .. })));
    }

    #[tokio::test]
    async fn test_expired_lease_on_last_attempt_fails_job() {
        let queue = queue(1).await;
        let id = queue.enqueue("index_user", args(&["flicker", "t"])).await.unwrap();

        let first = queue.claim("w", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.attempts, 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(queue.claim("w", Duration::ZERO).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(queue.claim("w", Duration::ZERO).await.unwrap().is_none());

        let job = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert!(job.finished_at.is_some());
        assert!(job.lease_expires_at.is_none());
        assert!(job.last_error.unwrap().contains("Lease expired"));

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert!(stats.is_idle());
    }

    #[tokio::test]
    async fn test_expired_lease_with_attempts_left_is_not_failed() {
        let queue = queue(2).await;
        let id = queue.enqueue("index_user", args(&["flicker", "t"])).await.unwrap();

        queue.claim("w1", Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = queue.claim("w2", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(second.id, id);
        assert_eq!(second.attempts, 2);
        assert_eq!(queue.stats().await.unwrap().failed, 0);
    }

    #[tokio::test]
    async fn test_stale_worker_cannot_overwrite_new_claim() {
        let queue = queue(3).await;
        let id = queue.enqueue("index_user", args(&["flicker", "t"])).await.unwrap();

        let stale = queue.claim("w1", Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let current = queue.claim("w2", Duration::from_secs(600)).await.unwrap().unwrap();
        assert_eq!(current.attempts, 2);

        let failed = queue.mark_failed(&stale, "timed out".to_string(), true).await;
        assert!(matches!(failed, Err(IndexingError::LeaseLost { .. })));
        let completed = queue.mark_complete(&stale).await;
        assert!(matches!(completed, Err(IndexingError::LeaseLost { .. })));

        let job = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.worker.as_deref(), Some("w2"));
        assert_eq!(job.attempts, 2);
        assert!(job.last_error.is_none());

        // Nobody else can take it while w2 holds the lease
        assert!(queue.claim("w3", Duration::from_secs(60)).await.unwrap().is_none());

        queue.mark_complete(&current).await.unwrap();
        assert_eq!(
            queue.get_job(id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_result_is_recorded_once() {
        let queue = queue(3).await;
        queue.enqueue("test_task", args(&["hello", "t"])).await.unwrap();
        let claimed = queue.claim("w", Duration::from_secs(60)).await.unwrap().unwrap();

        queue.mark_complete(&claimed).await.unwrap();
        let again = queue.mark_failed(&claimed, "late".to_string(), true).await;
        assert!(matches!(again, Err(IndexingError::LeaseLost { .. })));
        assert_eq!(queue.stats().await.unwrap().completed, 1);
    }

    #[test]
    fn test_queue_stats() {
        let stats = QueueStats {
            pending: 2,
            running: 1,
            completed: 4,
            failed: 1,
        };
        assert_eq!(stats.total(), 8);
        assert!(!stats.is_idle());
    }
}
