use sqlx::PgPool;
use tracing::instrument;

use crate::job::JobRow;
use crate::{EnqueueError, Job, JobCounts, JobPayload, JobStatus, NewJob, QueueError};

/// Handle to one job table. Cloning is cheap; the pool is shared.
#[derive(Debug, Clone)]
pub struct Queue<P> {
    pool: PgPool,
    _payload: std::marker::PhantomData<fn() -> P>,
}

impl<P: JobPayload> Queue<P> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _payload: std::marker::PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert one job in `pending` state.
    pub async fn enqueue(&self, job: NewJob<P>) -> Result<i64, EnqueueError> {
        let mut ids = self.enqueue_batch(vec![job]).await?;
        Ok(ids.pop().unwrap_or_default())
    }

    /// Insert all jobs as `pending` in one all-or-nothing transaction.
    ///
    /// An empty batch succeeds as a no-op. A unique-constraint conflict on
    /// any job's dedup token fails the whole batch with
    /// [`EnqueueError::AlreadyExists`] and commits nothing.
    #[instrument(name = "queue.enqueue_batch", skip_all, fields(kind = P::KIND, count = jobs.len()))]
    pub async fn enqueue_batch(&self, jobs: Vec<NewJob<P>>) -> Result<Vec<i64>, EnqueueError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "INSERT INTO {} (payload, max_attempts, dedup_token) \
             VALUES ($1, $2, $3) RETURNING id",
            P::TABLE
        );

        let mut tx = self.pool.begin().await.map_err(EnqueueError::Database)?;
        let mut ids = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let payload = serde_json::to_value(&job.payload)?;
            let id = sqlx::query_scalar::<_, i64>(&sql)
                .bind(payload)
                .bind(job.max_attempts)
                .bind(job.dedup_token.as_deref())
                .fetch_one(&mut *tx)
                .await?;
            ids.push(id);
        }
        tx.commit().await.map_err(EnqueueError::Database)?;

        Ok(ids)
    }

    /// Atomically claim up to `limit` pending jobs, oldest-created-first.
    ///
    /// Selection uses `FOR UPDATE SKIP LOCKED`, so concurrent claimers get
    /// pairwise-disjoint sets and a slow claimant never stalls a fast one.
    /// Claimed rows are flipped to `processing` with `attempts + 1` and
    /// `processed_at` stamped before the transaction commits; no lock
    /// outlives the claim.
    #[instrument(name = "queue.claim_batch", skip(self), fields(kind = P::KIND))]
    pub async fn claim_batch(&self, limit: i64) -> Result<Vec<Job<P>>, QueueError> {
        let sql = format!(
            "WITH picked AS ( \
                 SELECT id FROM {table} \
                 WHERE status = 'pending' \
                 ORDER BY created_at, id \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT $1 \
             ) \
             UPDATE {table} AS j \
             SET status = 'processing', attempts = j.attempts + 1, processed_at = NOW() \
             FROM picked \
             WHERE j.id = picked.id \
             RETURNING j.id, j.payload, j.status, j.attempts, j.max_attempts, \
                       j.created_at, j.processed_at, j.completed_at, j.error_message",
            table = P::TABLE
        );

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(limit)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let mut jobs = rows
            .into_iter()
            .map(JobRow::decode)
            .collect::<Result<Vec<_>, _>>()?;
        // UPDATE .. RETURNING does not guarantee row order.
        jobs.sort_by_key(|job| (job.created_at, job.id));
        Ok(jobs)
    }

    /// Move a job out of `processing`.
    ///
    /// The update is conditional on the job currently being `processing`;
    /// if zero rows match (already transitioned by a race, or the job is
    /// gone) this returns [`QueueError::StatusMismatch`] and changes
    /// nothing. `completed_at` is stamped on terminal transitions only.
    #[instrument(name = "queue.update_status", skip(self, error), fields(kind = P::KIND))]
    pub async fn update_status(
        &self,
        id: i64,
        new_status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let sql = if new_status.is_terminal() {
            format!(
                "UPDATE {} SET status = $2, error_message = $3, completed_at = NOW() \
                 WHERE id = $1 AND status = 'processing'",
                P::TABLE
            )
        } else {
            format!(
                "UPDATE {} SET status = $2, error_message = $3 \
                 WHERE id = $1 AND status = 'processing'",
                P::TABLE
            )
        };

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(new_status)
            .bind(error)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::StatusMismatch);
        }
        Ok(())
    }

    /// Fetch one job by id. Used by tests and the stats surface.
    pub async fn find(&self, id: i64) -> Result<Option<Job<P>>, QueueError> {
        let sql = format!(
            "SELECT id, payload, status, attempts, max_attempts, created_at, \
                    processed_at, completed_at, error_message \
             FROM {} WHERE id = $1",
            P::TABLE
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::decode).transpose()
    }

    /// Per-status row counts.
    pub async fn counts(&self) -> Result<JobCounts, QueueError> {
        let sql = format!(
            "SELECT status, COUNT(*) FROM {} GROUP BY status",
            P::TABLE
        );
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(&sql)
            .fetch_all(&self.pool)
            .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match status {
                JobStatus::Pending => counts.pending = count,
                JobStatus::Processing => counts.processing = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
