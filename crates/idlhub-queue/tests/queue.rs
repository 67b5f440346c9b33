//! Integration tests against a real Postgres instance.
//!
//! Set `DATABASE_URL` to run these; without it every test is a no-op skip.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use idlhub_queue::{Job, JobPayload, JobStatus, NewJob, Queue, UnitOfWork, Worker};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    Some(pool)
}

/// Create (or reset) the table for one payload kind.
async fn setup_table(pool: &PgPool, table: &str) -> anyhow::Result<()> {
    sqlx::query(
        "DO $$ BEGIN \
             CREATE TYPE job_status AS ENUM ('pending', 'processing', 'completed', 'failed'); \
         EXCEPTION WHEN duplicate_object THEN NULL; \
         END $$;",
    )
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} ( \
             id BIGSERIAL PRIMARY KEY, \
             payload JSONB NOT NULL, \
             status job_status NOT NULL DEFAULT 'pending', \
             attempts INTEGER NOT NULL DEFAULT 0, \
             max_attempts INTEGER NOT NULL DEFAULT 3, \
             created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), \
             processed_at TIMESTAMPTZ, \
             completed_at TIMESTAMPTZ, \
             error_message TEXT, \
             dedup_token TEXT UNIQUE \
         )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!("TRUNCATE {table}")).execute(pool).await?;
    Ok(())
}

macro_rules! skip_without_database {
    () => {
        match test_pool().await {
            Some(pool) => pool,
            None => {
                eprintln!("DATABASE_URL not set; skipping");
                return Ok(());
            }
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CountedJob {
    n: u32,
}

impl JobPayload for CountedJob {
    const TABLE: &'static str = "test_counted_jobs";
    const KIND: &'static str = "counted";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoundtripJob {
    label: String,
}

impl JobPayload for RoundtripJob {
    const TABLE: &'static str = "test_roundtrip_jobs";
    const KIND: &'static str = "roundtrip";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FlakyJob {
    succeed_on_attempt: i32,
}

impl JobPayload for FlakyJob {
    const TABLE: &'static str = "test_flaky_jobs";
    const KIND: &'static str = "flaky";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DedupJob {
    token: String,
}

impl JobPayload for DedupJob {
    const TABLE: &'static str = "test_dedup_jobs";
    const KIND: &'static str = "dedup";
}

#[tokio::test]
async fn enqueue_claim_complete_roundtrip() -> anyhow::Result<()> {
    let pool = skip_without_database!();
    setup_table(&pool, RoundtripJob::TABLE).await?;
    let queue = Queue::<RoundtripJob>::new(pool);

    let id = queue
        .enqueue(NewJob::new(RoundtripJob { label: "one".into() }, 3))
        .await?;

    let claimed = queue.claim_batch(10).await?;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].status, JobStatus::Processing);
    assert_eq!(claimed[0].attempts, 1);
    assert_eq!(claimed[0].payload.label, "one");
    assert!(claimed[0].processed_at.is_some());

    queue.update_status(id, JobStatus::Completed, None).await?;

    let job = queue.find(id).await?.expect("job still present");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert!(job.processed_at.is_some());
    assert!(job.completed_at.is_some());

    // Terminal states are absorbing: a second transition is a mismatch.
    let err = queue.update_status(id, JobStatus::Failed, None).await;
    assert!(matches!(err, Err(idlhub_queue::QueueError::StatusMismatch)));
    Ok(())
}

#[tokio::test]
async fn empty_batch_is_a_noop() -> anyhow::Result<()> {
    let pool = skip_without_database!();
    setup_table(&pool, DedupJob::TABLE).await?;
    let queue = Queue::<DedupJob>::new(pool);
    let ids = queue.enqueue_batch(Vec::new()).await?;
    assert!(ids.is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_token_rolls_back_the_whole_batch() -> anyhow::Result<()> {
    let pool = skip_without_database!();
    setup_table(&pool, DedupJob::TABLE).await?;
    let queue = Queue::<DedupJob>::new(pool.clone());

    queue
        .enqueue(NewJob::new(DedupJob { token: "a".into() }, 3).with_dedup_token("a"))
        .await?;

    // Second batch: one fresh job plus one duplicate. All-or-nothing.
    let result = queue
        .enqueue_batch(vec![
            NewJob::new(DedupJob { token: "b".into() }, 3).with_dedup_token("b"),
            NewJob::new(DedupJob { token: "a".into() }, 3).with_dedup_token("a"),
        ])
        .await;
    assert!(matches!(
        result,
        Err(idlhub_queue::EnqueueError::AlreadyExists)
    ));

    let counts = queue.counts().await?;
    assert_eq!(counts.pending, 1, "the fresh job must not have been committed");
    Ok(())
}

#[tokio::test]
async fn concurrent_claims_are_disjoint() -> anyhow::Result<()> {
    let pool = skip_without_database!();
    setup_table(&pool, CountedJob::TABLE).await?;
    let queue = Queue::<CountedJob>::new(pool);

    let jobs = (0..40).map(|n| NewJob::new(CountedJob { n }, 3)).collect();
    queue.enqueue_batch(jobs).await?;

    let claimers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.claim_batch(10).await })
        })
        .collect();

    let mut seen = std::collections::HashSet::new();
    let mut total = 0;
    for claimer in claimers {
        let batch = claimer.await??;
        total += batch.len();
        for job in batch {
            assert!(seen.insert(job.id), "job {} claimed twice", job.id);
        }
    }
    assert_eq!(total, 40);
    Ok(())
}

#[tokio::test]
async fn claims_come_back_oldest_first() -> anyhow::Result<()> {
    let pool = skip_without_database!();
    setup_table(&pool, CountedJob::TABLE).await?;
    let queue = Queue::<CountedJob>::new(pool);

    for n in 0..5 {
        queue.enqueue(NewJob::new(CountedJob { n }, 3)).await?;
    }

    let claimed = queue.claim_batch(5).await?;
    let order: Vec<u32> = claimed.iter().map(|job| job.payload.n).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    Ok(())
}

struct Flaky {
    runs: AtomicU32,
}

#[async_trait::async_trait]
impl UnitOfWork<FlakyJob> for Arc<Flaky> {
    async fn run(&self, job: &Job<FlakyJob>) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if job.attempts >= job.payload.succeed_on_attempt {
            Ok(())
        } else {
            anyhow::bail!("attempt {} too early", job.attempts)
        }
    }
}

#[tokio::test]
async fn failing_job_retries_then_fails_with_last_message() -> anyhow::Result<()> {
    let pool = skip_without_database!();
    setup_table(&pool, FlakyJob::TABLE).await?;
    let queue = Queue::<FlakyJob>::new(pool);

    // Never succeeds within max_attempts = 2.
    let id = queue
        .enqueue(NewJob::new(FlakyJob { succeed_on_attempt: 99 }, 2))
        .await?;

    let work = Arc::new(Flaky { runs: AtomicU32::new(0) });
    let mut handle = Worker::new(queue.clone(), work.clone())
        .poll_interval(Duration::from_millis(20))
        .jitter(Duration::from_millis(5))
        .spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = queue.find(id).await?.expect("job present");
        if job.status == JobStatus::Failed {
            assert_eq!(job.attempts, 2);
            let message = job.error_message.expect("failure message recorded");
            assert!(message.contains("attempt 2 too early"), "got: {message}");
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "job never failed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(work.runs.load(Ordering::SeqCst), 2);
    handle.stop().await;
    // stop() is idempotent.
    handle.stop().await;
    Ok(())
}

#[tokio::test]
async fn transient_failure_bounces_back_to_pending() -> anyhow::Result<()> {
    let pool = skip_without_database!();
    setup_table(&pool, FlakyJob::TABLE).await?;
    let queue = Queue::<FlakyJob>::new(pool);

    let id = queue
        .enqueue(NewJob::new(FlakyJob { succeed_on_attempt: 2 }, 5))
        .await?;

    // First cycle by hand: claim, fail, bounce.
    let claimed = queue.claim_batch(1).await?;
    assert_eq!(claimed[0].attempts, 1);
    queue
        .update_status(id, JobStatus::Pending, Some("not yet"))
        .await?;

    let job = queue.find(id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.error_message.as_deref(), Some("not yet"));

    // Second cycle: eligible again, attempts increments once per cycle.
    let claimed = queue.claim_batch(1).await?;
    assert_eq!(claimed[0].id, id);
    assert_eq!(claimed[0].attempts, 2);
    queue.update_status(id, JobStatus::Completed, None).await?;
    Ok(())
}
