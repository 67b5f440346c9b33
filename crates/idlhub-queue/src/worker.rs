use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{Job, JobPayload, JobStatus, Queue, QueueError};

/// The injected, job-kind-specific function a worker executes once per
/// claimed job.
#[async_trait::async_trait]
pub trait UnitOfWork<P: JobPayload>: Send + Sync + 'static {
    async fn run(&self, job: &Job<P>) -> anyhow::Result<()>;
}

/// Timer-driven worker loop for one job kind.
///
/// Each tick claims a batch and executes the claimed jobs sequentially. A
/// failed run bounces the job back to `pending` while attempts remain,
/// otherwise parks it in `failed` with the captured message. Datastore
/// errors abort the tick; the next tick retries naturally.
pub struct Worker<P: JobPayload, U> {
    queue: Queue<P>,
    work: Arc<U>,
    poll_interval: Duration,
    jitter: Duration,
    claim_limit: i64,
}

impl<P: JobPayload, U: UnitOfWork<P>> Worker<P, U> {
    pub fn new(queue: Queue<P>, work: U) -> Self {
        Self {
            queue,
            work: Arc::new(work),
            poll_interval: Duration::from_secs(1),
            jitter: Duration::from_millis(100),
            claim_limit: 10,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Maximum random addition to each poll interval, against thundering
    /// herds when several workers poll the same table.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn claim_limit(mut self, limit: i64) -> Self {
        self.claim_limit = limit;
        self
    }

    /// Start the loop on a background task.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = info_span!("worker", kind = P::KIND);
        info!(kind = P::KIND, "starting worker");
        let handle = tokio::spawn(self.run(shutdown_rx).instrument(span));
        WorkerHandle {
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.sleep_duration()) => {
                    // The tick itself is never cancelled; stop() waits for it.
                    self.tick().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("worker stopped");
    }

    fn sleep_duration(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.poll_interval;
        }
        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..=jitter_millis);
        self.poll_interval + Duration::from_millis(extra)
    }

    async fn tick(&self) {
        let jobs = match self.queue.claim_batch(self.claim_limit).await {
            Ok(jobs) => jobs,
            Err(err) => {
                // Datastore unreachable or similar; nothing was marked, so
                // the next tick picks the same work up again.
                warn!(%err, "claim failed, skipping tick");
                return;
            }
        };

        for job in jobs {
            self.run_one(&job)
                .instrument(info_span!("job", job.id = job.id))
                .await;
        }
    }

    async fn run_one(&self, job: &Job<P>) {
        debug!(attempts = job.attempts, "running job");
        let outcome = match self.work.run(job).await {
            Ok(()) => self.queue.update_status(job.id, JobStatus::Completed, None).await,
            Err(err) => {
                let message = format!("{err:#}");
                if job.retryable() {
                    warn!(error = %message, "job failed, will retry");
                    self.queue
                        .update_status(job.id, JobStatus::Pending, Some(&message))
                        .await
                } else {
                    warn!(error = %message, "job failed permanently");
                    self.queue
                        .update_status(job.id, JobStatus::Failed, Some(&message))
                        .await
                }
            }
        };

        match outcome {
            Ok(()) => {}
            // Another worker or an operator moved the job first.
            Err(QueueError::StatusMismatch) => debug!("status already updated elsewhere"),
            Err(err) => warn!(%err, "failed to record job outcome"),
        }
    }
}

/// Handle for stopping a spawned worker.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for the in-flight tick to finish.
    ///
    /// Safe to call more than once; a hung unit-of-work is waited on, not
    /// cancelled.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!(%err, "worker task panicked");
            }
        }
    }
}
