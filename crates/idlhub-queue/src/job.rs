use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::FromRow;

use crate::QueueError;

/// A job kind. Each kind persists into its own table with the shared column
/// shape (`id, payload, status, attempts, max_attempts, created_at,
/// processed_at, completed_at, error_message, dedup_token`).
pub trait JobPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table this kind is stored in.
    const TABLE: &'static str;

    /// Human-readable kind name, used in log output.
    const KIND: &'static str;
}

/// Job lifecycle status.
///
/// `attempts` increments only on the pending -> processing edge. The only
/// backward edge is processing -> pending (retry); `completed` and `failed`
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this status permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A job to be inserted in `pending` state.
#[derive(Debug, Clone)]
pub struct NewJob<P> {
    pub payload: P,
    pub max_attempts: i32,
    /// Optional uniqueness key. Enqueueing a second job with the same token
    /// fails the whole batch with `AlreadyExists`.
    pub dedup_token: Option<String>,
}

impl<P> NewJob<P> {
    pub fn new(payload: P, max_attempts: i32) -> Self {
        Self {
            payload,
            max_attempts,
            dedup_token: None,
        }
    }

    pub fn with_dedup_token(mut self, token: impl Into<String>) -> Self {
        self.dedup_token = Some(token.into());
        self
    }
}

/// A claimed or inspected job.
#[derive(Debug, Clone)]
pub struct Job<P> {
    pub id: i64,
    pub payload: P,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl<P> Job<P> {
    /// Whether a failed run should bounce back to `pending` rather than
    /// terminate in `failed`. `attempts` already counts the run that just
    /// failed.
    pub fn retryable(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Raw row shape shared by every job table.
#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    pub id: i64,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl JobRow {
    pub(crate) fn decode<P: JobPayload>(self) -> Result<Job<P>, QueueError> {
        Ok(Job {
            id: self.id,
            payload: serde_json::from_value(self.payload)?,
            status: self.status,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            created_at: self.created_at,
            processed_at: self.processed_at,
            completed_at: self.completed_at,
            error_message: self.error_message,
        })
    }
}

/// Per-status row counts for one job table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl std::fmt::Display for JobCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} pending, {} processing, {} completed, {} failed",
            self.pending, self.processing, self.completed, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn retryable_counts_the_failed_run() {
        let mut job = Job {
            id: 1,
            payload: (),
            status: JobStatus::Processing,
            attempts: 1,
            max_attempts: 3,
            created_at: Utc::now(),
            processed_at: None,
            completed_at: None,
            error_message: None,
        };
        assert!(job.retryable());
        job.attempts = 3;
        assert!(!job.retryable());
    }
}
