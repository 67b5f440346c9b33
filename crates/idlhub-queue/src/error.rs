use thiserror::Error;

/// Errors surfaced by [`crate::Queue::enqueue_batch`].
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// A job with the same dedup token already exists. The whole batch was
    /// rolled back; nothing was inserted.
    #[error("job already enqueued")]
    AlreadyExists,

    #[error("failed to serialize job payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for EnqueueError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return EnqueueError::AlreadyExists;
            }
        }
        EnqueueError::Database(err)
    }
}

/// Errors surfaced by claim and status-transition operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The conditional update matched zero rows: the job is absent or was
    /// already moved out of `processing` by a racing worker. Callers treat
    /// this as benign in most flows.
    #[error("job not found or not in the expected status")]
    StatusMismatch,

    #[error("failed to decode job payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
