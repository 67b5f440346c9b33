//! Durable Postgres-backed job queue for idlhub.
//!
//! One generic [`Queue`] type handles every job kind: payloads implement
//! [`JobPayload`] and name their own table. Claiming uses
//! `FOR UPDATE SKIP LOCKED` so concurrently polling workers never receive
//! overlapping job sets, and status transitions are guarded conditional
//! updates so a lost race is a benign no-op rather than corrupted state.

mod error;
mod job;
mod queue;
mod worker;

pub use error::{EnqueueError, QueueError};
pub use job::{Job, JobCounts, JobPayload, JobStatus, NewJob};
pub use queue::Queue;
pub use worker::{UnitOfWork, Worker, WorkerHandle};
